//! The compact self-signed bearer token codec
//!
//! A bearer token is two base64url sections separated by a `.`:
//!
//! ```text
//! eyJjaWQiOiJzdmMtYSIsInNjb3BlIjoicmVhZCIsIm...IjE3MjV9.X8oUe3tp4A9g-0qA1CSXh3mYtJ7cW0nTq1c0V0RkXhs
//! ```
//!
//! The first section is the claims payload in JSON: the actor's client ID
//! and scope, the issuance and expiry timestamps, and a small flat map of
//! extra claims tagging the issuance context. The second section is an
//! HMAC-SHA256 tag over the encoded payload, keyed by a secret derived
//! from the process identity key. Nothing in the payload is trusted until
//! the tag has been checked.
//!
//! The derived-secret construction keeps tokens compact: an RSA signature
//! from a production-strength key would alone exceed the ~200 character
//! ceiling some token-bearing transports impose.

use std::collections::BTreeMap;

use aliri_braid::braid;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, DurationSecs, UnixTime};
use crate::error::{self, IssueError, TokenVerifyError};
use crate::{Actor, ClientId, IdentityKey, Scope};

/// An opaque, URL-safe bearer token
#[braid(serde, debug = "owned", display = "owned")]
pub struct BearerToken;

impl std::fmt::Debug for BearerTokenRef {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("***BEARER TOKEN***")
    }
}

impl std::fmt::Display for BearerTokenRef {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if f.alternate() {
            f.write_str(&self.0)
        } else {
            f.write_str("***BEARER TOKEN***")
        }
    }
}

/// A small flat map of claims tagging issuance context
/// (for example, which flow issued the token)
pub type ExtraClaims = BTreeMap<String, String>;

/// Domain separation tag for the codec's derived HMAC secret
const TOKEN_SECRET_PURPOSE: &[u8] = b"vouch/self-signed-token/v1";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    cid: ClientId,
    #[serde(default, skip_serializing_if = "Scope::is_empty")]
    scope: Scope,
    iat: UnixTime,
    exp: UnixTime,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    ext: ExtraClaims,
}

/// A freshly issued bearer token together with its validity window
#[derive(Debug)]
pub struct IssuedToken {
    token: BearerToken,
    issued: UnixTime,
    expiry: UnixTime,
    lifetime: DurationSecs,
}

impl IssuedToken {
    /// The signed bearer token
    pub fn token(&self) -> &BearerTokenRef {
        &self.token
    }

    /// The time of issuance
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// The time past which verification rejects the token
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// The token's total validity duration
    pub fn lifetime(&self) -> DurationSecs {
        self.lifetime
    }

    /// Extracts the bearer token
    pub fn into_token(self) -> BearerToken {
        self.token
    }
}

/// The verified contents of a bearer token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    actor: Actor,
    extra: ExtraClaims,
    issued: UnixTime,
    expiry: UnixTime,
}

impl Verified {
    /// The actor the token speaks for
    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// The extra claims embedded at issuance
    pub fn extra(&self) -> &ExtraClaims {
        &self.extra
    }

    /// The time of issuance
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// The time past which the token is rejected
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// Extracts the actor and extra claims
    pub fn extract(self) -> (Actor, ExtraClaims) {
        (self.actor, self.extra)
    }
}

/// Issues a self-signed bearer token for the actor
///
/// A `ttl` of zero produces a token that is already expired; verification
/// will reject it at any time at or after issuance.
///
/// # Errors
///
/// Fails if the key holds no private material or the claims cannot be
/// serialized.
pub fn issue<C: Clock>(
    key: &IdentityKey,
    actor: &Actor,
    extra: ExtraClaims,
    ttl: DurationSecs,
    clock: &C,
) -> Result<IssuedToken, IssueError> {
    let issued = clock.now();
    let expiry = issued + ttl;

    let claims = Claims {
        cid: actor.client_id().to_owned(),
        scope: actor.scope().clone(),
        iat: issued,
        exp: expiry,
        ext: extra,
    };

    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);

    let secret = key
        .derived_secret(TOKEN_SECRET_PURPOSE)
        .map_err(error::SigningError::from)?;
    let tag = ring::hmac::sign(&secret, payload.as_bytes());

    let token = BearerToken::from(format!(
        "{}.{}",
        payload,
        URL_SAFE_NO_PAD.encode(tag.as_ref())
    ));

    Ok(IssuedToken {
        token,
        issued,
        expiry,
        lifetime: ttl,
    })
}

impl BearerTokenRef {
    /// Verifies a self-signed bearer token and recovers its contents
    ///
    /// The signature is checked before any claim is parsed or trusted, and
    /// expiry is checked against `clock` with no skew tolerance: a token is
    /// either within its advertised ttl or it is rejected.
    ///
    /// # Errors
    ///
    /// Each rejection is distinguishable: [`Malformed`] when the wire
    /// format cannot be parsed, [`SignatureInvalid`] when the tag does not
    /// match, [`Expired`] when the validity window has passed.
    ///
    /// [`Malformed`]: TokenVerifyError::Malformed
    /// [`SignatureInvalid`]: TokenVerifyError::SignatureInvalid
    /// [`Expired`]: TokenVerifyError::Expired
    pub fn verify<C: Clock>(
        &self,
        key: &IdentityKey,
        clock: &C,
    ) -> Result<Verified, TokenVerifyError> {
        let mut sections = self.as_str().splitn(2, '.');
        let (payload, tag) = match (sections.next(), sections.next()) {
            (Some(payload), Some(tag)) if !payload.is_empty() => (payload, tag),
            _ => return Err(error::malformed_token().into()),
        };

        let tag = URL_SAFE_NO_PAD
            .decode(tag)
            .map_err(error::malformed_token_source)?;

        let secret = key.derived_secret(TOKEN_SECRET_PURPOSE)?;
        ring::hmac::verify(&secret, payload.as_bytes(), &tag)
            .map_err(|_| error::signature_invalid())?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(error::malformed_token_source)?;
        let claims: Claims =
            serde_json::from_slice(&payload).map_err(error::malformed_token_source)?;

        if clock.now() >= claims.exp {
            return Err(error::expired_token(claims.exp).into());
        }

        Ok(Verified {
            actor: Actor::new(claims.cid, claims.scope),
            extra: claims.ext,
            issued: claims.iat,
            expiry: claims.exp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::ScopeToken;

    fn test_key() -> IdentityKey {
        IdentityKey::generate(512).expect("512-bit test key")
    }

    fn test_actor() -> Actor {
        Actor::new("svc-a", Scope::single(ScopeToken::from_static("read")))
    }

    #[test]
    fn round_trip_recovers_actor_and_claims() -> color_eyre::Result<()> {
        let key = test_key();
        let actor = test_actor();
        let clock = TestClock::new(UnixTime(1_700_000_000));

        let mut extra = ExtraClaims::new();
        extra.insert("grant_type".into(), "self-signed".into());

        let issued = issue(&key, &actor, extra.clone(), DurationSecs(180), &clock)?;
        let verified = issued.token().verify(&key, &clock)?;

        assert_eq!(verified.actor(), &actor);
        assert_eq!(verified.extra(), &extra);
        assert_eq!(verified.issued(), UnixTime(1_700_000_000));
        assert_eq!(verified.expiry(), UnixTime(1_700_000_180));
        Ok(())
    }

    #[test]
    fn self_signed_tokens_stay_compact() -> color_eyre::Result<()> {
        let key = test_key();
        let actor = test_actor();

        let mut extra = ExtraClaims::new();
        extra.insert("grant_type".into(), "self-signed".into());

        let issued = issue(
            &key,
            &actor,
            extra,
            DurationSecs(180 * 60),
            &TestClock::new(UnixTime(1_700_000_000)),
        )?;

        assert!(
            issued.token().as_str().len() < 200,
            "token too long: {} chars",
            issued.token().as_str().len()
        );
        Ok(())
    }

    #[test]
    fn flipping_any_byte_invalidates_the_token() -> color_eyre::Result<()> {
        let key = test_key();
        let clock = TestClock::new(UnixTime(1_700_000_000));

        let issued = issue(
            &key,
            &test_actor(),
            ExtraClaims::new(),
            DurationSecs(180),
            &clock,
        )?;
        let good = issued.token().as_str().as_bytes().to_vec();

        for position in 0..good.len() {
            let mut tampered = good.clone();
            tampered[position] ^= 0x01;
            let tampered = match String::from_utf8(tampered) {
                Ok(s) => s,
                // A flip that breaks UTF-8 could never reach the decoder.
                Err(_) => continue,
            };

            let err = BearerTokenRef::from_str(&tampered)
                .verify(&key, &clock)
                .expect_err("tampered token must not verify");
            assert!(
                err.is_malformed() || err.is_signature_invalid(),
                "unexpected error at byte {}: {:?}",
                position,
                err
            );
        }
        Ok(())
    }

    #[test]
    fn absurd_ttl_saturates_instead_of_panicking() -> color_eyre::Result<()> {
        let key = test_key();
        let clock = TestClock::new(UnixTime(1_700_000_000));

        let issued = issue(
            &key,
            &test_actor(),
            ExtraClaims::new(),
            DurationSecs(u64::MAX),
            &clock,
        )?;

        assert_eq!(issued.expiry(), UnixTime(u64::MAX));
        assert!(issued.token().verify(&key, &clock).is_ok());
        Ok(())
    }

    #[test]
    fn zero_ttl_tokens_are_expired_at_issuance() -> color_eyre::Result<()> {
        let key = test_key();
        let clock = TestClock::new(UnixTime(1_700_000_000));

        let issued = issue(
            &key,
            &test_actor(),
            ExtraClaims::new(),
            DurationSecs(0),
            &clock,
        )?;

        let err = issued.token().verify(&key, &clock).expect_err("expired");
        assert!(err.is_expired());
        Ok(())
    }

    #[test]
    fn verification_has_no_skew_tolerance() -> color_eyre::Result<()> {
        let key = test_key();
        let clock = TestClock::new(UnixTime(1_700_000_000));

        let issued = issue(
            &key,
            &test_actor(),
            ExtraClaims::new(),
            DurationSecs(180),
            &clock,
        )?;

        clock.set(UnixTime(1_700_000_179));
        assert!(issued.token().verify(&key, &clock).is_ok());

        clock.set(UnixTime(1_700_000_180));
        let err = issued.token().verify(&key, &clock).expect_err("expired");
        assert!(err.is_expired());
        Ok(())
    }

    #[test]
    fn expires_after_ttl_elapses() -> color_eyre::Result<()> {
        let key = test_key();
        let actor = test_actor();
        let clock = TestClock::new(UnixTime(1_700_000_000));

        // Three-minute token, checked again four minutes later.
        let issued = issue(&key, &actor, ExtraClaims::new(), DurationSecs(3 * 60), &clock)?;

        let verified = issued.token().verify(&key, &clock)?;
        assert_eq!(
            verified.actor().scope(),
            &Scope::single(ScopeToken::from_static("read"))
        );

        clock.advance(DurationSecs(4 * 60));
        let err = issued.token().verify(&key, &clock).expect_err("expired");
        assert!(err.is_expired());
        Ok(())
    }

    #[test]
    fn public_only_keys_cannot_verify_self_signed_tokens() -> color_eyre::Result<()> {
        let key = test_key();
        let clock = TestClock::new(UnixTime(1_700_000_000));

        let issued = issue(
            &key,
            &test_actor(),
            ExtraClaims::new(),
            DurationSecs(180),
            &clock,
        )?;

        let public = key.public_only()?;
        let err = issued
            .token()
            .verify(&public, &clock)
            .expect_err("public-only keys hold no derived secret");
        assert!(matches!(err, TokenVerifyError::KeyUnusable(_)));
        Ok(())
    }
}
