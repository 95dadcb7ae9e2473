//! The process identity key
//!
//! Every process holds exactly one active [`IdentityKey`]: an RSA keypair
//! loaded once at startup and shared read-only (typically as an
//! `Arc<IdentityKey>`). The key signs client credentials presented to a
//! remote token authority and seeds the derived secret used by the compact
//! self-signed token codec. Rotation is out of scope.

use std::fmt;

use aliri_braid::braid;
use base64::Engine;
use openssl::{
    hash::MessageDigest,
    pkey::{HasPublic, PKey, PKeyRef, Private, Public},
    rsa::Rsa,
    sign::{Signer, Verifier},
};

use crate::error::{
    self, KeyGenerationError, KeyRejected, MissingPrivateKey, SignatureInvalid, SigningError,
    Unexpected,
};

/// The identifier of an identity key: the base64url SHA-256 fingerprint
/// of the public key in DER form
#[braid(serde, ref_doc = "A borrowed reference to a [`KeyId`]")]
pub struct KeyId;

const MIN_BIT_STRENGTH: u32 = 512;
const MAX_BIT_STRENGTH: u32 = 4096;

/// A process-wide asymmetric identity keypair
///
/// Immutable after load. Signing requires the private half; verification
/// works with either half.
pub struct IdentityKey {
    id: KeyId,
    key: MaybePrivate,
}

enum MaybePrivate {
    PublicAndPrivate {
        pkey: PKey<Private>,
        private_der: Vec<u8>,
    },
    PublicOnly(PKey<Public>),
}

impl IdentityKey {
    /// Generates a newly minted RSA identity keypair
    ///
    /// Strengths of 512 (test/bootstrap use only) through 4096 bits are
    /// supported.
    ///
    /// # Errors
    ///
    /// Fails with [`KeyGenerationError`] if the strength is unsupported or
    /// the backend cannot produce a key.
    pub fn generate(bit_strength: u32) -> Result<Self, KeyGenerationError> {
        if !(MIN_BIT_STRENGTH..=MAX_BIT_STRENGTH).contains(&bit_strength) {
            return Err(error::key_generation(format!(
                "unsupported key strength: {} bits",
                bit_strength
            )));
        }

        let rsa = Rsa::generate(bit_strength).map_err(error::key_generation)?;
        Self::from_openssl_private(rsa).map_err(|e| error::key_generation(e.to_string()))
    }

    /// Imports a private identity key from a PEM file
    ///
    /// # Errors
    ///
    /// The provided PEM file is not a valid RSA private key.
    pub fn from_pem(pem: &str) -> Result<Self, KeyRejected> {
        let pkey = PKey::private_key_from_pem(pem.as_bytes()).map_err(error::key_rejected)?;
        let rsa = pkey.rsa().map_err(error::key_rejected)?;
        Self::from_openssl_private(rsa)
    }

    /// Imports the public half of an identity key from a PEM file
    ///
    /// The resulting key can verify but not sign.
    ///
    /// # Errors
    ///
    /// The provided PEM file is not a valid RSA public key.
    pub fn public_key_from_pem(pem: &str) -> Result<Self, KeyRejected> {
        let rsa = Rsa::public_key_from_pem(pem.as_bytes()).map_err(error::key_rejected)?;
        let public_der = rsa.public_key_to_der().map_err(error::key_rejected)?;
        let pkey = PKey::from_rsa(rsa).map_err(error::key_rejected)?;

        Ok(Self {
            id: fingerprint(&public_der),
            key: MaybePrivate::PublicOnly(pkey),
        })
    }

    fn from_openssl_private(rsa: Rsa<Private>) -> Result<Self, KeyRejected> {
        let public_der = rsa.public_key_to_der().map_err(error::key_rejected)?;
        let private_der = rsa.private_key_to_der().map_err(error::key_rejected)?;
        let pkey = PKey::from_rsa(rsa).map_err(error::key_rejected)?;

        Ok(Self {
            id: fingerprint(&public_der),
            key: MaybePrivate::PublicAndPrivate { pkey, private_der },
        })
    }

    /// The key's fingerprint identifier
    pub fn id(&self) -> &KeyIdRef {
        &self.id
    }

    /// Whether this key holds private material and can sign
    #[must_use]
    pub fn can_sign(&self) -> bool {
        matches!(self.key, MaybePrivate::PublicAndPrivate { .. })
    }

    /// Exports the private keypair as a PEM file
    ///
    /// # Errors
    ///
    /// Fails if the key holds no private material.
    pub fn to_pem(&self) -> Result<String, SigningError> {
        let (pkey, _) = self.private()?;
        let pem = pkey
            .private_key_to_pem_pkcs8()
            .map_err(|e| SigningError::from(error::unexpected(e)))?;
        String::from_utf8(pem).map_err(|e| SigningError::from(error::unexpected(e)))
    }

    /// Exports the public half as a PEM file
    ///
    /// # Errors
    ///
    /// Fails only on a backend serialization error.
    pub fn public_pem(&self) -> Result<String, Unexpected> {
        let pem = match &self.key {
            MaybePrivate::PublicAndPrivate { pkey, .. } => {
                pkey.public_key_to_pem().map_err(error::unexpected)?
            }
            MaybePrivate::PublicOnly(pkey) => {
                pkey.public_key_to_pem().map_err(error::unexpected)?
            }
        };
        String::from_utf8(pem).map_err(error::unexpected)
    }

    /// Produces a verification-only copy of this key
    ///
    /// # Errors
    ///
    /// Fails only on a backend serialization error.
    pub fn public_only(&self) -> Result<Self, KeyRejected> {
        let pem = self.public_pem().map_err(|e| error::key_rejected(e.to_string()))?;
        Self::public_key_from_pem(&pem)
    }

    /// Signs the payload with the private key (RSA PKCS#1 v1.5, SHA-256)
    ///
    /// Deterministic for a given key and payload; never mutates key state.
    ///
    /// # Errors
    ///
    /// Fails if the key holds no private material or the backend rejects
    /// the operation.
    pub fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SigningError> {
        let (pkey, _) = self.private()?;

        let unexpected = |e: openssl::error::ErrorStack| SigningError::from(error::unexpected(e));

        let mut signer = Signer::new(MessageDigest::sha256(), pkey).map_err(unexpected)?;
        signer.update(payload).map_err(unexpected)?;
        signer.sign_to_vec().map_err(unexpected)
    }

    /// Verifies a signature over the payload; side-effect free
    ///
    /// # Errors
    ///
    /// Fails with [`SignatureInvalid`] if the signature does not match.
    pub fn verify(&self, payload: &[u8], signature: &[u8]) -> Result<(), SignatureInvalid> {
        match &self.key {
            MaybePrivate::PublicAndPrivate { pkey, .. } => verify_with(pkey, payload, signature),
            MaybePrivate::PublicOnly(pkey) => verify_with(pkey, payload, signature),
        }
    }

    /// Derives a purpose-bound HMAC-SHA256 secret from the private key
    /// material
    ///
    /// Used by the token codec so self-signed tokens stay compact; only
    /// holders of the private key can mint or verify them.
    pub(crate) fn derived_secret(
        &self,
        purpose: &[u8],
    ) -> Result<ring::hmac::Key, MissingPrivateKey> {
        let (_, private_der) = self.private()?;

        let mut ctx = ring::digest::Context::new(&ring::digest::SHA256);
        ctx.update(private_der);
        ctx.update(purpose);
        let seed = ctx.finish();

        Ok(ring::hmac::Key::new(ring::hmac::HMAC_SHA256, seed.as_ref()))
    }

    fn private(&self) -> Result<(&PKey<Private>, &[u8]), MissingPrivateKey> {
        match &self.key {
            MaybePrivate::PublicAndPrivate { pkey, private_der } => Ok((pkey, private_der)),
            MaybePrivate::PublicOnly(_) => Err(error::missing_private_key()),
        }
    }
}

fn verify_with<T: HasPublic>(
    pkey: &PKeyRef<T>,
    payload: &[u8],
    signature: &[u8],
) -> Result<(), SignatureInvalid> {
    let check = || -> Result<bool, openssl::error::ErrorStack> {
        let mut verifier = Verifier::new(MessageDigest::sha256(), pkey)?;
        verifier.update(payload)?;
        verifier.verify(signature)
    };

    match check() {
        Ok(true) => Ok(()),
        // An undecodable signature is reported as a stack error; both
        // outcomes mean the signature does not match this payload.
        Ok(false) | Err(_) => Err(error::signature_invalid()),
    }
}

fn fingerprint(public_der: &[u8]) -> KeyId {
    let digest = ring::digest::digest(&ring::digest::SHA256, public_der);
    KeyId::from(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_ref()))
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("IdentityKey")
            .field("id", &self.id)
            .field(
                "key",
                &match self.key {
                    MaybePrivate::PublicAndPrivate { .. } => "<private, redacted>",
                    MaybePrivate::PublicOnly(_) => "<public only>",
                },
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_signs_at_bootstrap_strength() -> color_eyre::Result<()> {
        let key = IdentityKey::generate(512)?;
        assert!(key.can_sign());

        let signature = key.sign(b"payload")?;
        key.verify(b"payload", &signature)?;
        Ok(())
    }

    #[test]
    fn rejects_unsupported_strengths() {
        assert!(IdentityKey::generate(0).is_err());
        assert!(IdentityKey::generate(256).is_err());
        assert!(IdentityKey::generate(1 << 20).is_err());
    }

    #[test]
    fn verify_rejects_tampered_payload() -> color_eyre::Result<()> {
        let key = IdentityKey::generate(512)?;
        let signature = key.sign(b"payload")?;

        assert!(key.verify(b"payload!", &signature).is_err());

        let mut bad_signature = signature.clone();
        bad_signature[0] ^= 0x01;
        assert!(key.verify(b"payload", &bad_signature).is_err());
        Ok(())
    }

    #[test]
    fn public_half_verifies_but_cannot_sign() -> color_eyre::Result<()> {
        let key = IdentityKey::generate(512)?;
        let signature = key.sign(b"payload")?;

        let public = key.public_only()?;
        assert!(!public.can_sign());
        assert_eq!(public.id(), key.id());

        public.verify(b"payload", &signature)?;
        assert!(matches!(
            public.sign(b"payload"),
            Err(SigningError::MissingPrivateKey(_))
        ));
        Ok(())
    }

    #[test]
    fn pem_round_trip_preserves_identity() -> color_eyre::Result<()> {
        let key = IdentityKey::generate(512)?;
        let reloaded = IdentityKey::from_pem(&key.to_pem()?)?;

        assert_eq!(key.id(), reloaded.id());

        let signature = reloaded.sign(b"payload")?;
        key.verify(b"payload", &signature)?;
        Ok(())
    }
}
