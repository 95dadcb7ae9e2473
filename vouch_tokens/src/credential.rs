use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vouch::clock::{Clock, DurationSecs, System, UnixTime};
use vouch::BearerToken;
use vouch::BearerTokenRef;

/// A bearer credential together with its validity window
///
/// Immutable once issued: a refresh produces a new `Credential`, never an
/// in-place update. The metadata map tags where the credential came from
/// (for example `grant_type`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    token: BearerToken,
    issued: UnixTime,
    expiry: UnixTime,
    lifetime: DurationSecs,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
}

/// A credential's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialStatus {
    /// The credential is within its validity window
    Valid,
    /// The credential's validity window has passed
    Expired,
}

impl Credential {
    /// Assembles a credential from its parts
    pub fn new(
        token: BearerToken,
        issued: UnixTime,
        expiry: UnixTime,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            token,
            issued,
            expiry,
            lifetime: expiry - issued,
            metadata,
        }
    }

    /// The opaque bearer string
    #[inline]
    pub fn token(&self) -> &BearerTokenRef {
        &self.token
    }

    /// The time the credential was issued
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// The time the credential expires
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// The credential's total validity duration
    #[inline]
    pub fn lifetime(&self) -> DurationSecs {
        self.lifetime
    }

    /// Source metadata tagging how the credential was obtained
    #[inline]
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// The credential's current lifecycle status
    #[inline]
    pub fn status(&self) -> CredentialStatus {
        self.status_at(System.now())
    }

    /// The credential's lifecycle status as of the provided time
    #[inline]
    pub fn status_at(&self, time: UnixTime) -> CredentialStatus {
        if time < self.expiry {
            CredentialStatus::Valid
        } else {
            CredentialStatus::Expired
        }
    }

    /// Whether the credential will still be valid for at least `margin`
    /// beyond the provided time
    #[inline]
    pub fn valid_for_at_least(&self, margin: DurationSecs, now: UnixTime) -> bool {
        self.expiry > now + margin
    }

    /// How much longer the credential remains valid as of the provided time
    #[inline]
    pub fn remaining_at(&self, time: UnixTime) -> DurationSecs {
        self.expiry - time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(issued: u64, expiry: u64) -> Credential {
        Credential::new(
            BearerToken::from("an-opaque-token"),
            UnixTime(issued),
            UnixTime(expiry),
            BTreeMap::new(),
        )
    }

    #[test]
    fn status_flips_exactly_at_expiry() {
        let cred = credential(1000, 1180);

        assert_eq!(cred.status_at(UnixTime(1179)), CredentialStatus::Valid);
        assert_eq!(cred.status_at(UnixTime(1180)), CredentialStatus::Expired);
        assert_eq!(cred.lifetime(), DurationSecs(180));
    }

    #[test]
    fn margin_check_is_strict() {
        let margin = DurationSecs(60);
        let now = UnixTime(1000);

        // Expires one second short of the margin: not usable.
        assert!(!credential(900, 1059).valid_for_at_least(margin, now));
        // Expires exactly at the margin boundary: still not usable.
        assert!(!credential(900, 1060).valid_for_at_least(margin, now));
        // One second past the margin: usable.
        assert!(credential(900, 1061).valid_for_at_least(margin, now));
    }
}
