//! A source that issues credentials locally from the identity key
//!
//! No network round trip is involved, so this source keeps working when
//! the token authority is unreachable. That is its reason for existing:
//! isolated subprocesses with no network path back to the authority can
//! still present a valid, verifiable credential. The tokens it produces
//! are also far shorter than exchange-obtained ones, which matters for
//! consumers with strict credential-length ceilings.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use vouch::clock::{Clock, DurationSecs, System};
use vouch::error::IssueError;
use vouch::token::{self, ExtraClaims};
use vouch::{Actor, IdentityKey};

use super::{cache::DefensiveCache, IntoDefensive, TokenSource};
use crate::Credential;

/// The default validity of self-signed credentials
///
/// Long enough for any single operation of a detached consumer to
/// complete, and comfortably longer than the defensive cache's default
/// safety margin.
pub const DEFAULT_TTL: DurationSecs = DurationSecs(180 * 60);

/// A credential source that signs short-lived tokens locally
#[derive(Debug)]
pub struct SelfSignedSource<C = System> {
    key: Arc<IdentityKey>,
    actor: Actor,
    ttl: DurationSecs,
    clock: C,
}

impl SelfSignedSource {
    /// Constructs a source issuing credentials for `actor`, signed by the
    /// process identity key
    pub fn new(key: Arc<IdentityKey>, actor: Actor) -> Self {
        Self {
            key,
            actor,
            ttl: DEFAULT_TTL,
            clock: System,
        }
    }
}

impl<C> SelfSignedSource<C> {
    /// Overrides the validity duration of issued credentials
    pub fn with_ttl(mut self, ttl: DurationSecs) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> SelfSignedSource<D> {
        SelfSignedSource {
            key: self.key,
            actor: self.actor,
            ttl: self.ttl,
            clock,
        }
    }

    /// The actor this source issues credentials for
    pub fn actor(&self) -> &Actor {
        &self.actor
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> TokenSource for SelfSignedSource<C> {
    type Error = IssueError;

    async fn fetch(&self) -> Result<Credential, Self::Error> {
        let mut extra = ExtraClaims::new();
        extra.insert("grant_type".to_owned(), "self-signed".to_owned());

        let issued = token::issue(&self.key, &self.actor, extra, self.ttl, &self.clock)?;

        tracing::debug!(
            client_id = %self.actor.client_id(),
            expiry = issued.expiry().0,
            "issued self-signed credential"
        );

        let mut metadata = BTreeMap::new();
        metadata.insert("grant_type".to_owned(), "self-signed".to_owned());

        Ok(Credential::new(
            issued.token().to_owned(),
            issued.issued(),
            issued.expiry(),
            metadata,
        ))
    }
}

impl<C: Clock + Send + Sync> IntoDefensive for SelfSignedSource<C> {
    type Source = Self;

    fn into_defensive(self) -> DefensiveCache<Self> {
        DefensiveCache::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vouch::clock::{TestClock, UnixTime};

    #[tokio::test]
    async fn issues_verifiable_credentials() -> color_eyre::Result<()> {
        let key = Arc::new(IdentityKey::generate(512)?);
        let actor = Actor::new("svc-a", "read".parse()?);
        let clock = TestClock::new(UnixTime(1_700_000_000));

        let source =
            SelfSignedSource::new(key.clone(), actor.clone()).with_clock(clock.clone());

        let credential = source.fetch().await?;
        assert_eq!(credential.lifetime(), DEFAULT_TTL);
        assert_eq!(
            credential.metadata().get("grant_type").map(String::as_str),
            Some("self-signed")
        );

        let verified = credential.token().verify(&key, &clock)?;
        assert_eq!(verified.actor(), &actor);
        Ok(())
    }

    #[tokio::test]
    async fn each_fetch_mints_a_new_credential() -> color_eyre::Result<()> {
        let key = Arc::new(IdentityKey::generate(512)?);
        let actor = Actor::new("svc-a", vouch::Scope::empty());
        let clock = TestClock::new(UnixTime(1_700_000_000));

        let source = SelfSignedSource::new(key, actor)
            .with_ttl(DurationSecs(60))
            .with_clock(clock.clone());

        let first = source.fetch().await?;
        clock.advance(DurationSecs(10));
        let second = source.fetch().await?;

        assert_eq!(first.expiry(), UnixTime(1_700_000_060));
        assert_eq!(second.expiry(), UnixTime(1_700_000_070));
        assert_ne!(first.token().as_str(), second.token().as_str());
        Ok(())
    }
}
