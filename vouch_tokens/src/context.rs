//! Explicit, request-scoped binding of credentials and identity
//!
//! A [`Context`] is threaded through a request's call tree by hand. There
//! is deliberately no process-global fallback: code that needs to
//! authenticate outbound must have been handed a context with a source
//! bound, and a missing binding is a programming error surfaced as
//! [`NoCredentialBound`] rather than silently defaulted.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use vouch::token::BearerToken;
use vouch::IdentityKey;

use crate::sources::{BoxedSourceError, DynTokenSource};

/// An immutable bag of request-scoped bindings
///
/// Cloning is cheap; binding methods return a derived copy and leave the
/// original untouched, so a caller can narrow or extend a context for a
/// subtree without affecting its siblings.
#[derive(Clone, Default)]
pub struct Context {
    credentials: Option<Arc<dyn DynTokenSource>>,
    identity_key: Option<Arc<IdentityKey>>,
}

impl Context {
    /// An empty context with nothing bound
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives a context with `source` bound as the outbound credential
    /// source
    pub fn with_credentials(&self, source: impl DynTokenSource + 'static) -> Self {
        Self {
            credentials: Some(Arc::new(source)),
            identity_key: self.identity_key.clone(),
        }
    }

    /// Derives a context with an already-shared credential source bound
    pub fn with_shared_credentials(&self, source: Arc<dyn DynTokenSource>) -> Self {
        Self {
            credentials: Some(source),
            identity_key: self.identity_key.clone(),
        }
    }

    /// Derives a context with the process identity key bound
    pub fn with_identity_key(&self, key: Arc<IdentityKey>) -> Self {
        Self {
            credentials: self.credentials.clone(),
            identity_key: Some(key),
        }
    }

    /// The credential source bound to this context, if any
    pub fn credentials(&self) -> Result<&Arc<dyn DynTokenSource>, NoCredentialBound> {
        self.credentials.as_ref().ok_or(NoCredentialBound { _p: () })
    }

    /// The identity key bound to this context, if any
    pub fn identity_key(&self) -> Result<&Arc<IdentityKey>, NoIdentityKeyBound> {
        self.identity_key
            .as_ref()
            .ok_or(NoIdentityKeyBound { _p: () })
    }

    /// Produces a bearer token for an outbound call using the bound
    /// credential source
    pub async fn authenticate_outbound(&self) -> Result<BearerToken, OutboundAuthError> {
        let source = self.credentials()?;
        let credential = source
            .fetch_credential()
            .await
            .map_err(OutboundAuthError::Fetch)?;
        Ok(credential.token().to_owned())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("credentials", &self.credentials.is_some())
            .field("identity_key", &self.identity_key)
            .finish()
    }
}

/// No credential source has been bound to this context
#[derive(Debug, Error)]
#[error("no credential source bound to context")]
pub struct NoCredentialBound {
    _p: (),
}

/// No identity key has been bound to this context
#[derive(Debug, Error)]
#[error("no identity key bound to context")]
pub struct NoIdentityKeyBound {
    _p: (),
}

/// An error while authenticating an outbound call
#[derive(Debug, Error)]
pub enum OutboundAuthError {
    /// The context has no credential source to draw on
    #[error(transparent)]
    NotBound(#[from] NoCredentialBound),
    /// The bound source failed to produce a credential
    #[error("bound credential source failed to produce a credential")]
    Fetch(#[source] BoxedSourceError),
}

impl OutboundAuthError {
    /// Whether the failure was a missing binding rather than a source
    /// failure
    pub fn is_not_bound(&self) -> bool {
        matches!(self, Self::NotBound(_))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use vouch::clock::{DurationSecs, UnixTime};

    use super::*;
    use crate::sources::TokenSource;
    use crate::Credential;

    struct FixedSource;

    #[derive(Debug, Error)]
    #[error("fixed source failure")]
    struct FixedError;

    #[async_trait]
    impl TokenSource for FixedSource {
        type Error = FixedError;

        async fn fetch(&self) -> Result<Credential, Self::Error> {
            Ok(Credential::new(
                BearerToken::from("fixed-token"),
                UnixTime(1_000),
                UnixTime(1_000) + DurationSecs(600),
                Default::default(),
            ))
        }
    }

    struct FailingSource;

    #[async_trait]
    impl TokenSource for FailingSource {
        type Error = FixedError;

        async fn fetch(&self) -> Result<Credential, Self::Error> {
            Err(FixedError)
        }
    }

    #[tokio::test]
    async fn unbound_context_refuses_to_authenticate() {
        let ctx = Context::new();
        assert!(ctx.credentials().is_err());
        let err = ctx.authenticate_outbound().await.unwrap_err();
        assert!(err.is_not_bound());
    }

    #[tokio::test]
    async fn bound_context_produces_a_bearer_token() -> color_eyre::Result<()> {
        let ctx = Context::new().with_credentials(FixedSource);
        let bearer = ctx.authenticate_outbound().await?;
        assert_eq!(bearer.as_str(), "fixed-token");
        Ok(())
    }

    #[tokio::test]
    async fn source_failure_is_not_a_missing_binding() {
        let ctx = Context::new().with_credentials(FailingSource);
        let err = ctx.authenticate_outbound().await.unwrap_err();
        assert!(!err.is_not_bound());
        assert!(matches!(err, OutboundAuthError::Fetch(_)));
    }

    #[tokio::test]
    async fn derived_contexts_inherit_and_do_not_leak_back() -> color_eyre::Result<()> {
        let key = Arc::new(IdentityKey::generate(512)?);
        let base = Context::new().with_identity_key(key.clone());
        let derived = base.with_credentials(FixedSource);

        // The derived copy inherits the ancestor binding
        assert_eq!(derived.identity_key()?.id(), key.id());
        // The original is untouched by the derivation
        assert!(base.credentials().is_err());
        Ok(())
    }
}
