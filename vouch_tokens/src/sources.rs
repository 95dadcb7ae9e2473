//! Credential sources
//!
//! A [`TokenSource`] produces a fresh credential on demand. Sources take
//! `&self` and are shared across tasks; anything that needs serialization
//! (like the defensive cache's refresh) guards itself internally.

use std::error;

use async_trait::async_trait;

use crate::Credential;

pub mod cache;
pub mod exchange;
pub mod self_signed;

use cache::DefensiveCache;

/// A boxed error from an erased credential source
pub type BoxedSourceError = Box<dyn error::Error + Send + Sync + 'static>;

/// An asynchronous source of credentials
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// The error type returned in the event that retrieving a credential
    /// fails
    type Error: error::Error + Send + Sync + 'static;

    /// Produces a fresh credential
    async fn fetch(&self) -> Result<Credential, Self::Error>;
}

/// An object-safe view of a [`TokenSource`]
///
/// Every `TokenSource` implements this automatically; it exists so that a
/// context can hold any source behind an `Arc<dyn DynTokenSource>`.
#[async_trait]
pub trait DynTokenSource: Send + Sync {
    /// Produces a fresh credential, boxing the source's error
    async fn fetch_credential(&self) -> Result<Credential, BoxedSourceError>;
}

#[async_trait]
impl<S: TokenSource> DynTokenSource for S {
    async fn fetch_credential(&self) -> Result<Credential, BoxedSourceError> {
        self.fetch().await.map_err(|e| Box::new(e) as BoxedSourceError)
    }
}

/// Wraps a source in a [`DefensiveCache`], collapsing nested wrapping
///
/// Wrapping an already-defensive source in another defensive cache would
/// add a redundant lock layer and double bookkeeping, so the impl for
/// `DefensiveCache` re-wraps the innermost source instead of stacking.
/// Implemented per concrete source type rather than as a blanket impl so
/// the collapse can be expressed in the type system.
pub trait IntoDefensive: TokenSource + Sized {
    /// The source that ends up directly inside the cache
    type Source: TokenSource;

    /// Wraps this source in a defensive cache with the default safety
    /// margin
    ///
    /// The produced cache always reads the system clock. Re-wrapping a
    /// cache that had a custom clock keeps its safety margin but not the
    /// clock; re-apply [`with_clock`][cache::DefensiveCache::with_clock]
    /// afterwards if one is needed.
    fn into_defensive(self) -> DefensiveCache<Self::Source>;
}
