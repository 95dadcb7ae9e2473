//! A caching wrapper that keeps a minimum validity window on hand
//!
//! The cache refreshes a credential well before it expires so that a
//! credential handed to a caller remains usable for the duration of any
//! reasonable downstream operation. A credential that is still valid but
//! inside the safety margin is treated as unusable and refreshed.

use std::error;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use vouch::clock::{Clock, DurationSecs, System};

use super::{BoxedSourceError, IntoDefensive, TokenSource};
use crate::Credential;

/// The default safety margin, 60 minutes
///
/// A cached credential is refreshed once less than this much validity
/// remains. The margin must be strictly shorter than the lifetime of the
/// credentials the wrapped source produces, or every fetch becomes a
/// refresh.
pub const DEFAULT_SAFETY_MARGIN: DurationSecs = DurationSecs(60 * 60);

/// A wrapper that caches credentials from an underlying source and
/// guarantees a minimum remaining validity on everything it returns
///
/// Refreshes are single-flight: when the cached credential is missing or
/// inside the safety margin, exactly one caller performs the refresh while
/// concurrent callers wait for its outcome. Callers that were already
/// waiting when a refresh resolves share that refresh's result, success or
/// failure, rather than piling further requests onto a struggling
/// authority.
#[derive(Debug)]
pub struct DefensiveCache<S, C = System> {
    inner: S,
    safety_margin: DurationSecs,
    clock: C,
    completions: AtomicU64,
    entry: tokio::sync::Mutex<Entry>,
}

#[derive(Debug, Default)]
struct Entry {
    current: Option<Credential>,
    /// Number of refresh attempts that have resolved, success or failure
    completed: u64,
    last_failure: Option<Arc<BoxedSourceError>>,
}

impl<S> DefensiveCache<S> {
    /// Wraps `inner` with the default safety margin and the system clock
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            safety_margin: DEFAULT_SAFETY_MARGIN,
            clock: System,
            completions: AtomicU64::new(0),
            entry: tokio::sync::Mutex::new(Entry::default()),
        }
    }
}

impl<S, C> DefensiveCache<S, C> {
    /// Overrides the safety margin
    pub fn with_safety_margin(mut self, margin: DurationSecs) -> Self {
        self.safety_margin = margin;
        self
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> DefensiveCache<S, D> {
        DefensiveCache {
            inner: self.inner,
            safety_margin: self.safety_margin,
            clock,
            completions: self.completions,
            entry: self.entry,
        }
    }

    /// Unwraps the cache, returning the underlying source
    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S, C> TokenSource for DefensiveCache<S, C>
where
    S: TokenSource,
    C: Clock + Send + Sync,
{
    type Error = RefreshFailedError;

    async fn fetch(&self) -> Result<Credential, Self::Error> {
        // The epoch observed before joining the queue tells us, once we
        // hold the guard, whether someone else's refresh resolved while we
        // were waiting on it.
        let joined = self.completions.load(Ordering::Acquire);

        let mut entry = self.entry.lock().await;
        let now = self.clock.now();

        if let Some(credential) = &entry.current {
            if credential.valid_for_at_least(self.safety_margin, now) {
                tracing::debug!(
                    expiry = credential.expiry().0,
                    "defensive cache hit"
                );
                return Ok(credential.clone());
            }
            tracing::debug!(
                expiry = credential.expiry().0,
                margin = self.safety_margin.0,
                "cached credential inside the safety margin"
            );
        }

        if entry.completed > joined {
            // A refresh resolved while we were queued. Its outcome stands
            // in for our own attempt.
            if let Some(credential) = &entry.current {
                return Ok(credential.clone());
            }
            if let Some(failure) = &entry.last_failure {
                return Err(RefreshFailedError::shared(Arc::clone(failure)));
            }
            // A resolved attempt always records one of the two; falling
            // through to a fresh refresh is the worst case.
        }

        tracing::info!("refreshing credential");
        let outcome = self.inner.fetch().await;
        entry.completed += 1;
        self.completions
            .store(entry.completed, Ordering::Release);

        match outcome {
            Ok(credential) => {
                tracing::info!(
                    expiry = credential.expiry().0,
                    lifetime = credential.lifetime().0,
                    "credential refreshed"
                );
                entry.last_failure = None;
                entry.current = Some(credential.clone());
                Ok(credential)
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "credential refresh failed, discarding stale credential"
                );
                let shared: Arc<BoxedSourceError> = Arc::new(Box::new(err));
                entry.current = None;
                entry.last_failure = Some(Arc::clone(&shared));
                Err(RefreshFailedError::shared(shared))
            }
        }
    }
}

impl<S, C> IntoDefensive for DefensiveCache<S, C>
where
    S: TokenSource,
    C: Clock + Send + Sync,
{
    type Source = S;

    /// Collapses instead of stacking: rebuilding a cache around a cache
    /// would double the locking and refresh the inner layer through the
    /// outer one, so the innermost source is re-wrapped directly. The
    /// safety margin carries over; a custom clock does not.
    fn into_defensive(self) -> DefensiveCache<S> {
        DefensiveCache::new(self.inner).with_safety_margin(self.safety_margin)
    }
}

/// The most recent refresh attempt did not produce a usable credential
///
/// Every caller that observed the same attempt receives the same
/// underlying failure.
#[derive(Debug, Clone)]
pub struct RefreshFailedError {
    source: Arc<BoxedSourceError>,
}

impl RefreshFailedError {
    fn shared(source: Arc<BoxedSourceError>) -> Self {
        Self { source }
    }
}

impl fmt::Display for RefreshFailedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unable to refresh credential")
    }
}

impl error::Error for RefreshFailedError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(&**self.source as &(dyn error::Error + 'static))
    }
}
