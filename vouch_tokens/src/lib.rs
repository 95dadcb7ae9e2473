//! Credential sources, defensive caching, and context binding
//!
//! This crate turns the [`vouch`] credential core into something a service
//! can actually run on. A [`TokenSource`] produces a fresh [`Credential`]
//! on demand; two sources are provided:
//!
//! * [`SelfSignedSource`] mints a compact token locally from the process
//!   identity key. It needs no network path at all, which is the point: a
//!   detached worker with no route back to the authority can still present
//!   a verifiable credential.
//! * [`ExchangeSource`] trades an identity-key-signed client assertion for
//!   a longer-lived credential issued by a remote authority.
//!
//! Either source can be wrapped in a [`DefensiveCache`], which reuses a
//! credential for as long as it remains valid past a safety margin and
//! otherwise refreshes it exactly once no matter how many callers arrive
//! at the same moment. The margin exists because credentials are sometimes
//! handed to long-running consumers that cannot refresh for themselves.
//!
//! Finally, a [`Context`] carries the chosen source (and the identity key)
//! through a request's call tree explicitly, so that outbound calls can
//! authenticate without any process-global mutable state.
//!
//! ```
//! use std::sync::Arc;
//! use vouch::{Actor, IdentityKey};
//! use vouch_tokens::sources::IntoDefensive;
//! use vouch_tokens::{Context, SelfSignedSource};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let key = Arc::new(IdentityKey::generate(2048)?);
//! let actor = Actor::new("svc-a", "read".parse()?);
//!
//! let source = SelfSignedSource::new(key.clone(), actor).into_defensive();
//!
//! let ctx = Context::new()
//!     .with_identity_key(key)
//!     .with_credentials(source);
//!
//! let bearer = ctx.authenticate_outbound().await?;
//! # let _ = bearer;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod context;
mod credential;
pub mod sources;

pub use context::{Context, NoCredentialBound, NoIdentityKeyBound, OutboundAuthError};
pub use credential::{Credential, CredentialStatus};
#[doc(inline)]
pub use sources::{
    cache::DefensiveCache, exchange::ExchangeSource, self_signed::SelfSignedSource, DynTokenSource,
    TokenSource,
};
