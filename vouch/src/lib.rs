//! Identity keys and compact self-signed bearer tokens
//!
//! This crate is the credential core for internal service-to-service
//! authentication. A process loads (or generates) a single asymmetric
//! [`IdentityKey`] at startup and uses it two ways:
//!
//! * directly, to sign and verify client credentials presented to a remote
//!   token authority, and
//! * through the [`token`] codec, to mint short-lived self-signed bearer
//!   tokens that other holders of the identity key can verify without any
//!   network round trip.
//!
//! Self-signed tokens are deliberately compact (well under 200 characters
//! for typical actors) because some consumers pass them through transports
//! with strict length ceilings.
//!
//! # Example
//!
//! ```
//! use vouch::{Actor, IdentityKey};
//! use vouch::clock::{DurationSecs, System};
//! use vouch::token;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let key = IdentityKey::generate(512)?;
//! let actor = Actor::new("svc-a", "read".parse()?);
//!
//! let issued = token::issue(
//!     &key,
//!     &actor,
//!     token::ExtraClaims::new(),
//!     DurationSecs(180),
//!     &System,
//! )?;
//!
//! let verified = issued.token().verify(&key, &System)?;
//! assert_eq!(verified.actor(), &actor);
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

mod actor;
pub mod clock;
pub mod error;
mod key;
pub mod token;

pub use actor::{Actor, ClientId, ClientIdRef, InvalidScopeToken, Scope, ScopeToken, ScopeTokenRef};
pub use key::{IdentityKey, KeyId, KeyIdRef};
#[doc(inline)]
pub use token::{BearerToken, BearerTokenRef};
