//! Common errors
//!
//! Verification failures are deliberately kept distinct so that a caller
//! can decide whether to re-authenticate (expired, signature mismatch) or
//! treat the failure as a bug in its own plumbing (malformed token).

#![allow(missing_copy_implementations)]

use std::error::Error as StdError;

use thiserror::Error;

use crate::clock::UnixTime;

/// A new identity key could not be generated
#[derive(Debug, Error)]
#[error("unable to generate identity key")]
pub struct KeyGenerationError {
    #[from]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

pub(crate) fn key_generation(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> KeyGenerationError {
    KeyGenerationError {
        source: source.into(),
    }
}

/// The key material was rejected
#[derive(Debug, Error)]
#[error("key rejected")]
pub struct KeyRejected {
    #[from]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

pub(crate) fn key_rejected(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> KeyRejected {
    KeyRejected {
        source: source.into(),
    }
}

/// The operation requires private key material that this key does not hold
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
#[error("cannot sign without a private key")]
pub struct MissingPrivateKey {
    _p: (),
}

pub(crate) const fn missing_private_key() -> MissingPrivateKey {
    MissingPrivateKey { _p: () }
}

/// The signature did not match the payload
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
#[error("signature mismatch")]
pub struct SignatureInvalid {
    _p: (),
}

pub(crate) const fn signature_invalid() -> SignatureInvalid {
    SignatureInvalid { _p: () }
}

/// Unexpected error (possibly a bug)
#[derive(Debug, Error)]
#[error("unexpected error")]
pub struct Unexpected {
    #[from]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

pub(crate) fn unexpected(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> Unexpected {
    Unexpected {
        source: source.into(),
    }
}

/// An error occurring while creating a signature
#[derive(Debug, Error)]
pub enum SigningError {
    /// The key cannot be used for signing operations
    #[error(transparent)]
    MissingPrivateKey(#[from] MissingPrivateKey),

    /// An unexpected error in the signing backend
    #[error(transparent)]
    Unexpected(#[from] Unexpected),
}

/// A bearer token could not be issued
#[derive(Debug, Error)]
pub enum IssueError {
    /// The token claims could not be signed
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// The token claims could not be serialized
    #[error("unable to serialize token claims")]
    Serialization(#[from] serde_json::Error),
}

/// The bearer token could not be parsed out into payload and signature sections
#[derive(Debug, Error)]
#[error("malformed bearer token")]
pub struct MalformedToken {
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

pub(crate) const fn malformed_token() -> MalformedToken {
    MalformedToken { source: None }
}

pub(crate) fn malformed_token_source(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> MalformedToken {
    MalformedToken {
        source: Some(source.into()),
    }
}

/// The token's advertised validity window has passed
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
#[error("token expired at {expiry}")]
pub struct ExpiredToken {
    expiry: UnixTime,
}

impl ExpiredToken {
    /// The time at which the token expired
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }
}

pub(crate) const fn expired_token(expiry: UnixTime) -> ExpiredToken {
    ExpiredToken { expiry }
}

/// An error occurring while verifying a bearer token
#[derive(Debug, Error)]
pub enum TokenVerifyError {
    /// The token wire format could not be parsed
    #[error(transparent)]
    Malformed(#[from] MalformedToken),

    /// The token signature does not match the payload
    #[error(transparent)]
    SignatureInvalid(#[from] SignatureInvalid),

    /// The token is past its expiry
    #[error(transparent)]
    Expired(#[from] ExpiredToken),

    /// The verifying key cannot check self-signed tokens
    #[error("key cannot verify self-signed tokens")]
    KeyUnusable(#[from] MissingPrivateKey),
}

impl TokenVerifyError {
    /// Whether the token was rejected as unparseable
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }

    /// Whether the token was rejected due to a signature mismatch
    #[must_use]
    pub fn is_signature_invalid(&self) -> bool {
        matches!(self, Self::SignatureInvalid(_))
    }

    /// Whether the token was rejected as expired
    #[must_use]
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired(_))
    }
}
