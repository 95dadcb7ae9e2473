//! A token source that obtains credentials from a remote token authority
//!
//! The source proves possession of the process identity key by attaching a
//! signed client assertion to every request. The authority verifies the
//! assertion against the registered public key and responds with a bearer
//! credential scoped to the requested grant.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vouch::clock::{Clock, DurationSecs, System, UnixTime};
use vouch::error::SigningError;
use vouch::token::BearerToken;
use vouch::{Actor, IdentityKey, Scope};

use super::{cache::DefensiveCache, IntoDefensive, TokenSource};
use crate::Credential;

const GRANT_TYPE: &str = "identity-assertion";

/// A credential source that exchanges a signed identity assertion for a
/// bearer credential issued by a remote authority
#[derive(Debug)]
pub struct ExchangeSource<C = System> {
    client: reqwest::Client,
    token_url: reqwest::Url,
    key: Arc<IdentityKey>,
    actor: Actor,
    clock: C,
}

impl ExchangeSource {
    /// Constructs a source that requests credentials for `actor` from the
    /// authority at `token_url`
    pub fn new(
        client: reqwest::Client,
        token_url: reqwest::Url,
        key: Arc<IdentityKey>,
        actor: Actor,
    ) -> Self {
        Self {
            client,
            token_url,
            key,
            actor,
            clock: System,
        }
    }
}

impl<C> ExchangeSource<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> ExchangeSource<D> {
        ExchangeSource {
            client: self.client,
            token_url: self.token_url,
            key: self.key,
            actor: self.actor,
            clock,
        }
    }

    /// The actor this source requests credentials for
    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// Builds the signed proof-of-possession assertion attached to every
    /// token request
    ///
    /// The wire form is `base64url(claims JSON).base64url(RSA signature)`,
    /// verifiable with the public half of the identity key.
    fn client_assertion(&self, issued_at: UnixTime) -> Result<String, ExchangeError> {
        let claims = AssertionClaims {
            client_id: self.actor.client_id().as_str(),
            key_id: self.key.id().as_str(),
            iat: issued_at,
        };

        let json = serde_json::to_vec(&claims).map_err(ExchangeError::assertion)?;
        let engine = &base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let payload = engine.encode(&json);
        let signature = self.key.sign(payload.as_bytes())?;
        Ok(format!("{}.{}", payload, engine.encode(signature)))
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    client_id: &'a str,
    key_id: &'a str,
    iat: UnixTime,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    #[serde(skip_serializing_if = "Scope::is_empty")]
    scope: &'a Scope,
    client_assertion: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: BearerToken,
    expires_in: DurationSecs,
}

/// An error while attempting to obtain a credential from the authority
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Unable to produce the signed client assertion
    #[error("error constructing client assertion")]
    Assertion(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
    /// Unable to send the token request to the authority
    #[error("error sending request to authority")]
    RequestSend(#[source] reqwest::Error),
    /// Unable to read the response body
    #[error("error reading response body from authority")]
    BodyRead(#[source] reqwest::Error),
    /// The authority refused to issue a credential for this actor
    #[error("authority rejected the token request ({status}): {body}")]
    AuthorityRejected {
        /// The HTTP status returned by the authority
        status: reqwest::StatusCode,
        /// The body of the rejection
        body: String,
    },
    /// The authority responded with a body this client cannot interpret
    #[error("error deserializing token response from authority")]
    MalformedResponse(#[from] serde_json::Error),
}

impl ExchangeError {
    fn assertion(
        err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        Self::Assertion(err.into())
    }
}

impl From<SigningError> for ExchangeError {
    fn from(err: SigningError) -> Self {
        Self::assertion(err)
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> TokenSource for ExchangeSource<C> {
    type Error = ExchangeError;

    #[tracing::instrument(
        err,
        skip(self),
        fields(
            token_url = %self.token_url,
            client_id = %self.actor.client_id(),
        ),
    )]
    async fn fetch(&self) -> Result<Credential, Self::Error> {
        let now = self.clock.now();

        let request = TokenRequest {
            grant_type: GRANT_TYPE,
            client_id: self.actor.client_id().as_str(),
            scope: self.actor.scope(),
            client_assertion: self.client_assertion(now)?,
        };

        tracing::trace!("requesting credential from authority");

        let resp = self
            .client
            .post(self.token_url.clone())
            .json(&request)
            .send()
            .await
            .map_err(ExchangeError::RequestSend)?;

        let status = resp.status();
        tracing::debug!(
            response.status = status.as_u16(),
            "received response from issuing authority"
        );

        if !status.is_success() {
            let body = resp.text().await.map_err(ExchangeError::BodyRead)?;
            return Err(ExchangeError::AuthorityRejected { status, body });
        }

        let body = resp.bytes().await.map_err(ExchangeError::BodyRead)?;
        let token: TokenResponse = serde_json::from_slice(&body)?;

        tracing::info!(lifetime = token.expires_in.0, "credential obtained");

        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert("grant_type".to_owned(), "exchange".to_owned());

        Ok(Credential::new(
            token.access_token,
            now,
            now + token.expires_in,
            metadata,
        ))
    }
}

impl<C: Clock + Send + Sync> IntoDefensive for ExchangeSource<C> {
    type Source = Self;

    fn into_defensive(self) -> DefensiveCache<Self> {
        DefensiveCache::new(self)
    }
}
