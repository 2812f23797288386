//! Identity and attestation capabilities consumed by the progress endpoint.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use progress_core::model::UserId;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::{AttestationError, IdentityError};

/// Verifies a bearer credential and yields the caller's stable identifier.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// # Errors
    ///
    /// Returns `IdentityError::Rejected` for an invalid credential and
    /// `IdentityError::Unavailable` when verification could not be attempted.
    async fn verify(&self, token: &str) -> Result<UserId, IdentityError>;
}

/// Verifies a client attestation token.
#[async_trait]
pub trait AttestationVerifier: Send + Sync {
    /// # Errors
    ///
    /// Returns `AttestationError::Rejected` for an invalid token and
    /// `AttestationError::Unavailable` when verification could not be attempted.
    async fn verify(&self, token: &str) -> Result<(), AttestationError>;
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
///
/// The scheme is matched case-insensitively and must be followed by whitespace.
#[must_use]
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, rest) = header.split_once(|c: char| c.is_whitespace())?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = rest.trim();
    (!token.is_empty()).then_some(token)
}

//
// ─── STATIC ────────────────────────────────────────────────────────────────────
//

/// Fixed token table, for local development and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityVerifier {
    tokens: HashMap<String, UserId>,
}

impl StaticIdentityVerifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, user: UserId) -> Self {
        self.tokens.insert(token.into(), user);
        self
    }

    #[must_use]
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, UserId)>) -> Self {
        Self {
            tokens: pairs.into_iter().collect(),
        }
    }
}

#[async_trait]
impl IdentityVerifier for StaticIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<UserId, IdentityError> {
        self.tokens.get(token).cloned().ok_or(IdentityError::Rejected)
    }
}

/// Accepts only tokens from a fixed set.
#[derive(Debug, Clone, Default)]
pub struct StaticAttestationVerifier {
    accepted: HashSet<String>,
}

impl StaticAttestationVerifier {
    #[must_use]
    pub fn new(accepted: impl IntoIterator<Item = String>) -> Self {
        Self {
            accepted: accepted.into_iter().collect(),
        }
    }
}

#[async_trait]
impl AttestationVerifier for StaticAttestationVerifier {
    async fn verify(&self, token: &str) -> Result<(), AttestationError> {
        if self.accepted.contains(token) {
            Ok(())
        } else {
            Err(AttestationError::Rejected)
        }
    }
}

//
// ─── REMOTE ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct IdentityResponse {
    uid: String,
}

/// Outcome class of a verification call, shared by both remote verifiers.
enum RemoteOutcome {
    Accepted(reqwest::Response),
    Rejected,
    Unavailable(String),
}

async fn post_token(client: &Client, url: &str, token: &str) -> RemoteOutcome {
    let response = match client.post(url).json(&VerifyRequest { token }).send().await {
        Ok(response) => response,
        Err(err) => return RemoteOutcome::Unavailable(err.to_string()),
    };
    let status = response.status();
    if status.is_success() {
        RemoteOutcome::Accepted(response)
    } else if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        RemoteOutcome::Rejected
    } else {
        RemoteOutcome::Unavailable(format!("verification returned status {status}"))
    }
}

/// Delegates credential checks to an identity service over HTTP.
///
/// The service receives `{"token": "..."}` and answers 2xx with
/// `{"uid": "..."}` for a valid credential, 4xx for an invalid one.
#[derive(Clone)]
pub struct RemoteIdentityVerifier {
    client: Client,
    url: String,
}

impl RemoteIdentityVerifier {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl IdentityVerifier for RemoteIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<UserId, IdentityError> {
        match post_token(&self.client, &self.url, token).await {
            RemoteOutcome::Accepted(response) => {
                let body: IdentityResponse = response
                    .json()
                    .await
                    .map_err(|err| IdentityError::Unavailable(err.to_string()))?;
                UserId::new(body.uid).map_err(|_| IdentityError::Rejected)
            }
            RemoteOutcome::Rejected => Err(IdentityError::Rejected),
            RemoteOutcome::Unavailable(detail) => Err(IdentityError::Unavailable(detail)),
        }
    }
}

/// Delegates attestation checks to an attestation service over HTTP.
#[derive(Clone)]
pub struct RemoteAttestationVerifier {
    client: Client,
    url: String,
}

impl RemoteAttestationVerifier {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl AttestationVerifier for RemoteAttestationVerifier {
    async fn verify(&self, token: &str) -> Result<(), AttestationError> {
        match post_token(&self.client, &self.url, token).await {
            RemoteOutcome::Accepted(_) => Ok(()),
            RemoteOutcome::Rejected => Err(AttestationError::Rejected),
            RemoteOutcome::Unavailable(detail) => Err(AttestationError::Unavailable(detail)),
        }
    }
}
