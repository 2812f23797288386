//! Shared error types for the services crate.

use thiserror::Error;

use progress_core::model::PayloadError;
use storage::StorageError;

use crate::progress_service::RequestStage;

/// Errors emitted by an `IdentityVerifier`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IdentityError {
    #[error("credential rejected")]
    Rejected,
    #[error("identity service unavailable: {0}")]
    Unavailable(String),
}

/// Errors emitted by an `AttestationVerifier`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AttestationError {
    #[error("attestation rejected")]
    Rejected,
    #[error("attestation service unavailable: {0}")]
    Unavailable(String),
}

/// Terminal rejection of a progress update request.
///
/// Display strings are safe to return to callers except for `Internal`,
/// whose detail is for operators only.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressUpdateError {
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("Missing attestation token")]
    MissingAttestation,
    #[error("Invalid attestation token")]
    InvalidAttestation,
    /// Missing header, malformed header and failed verification all collapse here.
    #[error("Missing or invalid credentials")]
    Unauthenticated,
    #[error(transparent)]
    InvalidPayload(#[from] PayloadError),
    #[error("Too many requests. Please wait before updating again.")]
    RateLimited,
    #[error("internal error after {stage:?}: {detail}")]
    Internal { stage: RequestStage, detail: String },
}

impl ProgressUpdateError {
    pub(crate) fn internal(stage: RequestStage, err: impl std::fmt::Display) -> Self {
        Self::Internal {
            stage,
            detail: err.to_string(),
        }
    }

    pub(crate) fn storage(stage: RequestStage, err: &StorageError) -> Self {
        Self::internal(stage, err)
    }

    /// HTTP status code for this rejection.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::MethodNotAllowed => 405,
            Self::MissingAttestation | Self::InvalidAttestation | Self::Unauthenticated => 401,
            Self::InvalidPayload(_) => 400,
            Self::RateLimited => 429,
            Self::Internal { .. } => 500,
        }
    }

    /// Last stage the request reached before it was rejected.
    #[must_use]
    pub const fn stage(&self) -> RequestStage {
        match self {
            Self::MethodNotAllowed => RequestStage::Received,
            Self::MissingAttestation | Self::InvalidAttestation => RequestStage::MethodChecked,
            Self::Unauthenticated => RequestStage::AttestationChecked,
            Self::InvalidPayload(_) => RequestStage::Authenticated,
            Self::RateLimited => RequestStage::Validated,
            Self::Internal { stage, .. } => *stage,
        }
    }

    /// Message that may be shown to the caller.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal { .. } => "Internal server error".to_owned(),
            other => other.to_string(),
        }
    }
}

/// Errors emitted by `ProgressClient`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressClientError {
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}
