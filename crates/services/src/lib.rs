#![forbid(unsafe_code)]

pub mod auth;
pub mod error;
pub mod progress_client;
pub mod progress_service;

pub use auth::{
    AttestationVerifier, IdentityVerifier, RemoteAttestationVerifier, RemoteIdentityVerifier,
    StaticAttestationVerifier, StaticIdentityVerifier,
};
pub use error::{AttestationError, IdentityError, ProgressClientError, ProgressUpdateError};
pub use progress_client::{ProgressAck, ProgressClient, ProgressClientConfig};
pub use progress_service::{ProgressPolicy, ProgressRequest, ProgressService, RequestStage};
