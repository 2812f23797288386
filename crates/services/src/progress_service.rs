use std::sync::Arc;

use chrono::Duration;
use progress_core::model::{ProgressRecord, ProgressUpdate, UserId};
use storage::DocumentStore;
use storage::progress::{progress_path, record_from_document, update_fields};
use tracing::{debug, error, info, warn};

use crate::auth::{AttestationVerifier, IdentityVerifier, bearer_token};
use crate::error::{AttestationError, IdentityError, ProgressUpdateError};

/// The only method the endpoint accepts.
pub const WRITE_METHOD: &str = "POST";

/// Default minimum spacing between accepted writes for one user.
pub const DEFAULT_MIN_INTERVAL_SECS: i64 = 10;

/// Deployment policy for the progress endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressPolicy {
    /// Reject requests without an attestation token. Off only for local development.
    pub require_attestation: bool,
    pub min_interval: Duration,
}

impl Default for ProgressPolicy {
    fn default() -> Self {
        Self {
            require_attestation: true,
            min_interval: Duration::seconds(DEFAULT_MIN_INTERVAL_SECS),
        }
    }
}

impl ProgressPolicy {
    /// Local development: attestation optional, default cooldown.
    #[must_use]
    pub fn development() -> Self {
        Self {
            require_attestation: false,
            ..Self::default()
        }
    }
}

/// Progress of one request through the endpoint's checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestStage {
    Received,
    MethodChecked,
    AttestationChecked,
    Authenticated,
    Validated,
    RateChecked,
    Committed,
}

/// Transport-independent view of an incoming update request.
#[derive(Debug, Clone, Default)]
pub struct ProgressRequest {
    pub method: String,
    /// Raw `Authorization` header value.
    pub authorization: Option<String>,
    /// Raw `X-Attestation` header value.
    pub attestation: Option<String>,
    pub body: Vec<u8>,
}

impl ProgressRequest {
    /// A POST carrying `body` and a bearer credential.
    #[must_use]
    pub fn post(token: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            method: WRITE_METHOD.to_owned(),
            authorization: Some(format!("Bearer {token}")),
            attestation: None,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn with_attestation(mut self, token: impl Into<String>) -> Self {
        self.attestation = Some(token.into());
        self
    }
}

/// Sole mutation path for per-user progress records.
///
/// Stateless per request: every check runs against injected capabilities and
/// nothing is cached between calls. Two concurrent requests from one user may
/// both pass the cooldown check; the later merge wins.
#[derive(Clone)]
pub struct ProgressService {
    identity: Arc<dyn IdentityVerifier>,
    attestation: Arc<dyn AttestationVerifier>,
    documents: Arc<dyn DocumentStore>,
    policy: ProgressPolicy,
}

impl ProgressService {
    #[must_use]
    pub fn new(
        identity: Arc<dyn IdentityVerifier>,
        attestation: Arc<dyn AttestationVerifier>,
        documents: Arc<dyn DocumentStore>,
        policy: ProgressPolicy,
    ) -> Self {
        Self {
            identity,
            attestation,
            documents,
            policy,
        }
    }

    #[must_use]
    pub fn policy(&self) -> ProgressPolicy {
        self.policy
    }

    /// Authenticate, validate, rate-check and merge one progress update.
    ///
    /// Performs exactly one store write on success and none on rejection.
    ///
    /// # Errors
    ///
    /// Returns the `ProgressUpdateError` for the first failing check. Store and
    /// identity service outages surface as `ProgressUpdateError::Internal`; an
    /// attestation token that cannot be verified for any reason is
    /// `InvalidAttestation`. A failed read during the cooldown check rejects
    /// the request rather than allowing the write.
    pub async fn submit(&self, request: ProgressRequest) -> Result<(), ProgressUpdateError> {
        if request.method != WRITE_METHOD {
            return Err(ProgressUpdateError::MethodNotAllowed);
        }

        self.check_attestation(request.attestation.as_deref()).await?;

        let user = self.authenticate(request.authorization.as_deref()).await?;

        let update = ProgressUpdate::from_json_slice(&request.body).inspect_err(|err| {
            debug!(user = %user, error = %err, "rejected progress payload");
        })?;

        let path = progress_path(&user)
            .map_err(|err| ProgressUpdateError::storage(RequestStage::Validated, &err))?;
        let previous = self.load_record(&user, &path).await?;
        let now = self
            .documents
            .server_time()
            .await
            .map_err(|err| self.store_fault(&user, RequestStage::Validated, &err))?;
        if previous.is_rate_limited(now, self.policy.min_interval) {
            warn!(
                user = %user,
                next_write_at = ?previous.next_write_at(self.policy.min_interval),
                "progress update rate limited"
            );
            return Err(ProgressUpdateError::RateLimited);
        }

        self.documents
            .merge(&path, update_fields(&update))
            .await
            .map_err(|err| self.store_fault(&user, RequestStage::RateChecked, &err))?;

        info!(
            user = %user,
            last_completed_lesson = ?update.last_completed_lesson,
            progress_percent = ?update.progress_percent,
            "progress committed"
        );
        Ok(())
    }

    async fn check_attestation(&self, header: Option<&str>) -> Result<(), ProgressUpdateError> {
        let token = header.map(str::trim).filter(|t| !t.is_empty());
        let Some(token) = token else {
            if self.policy.require_attestation {
                return Err(ProgressUpdateError::MissingAttestation);
            }
            return Ok(());
        };

        match self.attestation.verify(token).await {
            Ok(()) => Ok(()),
            Err(AttestationError::Rejected) => {
                warn!("invalid attestation token");
                Err(ProgressUpdateError::InvalidAttestation)
            }
            Err(err) => {
                error!(error = %err, "attestation verification failed");
                Err(ProgressUpdateError::InvalidAttestation)
            }
        }
    }

    async fn authenticate(&self, header: Option<&str>) -> Result<UserId, ProgressUpdateError> {
        let token = header
            .and_then(bearer_token)
            .ok_or(ProgressUpdateError::Unauthenticated)?;

        match self.identity.verify(token).await {
            Ok(user) => Ok(user),
            Err(IdentityError::Rejected) => Err(ProgressUpdateError::Unauthenticated),
            Err(err) => {
                error!(error = %err, "identity verification failed");
                Err(ProgressUpdateError::internal(
                    RequestStage::AttestationChecked,
                    err,
                ))
            }
        }
    }

    async fn load_record(
        &self,
        user: &UserId,
        path: &storage::DocPath,
    ) -> Result<ProgressRecord, ProgressUpdateError> {
        let doc = self
            .documents
            .get(path)
            .await
            .map_err(|err| self.store_fault(user, RequestStage::Validated, &err))?;
        match doc {
            Some(doc) => record_from_document(&doc)
                .map_err(|err| self.store_fault(user, RequestStage::Validated, &err)),
            None => Ok(ProgressRecord::default()),
        }
    }

    fn store_fault(
        &self,
        user: &UserId,
        stage: RequestStage,
        err: &storage::StorageError,
    ) -> ProgressUpdateError {
        error!(user = %user, stage = ?stage, error = %err, "progress store failure");
        ProgressUpdateError::storage(stage, err)
    }
}
