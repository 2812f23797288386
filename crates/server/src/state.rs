use std::sync::Arc;

use services::{
    AttestationVerifier, IdentityVerifier, ProgressPolicy, ProgressService,
    RemoteAttestationVerifier, RemoteIdentityVerifier, StaticAttestationVerifier,
    StaticIdentityVerifier,
};
use storage::Storage;
use tracing::info;

use crate::config::{Config, ConfigError};

pub struct AppState {
    pub progress: ProgressService,
}

impl AppState {
    #[must_use]
    pub fn new(progress: ProgressService) -> Arc<Self> {
        Arc::new(Self { progress })
    }

    /// Wire verifiers and policy from configuration around an opened store.
    ///
    /// Remote verifier URLs take precedence over static development tokens.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingVerifier` when no identity verifier is
    /// configured, or when attestation is required but nothing can verify it.
    /// Returns `ConfigError::Invalid` when the cooldown is out of range.
    pub fn from_config(config: &Config, storage: &Storage) -> Result<Arc<Self>, ConfigError> {
        let identity: Arc<dyn IdentityVerifier> = match &config.identity_url {
            Some(url) => {
                info!(url = %url, "using remote identity verifier");
                Arc::new(RemoteIdentityVerifier::new(url.clone()))
            }
            None if !config.dev_tokens.is_empty() => {
                info!(tokens = config.dev_tokens.len(), "using static identity verifier");
                Arc::new(StaticIdentityVerifier::from_pairs(
                    config.dev_tokens.iter().cloned(),
                ))
            }
            None => return Err(ConfigError::MissingVerifier("identity")),
        };

        let attestation: Arc<dyn AttestationVerifier> = match &config.attestation_url {
            Some(url) => {
                info!(url = %url, "using remote attestation verifier");
                Arc::new(RemoteAttestationVerifier::new(url.clone()))
            }
            None if config.require_attestation && config.dev_attestation_tokens.is_empty() => {
                return Err(ConfigError::MissingVerifier("attestation"));
            }
            None => Arc::new(StaticAttestationVerifier::new(
                config.dev_attestation_tokens.iter().cloned(),
            )),
        };

        let policy = ProgressPolicy {
            require_attestation: config.require_attestation,
            min_interval: config.min_interval()?,
        };
        info!(
            require_attestation = policy.require_attestation,
            min_interval_secs = config.min_interval_secs,
            "progress policy"
        );

        Ok(Self::new(ProgressService::new(
            identity,
            attestation,
            Arc::clone(&storage.documents),
            policy,
        )))
    }
}
