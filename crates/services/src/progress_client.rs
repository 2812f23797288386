use std::env;

use progress_core::model::ProgressUpdate;
use reqwest::Client;
use serde::Deserialize;

use crate::error::ProgressClientError;

/// Header carrying the client attestation token.
pub const ATTESTATION_HEADER: &str = "X-Attestation";

/// Route segment of the progress endpoint.
pub const UPDATE_PROGRESS_PATH: &str = "updateProgress";

pub const DEFAULT_PROJECT_ID: &str = "prompt-engineering-l";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressClientConfig {
    pub base_url: String,
}

impl ProgressClientConfig {
    /// Local emulator endpoint for a project.
    #[must_use]
    pub fn emulator(project_id: &str) -> Self {
        Self {
            base_url: format!("http://localhost:5001/{project_id}/us-central1"),
        }
    }

    /// Hosted endpoint for a project.
    #[must_use]
    pub fn hosted(project_id: &str) -> Self {
        Self {
            base_url: format!("https://us-central1-{project_id}.cloudfunctions.net"),
        }
    }

    /// Resolve from `PROGRESS_BASE_URL`, or from `PROGRESS_PROJECT_ID` and
    /// `PROGRESS_EMULATOR=true`.
    #[must_use]
    pub fn from_env() -> Self {
        if let Some(base_url) = env::var("PROGRESS_BASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
        {
            return Self { base_url };
        }
        let project_id =
            env::var("PROGRESS_PROJECT_ID").unwrap_or_else(|_| DEFAULT_PROJECT_ID.into());
        let emulator = env::var("PROGRESS_EMULATOR").is_ok_and(|v| v == "true");
        if emulator {
            Self::emulator(&project_id)
        } else {
            Self::hosted(&project_id)
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{UPDATE_PROGRESS_PATH}",
            self.base_url.trim_end_matches('/')
        )
    }
}

/// Success body returned by the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ProgressAck {
    pub success: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Sends progress updates to the endpoint on behalf of a signed-in user.
#[derive(Clone)]
pub struct ProgressClient {
    client: Client,
    config: ProgressClientConfig,
}

impl ProgressClient {
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(ProgressClientConfig::from_env())
    }

    #[must_use]
    pub fn new(config: ProgressClientConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ProgressClientConfig {
        &self.config
    }

    /// Submit a partial progress update with the caller's current credential.
    ///
    /// # Errors
    ///
    /// Returns `ProgressClientError::NotAuthenticated` when `id_token` is empty,
    /// `ProgressClientError::Rejected` carrying the server's `error` message on
    /// any non-200 response, or `ProgressClientError::Http` on transport
    /// failures.
    pub async fn send_progress(
        &self,
        id_token: &str,
        attestation: Option<&str>,
        update: &ProgressUpdate,
    ) -> Result<ProgressAck, ProgressClientError> {
        if id_token.trim().is_empty() {
            return Err(ProgressClientError::NotAuthenticated);
        }

        let mut request = self
            .client
            .post(self.config.endpoint())
            .bearer_auth(id_token)
            .json(update);
        if let Some(token) = attestation {
            request = request.header(ATTESTATION_HEADER, token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error)
                .unwrap_or_else(|| format!("Failed to update progress ({})", status.as_u16()));
            return Err(ProgressClientError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}
