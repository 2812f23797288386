use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use services::ProgressUpdateError;
use thiserror::Error;
use tracing::error;

/// HTTP face of a rejected progress update.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub ProgressUpdateError);

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let ProgressUpdateError::Internal { stage, detail } = &self.0 {
            error!(stage = ?stage, detail = %detail, "updateProgress error");
        }

        // Internal detail stays in the log; the body only names the category.
        (status, Json(json!({ "error": self.0.public_message() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use progress_core::model::PayloadError;
    use services::RequestStage;

    async fn body_of(err: ProgressUpdateError) -> (StatusCode, serde_json::Value) {
        let response = ApiError(err).into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn maps_every_category_to_status_and_json() {
        let cases = [
            (ProgressUpdateError::MethodNotAllowed, StatusCode::METHOD_NOT_ALLOWED),
            (ProgressUpdateError::MissingAttestation, StatusCode::UNAUTHORIZED),
            (ProgressUpdateError::InvalidAttestation, StatusCode::UNAUTHORIZED),
            (ProgressUpdateError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (
                ProgressUpdateError::InvalidPayload(PayloadError::DisallowedField("x".into())),
                StatusCode::BAD_REQUEST,
            ),
            (ProgressUpdateError::RateLimited, StatusCode::TOO_MANY_REQUESTS),
        ];
        for (err, expected) in cases {
            let (status, body) = body_of(err).await;
            assert_eq!(status, expected);
            assert!(body["error"].as_str().is_some_and(|m| !m.is_empty()));
        }
    }

    #[tokio::test]
    async fn internal_errors_do_not_leak_details() {
        let (status, body) = body_of(ProgressUpdateError::Internal {
            stage: RequestStage::RateChecked,
            detail: "sqlite: database is locked".into(),
        })
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"error": "Internal server error"}));
    }
}
