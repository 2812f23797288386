use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderName, Method, header::AUTHORIZATION},
};
use serde::Serialize;
use services::ProgressRequest;

use crate::{error::ApiError, state::AppState};

/// Client attestation header.
pub const X_ATTESTATION: HeaderName = HeaderName::from_static("x-attestation");

#[derive(Debug, Serialize)]
pub struct Success {
    success: bool,
}

fn header(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// `/updateProgress`: routed for every method so a wrong verb still gets a JSON 405.
pub async fn update_progress_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Success>, ApiError> {
    let request = ProgressRequest {
        method: method.as_str().to_owned(),
        authorization: header(&headers, &AUTHORIZATION),
        attestation: header(&headers, &X_ATTESTATION),
        body: body.to_vec(),
    };

    state.progress.submit(request).await?;

    Ok(Json(Success { success: true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};
    use axum::response::IntoResponse;
    use progress_core::model::UserId;
    use progress_core::time::fixed_clock;
    use services::{
        ProgressPolicy, ProgressService, StaticAttestationVerifier, StaticIdentityVerifier,
    };
    use storage::InMemoryDocumentStore;

    fn state(store: &InMemoryDocumentStore) -> Arc<AppState> {
        let identity =
            StaticIdentityVerifier::new().with_token("tok", UserId::new("u1").unwrap());
        AppState::new(ProgressService::new(
            Arc::new(identity),
            Arc::new(StaticAttestationVerifier::new(["att".to_owned()])),
            Arc::new(store.clone()),
            ProgressPolicy::default(),
        ))
    }

    fn headers(auth: &str, attestation: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        if let Some(token) = attestation {
            headers.insert(X_ATTESTATION, HeaderValue::from_str(token).unwrap());
        }
        headers
    }

    async fn call(
        store: &InMemoryDocumentStore,
        method: Method,
        headers: HeaderMap,
        body: &'static str,
    ) -> StatusCode {
        update_progress_handler(
            State(state(store)),
            method,
            headers,
            Bytes::from_static(body.as_bytes()),
        )
        .await
        .into_response()
        .status()
    }

    #[tokio::test]
    async fn accepted_update_returns_ok() {
        let store = InMemoryDocumentStore::with_clock(fixed_clock());
        let status = call(
            &store,
            Method::POST,
            headers("Bearer tok", Some("att")),
            r#"{"lastCompletedLesson": 1, "progressPercent": 10}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn get_is_method_not_allowed() {
        let store = InMemoryDocumentStore::with_clock(fixed_clock());
        let status = call(&store, Method::GET, headers("Bearer tok", Some("att")), "").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn missing_attestation_is_unauthorized() {
        let store = InMemoryDocumentStore::with_clock(fixed_clock());
        let status = call(&store, Method::POST, headers("Bearer tok", None), "{}").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
