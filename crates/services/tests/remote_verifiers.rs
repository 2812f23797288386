use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use progress_core::time::fixed_clock;
use serde_json::{Value, json};
use services::{
    AttestationError, AttestationVerifier, IdentityError, IdentityVerifier, ProgressPolicy,
    ProgressRequest, ProgressService, ProgressUpdateError, RemoteAttestationVerifier,
    RemoteIdentityVerifier, StaticAttestationVerifier, StaticIdentityVerifier,
};
use storage::InMemoryDocumentStore;
use tokio::net::TcpListener;

/// Verification service double: the outcome is keyed on the submitted token.
async fn verify(Json(body): Json<Value>) -> Response {
    match body["token"].as_str().unwrap_or_default() {
        "alice-token" => Json(json!({"uid": "alice"})).into_response(),
        "device-ok" => StatusCode::OK.into_response(),
        "blank-uid" => Json(json!({"uid": ""})).into_response(),
        "garbled" => (StatusCode::OK, "not json").into_response(),
        "busy" => StatusCode::TOO_MANY_REQUESTS.into_response(),
        "boom" => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        _ => StatusCode::UNAUTHORIZED.into_response(),
    }
}

async fn spawn_verifier() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr: SocketAddr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, Router::new().route("/verify", post(verify)))
            .await
            .expect("serve");
    });
    format!("http://{addr}/verify")
}

#[tokio::test]
async fn remote_identity_maps_each_response_class() {
    let verifier = RemoteIdentityVerifier::new(spawn_verifier().await);

    assert_eq!(verifier.verify("alice-token").await.unwrap().as_str(), "alice");
    assert!(matches!(
        verifier.verify("stolen").await,
        Err(IdentityError::Rejected)
    ));
    assert!(matches!(
        verifier.verify("blank-uid").await,
        Err(IdentityError::Rejected)
    ));
    assert!(matches!(
        verifier.verify("garbled").await,
        Err(IdentityError::Unavailable(_))
    ));
    assert!(matches!(
        verifier.verify("busy").await,
        Err(IdentityError::Unavailable(_))
    ));
    assert!(matches!(
        verifier.verify("boom").await,
        Err(IdentityError::Unavailable(_))
    ));
}

#[tokio::test]
async fn remote_attestation_maps_each_response_class() {
    let verifier = RemoteAttestationVerifier::new(spawn_verifier().await);

    assert!(verifier.verify("device-ok").await.is_ok());
    assert!(matches!(
        verifier.verify("forged").await,
        Err(AttestationError::Rejected)
    ));
    assert!(matches!(
        verifier.verify("busy").await,
        Err(AttestationError::Unavailable(_))
    ));
    assert!(matches!(
        verifier.verify("boom").await,
        Err(AttestationError::Unavailable(_))
    ));
}

fn service_with(
    identity: Arc<dyn IdentityVerifier>,
    attestation: Arc<dyn AttestationVerifier>,
    policy: ProgressPolicy,
) -> (ProgressService, InMemoryDocumentStore) {
    let store = InMemoryDocumentStore::with_clock(fixed_clock());
    let service = ProgressService::new(identity, attestation, Arc::new(store.clone()), policy);
    (service, store)
}

#[tokio::test]
async fn identity_service_outage_is_a_500_without_writes() {
    let url = spawn_verifier().await;
    let (service, store) = service_with(
        Arc::new(RemoteIdentityVerifier::new(url)),
        Arc::new(StaticAttestationVerifier::default()),
        ProgressPolicy::development(),
    );

    let err = service
        .submit(ProgressRequest::post("boom", r#"{"progressPercent": 5}"#))
        .await
        .unwrap_err();
    assert!(matches!(err, ProgressUpdateError::Internal { .. }));
    assert_eq!(err.status_code(), 500);
    assert_eq!(err.public_message(), "Internal server error");

    service
        .submit(ProgressRequest::post("alice-token", r#"{"progressPercent": 5}"#))
        .await
        .expect("verified caller commits");
    assert_eq!(store.write_count(), 1);
}

#[tokio::test]
async fn attestation_service_outage_rejects_as_invalid_attestation() {
    let identity = || {
        Arc::new(
            StaticIdentityVerifier::new()
                .with_token("alice-token", "alice".parse().expect("uid")),
        )
    };

    let (service, store) = service_with(
        identity(),
        Arc::new(RemoteAttestationVerifier::new(spawn_verifier().await)),
        ProgressPolicy::default(),
    );
    let err = service
        .submit(ProgressRequest::post("alice-token", "{}").with_attestation("boom"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProgressUpdateError::InvalidAttestation));
    assert_eq!(err.status_code(), 401);
    assert_eq!(store.write_count(), 0);

    // Port 9 (discard) on localhost is not expected to accept connections.
    let (service, store) = service_with(
        identity(),
        Arc::new(RemoteAttestationVerifier::new("http://127.0.0.1:9/verify")),
        ProgressPolicy::default(),
    );
    let err = service
        .submit(ProgressRequest::post("alice-token", "{}").with_attestation("tok"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);
    assert_eq!(err.public_message(), "Invalid attestation token");
    assert_eq!(store.write_count(), 0);
}
