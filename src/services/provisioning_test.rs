use super::*;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::post;

// =============================================================================
// provision_result
// =============================================================================

#[test]
fn provision_201_is_success() {
    assert_eq!(provision_result(201, ""), Ok(()));
}

#[test]
fn provision_200_is_not_success() {
    assert!(matches!(provision_result(200, ""), Err(ProvisionError::Failed(_))));
}

#[test]
fn provision_400_includes_field_detail() {
    let body = r#"{"status":400,"error":"Bad Request","messages":{"email":"must be a well-formed email address"}}"#;
    let err = provision_result(400, body).unwrap_err();
    assert!(matches!(err, ProvisionError::Validation(_)));
    assert!(err.message().starts_with("Invalid request: "));
    assert!(err.message().contains("email"));
    assert!(err.message().contains("well-formed"));
}

#[test]
fn provision_400_without_detail() {
    let err = provision_result(400, "not json").unwrap_err();
    assert_eq!(err, ProvisionError::Validation("Invalid request".into()));
}

#[test]
fn provision_401_and_403_map_to_unauthorized() {
    assert_eq!(provision_result(401, "").unwrap_err(), ProvisionError::Unauthorized("Unauthorized".into()));
    assert_eq!(provision_result(403, "{}").unwrap_err(), ProvisionError::Unauthorized("Forbidden".into()));
    let err = provision_result(403, r#"{"message":"key revoked"}"#).unwrap_err();
    assert_eq!(err.message(), "key revoked");
}

#[test]
fn provision_5xx_is_generic_failure() {
    let err = provision_result(503, "").unwrap_err();
    assert!(matches!(err, ProvisionError::Failed(_)));
    assert!(err.to_string().contains("503"));
}

// =============================================================================
// existence_result
// =============================================================================

#[test]
fn existence_200_is_found() {
    assert_eq!(existence_result(200, ""), Ok(Existence::Found));
}

#[test]
fn existence_400_is_not_found_with_ids() {
    let id = Uuid::new_v4();
    let body = serde_json::json!({ "title": "Invalid User IDs", "invalidIds": [id] }).to_string();
    assert_eq!(existence_result(400, &body), Ok(Existence::NotFound { invalid_ids: vec![id] }));
}

#[test]
fn existence_400_without_body_is_not_found() {
    assert_eq!(existence_result(400, ""), Ok(Existence::NotFound { invalid_ids: vec![] }));
}

#[test]
fn existence_auth_failures_are_errors() {
    assert!(matches!(existence_result(401, ""), Err(ProvisionError::Unauthorized(_))));
    assert!(matches!(existence_result(403, ""), Err(ProvisionError::Unauthorized(_))));
    assert!(matches!(existence_result(500, ""), Err(ProvisionError::Failed(_))));
}

// =============================================================================
// BackendClient against a local mock backend
// =============================================================================

#[derive(Clone, Default)]
struct MockBackend {
    known: Arc<Mutex<HashSet<Uuid>>>,
    provision_status: Arc<Mutex<u16>>,
}

const TEST_HEADER: &str = "x-test-key";
const TEST_KEY: &str = "secret-key";

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(TEST_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == TEST_KEY)
}

async fn mock_provision(
    State(mock): State<MockBackend>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({ "message": "bad key" })));
    }
    let status = *mock.provision_status.lock().unwrap();
    if status == 201 {
        if let Some(id) = body.get("user_id").and_then(|v| v.as_str()).and_then(|s| Uuid::parse_str(s).ok()) {
            mock.known.lock().unwrap().insert(id);
        }
    }
    let code = StatusCode::from_u16(status).unwrap();
    (code, Json(serde_json::json!({ "messages": { "specialistId": "Specialist not found" } })))
}

async fn mock_validate(
    State(mock): State<MockBackend>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    if !authorized(&headers) {
        return (StatusCode::FORBIDDEN, Json(serde_json::json!({})));
    }
    let known = mock.known.lock().unwrap();
    let invalid: Vec<String> = body["ids"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|v| v.as_str())
        .filter(|s| Uuid::parse_str(s).map_or(true, |id| !known.contains(&id)))
        .map(str::to_owned)
        .collect();
    if invalid.is_empty() {
        (StatusCode::OK, Json(serde_json::json!({})))
    } else {
        (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "invalidIds": invalid })))
    }
}

async fn spawn_mock(mock: MockBackend) -> String {
    let app = Router::new()
        .route(PROVISION_PATH, post(mock_provision))
        .route(VALIDATE_PATH, post(mock_validate))
        .with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn client_for(base_url: String, key: &str) -> BackendClient {
    BackendClient::new(&BackendConfig {
        base_url,
        api_key: ApiKeyConfig { header_name: TEST_HEADER.into(), key: key.into() },
        request_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn request(user_id: Uuid) -> ProvisionRequest {
    ProvisionRequest { user_id, email: "p@example.com".into(), specialist_id: Uuid::new_v4() }
}

#[tokio::test]
async fn client_provisions_then_validate_finds() {
    let mock = MockBackend::default();
    *mock.provision_status.lock().unwrap() = 201;
    let client = client_for(spawn_mock(mock).await, TEST_KEY);

    let id = Uuid::new_v4();
    assert_eq!(client.validate(&[id]).await.unwrap(), Existence::NotFound { invalid_ids: vec![id] });
    client.provision(&request(id)).await.unwrap();
    assert_eq!(client.validate(&[id]).await.unwrap(), Existence::Found);
}

#[tokio::test]
async fn client_validate_is_stable_for_same_id() {
    let mock = MockBackend::default();
    let known = Uuid::new_v4();
    mock.known.lock().unwrap().insert(known);
    let client = client_for(spawn_mock(mock).await, TEST_KEY);

    let first = client.validate(&[known]).await.unwrap();
    let second = client.validate(&[known]).await.unwrap();
    assert_eq!(first, Existence::Found);
    assert_eq!(first, second);

    let unknown = Uuid::new_v4();
    let first = client.validate(&[unknown]).await.unwrap();
    let second = client.validate(&[unknown]).await.unwrap();
    assert_eq!(first, second);
    assert!(matches!(first, Existence::NotFound { .. }));
}

#[tokio::test]
async fn client_surfaces_validation_detail() {
    let mock = MockBackend::default();
    *mock.provision_status.lock().unwrap() = 400;
    let client = client_for(spawn_mock(mock).await, TEST_KEY);

    let err = client.provision(&request(Uuid::new_v4())).await.unwrap_err();
    assert!(matches!(err, ProvisionError::Validation(_)));
    assert!(err.message().contains("Specialist not found"));
}

#[tokio::test]
async fn client_wrong_key_is_unauthorized() {
    let mock = MockBackend::default();
    *mock.provision_status.lock().unwrap() = 201;
    let client = client_for(spawn_mock(mock).await, "wrong");

    let err = client.provision(&request(Uuid::new_v4())).await.unwrap_err();
    assert_eq!(err, ProvisionError::Unauthorized("bad key".into()));
    assert!(matches!(client.validate(&[Uuid::new_v4()]).await, Err(ProvisionError::Unauthorized(_))));
}

#[tokio::test]
async fn client_unreachable_backend_is_failure() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = client_for(format!("http://{addr}"), TEST_KEY);

    let err = client.provision(&request(Uuid::new_v4())).await.unwrap_err();
    assert!(matches!(err, ProvisionError::Failed(_)));
}
