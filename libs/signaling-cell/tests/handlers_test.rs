use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use consultation_cell::models::CreateConsultationRequest;
use consultation_cell::services::{
    ConsultationService, InMemoryConsultationStore, StaticProfileResolver,
};
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};
use signaling_cell::handlers::SignalingCellState;
use signaling_cell::router::signaling_routes;
use signaling_cell::services::{JwtCredentialVerifier, RelaySettings, RoomRegistry, SignalingRelay};

struct TestApp {
    router: Router,
    profiles: Arc<StaticProfileResolver>,
    consultations: Arc<ConsultationService>,
    registry: Arc<RoomRegistry>,
    config: TestConfig,
}

fn create_test_app() -> TestApp {
    let config = TestConfig::default();
    let app_config = config.to_arc();
    let store = Arc::new(InMemoryConsultationStore::new());
    let profiles = Arc::new(StaticProfileResolver::new());
    let consultations = Arc::new(ConsultationService::new(store, profiles.clone()));
    let registry = Arc::new(RoomRegistry::new());
    let relay = Arc::new(SignalingRelay::new(
        registry.clone(),
        consultations.clone(),
        Arc::new(JwtCredentialVerifier::new(app_config.clone())),
        RelaySettings::from_config(&app_config),
    ));

    let state = Arc::new(SignalingCellState {
        config: app_config,
        relay,
        consultations: consultations.clone(),
    });

    TestApp {
        router: signaling_routes(state),
        profiles,
        consultations,
        registry,
        config,
    }
}

impl TestApp {
    async fn get(&self, uri: &str, user: &TestUser) -> (StatusCode, Value) {
        let token = JwtTestUtils::create_test_token(user, &self.config.jwt_secret, None);
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .header("authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }
}

#[tokio::test]
async fn test_consultation_room_hidden_from_outsiders() {
    let app = create_test_app();
    let patient = TestUser::patient("patient@example.com");
    let outsider = TestUser::patient("outsider@example.com");
    app.profiles.register_patient(patient.id.clone());
    app.profiles.register_patient(outsider.id.clone());

    let consultation = app
        .consultations
        .create(CreateConsultationRequest::default(), &patient.to_user())
        .await
        .unwrap();
    let room = app.registry.find_or_create_for_consultation(consultation.id);
    let uri = format!("/rooms/{}", room.id);

    let (status, body) = app.get(&uri, &patient).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], room.id.to_string());

    let (status, _) = app.get(&uri, &outsider).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_standalone_room_visible_to_any_user() {
    let app = create_test_app();
    let room = app.registry.create_standalone();
    let user = TestUser::doctor("doctor@example.com");

    let (status, body) = app.get(&format!("/rooms/{}", room.id), &user).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], room.id.to_string());

    let (status, _) = app.get(&format!("/rooms/{}", Uuid::new_v4()), &user).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
