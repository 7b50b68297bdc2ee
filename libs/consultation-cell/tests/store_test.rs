use assert_matches::assert_matches;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use consultation_cell::models::{
    ConsultationError, ConsultationPatch, ConsultationQuery, ConsultationStatus, NewConsultation,
    QueueScope, UpdatePredicate,
};
use consultation_cell::services::{
    ConsultationStore, ProfileResolver, SupabaseConsultationStore, SupabaseProfileResolver,
};
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

fn store_for(server: &MockServer) -> SupabaseConsultationStore {
    let config = TestConfig {
        supabase_url: server.uri(),
        ..Default::default()
    };
    SupabaseConsultationStore::new(&config.to_app_config())
}

fn claim_patch(doctor_id: Uuid) -> ConsultationPatch {
    ConsultationPatch {
        doctor_id: Some(doctor_id),
        status: Some(ConsultationStatus::InProgress),
    }
}

#[tokio::test]
async fn test_claim_write_is_a_filtered_patch() {
    let server = MockServer::start().await;
    let consultation_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/consultations"))
        .and(query_param("id", format!("eq.{}", consultation_id)))
        .and(query_param("status", "in.(requested,requested_unassigned,scheduled,confirmed)"))
        .and(query_param("or", format!("(doctor_id.is.null,doctor_id.eq.{})", doctor_id)))
        .and(header("Prefer", "return=representation"))
        .and(header("apikey", "test-service-role-key"))
        .and(body_partial_json(json!({
            "doctor_id": doctor_id,
            "status": "in_progress"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::consultation_row(consultation_id, patient_id, Some(doctor_id), "in_progress")
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let updated = store
        .update_where(consultation_id, &UpdatePredicate::Claimable { doctor_id }, &claim_patch(doctor_id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(updated.doctor_id, Some(doctor_id));
    assert_eq!(updated.status, ConsultationStatus::InProgress);
}

#[tokio::test]
async fn test_zero_affected_rows_is_none() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/consultations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let doctor_id = Uuid::new_v4();
    let result = store
        .update_where(Uuid::new_v4(), &UpdatePredicate::Claimable { doctor_id }, &claim_patch(doctor_id))
        .await
        .unwrap();

    assert!(result.is_none());
}

#[tokio::test]
async fn test_fetch_reads_legacy_status_spellings() {
    let server = MockServer::start().await;
    let consultation_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/consultations"))
        .and(query_param("id", format!("eq.{}", consultation_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::consultation_row(consultation_id, Uuid::new_v4(), None, "pending")
        ])))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let consultation = store.fetch(consultation_id).await.unwrap().unwrap();

    assert_eq!(consultation.status, ConsultationStatus::Requested);
    assert!(consultation.doctor_id.is_none());
}

#[tokio::test]
async fn test_queue_query_filters() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/consultations"))
        .and(query_param("status", "in.(requested,requested_unassigned,scheduled,confirmed)"))
        .and(query_param("or", format!("(doctor_id.is.null,doctor_id.eq.{})", doctor_id)))
        .and(query_param("order", "created_at.asc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::consultation_row(Uuid::new_v4(), Uuid::new_v4(), None, "requested"),
            MockSupabaseResponses::consultation_row(Uuid::new_v4(), Uuid::new_v4(), Some(doctor_id), "scheduled")
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let rows = store
        .list(&ConsultationQuery::from(QueueScope::Clinician(doctor_id)))
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
}

fn new_request(patient_id: Uuid) -> NewConsultation {
    NewConsultation {
        patient_id,
        doctor_id: None,
        status: ConsultationStatus::Requested,
        scheduled_start_time: None,
        scheduled_end_time: None,
        reason: Some("Fever".to_string()),
    }
}

#[tokio::test]
async fn test_insert_open_posts_new_row() {
    let server = MockServer::start().await;
    let consultation_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/rest/v1/consultations"))
        .and(header("Prefer", "return=representation"))
        .and(body_partial_json(json!({
            "patient_id": patient_id,
            "status": "requested"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::consultation_row(consultation_id, patient_id, None, "requested")
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let inserted = store.insert_open(new_request(patient_id)).await.unwrap().unwrap();

    assert_eq!(inserted.id, consultation_id);
    assert_eq!(inserted.patient_id, patient_id);
}

#[tokio::test]
async fn test_insert_open_conflict_is_none() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/consultations"))
        .respond_with(ResponseTemplate::new(409).set_body_json(
            MockSupabaseResponses::error_response(
                "duplicate key value violates unique constraint \"consultations_one_open_per_patient\"",
                "23505",
            ),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let result = store.insert_open(new_request(Uuid::new_v4())).await.unwrap();

    assert!(result.is_none());
}

#[tokio::test]
async fn test_store_failure_is_database_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/consultations"))
        .respond_with(ResponseTemplate::new(500).set_body_json(
            MockSupabaseResponses::error_response("connection refused", "PGRST000"),
        ))
        .mount(&server)
        .await;

    let store = store_for(&server);
    assert_matches!(
        store.fetch(Uuid::new_v4()).await,
        Err(ConsultationError::DatabaseError(_))
    );
}

#[tokio::test]
async fn test_profile_resolution() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .and(query_param("user_id", "eq.user-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::profile_id_row(doctor_id)
        ])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let config = TestConfig {
        supabase_url: server.uri(),
        ..Default::default()
    };
    let resolver = SupabaseProfileResolver::new(&config.to_app_config());
    let profiles = resolver.resolve("user-1").await.unwrap();

    assert_eq!(profiles.doctor_id, Some(doctor_id));
    assert_eq!(profiles.patient_id, None);
}
