// libs/consultation-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{ClaimResponse, ConsultationError, CreateConsultationRequest, QueueQuery};
use crate::services::{AdmissionQueueService, ConsultationService, SessionTeardown};

/// Shared state of the consultation routes.
#[derive(Clone)]
pub struct ConsultationCellState {
    pub config: Arc<AppConfig>,
    pub service: Arc<ConsultationService>,
    pub queue: Arc<AdmissionQueueService>,
    pub teardown: Option<Arc<dyn SessionTeardown>>,
}

impl ConsultationCellState {
    async fn teardown_sessions(&self, consultation_id: Uuid) {
        if let Some(teardown) = &self.teardown {
            teardown.close_sessions_for(consultation_id).await;
        }
    }
}

pub fn map_consultation_error(e: ConsultationError) -> AppError {
    match e {
        ConsultationError::NotFound => AppError::NotFound("Consultation not found".to_string()),
        ConsultationError::AlreadyClaimed
        | ConsultationError::CannotCancelFinished
        | ConsultationError::AlreadyOpen
        | ConsultationError::InvalidTransition { .. } => AppError::Conflict(e.to_string()),
        ConsultationError::NotAuthorized => AppError::Forbidden(e.to_string()),
        ConsultationError::ValidationError(msg) => AppError::ValidationError(msg),
        ConsultationError::DatabaseError(msg) => {
            error!("Consultation store failure: {}", msg);
            AppError::Database(msg)
        }
    }
}

// ==============================================================================
// ADMISSION HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_consultation(
    State(state): State<Arc<ConsultationCellState>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateConsultationRequest>,
) -> Result<Json<Value>, AppError> {
    let consultation = state
        .service
        .create(request, &user)
        .await
        .map_err(map_consultation_error)?;

    Ok(Json(json!({
        "success": true,
        "consultation": consultation
    })))
}

/// Idempotent admission: hands back the patient's open consultation if there
/// is one.
#[axum::debug_handler]
pub async fn ensure_consultation(
    State(state): State<Arc<ConsultationCellState>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateConsultationRequest>,
) -> Result<Json<Value>, AppError> {
    let (consultation, created) = state
        .service
        .ensure(request, &user)
        .await
        .map_err(map_consultation_error)?;

    Ok(Json(json!({
        "success": true,
        "created": created,
        "consultation": consultation
    })))
}

#[axum::debug_handler]
pub async fn get_admission_queue(
    State(state): State<Arc<ConsultationCellState>>,
    Extension(user): Extension<User>,
    Query(query): Query<QueueQuery>,
) -> Result<Json<Value>, AppError> {
    let consultations = state
        .queue
        .list_for(&user, query.scope)
        .await
        .map_err(map_consultation_error)?;

    Ok(Json(json!({
        "consultations": consultations,
        "total": consultations.len()
    })))
}

#[axum::debug_handler]
pub async fn get_consultation(
    State(state): State<Arc<ConsultationCellState>>,
    Path(consultation_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let consultation = state
        .service
        .get(consultation_id, &user)
        .await
        .map_err(map_consultation_error)?;

    Ok(Json(json!(consultation)))
}

// ==============================================================================
// LIFECYCLE HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn claim_consultation(
    State(state): State<Arc<ConsultationCellState>>,
    Path(consultation_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<ClaimResponse>, AppError> {
    let outcome = state
        .service
        .claim(consultation_id, &user)
        .await
        .map_err(map_consultation_error)?;

    Ok(Json(ClaimResponse {
        success: true,
        reconnected: outcome.is_reconnect(),
        consultation: outcome.into_consultation(),
    }))
}

#[axum::debug_handler]
pub async fn reconnect_consultation(
    State(state): State<Arc<ConsultationCellState>>,
    Path(consultation_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let consultation = state
        .service
        .reconnect(consultation_id, &user)
        .await
        .map_err(map_consultation_error)?;

    Ok(Json(json!({
        "success": true,
        "consultation": consultation
    })))
}

#[axum::debug_handler]
pub async fn finish_consultation(
    State(state): State<Arc<ConsultationCellState>>,
    Path(consultation_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let consultation = state
        .service
        .finish(consultation_id, &user)
        .await
        .map_err(map_consultation_error)?;

    state.teardown_sessions(consultation_id).await;

    Ok(Json(json!({
        "success": true,
        "consultation": consultation
    })))
}

#[axum::debug_handler]
pub async fn cancel_consultation(
    State(state): State<Arc<ConsultationCellState>>,
    Path(consultation_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let consultation = state
        .service
        .cancel(consultation_id, &user)
        .await
        .map_err(map_consultation_error)?;

    state.teardown_sessions(consultation_id).await;

    Ok(Json(json!({
        "success": true,
        "consultation": consultation
    })))
}

pub async fn consultation_health_check(
    State(state): State<Arc<ConsultationCellState>>,
) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "consultation-cell",
        "store_configured": state.config.is_configured()
    }))
}
