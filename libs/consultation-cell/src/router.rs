// libs/consultation-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::*;

pub fn consultation_routes(state: Arc<ConsultationCellState>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(consultation_health_check));

    let protected_routes = Router::new()
        // Admission
        .route("/", post(create_consultation))
        .route("/ensure", post(ensure_consultation))
        .route("/queue", get(get_admission_queue))
        .route("/{consultation_id}", get(get_consultation))

        // Lifecycle
        .route("/{consultation_id}/claim", post(claim_consultation))
        .route("/{consultation_id}/reconnect", post(reconnect_consultation))
        .route("/{consultation_id}/finish", post(finish_consultation))
        .route("/{consultation_id}/cancel", post(cancel_consultation))

        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
