// libs/signaling-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::*;

/// Signaling routes. The websocket authenticates its own handshake, so it
/// sits with the public routes.
pub fn signaling_routes(state: Arc<SignalingCellState>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(signaling_health_check))
        .route("/ws", get(signaling_ws));

    let protected_routes = Router::new()
        .route("/rooms", post(create_standalone_room))
        .route("/rooms/{room_id}", get(get_room))
        .route(
            "/rooms/consultations/{consultation_id}",
            post(ensure_consultation_room).get(get_consultation_room),
        )
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
