use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};
use tracing::warn;

use consultation_cell::router::consultation_routes;
use consultation_cell::services::{
    AdmissionQueueService, ConsultationService, ConsultationStore, InMemoryConsultationStore,
    ProfileResolver, SessionTeardown, StaticProfileResolver, SupabaseConsultationStore,
    SupabaseProfileResolver,
};
use consultation_cell::ConsultationCellState;
use shared_config::AppConfig;
use signaling_cell::router::signaling_routes;
use signaling_cell::services::{JwtCredentialVerifier, RelaySettings, RoomRegistry, SignalingRelay};
use signaling_cell::SignalingCellState;

fn build_adapters(config: &AppConfig) -> (Arc<dyn ConsultationStore>, Arc<dyn ProfileResolver>) {
    if config.is_configured() {
        (
            Arc::new(SupabaseConsultationStore::new(config)),
            Arc::new(SupabaseProfileResolver::new(config)),
        )
    } else {
        warn!("Database not configured, consultations are kept in memory");
        (
            Arc::new(InMemoryConsultationStore::new()),
            Arc::new(StaticProfileResolver::new()),
        )
    }
}

pub fn create_router(config: Arc<AppConfig>) -> Router {
    let (store, profiles) = build_adapters(&config);

    let consultations = Arc::new(ConsultationService::new(store.clone(), profiles.clone()));
    let queue = Arc::new(AdmissionQueueService::new(store, profiles));

    let relay = Arc::new(SignalingRelay::new(
        Arc::new(RoomRegistry::new()),
        consultations.clone(),
        Arc::new(JwtCredentialVerifier::new(config.clone())),
        RelaySettings::from_config(&config),
    ));
    let teardown: Arc<dyn SessionTeardown> = relay.clone();

    let consultation_state = Arc::new(ConsultationCellState {
        config: config.clone(),
        service: consultations.clone(),
        queue,
        teardown: Some(teardown),
    });

    let signaling_state = Arc::new(SignalingCellState {
        config,
        relay,
        consultations,
    });

    Router::new()
        .route("/", get(|| async { "Consultation API is running!" }))
        .nest("/consultations", consultation_routes(consultation_state))
        .nest("/signaling", signaling_routes(signaling_state))
}
