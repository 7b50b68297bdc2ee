// libs/consultation-cell/src/lib.rs
//! # Consultation Cell
//!
//! Admission and ownership of consultations: a patient's request for care
//! waits in the admission queue until exactly one clinician claims it, runs
//! while in progress, and ends finished or cancelled.
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------------------+
//! |                 Consultation Cell                   |
//! +-----------------------------------------------------+
//! |  handlers.rs     |  HTTP endpoint handlers          |
//! |  router.rs       |  Route definitions               |
//! |  models.rs       |  Data structures & errors        |
//! |  services/       |  Business logic layer            |
//! |    consultation.rs| State machine & claim CAS       |
//! |    lifecycle.rs  |  Pure transition rules           |
//! |    queue.rs      |  Admission queue view            |
//! |    store.rs      |  Store trait + PostgREST adapter |
//! |    profile.rs    |  User -> profile resolution      |
//! |    memory.rs     |  In-process adapters             |
//! +-----------------------------------------------------+
//! ```
//!
//! ## API Endpoints
//!
//! - `POST /consultations` - Admit a new consultation
//! - `POST /consultations/ensure` - Return the open consultation or admit one
//! - `GET /consultations/queue?scope=all|mine` - Pending consultations
//! - `GET /consultations/{id}` - Consultation details
//! - `POST /consultations/{id}/claim` - Clinician takes ownership
//! - `POST /consultations/{id}/reconnect` - Re-enter an open consultation
//! - `POST /consultations/{id}/finish` - Finish
//! - `POST /consultations/{id}/cancel` - Cancel
//! - `GET /consultations/health` - Health check
//!
//! ## Claiming
//!
//! A claim is one conditional write against the store. Of N clinicians
//! racing for the same consultation exactly one wins; the rest get
//! `already_claimed`, and the winner may repeat the claim to reconnect.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use consultation_cell::services::{
//!     ConsultationService, InMemoryConsultationStore, StaticProfileResolver,
//! };
//!
//! let profiles = Arc::new(StaticProfileResolver::new());
//! profiles.register_doctor("clinician-user-id");
//! let service = ConsultationService::new(Arc::new(InMemoryConsultationStore::new()), profiles);
//! ```

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{
    ClaimAttempt, ClaimOutcome, Consultation, ConsultationError, ConsultationRole,
    ConsultationStatus, QueueScope,
};

pub use services::{
    AdmissionQueueService, ConsultationService, ConsultationStore, ProfileResolver,
    SessionTeardown,
};

pub use handlers::ConsultationCellState;
pub use router::consultation_routes;
