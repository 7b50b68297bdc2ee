// libs/consultation-cell/src/services/mod.rs
pub mod consultation;
pub mod lifecycle;
pub mod memory;
pub mod profile;
pub mod queue;
pub mod store;

pub use consultation::{ConsultationService, SessionTeardown};
pub use lifecycle::ConsultationLifecycleService;
pub use memory::{InMemoryConsultationStore, StaticProfileResolver};
pub use profile::{ProfileResolver, SupabaseProfileResolver};
pub use queue::AdmissionQueueService;
pub use store::{ConsultationStore, SupabaseConsultationStore};
