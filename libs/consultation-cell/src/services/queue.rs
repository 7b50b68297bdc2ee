// libs/consultation-cell/src/services/queue.rs
use std::sync::Arc;

use tracing::debug;

use shared_models::auth::User;

use crate::models::{Consultation, ConsultationError, ConsultationQuery, QueueScope, QueueScopeParam};
use crate::services::profile::ProfileResolver;
use crate::services::store::ConsultationStore;

/// Read-only view of consultations waiting for a clinician. Every call goes
/// to the store; nothing is cached.
pub struct AdmissionQueueService {
    store: Arc<dyn ConsultationStore>,
    profiles: Arc<dyn ProfileResolver>,
}

impl AdmissionQueueService {
    pub fn new(store: Arc<dyn ConsultationStore>, profiles: Arc<dyn ProfileResolver>) -> Self {
        Self { store, profiles }
    }

    pub async fn list_pending(&self, scope: QueueScope) -> Result<Vec<Consultation>, ConsultationError> {
        let query = ConsultationQuery::from(scope);
        let pending = self.store.list(&query).await?;
        debug!("Admission queue {:?} holds {} consultation(s)", scope, pending.len());
        Ok(pending)
    }

    /// Resolve the requested scope for `user`. Patients only ever see their
    /// own cases, whatever they ask for.
    pub async fn scope_for(
        &self,
        user: &User,
        requested: QueueScopeParam,
    ) -> Result<QueueScope, ConsultationError> {
        let profiles = self.profiles.resolve(&user.id).await?;

        match (requested, profiles.doctor_id, profiles.patient_id) {
            (QueueScopeParam::All, Some(_), _) => Ok(QueueScope::All),
            (QueueScopeParam::All, None, None) if user.is_admin() => Ok(QueueScope::All),
            (QueueScopeParam::Mine, Some(doctor_id), _) => Ok(QueueScope::Clinician(doctor_id)),
            (_, None, Some(patient_id)) => Ok(QueueScope::Patient(patient_id)),
            _ => Err(ConsultationError::NotAuthorized),
        }
    }

    pub async fn list_for(
        &self,
        user: &User,
        requested: QueueScopeParam,
    ) -> Result<Vec<Consultation>, ConsultationError> {
        let scope = self.scope_for(user, requested).await?;
        self.list_pending(scope).await
    }
}
