// libs/consultation-cell/src/services/consultation.rs
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_models::auth::User;

use crate::models::{
    ClaimAttempt, ClaimOutcome, Consultation, ConsultationError, ConsultationPatch,
    ConsultationPhase, ConsultationQuery, ConsultationRole, ConsultationStatus,
    CreateConsultationRequest, NewConsultation, ResolvedProfiles, UpdatePredicate,
};
use crate::services::lifecycle::ConsultationLifecycleService;
use crate::services::profile::ProfileResolver;
use crate::services::store::ConsultationStore;

/// Hook for tearing down live sessions of a consultation that was finished or
/// cancelled outside the signaling channel.
#[async_trait]
pub trait SessionTeardown: Send + Sync {
    async fn close_sessions_for(&self, consultation_id: Uuid);
}

/// Consultation state machine. Every transition that can race is a single
/// conditional write against the store; the process holds no lock of its own.
pub struct ConsultationService {
    store: Arc<dyn ConsultationStore>,
    profiles: Arc<dyn ProfileResolver>,
    lifecycle: ConsultationLifecycleService,
}

impl ConsultationService {
    pub fn new(store: Arc<dyn ConsultationStore>, profiles: Arc<dyn ProfileResolver>) -> Self {
        Self {
            store,
            profiles,
            lifecycle: ConsultationLifecycleService::new(),
        }
    }

    pub async fn resolve_profiles(&self, user: &User) -> Result<ResolvedProfiles, ConsultationError> {
        self.profiles.resolve(&user.id).await
    }

    // ==========================================================================
    // ADMISSION
    // ==========================================================================

    pub async fn create(
        &self,
        request: CreateConsultationRequest,
        user: &User,
    ) -> Result<Consultation, ConsultationError> {
        let profiles = self.resolve_profiles(user).await?;
        let patient_id = profiles.patient_id.ok_or_else(|| {
            warn!("User {} has no patient profile, refusing consultation request", user.id);
            ConsultationError::NotAuthorized
        })?;

        self.admit(patient_id, request).await
    }

    /// Return the patient's open consultation, or admit a new one. The flag
    /// is `true` when a record was created. A concurrent admission that wins
    /// the insert is returned to the loser as the existing record.
    pub async fn ensure(
        &self,
        request: CreateConsultationRequest,
        user: &User,
    ) -> Result<(Consultation, bool), ConsultationError> {
        let profiles = self.resolve_profiles(user).await?;
        let patient_id = profiles.patient_id.ok_or(ConsultationError::NotAuthorized)?;

        if let Some(existing) = self.open_consultation(patient_id).await? {
            debug!("Patient {} already has open consultation {}", patient_id, existing.id);
            return Ok((existing, false));
        }

        match self.admit(patient_id, request).await {
            Ok(created) => Ok((created, true)),
            Err(ConsultationError::AlreadyOpen) => {
                let existing = self
                    .open_consultation(patient_id)
                    .await?
                    .ok_or(ConsultationError::AlreadyOpen)?;
                debug!(
                    "Concurrent admission for patient {} resolved to {}",
                    patient_id, existing.id
                );
                Ok((existing, false))
            }
            Err(e) => Err(e),
        }
    }

    async fn open_consultation(&self, patient_id: Uuid) -> Result<Option<Consultation>, ConsultationError> {
        let query = ConsultationQuery::open_for_patient(patient_id);
        Ok(self.store.list(&query).await?.into_iter().next())
    }

    async fn admit(
        &self,
        patient_id: Uuid,
        request: CreateConsultationRequest,
    ) -> Result<Consultation, ConsultationError> {
        if let (Some(start), Some(end)) = (request.scheduled_start_time, request.scheduled_end_time) {
            if end <= start {
                return Err(ConsultationError::ValidationError(
                    "scheduled_end_time must be after scheduled_start_time".to_string(),
                ));
            }
        }

        let new = NewConsultation {
            patient_id,
            doctor_id: request.doctor_id,
            status: self
                .lifecycle
                .initial_status(request.scheduled_start_time.is_some()),
            scheduled_start_time: request.scheduled_start_time,
            scheduled_end_time: request.scheduled_end_time,
            reason: request.reason,
        };

        let consultation = self.store.insert_open(new).await?.ok_or_else(|| {
            debug!("Refusing second open consultation for patient {}", patient_id);
            ConsultationError::AlreadyOpen
        })?;
        info!(
            "Consultation {} admitted for patient {} with status {}",
            consultation.id, patient_id, consultation.status
        );
        Ok(consultation)
    }

    // ==========================================================================
    // CLAIM
    // ==========================================================================

    /// The claim compare-and-swap: assign `doctor_id` and move to
    /// `in_progress` iff the row is still unowned (or already pre-assigned to
    /// this clinician) and in a claim-eligible status.
    pub async fn compare_and_claim(
        &self,
        consultation_id: Uuid,
        doctor_id: Uuid,
    ) -> Result<ClaimAttempt, ConsultationError> {
        let predicate = UpdatePredicate::Claimable { doctor_id };
        let patch = ConsultationPatch {
            doctor_id: Some(doctor_id),
            status: Some(ConsultationStatus::InProgress),
        };

        if let Some(won) = self
            .store
            .update_where(consultation_id, &predicate, &patch)
            .await?
        {
            return Ok(ClaimAttempt::Won(won));
        }

        Ok(match self.store.fetch(consultation_id).await? {
            Some(current) => ClaimAttempt::AlreadyClaimed(current),
            None => ClaimAttempt::NotFound,
        })
    }

    pub async fn claim(
        &self,
        consultation_id: Uuid,
        user: &User,
    ) -> Result<ClaimOutcome, ConsultationError> {
        let profiles = self.resolve_profiles(user).await?;
        let doctor_id = profiles.doctor_id.ok_or_else(|| {
            warn!("User {} attempted a claim without a clinician profile", user.id);
            ConsultationError::NotAuthorized
        })?;

        match self.compare_and_claim(consultation_id, doctor_id).await? {
            ClaimAttempt::Won(consultation) => {
                info!("Consultation {} claimed by clinician {}", consultation_id, doctor_id);
                Ok(ClaimOutcome::Claimed(consultation))
            }
            ClaimAttempt::AlreadyClaimed(consultation)
                if consultation.is_owned_by_doctor(doctor_id)
                    && consultation.status == ConsultationStatus::InProgress =>
            {
                debug!("Clinician {} reconnected to consultation {}", doctor_id, consultation_id);
                Ok(ClaimOutcome::Reconnected(consultation))
            }
            ClaimAttempt::AlreadyClaimed(consultation) => {
                debug!(
                    "Claim of {} by {} lost (owner: {:?}, status: {})",
                    consultation_id, doctor_id, consultation.doctor_id, consultation.status
                );
                Err(ConsultationError::AlreadyClaimed)
            }
            ClaimAttempt::NotFound => Err(ConsultationError::NotFound),
        }
    }

    // ==========================================================================
    // RECONNECT / READS
    // ==========================================================================

    pub async fn reconnect(
        &self,
        consultation_id: Uuid,
        user: &User,
    ) -> Result<Consultation, ConsultationError> {
        let consultation = self.fetch_existing(consultation_id).await?;
        let profiles = self.resolve_profiles(user).await?;

        let allowed = match self.lifecycle.owner_role(&consultation, &profiles) {
            Some(ConsultationRole::Patient) => self.lifecycle.is_active(consultation.status),
            Some(ConsultationRole::Clinician) => {
                consultation.status == ConsultationStatus::InProgress
            }
            None => false,
        };

        if !allowed {
            debug!(
                "Reconnect to {} refused for user {} (status: {})",
                consultation_id, user.id, consultation.status
            );
            return Err(ConsultationError::NotAuthorized);
        }

        Ok(consultation)
    }

    /// Owners always see the record; clinicians also see cases still
    /// waiting in the queue.
    pub async fn get(
        &self,
        consultation_id: Uuid,
        user: &User,
    ) -> Result<Consultation, ConsultationError> {
        let consultation = self.fetch_existing(consultation_id).await?;
        if user.is_admin() {
            return Ok(consultation);
        }

        let profiles = self.resolve_profiles(user).await?;
        if self.lifecycle.owner_role(&consultation, &profiles).is_some() {
            return Ok(consultation);
        }
        if profiles.doctor_id.is_some()
            && consultation.doctor_id.is_none()
            && self.lifecycle.phase(consultation.status) == ConsultationPhase::Unclaimed
        {
            return Ok(consultation);
        }

        Err(ConsultationError::NotAuthorized)
    }

    /// Which side of the consultation `user` may join a session as.
    pub async fn authorize_participant(
        &self,
        consultation_id: Uuid,
        user: &User,
    ) -> Result<ConsultationRole, ConsultationError> {
        let consultation = self.fetch_existing(consultation_id).await?;
        let profiles = self.resolve_profiles(user).await?;
        self.lifecycle.require_owner(&consultation, &profiles)
    }

    // ==========================================================================
    // TERMINAL TRANSITIONS
    // ==========================================================================

    pub async fn finish(
        &self,
        consultation_id: Uuid,
        user: &User,
    ) -> Result<Consultation, ConsultationError> {
        let consultation = self.fetch_existing(consultation_id).await?;
        let profiles = self.resolve_profiles(user).await?;
        self.lifecycle.require_owner(&consultation, &profiles)?;

        if consultation.status == ConsultationStatus::Finished {
            return Ok(consultation);
        }
        self.lifecycle
            .validate_transition(consultation.status, ConsultationStatus::Finished)?;

        let from = vec![ConsultationStatus::InProgress];
        let patch = ConsultationPatch {
            status: Some(ConsultationStatus::Finished),
            ..Default::default()
        };

        match self
            .store
            .update_where(consultation_id, &UpdatePredicate::StatusIn(from), &patch)
            .await?
        {
            Some(finished) => {
                info!("Consultation {} finished by user {}", consultation_id, user.id);
                Ok(finished)
            }
            None => {
                // Lost a race with another terminal transition.
                let current = self.fetch_existing(consultation_id).await?;
                match current.status {
                    ConsultationStatus::Finished => Ok(current),
                    other => Err(ConsultationError::InvalidTransition {
                        from: other,
                        to: ConsultationStatus::Finished,
                    }),
                }
            }
        }
    }

    pub async fn cancel(
        &self,
        consultation_id: Uuid,
        user: &User,
    ) -> Result<Consultation, ConsultationError> {
        let consultation = self.fetch_existing(consultation_id).await?;
        let profiles = self.resolve_profiles(user).await?;
        self.lifecycle.require_owner(&consultation, &profiles)?;

        let predicate = UpdatePredicate::StatusIn(self.lifecycle.cancellable_statuses());
        let patch = ConsultationPatch {
            status: Some(ConsultationStatus::Cancelled),
            ..Default::default()
        };

        match self
            .store
            .update_where(consultation_id, &predicate, &patch)
            .await?
        {
            Some(cancelled) => {
                info!("Consultation {} cancelled by user {}", consultation_id, user.id);
                Ok(cancelled)
            }
            None => match self.store.fetch(consultation_id).await? {
                Some(_) => {
                    warn!("Refusing to cancel finished consultation {}", consultation_id);
                    Err(ConsultationError::CannotCancelFinished)
                }
                None => Err(ConsultationError::NotFound),
            },
        }
    }

    async fn fetch_existing(&self, consultation_id: Uuid) -> Result<Consultation, ConsultationError> {
        self.store
            .fetch(consultation_id)
            .await?
            .ok_or(ConsultationError::NotFound)
    }
}
