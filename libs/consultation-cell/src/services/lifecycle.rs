// libs/consultation-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use crate::models::{
    Consultation, ConsultationError, ConsultationPhase, ConsultationRole, ConsultationStatus,
    ResolvedProfiles,
};

/// Pure transition rules of the consultation lifecycle. Nothing here touches
/// the store; the consultation service applies these checks around its
/// conditional writes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsultationLifecycleService;

impl ConsultationLifecycleService {
    pub fn new() -> Self {
        Self
    }

    pub fn phase(&self, status: ConsultationStatus) -> ConsultationPhase {
        match status {
            ConsultationStatus::Requested
            | ConsultationStatus::RequestedUnassigned
            | ConsultationStatus::Scheduled
            | ConsultationStatus::Confirmed => ConsultationPhase::Unclaimed,
            ConsultationStatus::InProgress => ConsultationPhase::InProgress,
            ConsultationStatus::Finished => ConsultationPhase::Finished,
            ConsultationStatus::Cancelled => ConsultationPhase::Cancelled,
        }
    }

    /// Statuses reachable in one step from `current`.
    pub fn valid_transitions(&self, current: ConsultationStatus) -> Vec<ConsultationStatus> {
        match self.phase(current) {
            // `finished` is only reachable from `in_progress`.
            ConsultationPhase::Unclaimed => vec![
                ConsultationStatus::InProgress,
                ConsultationStatus::Cancelled,
            ],
            ConsultationPhase::InProgress => vec![
                ConsultationStatus::Finished,
                ConsultationStatus::Cancelled,
            ],
            // Terminal states
            ConsultationPhase::Finished | ConsultationPhase::Cancelled => vec![],
        }
    }

    pub fn validate_transition(
        &self,
        current: ConsultationStatus,
        next: ConsultationStatus,
    ) -> Result<(), ConsultationError> {
        debug!("Validating consultation transition {} -> {}", current, next);

        if current == ConsultationStatus::Finished && next == ConsultationStatus::Cancelled {
            return Err(ConsultationError::CannotCancelFinished);
        }

        if !self.valid_transitions(current).contains(&next) {
            warn!("Invalid consultation transition attempted: {} -> {}", current, next);
            return Err(ConsultationError::InvalidTransition { from: current, to: next });
        }

        Ok(())
    }

    pub fn can_cancel(&self, current: ConsultationStatus) -> bool {
        current != ConsultationStatus::Finished
    }

    /// Statuses a patient may reconnect from.
    pub fn is_active(&self, current: ConsultationStatus) -> bool {
        matches!(
            self.phase(current),
            ConsultationPhase::Unclaimed | ConsultationPhase::InProgress
        )
    }

    /// Every status a cancel may start from.
    pub fn cancellable_statuses(&self) -> Vec<ConsultationStatus> {
        [
            ConsultationStatus::Requested,
            ConsultationStatus::RequestedUnassigned,
            ConsultationStatus::Scheduled,
            ConsultationStatus::Confirmed,
            ConsultationStatus::InProgress,
            ConsultationStatus::Cancelled,
        ]
        .into_iter()
        .filter(|status| self.can_cancel(*status))
        .collect()
    }

    /// Which side of `consultation` the caller owns, clinician first.
    pub fn owner_role(
        &self,
        consultation: &Consultation,
        profiles: &ResolvedProfiles,
    ) -> Option<ConsultationRole> {
        if profiles.doctor_id.is_some_and(|id| consultation.is_owned_by_doctor(id)) {
            return Some(ConsultationRole::Clinician);
        }
        if profiles.patient_id.is_some_and(|id| consultation.is_owned_by_patient(id)) {
            return Some(ConsultationRole::Patient);
        }
        None
    }

    pub fn require_owner(
        &self,
        consultation: &Consultation,
        profiles: &ResolvedProfiles,
    ) -> Result<ConsultationRole, ConsultationError> {
        self.owner_role(consultation, profiles)
            .ok_or(ConsultationError::NotAuthorized)
    }

    /// Initial status for a freshly admitted consultation.
    pub fn initial_status(&self, has_schedule: bool) -> ConsultationStatus {
        if has_schedule {
            ConsultationStatus::Scheduled
        } else {
            ConsultationStatus::Requested
        }
    }
}
