// libs/consultation-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// CONSULTATION DOMAIN MODELS
// ==============================================================================

/// A patient's request for care, optionally owned by a clinician once claimed
/// or pre-assigned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Consultation {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub status: ConsultationStatus,
    #[serde(default)]
    pub scheduled_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Consultation {
    pub fn is_owned_by_doctor(&self, doctor_id: Uuid) -> bool {
        self.doctor_id == Some(doctor_id)
    }

    pub fn is_owned_by_patient(&self, patient_id: Uuid) -> bool {
        self.patient_id == patient_id
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationStatus {
    #[serde(alias = "pending")]
    Requested,
    /// Legacy spelling of an unassigned request still present in older rows.
    RequestedUnassigned,
    Scheduled,
    Confirmed,
    InProgress,
    #[serde(alias = "completed")]
    Finished,
    #[serde(alias = "canceled")]
    Cancelled,
}

impl ConsultationStatus {
    /// Statuses a clinician may claim from.
    pub const CLAIM_ELIGIBLE: [ConsultationStatus; 4] = [
        ConsultationStatus::Requested,
        ConsultationStatus::RequestedUnassigned,
        ConsultationStatus::Scheduled,
        ConsultationStatus::Confirmed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsultationStatus::Requested => "requested",
            ConsultationStatus::RequestedUnassigned => "requested_unassigned",
            ConsultationStatus::Scheduled => "scheduled",
            ConsultationStatus::Confirmed => "confirmed",
            ConsultationStatus::InProgress => "in_progress",
            ConsultationStatus::Finished => "finished",
            ConsultationStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses in which a consultation still occupies its patient's single
    /// open slot.
    pub const OPEN: [ConsultationStatus; 5] = [
        ConsultationStatus::Requested,
        ConsultationStatus::RequestedUnassigned,
        ConsultationStatus::Scheduled,
        ConsultationStatus::Confirmed,
        ConsultationStatus::InProgress,
    ];

    pub fn is_claim_eligible(&self) -> bool {
        Self::CLAIM_ELIGIBLE.contains(self)
    }

    pub fn is_open(&self) -> bool {
        Self::OPEN.contains(self)
    }
}

impl fmt::Display for ConsultationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic lifecycle phase derived from the stored status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsultationPhase {
    Unclaimed,
    InProgress,
    Finished,
    Cancelled,
}

/// Clinician and patient profile identifiers of an authenticated user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolvedProfiles {
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
}

/// Which side of a consultation a user stands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsultationRole {
    Clinician,
    Patient,
}

// ==============================================================================
// CLAIM RESULTS
// ==============================================================================

/// Raw result of the claim compare-and-swap against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimAttempt {
    /// The conditional write touched the row; the caller now owns it.
    Won(Consultation),
    /// The row exists but did not match the claim predicate.
    AlreadyClaimed(Consultation),
    NotFound,
}

/// Successful claim as reported to callers.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(Consultation),
    /// The same clinician re-entered a session they already own.
    Reconnected(Consultation),
}

impl ClaimOutcome {
    pub fn into_consultation(self) -> Consultation {
        match self {
            ClaimOutcome::Claimed(c) | ClaimOutcome::Reconnected(c) => c,
        }
    }

    pub fn is_reconnect(&self) -> bool {
        matches!(self, ClaimOutcome::Reconnected(_))
    }
}

// ==============================================================================
// STORE CONTRACT TYPES
// ==============================================================================

#[derive(Debug, Clone)]
pub struct NewConsultation {
    pub patient_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub status: ConsultationStatus,
    pub scheduled_start_time: Option<DateTime<Utc>>,
    pub scheduled_end_time: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

/// Fields written by a transition. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsultationPatch {
    pub doctor_id: Option<Uuid>,
    pub status: Option<ConsultationStatus>,
}

/// Row predicate for a conditional update, on top of `id = X`.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdatePredicate {
    /// `(doctor_id IS NULL OR doctor_id = C) AND status IN eligible`.
    Claimable { doctor_id: Uuid },
    /// `status IN (..)`.
    StatusIn(Vec<ConsultationStatus>),
}

impl UpdatePredicate {
    pub fn matches(&self, consultation: &Consultation) -> bool {
        match self {
            UpdatePredicate::Claimable { doctor_id } => {
                consultation.status.is_claim_eligible()
                    && consultation.doctor_id.map_or(true, |owner| owner == *doctor_id)
            }
            UpdatePredicate::StatusIn(statuses) => statuses.contains(&consultation.status),
        }
    }
}

/// Admission queue filter, resolved from the requesting user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueScope {
    /// Every unclaimed consultation.
    All,
    /// Open consultations of one patient, claimed or not.
    Patient(Uuid),
    /// Unclaimed consultations plus those pre-assigned to this clinician.
    Clinician(Uuid),
}

impl From<QueueScope> for ConsultationQuery {
    fn from(scope: QueueScope) -> Self {
        let statuses = ConsultationStatus::CLAIM_ELIGIBLE.to_vec();
        match scope {
            QueueScope::All => ConsultationQuery {
                statuses,
                patient_id: None,
                doctor: DoctorFilter::Unassigned,
            },
            QueueScope::Patient(patient_id) => ConsultationQuery {
                statuses,
                patient_id: Some(patient_id),
                doctor: DoctorFilter::Any,
            },
            QueueScope::Clinician(doctor_id) => ConsultationQuery {
                statuses,
                patient_id: None,
                doctor: DoctorFilter::UnassignedOr(doctor_id),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoctorFilter {
    Any,
    Unassigned,
    UnassignedOr(Uuid),
}

/// Read filter understood by every store adapter. Results are ordered by
/// creation time, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsultationQuery {
    pub statuses: Vec<ConsultationStatus>,
    pub patient_id: Option<Uuid>,
    pub doctor: DoctorFilter,
}

impl ConsultationQuery {
    pub fn open_for_patient(patient_id: Uuid) -> Self {
        Self {
            statuses: ConsultationStatus::OPEN.to_vec(),
            patient_id: Some(patient_id),
            doctor: DoctorFilter::Any,
        }
    }

    pub fn matches(&self, consultation: &Consultation) -> bool {
        if !self.statuses.contains(&consultation.status) {
            return false;
        }
        if self.patient_id.is_some_and(|id| id != consultation.patient_id) {
            return false;
        }
        match self.doctor {
            DoctorFilter::Any => true,
            DoctorFilter::Unassigned => consultation.doctor_id.is_none(),
            DoctorFilter::UnassignedOr(doctor_id) => {
                consultation.doctor_id.map_or(true, |owner| owner == doctor_id)
            }
        }
    }
}

// ==============================================================================
// API REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CreateConsultationRequest {
    /// Pre-assign a clinician instead of waiting for a claim.
    pub doctor_id: Option<Uuid>,
    pub scheduled_start_time: Option<DateTime<Utc>>,
    pub scheduled_end_time: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueScopeParam {
    #[default]
    All,
    Mine,
}

#[derive(Debug, Deserialize)]
pub struct QueueQuery {
    #[serde(default)]
    pub scope: QueueScopeParam,
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub success: bool,
    pub reconnected: bool,
    pub consultation: Consultation,
}

// ==============================================================================
// ERROR HANDLING
// ==============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConsultationError {
    #[error("Consultation not found")]
    NotFound,

    #[error("Consultation already claimed by another clinician")]
    AlreadyClaimed,

    #[error("Not authorized for this consultation")]
    NotAuthorized,

    #[error("A finished consultation cannot be cancelled")]
    CannotCancelFinished,

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: ConsultationStatus,
        to: ConsultationStatus,
    },

    #[error("Patient already has an open consultation")]
    AlreadyOpen,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl ConsultationError {
    /// Stable machine-readable kind.
    pub fn code(&self) -> &'static str {
        match self {
            ConsultationError::NotFound => "not_found",
            ConsultationError::AlreadyClaimed => "already_claimed",
            ConsultationError::NotAuthorized => "not_authorized",
            ConsultationError::CannotCancelFinished => "cannot_cancel_finished",
            ConsultationError::InvalidTransition { .. } => "invalid_transition",
            ConsultationError::AlreadyOpen => "already_open",
            ConsultationError::ValidationError(_) => "validation_error",
            ConsultationError::DatabaseError(_) => "database_error",
        }
    }
}

impl From<anyhow::Error> for ConsultationError {
    fn from(err: anyhow::Error) -> Self {
        ConsultationError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for ConsultationError {
    fn from(err: serde_json::Error) -> Self {
        ConsultationError::DatabaseError(format!("Failed to parse consultation: {}", err))
    }
}
