// libs/consultation-cell/src/services/store.rs
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{SupabaseClient, SupabaseError};

use crate::models::{
    Consultation, ConsultationError, ConsultationPatch, ConsultationQuery, ConsultationStatus,
    DoctorFilter, NewConsultation, UpdatePredicate,
};

/// Durable record of consultations.
///
/// `update_where` is the only way clinician ownership changes: it applies the
/// patch iff the row with `id` still satisfies `predicate`, and returns the
/// updated row when exactly one row was affected.
///
/// `insert_open` writes the row iff its patient has no other consultation in
/// an open status, and returns `None` without writing otherwise. Two
/// concurrent admissions for one patient therefore produce one row.
#[async_trait]
pub trait ConsultationStore: Send + Sync {
    async fn insert_open(&self, new: NewConsultation) -> Result<Option<Consultation>, ConsultationError>;

    async fn fetch(&self, id: Uuid) -> Result<Option<Consultation>, ConsultationError>;

    async fn update_where(
        &self,
        id: Uuid,
        predicate: &UpdatePredicate,
        patch: &ConsultationPatch,
    ) -> Result<Option<Consultation>, ConsultationError>;

    async fn list(&self, query: &ConsultationQuery) -> Result<Vec<Consultation>, ConsultationError>;
}

const TABLE_PATH: &str = "/rest/v1/consultations";

/// PostgREST-backed store. Conditional updates are filtered `PATCH`es with
/// `Prefer: return=representation`; the length of the returned array is the
/// affected-row count.
///
/// The open-per-patient rule is enforced by the database:
///
/// ```sql
/// CREATE UNIQUE INDEX consultations_one_open_per_patient
///     ON consultations (patient_id)
///     WHERE status IN ('requested', 'requested_unassigned', 'scheduled',
///                      'confirmed', 'in_progress');
/// ```
///
/// A violating insert comes back as HTTP 409 and is reported as `None`.
pub struct SupabaseConsultationStore {
    supabase: SupabaseClient,
}

impl SupabaseConsultationStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    fn status_list(statuses: &[ConsultationStatus]) -> String {
        statuses
            .iter()
            .map(ConsultationStatus::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    fn predicate_filter(predicate: &UpdatePredicate) -> String {
        match predicate {
            UpdatePredicate::Claimable { doctor_id } => format!(
                "&or=(doctor_id.is.null,doctor_id.eq.{})&status=in.({})",
                doctor_id,
                Self::status_list(&ConsultationStatus::CLAIM_ELIGIBLE)
            ),
            UpdatePredicate::StatusIn(statuses) => {
                format!("&status=in.({})", Self::status_list(statuses))
            }
        }
    }

    fn query_filter(query: &ConsultationQuery) -> String {
        let mut filter = format!("status=in.({})", Self::status_list(&query.statuses));
        if let Some(patient_id) = query.patient_id {
            filter.push_str(&format!("&patient_id=eq.{}", patient_id));
        }
        match query.doctor {
            DoctorFilter::Any => {}
            DoctorFilter::Unassigned => filter.push_str("&doctor_id=is.null"),
            DoctorFilter::UnassignedOr(doctor_id) => filter.push_str(&format!(
                "&or=(doctor_id.is.null,doctor_id.eq.{})",
                doctor_id
            )),
        }
        filter.push_str("&order=created_at.asc");
        filter
    }

    fn patch_body(patch: &ConsultationPatch) -> Value {
        let mut body = Map::new();
        if let Some(doctor_id) = patch.doctor_id {
            body.insert("doctor_id".to_string(), json!(doctor_id));
        }
        if let Some(status) = patch.status {
            body.insert("status".to_string(), json!(status));
        }
        body.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));
        Value::Object(body)
    }

    fn single_row(rows: Vec<Value>) -> Result<Option<Consultation>, ConsultationError> {
        if rows.len() > 1 {
            return Err(ConsultationError::DatabaseError(format!(
                "Conditional update affected {} rows",
                rows.len()
            )));
        }
        rows.into_iter()
            .next()
            .map(serde_json::from_value)
            .transpose()
            .map_err(ConsultationError::from)
    }

    async fn patch(
        &self,
        path: String,
        patch: &ConsultationPatch,
    ) -> Result<Option<Consultation>, ConsultationError> {
        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                None,
                Some(Self::patch_body(patch)),
                Some(SupabaseClient::return_representation()),
            )
            .await?;

        debug!("PATCH {} affected {} row(s)", path, rows.len());
        Self::single_row(rows)
    }
}

#[async_trait]
impl ConsultationStore for SupabaseConsultationStore {
    async fn insert_open(&self, new: NewConsultation) -> Result<Option<Consultation>, ConsultationError> {
        let patient_id = new.patient_id;
        let now = Utc::now().to_rfc3339();
        let body = json!({
            "patient_id": new.patient_id,
            "doctor_id": new.doctor_id,
            "status": new.status,
            "scheduled_start_time": new.scheduled_start_time,
            "scheduled_end_time": new.scheduled_end_time,
            "reason": new.reason,
            "created_at": now,
            "updated_at": now,
        });

        let inserted: anyhow::Result<Vec<Value>> = self
            .supabase
            .request_with_headers(
                Method::POST,
                TABLE_PATH,
                None,
                Some(body),
                Some(SupabaseClient::return_representation()),
            )
            .await;

        let rows = match inserted {
            Ok(rows) => rows,
            Err(e) if SupabaseError::is_conflict(&e) => {
                debug!("Patient {} already has an open consultation", patient_id);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match Self::single_row(rows)? {
            Some(consultation) => Ok(Some(consultation)),
            None => Err(ConsultationError::DatabaseError(
                "Insert returned no consultation".to_string(),
            )),
        }
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Consultation>, ConsultationError> {
        let path = format!("{}?id=eq.{}", TABLE_PATH, id);
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await?;

        Self::single_row(rows)
    }

    async fn update_where(
        &self,
        id: Uuid,
        predicate: &UpdatePredicate,
        patch: &ConsultationPatch,
    ) -> Result<Option<Consultation>, ConsultationError> {
        let path = format!("{}?id=eq.{}{}", TABLE_PATH, id, Self::predicate_filter(predicate));
        self.patch(path, patch).await
    }

    async fn list(&self, query: &ConsultationQuery) -> Result<Vec<Consultation>, ConsultationError> {
        let path = format!("{}?{}", TABLE_PATH, Self::query_filter(query));
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await?;

        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(ConsultationError::from))
            .collect()
    }
}
