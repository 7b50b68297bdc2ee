// libs/consultation-cell/src/services/memory.rs
//! In-process adapters for local runs and tests. The store serialises every
//! write under one lock, which gives `update_where` the same atomicity a
//! database row update has.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    Consultation, ConsultationError, ConsultationPatch, ConsultationQuery, NewConsultation,
    ResolvedProfiles, UpdatePredicate,
};
use crate::services::profile::ProfileResolver;
use crate::services::store::ConsultationStore;

#[derive(Default)]
pub struct InMemoryConsultationStore {
    rows: RwLock<HashMap<Uuid, Consultation>>,
}

impl InMemoryConsultationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row as-is, bypassing admission.
    pub async fn put(&self, consultation: Consultation) {
        self.rows.write().await.insert(consultation.id, consultation);
    }

    fn apply(row: &mut Consultation, patch: &ConsultationPatch) {
        if let Some(doctor_id) = patch.doctor_id {
            row.doctor_id = Some(doctor_id);
        }
        if let Some(status) = patch.status {
            row.status = status;
        }
        row.updated_at = Utc::now();
    }
}

#[async_trait]
impl ConsultationStore for InMemoryConsultationStore {
    async fn insert_open(&self, new: NewConsultation) -> Result<Option<Consultation>, ConsultationError> {
        let mut rows = self.rows.write().await;
        if rows
            .values()
            .any(|row| row.patient_id == new.patient_id && row.status.is_open())
        {
            return Ok(None);
        }

        let now = Utc::now();
        let consultation = Consultation {
            id: Uuid::new_v4(),
            patient_id: new.patient_id,
            doctor_id: new.doctor_id,
            status: new.status,
            scheduled_start_time: new.scheduled_start_time,
            scheduled_end_time: new.scheduled_end_time,
            reason: new.reason,
            created_at: now,
            updated_at: now,
        };
        rows.insert(consultation.id, consultation.clone());
        Ok(Some(consultation))
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Consultation>, ConsultationError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn update_where(
        &self,
        id: Uuid,
        predicate: &UpdatePredicate,
        patch: &ConsultationPatch,
    ) -> Result<Option<Consultation>, ConsultationError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&id) {
            Some(row) if predicate.matches(row) => {
                Self::apply(row, patch);
                Ok(Some(row.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn list(&self, query: &ConsultationQuery) -> Result<Vec<Consultation>, ConsultationError> {
        let rows = self.rows.read().await;
        let mut matching: Vec<Consultation> = rows
            .values()
            .filter(|row| query.matches(row))
            .cloned()
            .collect();
        matching.sort_by_key(|row| row.created_at);
        Ok(matching)
    }
}

/// Fixed user-id -> profiles table.
#[derive(Default)]
pub struct StaticProfileResolver {
    profiles: std::sync::RwLock<HashMap<String, ResolvedProfiles>>,
}

impl StaticProfileResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user_id: impl Into<String>, profiles: ResolvedProfiles) {
        let mut table = self
            .profiles
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        table.insert(user_id.into(), profiles);
    }

    pub fn register_doctor(&self, user_id: impl Into<String>) -> Uuid {
        let doctor_id = Uuid::new_v4();
        self.register(user_id, ResolvedProfiles { doctor_id: Some(doctor_id), patient_id: None });
        doctor_id
    }

    pub fn register_patient(&self, user_id: impl Into<String>) -> Uuid {
        let patient_id = Uuid::new_v4();
        self.register(user_id, ResolvedProfiles { doctor_id: None, patient_id: Some(patient_id) });
        patient_id
    }
}

#[async_trait]
impl ProfileResolver for StaticProfileResolver {
    async fn resolve(&self, user_id: &str) -> Result<ResolvedProfiles, ConsultationError> {
        let table = self
            .profiles
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(table.get(user_id).copied().unwrap_or_default())
    }
}
