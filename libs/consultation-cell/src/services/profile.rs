// libs/consultation-cell/src/services/profile.rs
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{ConsultationError, ResolvedProfiles};

/// Maps an authenticated user id to the clinician and patient profiles that
/// consultation ownership is recorded against.
#[async_trait]
pub trait ProfileResolver: Send + Sync {
    async fn resolve(&self, user_id: &str) -> Result<ResolvedProfiles, ConsultationError>;
}

#[derive(Debug, Deserialize)]
struct ProfileIdRow {
    id: Uuid,
}

pub struct SupabaseProfileResolver {
    supabase: SupabaseClient,
}

impl SupabaseProfileResolver {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    async fn lookup(&self, table: &str, user_id: &str) -> Result<Option<Uuid>, ConsultationError> {
        let path = format!("/rest/v1/{}?user_id=eq.{}&select=id", table, user_id);
        let rows: Vec<ProfileIdRow> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await?;

        Ok(rows.into_iter().next().map(|row| row.id))
    }
}

#[async_trait]
impl ProfileResolver for SupabaseProfileResolver {
    async fn resolve(&self, user_id: &str) -> Result<ResolvedProfiles, ConsultationError> {
        let (doctor_id, patient_id) = tokio::try_join!(
            self.lookup("doctors", user_id),
            self.lookup("patients", user_id),
        )?;

        debug!(
            "Resolved user {} -> doctor: {:?}, patient: {:?}",
            user_id, doctor_id, patient_id
        );

        Ok(ResolvedProfiles { doctor_id, patient_id })
    }
}
