use super::{rejection, SupabaseClient};
use crate::models::{Identity, IdentityPatch};
use crate::services::error::RecordError;
use crate::services::records::IdentityRecordStore;
use async_trait::async_trait;
use reqwest::StatusCode;
use service_core::observability::TracedClientExt;
use uuid::Uuid;

/// Ask PostgREST for a single object instead of an array; zero rows
/// answers 406.
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";
const RETURN_MINIMAL: &str = "return=minimal";

fn id_filter(id: Uuid) -> String {
    format!("?id=eq.{}", urlencoding::encode(&id.to_string()))
}

#[async_trait]
impl IdentityRecordStore for SupabaseClient {
    async fn get_by_id(&self, id: Uuid) -> Result<Identity, RecordError> {
        let url = self.rest_url(&format!("{}&select=*", id_filter(id)));
        let response = self
            .authorize(self.client.traced_get(&url))
            .header("Accept", SINGLE_OBJECT)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_ACCEPTABLE | StatusCode::NOT_FOUND => return Err(RecordError::NotFound),
            status if !status.is_success() => {
                let (status, message) = rejection(response).await;
                return Err(RecordError::Rejected { status, message });
            }
            _ => {}
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Err(RecordError::NotFound);
        }
        serde_json::from_str(&body).map_err(|e| RecordError::Decode(e.to_string()))
    }

    async fn insert(&self, identity: &Identity) -> Result<(), RecordError> {
        let response = self
            .authorize(self.client.traced_post(&self.rest_url("")))
            .header("Prefer", RETURN_MINIMAL)
            .json(identity)
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, message) = rejection(response).await;
            return Err(RecordError::Rejected { status, message });
        }
        tracing::debug!(user_id = %identity.id, "Identity record inserted");
        Ok(())
    }

    async fn update(&self, id: Uuid, patch: &IdentityPatch) -> Result<(), RecordError> {
        let response = self
            .authorize(self.client.traced_patch(&self.rest_url(&id_filter(id))))
            .header("Prefer", RETURN_MINIMAL)
            .json(patch)
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, message) = rejection(response).await;
            return Err(RecordError::Rejected { status, message });
        }
        tracing::debug!(user_id = %id, "Identity record updated");
        Ok(())
    }
}
