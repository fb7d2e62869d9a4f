use super::error::RecordError;
use crate::models::{Identity, IdentityPatch};
use async_trait::async_trait;
use uuid::Uuid;

/// Persistent table of identity records, keyed by the provider's user id.
#[async_trait]
pub trait IdentityRecordStore: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<Identity, RecordError>;

    async fn insert(&self, identity: &Identity) -> Result<(), RecordError>;

    /// Apply `patch` to the record with `id`. Fields the patch leaves unset
    /// are not touched.
    async fn update(&self, id: Uuid, patch: &IdentityPatch) -> Result<(), RecordError>;
}
