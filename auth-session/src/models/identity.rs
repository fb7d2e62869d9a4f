//! Identity model - one row per principal in the `users` table.

use super::capability::{AssignedCapability, CapabilityLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;
use validator::Validate;

/// The canonical record for a signed-in principal.
///
/// Capability level comes from here, never from provider session metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(rename = "user_type")]
    pub capability_level: AssignedCapability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub preferences: Map<String, Value>,
}

impl Identity {
    /// Build the record for a freshly registered account: unverified, empty
    /// preferences, both timestamps set to `now`.
    pub fn register(
        id: Uuid,
        email: String,
        name: String,
        phone: Option<String>,
        level: CapabilityLevel,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            email,
            name,
            phone,
            avatar: None,
            capability_level: level.into(),
            verified_at: None,
            created_at: now,
            updated_at: now,
            preferences: Map::new(),
        }
    }

    /// No verification timestamp means unverified, whatever the level says.
    pub fn is_verified(&self) -> bool {
        self.verified_at.is_some()
    }

    /// Merge a persisted patch into this record.
    pub fn apply(&mut self, patch: &IdentityPatch) {
        let changes = &patch.changes;
        if let Some(name) = &changes.name {
            self.name = name.clone();
        }
        if let Some(phone) = &changes.phone {
            self.phone = phone.clone();
        }
        if let Some(avatar) = &changes.avatar {
            self.avatar = avatar.clone();
        }
        if let Some(preferences) = &changes.preferences {
            self.preferences = preferences.clone();
        }
        self.updated_at = patch.updated_at;
    }
}

/// Fields a principal may change on their own record.
///
/// `phone` and `avatar` are double options: `Some(None)` clears the value,
/// `None` leaves it alone. `preferences` replaces the stored map as a whole,
/// the same way the column is written. Capability
/// level and verification are administrative and not part of this type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct ProfileUpdate {
    #[validate(length(min = 1, max = 120))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Map<String, Value>>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.phone.is_none()
            && self.avatar.is_none()
            && self.preferences.is_none()
    }
}

/// What is actually written to the record store: the change plus a fresh
/// `updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityPatch {
    #[serde(flatten)]
    pub changes: ProfileUpdate,
    pub updated_at: DateTime<Utc>,
}

impl IdentityPatch {
    pub fn stamped(changes: ProfileUpdate, now: DateTime<Utc>) -> Self {
        Self {
            changes,
            updated_at: now,
        }
    }
}
