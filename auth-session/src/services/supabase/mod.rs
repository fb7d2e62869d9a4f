//! Adapter for the hosted Supabase backend.
//!
//! One client implements both [`IdentityProvider`](super::IdentityProvider)
//! (the `/auth/v1` endpoints) and
//! [`IdentityRecordStore`](super::IdentityRecordStore) (PostgREST under
//! `/rest/v1`). The current session lives in memory only.

mod auth;
mod rest;
mod wire;

use super::provider::SessionBroadcaster;
use crate::config::SupabaseSettings;
use crate::models::{Session, SessionChange, SessionEvent};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use service_core::observability::TracedRequest;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use wire::ErrorBody;

/// Header carrying the project API key on every request.
pub const API_KEY_HEADER: &str = "apikey";

/// Seconds before expiry at which a held session is refreshed.
pub const REFRESH_MARGIN_SECS: i64 = 60;

pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: Secret<String>,
    users_table: String,
    session: RwLock<Option<Session>>,
    broadcaster: SessionBroadcaster,
}

impl SupabaseClient {
    pub fn new(settings: &SupabaseSettings) -> Self {
        Self::with_client(Client::new(), settings)
    }

    pub fn with_client(client: Client, settings: &SupabaseSettings) -> Self {
        let base_url = settings.url.trim_end_matches('/').to_string();
        tracing::info!(
            url = %base_url,
            users_table = %settings.users_table,
            "Supabase client configured"
        );

        Self {
            client,
            base_url,
            anon_key: settings.anon_key.clone(),
            users_table: settings.users_table.clone(),
            session: RwLock::new(None),
            broadcaster: SessionBroadcaster::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Start from a session obtained elsewhere, e.g. restored from disk.
    pub fn restore_session(&self, session: Session) {
        *self.session_mut() = Some(session);
    }

    fn session_ref(&self) -> RwLockReadGuard<'_, Option<Session>> {
        self.session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn session_mut(&self) -> RwLockWriteGuard<'_, Option<Session>> {
        self.session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn held_session(&self) -> Option<Session> {
        self.session_ref().clone()
    }

    /// Replace the held session and tell subscribers why.
    fn set_session(&self, event: SessionEvent, session: Option<Session>) {
        *self.session_mut() = session.clone();
        self.broadcaster.publish(SessionChange::new(event, session));
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn rest_url(&self, query: &str) -> String {
        format!(
            "{}/rest/v1/{}{}",
            self.base_url,
            urlencoding::encode(&self.users_table),
            query
        )
    }

    /// Attach the API key and the bearer: the session's access token when
    /// signed in, the anon key otherwise.
    fn authorize(&self, request: TracedRequest) -> TracedRequest {
        let bearer = match self.session_ref().as_ref() {
            Some(session) => session.access_token.clone(),
            None => self.anon_key.expose_secret().clone(),
        };
        request
            .header(API_KEY_HEADER, self.anon_key.expose_secret())
            .bearer_auth(bearer)
    }

    /// Token grants and sign-up go out with the anon key even when a
    /// (possibly expired) session is held.
    fn anonymous(&self, request: TracedRequest) -> TracedRequest {
        request
            .header(API_KEY_HEADER, self.anon_key.expose_secret())
            .bearer_auth(self.anon_key.expose_secret())
    }
}

/// Status and best-effort message of a failed response.
async fn rejection(response: reqwest::Response) -> (u16, String) {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = ErrorBody::message_from(&body);
    (status, message)
}
