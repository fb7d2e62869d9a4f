use crate::config::Settings;
use crate::services::{SessionStore, SupabaseClient};
use std::sync::Arc;

/// Wire the hosted backend into a session store. The same client serves as
/// identity provider and record store.
pub fn build_session_store(settings: &Settings) -> (Arc<SupabaseClient>, SessionStore) {
    let client = Arc::new(SupabaseClient::new(&settings.supabase));
    let store = SessionStore::new(
        client.clone(),
        client.clone(),
        settings.session.to_session_config(),
    );
    (client, store)
}
