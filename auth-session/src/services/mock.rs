//! In-memory stand-ins for the identity provider and the record store.
//!
//! Both support failure injection and a pause gate so tests can hold a call
//! open while they observe the store.

use super::error::{ProviderError, RecordError};
use super::provider::{IdentityProvider, SessionBroadcaster, SessionSubscription};
use super::records::IdentityRecordStore;
use crate::models::{
    Identity, IdentityPatch, ProviderUser, Session, SessionChange, SessionEvent, SignUpMetadata,
    SignUpOutcome,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use secrecy::{ExposeSecret, Secret};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Holds calls at their entry point while paused.
struct PauseGate {
    paused: watch::Sender<bool>,
    waiting: AtomicUsize,
}

impl PauseGate {
    fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            paused,
            waiting: AtomicUsize::new(0),
        }
    }

    async fn pass(&self) {
        let mut rx = self.paused.subscribe();
        if !*rx.borrow_and_update() {
            return;
        }
        let _waiting = Waiting::enter(&self.waiting);
        while *rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    fn set(&self, paused: bool) {
        self.paused.send_replace(paused);
    }

    fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

/// Counts a held call; released even if the call is dropped while held.
struct Waiting<'a>(&'a AtomicUsize);

impl<'a> Waiting<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MockAccount {
    user: ProviderUser,
    password: String,
}

/// Identity provider backed by a map of accounts.
pub struct MockIdentityProvider {
    accounts: Mutex<HashMap<String, MockAccount>>,
    session: Mutex<Option<Session>>,
    failures: Mutex<VecDeque<ProviderError>>,
    reset_requests: Mutex<Vec<(String, String)>>,
    broadcaster: SessionBroadcaster,
    gate: PauseGate,
    require_confirmation: AtomicBool,
    calls: AtomicUsize,
}

impl Default for MockIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            session: Mutex::new(None),
            failures: Mutex::new(VecDeque::new()),
            reset_requests: Mutex::new(Vec::new()),
            broadcaster: SessionBroadcaster::new(),
            gate: PauseGate::new(),
            require_confirmation: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// Add an account that can sign in. Returns its user id.
    pub fn register_account(&self, email: &str, password: &str) -> Uuid {
        let id = Uuid::new_v4();
        lock(&self.accounts).insert(
            email.to_lowercase(),
            MockAccount {
                user: ProviderUser {
                    id,
                    email: Some(email.to_string()),
                    user_metadata: Map::new(),
                },
                password: password.to_string(),
            },
        );
        id
    }

    /// A fresh one-hour session for `user_id`.
    pub fn issue_session(user_id: Uuid) -> Session {
        Session {
            access_token: Uuid::new_v4().to_string(),
            refresh_token: Uuid::new_v4().to_string(),
            token_type: "bearer".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
            user: ProviderUser {
                id: user_id,
                email: None,
                user_metadata: Map::new(),
            },
        }
    }

    /// Replace the held session without notifying subscribers.
    pub fn set_current_session(&self, session: Option<Session>) {
        *lock(&self.session) = session;
    }

    pub fn current_session(&self) -> Option<Session> {
        lock(&self.session).clone()
    }

    /// Change the held session and push the change, as a sign-in or sign-out
    /// in another process would.
    pub fn emit(&self, event: SessionEvent, session: Option<Session>) {
        self.set_current_session(session.clone());
        self.broadcaster.publish(SessionChange::new(event, session));
    }

    /// The next call fails with `error`. Queued errors are used in order.
    pub fn fail_next(&self, error: ProviderError) {
        lock(&self.failures).push_back(error);
    }

    /// Sign-ups return no session until the email is confirmed.
    pub fn require_email_confirmation(&self, required: bool) {
        self.require_confirmation.store(required, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.gate.set(true);
    }

    pub fn resume(&self) {
        self.gate.set(false);
    }

    /// Calls currently held by [`Self::pause`].
    pub fn waiting_calls(&self) -> usize {
        self.gate.waiting()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.broadcaster.subscriber_count()
    }

    /// `(email, redirect_url)` of every reset request received.
    pub fn reset_requests(&self) -> Vec<(String, String)> {
        lock(&self.reset_requests).clone()
    }

    async fn enter(&self) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.pass().await;
        match lock(&self.failures).pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn get_current_session(&self) -> Result<Option<Session>, ProviderError> {
        self.enter().await?;
        Ok(self.current_session())
    }

    fn subscribe(&self) -> SessionSubscription {
        self.broadcaster.subscribe()
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &Secret<String>,
    ) -> Result<Session, ProviderError> {
        self.enter().await?;
        let user = {
            let accounts = lock(&self.accounts);
            match accounts.get(&email.to_lowercase()) {
                Some(account) if account.password == *password.expose_secret() => {
                    account.user.clone()
                }
                _ => return Err(ProviderError::InvalidCredentials),
            }
        };

        let mut session = Self::issue_session(user.id);
        session.user = user;
        self.emit(SessionEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &Secret<String>,
        metadata: &SignUpMetadata,
    ) -> Result<SignUpOutcome, ProviderError> {
        self.enter().await?;
        let user_metadata = match serde_json::to_value(metadata) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        let user = ProviderUser {
            id: Uuid::new_v4(),
            email: Some(email.to_string()),
            user_metadata,
        };

        {
            let mut accounts = lock(&self.accounts);
            let key = email.to_lowercase();
            if accounts.contains_key(&key) {
                return Err(ProviderError::Rejected {
                    status: 422,
                    message: "User already registered".to_string(),
                });
            }
            accounts.insert(
                key,
                MockAccount {
                    user: user.clone(),
                    password: password.expose_secret().clone(),
                },
            );
        }

        if self.require_confirmation.load(Ordering::SeqCst) {
            return Ok(SignUpOutcome {
                user,
                session: None,
            });
        }

        let mut session = Self::issue_session(user.id);
        session.user = user.clone();
        self.emit(SessionEvent::SignedIn, Some(session.clone()));
        Ok(SignUpOutcome {
            user,
            session: Some(session),
        })
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.enter().await?;
        self.emit(SessionEvent::SignedOut, None);
        Ok(())
    }

    async fn send_password_reset(
        &self,
        email: &str,
        redirect_url: &str,
    ) -> Result<(), ProviderError> {
        self.enter().await?;
        lock(&self.reset_requests).push((email.to_string(), redirect_url.to_string()));
        Ok(())
    }
}

/// Record store backed by a map keyed by identity id.
pub struct MockIdentityRecords {
    rows: Mutex<HashMap<Uuid, Identity>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    gate: PauseGate,
}

impl Default for MockIdentityRecords {
    fn default() -> Self {
        Self::new()
    }
}

impl MockIdentityRecords {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            gate: PauseGate::new(),
        }
    }

    pub fn seed(&self, identity: Identity) {
        lock(&self.rows).insert(identity.id, identity);
    }

    pub fn get(&self, id: Uuid) -> Option<Identity> {
        lock(&self.rows).get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.rows).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every `get_by_id` fail until switched back.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every `insert` and `update` fail until switched back.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.gate.set(true);
    }

    pub fn resume(&self) {
        self.gate.set(false);
    }

    pub fn waiting_calls(&self) -> usize {
        self.gate.waiting()
    }

    fn check(&self, flag: &AtomicBool) -> Result<(), RecordError> {
        if flag.load(Ordering::SeqCst) {
            return Err(RecordError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityRecordStore for MockIdentityRecords {
    async fn get_by_id(&self, id: Uuid) -> Result<Identity, RecordError> {
        self.gate.pass().await;
        self.check(&self.fail_reads)?;
        self.get(id).ok_or(RecordError::NotFound)
    }

    async fn insert(&self, identity: &Identity) -> Result<(), RecordError> {
        self.gate.pass().await;
        self.check(&self.fail_writes)?;
        let mut rows = lock(&self.rows);
        if rows.contains_key(&identity.id) {
            return Err(RecordError::Rejected {
                status: 409,
                message: "duplicate key value violates unique constraint".to_string(),
            });
        }
        rows.insert(identity.id, identity.clone());
        Ok(())
    }

    async fn update(&self, id: Uuid, patch: &IdentityPatch) -> Result<(), RecordError> {
        self.gate.pass().await;
        self.check(&self.fail_writes)?;
        let mut rows = lock(&self.rows);
        let row = rows.get_mut(&id).ok_or(RecordError::NotFound)?;
        row.apply(patch);
        Ok(())
    }
}
