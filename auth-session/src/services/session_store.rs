//! Process-wide authentication state.
//!
//! The store owns the current [`Session`] and [`Identity`] and publishes them
//! as an [`AuthSnapshot`] over a `watch` channel. Everything else only reads
//! snapshots.
//!
//! Lifecycle: construct, [`SessionStore::initialize`] once, use, then
//! [`SessionStore::shutdown`]. Initialization subscribes to provider session
//! changes before reading the current session, and a single background task
//! applies those changes in the order the provider sent them.

use super::error::{AuthError, RecordError};
use super::provider::{IdentityProvider, SessionSignal, SessionSubscription};
use super::records::IdentityRecordStore;
use crate::models::{
    CapabilityLevel, Identity, IdentityPatch, ProfileUpdate, Session, SessionChange,
    SignUpMetadata,
};
use chrono::Utc;
use secrecy::{ExposeSecret, Secret};
use std::borrow::Cow;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Shortest password the provider accepts at sign-up.
pub const MIN_PASSWORD_LENGTH: usize = 6;

pub const DEFAULT_RESET_PATH: &str = "/reset-password";

/// What the rest of the process sees of the authentication state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthSnapshot {
    pub session: Option<Session>,
    pub identity: Option<Identity>,
    pub loading: bool,
}

impl AuthSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(Session::user_id)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Public origin of the application, used to build reset links.
    pub site_url: String,
    pub reset_path: String,
    /// Upper bound on each provider or record-store call. `None` waits
    /// indefinitely.
    pub provider_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            site_url: "http://localhost:5173".to_string(),
            reset_path: DEFAULT_RESET_PATH.to_string(),
            provider_timeout: None,
        }
    }
}

impl SessionConfig {
    /// Where the password-reset email should send the user.
    pub fn reset_redirect(&self) -> String {
        let origin = self.site_url.trim_end_matches('/');
        if self.reset_path.starts_with('/') {
            format!("{}{}", origin, self.reset_path)
        } else {
            format!("{}/{}", origin, self.reset_path)
        }
    }
}

// Passwords are checked at struct level so the secret never becomes a
// validation error parameter.
fn password_present(credentials: &SignInCredentials) -> Result<(), ValidationError> {
    if credentials.password.expose_secret().is_empty() {
        let mut err = ValidationError::new("password_required");
        err.message = Some(Cow::from("Password is required"));
        return Err(err);
    }
    Ok(())
}

fn password_strength(request: &SignUpRequest) -> Result<(), ValidationError> {
    if request.password.expose_secret().chars().count() < MIN_PASSWORD_LENGTH {
        let mut err = ValidationError::new("password_length");
        err.message = Some(Cow::from("Password must be at least 6 characters"));
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Validate)]
#[validate(schema(function = "password_present", skip_on_field_errors = false))]
pub struct SignInCredentials {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    pub password: Secret<String>,
}

impl SignInCredentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: Secret::new(password.into()),
        }
    }
}

#[derive(Debug, Validate)]
#[validate(schema(function = "password_strength", skip_on_field_errors = false))]
pub struct SignUpRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    pub password: Secret<String>,

    #[validate(length(min = 1, max = 120, message = "Name is required"))]
    pub name: String,

    pub phone: Option<String>,

    /// Tier to register at. Defaults to the lowest registered tier.
    pub capability_level: Option<CapabilityLevel>,
}

impl SignUpRequest {
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            password: Secret::new(password.into()),
            name: name.into(),
            phone: None,
            capability_level: None,
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_capability_level(mut self, level: CapabilityLevel) -> Self {
        self.capability_level = Some(level);
        self
    }
}

#[derive(Debug, Validate)]
struct PasswordResetRequest {
    #[validate(email(message = "Invalid email format"))]
    email: String,
}

/// Result of a sign-up.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    /// The record as it was built for insertion.
    pub identity: Identity,
    /// False when the provider wants the email confirmed before first sign-in.
    pub signed_in: bool,
    /// False when the provider account exists but the identity record could
    /// not be written. Nothing is rolled back in that case.
    pub record_created: bool,
}

struct Inner {
    provider: Arc<dyn IdentityProvider>,
    records: Arc<dyn IdentityRecordStore>,
    state: watch::Sender<AuthSnapshot>,
    config: SessionConfig,
    loading_holders: AtomicUsize,
}

/// Keeps `loading` true while alive. Several guards may overlap; the flag
/// drops back to false when the last one goes.
struct LoadingGuard<'a> {
    inner: &'a Inner,
}

impl<'a> LoadingGuard<'a> {
    fn acquire(inner: &'a Inner) -> Self {
        inner.state.send_modify(|snapshot| {
            inner.loading_holders.fetch_add(1, Ordering::SeqCst);
            snapshot.loading = true;
        });
        Self { inner }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let inner = self.inner;
        inner.state.send_if_modified(|snapshot| {
            let remaining = inner.loading_holders.fetch_sub(1, Ordering::SeqCst) - 1;
            let loading = remaining > 0;
            let changed = snapshot.loading != loading;
            snapshot.loading = loading;
            changed
        });
    }
}

impl Inner {
    /// Run a provider or record-store call under `cancel` and the configured
    /// timeout.
    async fn call<T, E, F>(&self, cancel: &CancellationToken, call: F) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<AuthError>,
    {
        let bounded = async {
            match self.config.provider_timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result.map_err(Into::into),
                    Err(_) => Err(AuthError::TimedOut(limit)),
                },
                None => call.await.map_err(Into::into),
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AuthError::Cancelled),
            result = bounded => result,
        }
    }

    fn clear(&self) {
        self.state.send_if_modified(|snapshot| {
            let changed = snapshot.session.is_some() || snapshot.identity.is_some();
            snapshot.session = None;
            snapshot.identity = None;
            changed
        });
    }

    /// Publish `identity` only if it still belongs to the published session.
    fn publish_identity(&self, identity: Identity) -> bool {
        self.state.send_if_modified(|snapshot| {
            let current_user = snapshot.session.as_ref().map(Session::user_id);
            if current_user == Some(identity.id) {
                snapshot.identity = Some(identity);
                true
            } else {
                false
            }
        })
    }

    /// Store `session`, then fetch and publish its identity record.
    ///
    /// A missing record is not an error: the session stays and `Ok(None)` is
    /// returned. Any other failure withdraws the session again and is
    /// returned. Either way a previous identity for another user is dropped.
    async fn adopt_session(
        &self,
        session: Session,
        cancel: &CancellationToken,
    ) -> Result<Option<Identity>, AuthError> {
        let user_id = session.user_id();
        let display_name = session.user.metadata_str("name").map(str::to_string);
        let adopted = session.clone();
        self.state.send_modify(|snapshot| {
            snapshot.session = Some(session);
        });

        let err = match self.call(cancel, self.records.get_by_id(user_id)).await {
            Ok(identity) => {
                if self.publish_identity(identity.clone()) {
                    tracing::debug!(user_id = %user_id, "Published identity");
                    return Ok(Some(identity));
                }
                tracing::debug!(user_id = %user_id, "Session changed while fetching identity");
                return Ok(None);
            }
            Err(e) => e,
        };

        if matches!(err, AuthError::Records(RecordError::NotFound)) {
            tracing::warn!(
                user_id = %user_id,
                name = ?display_name,
                "Session has no identity record"
            );
            self.state.send_if_modified(|snapshot| {
                let stale = snapshot
                    .identity
                    .as_ref()
                    .is_some_and(|identity| identity.id != user_id);
                if stale {
                    snapshot.identity = None;
                }
                stale
            });
            return Ok(None);
        }

        tracing::error!(user_id = %user_id, error = %err, "Failed to load identity record");
        self.state.send_if_modified(|snapshot| {
            if snapshot.session.as_ref() != Some(&adopted) {
                return false;
            }
            snapshot.session = None;
            snapshot.identity = None;
            true
        });
        Err(err)
    }

    async fn apply_session(&self, session: Option<Session>, cancel: &CancellationToken) {
        match session {
            Some(session) => {
                // Already logged by adopt_session.
                let _ = self.adopt_session(session, cancel).await;
            }
            None => self.clear(),
        }
    }

    async fn apply_change(&self, change: SessionChange, cancel: &CancellationToken) {
        tracing::info!(
            event = %change.event,
            has_session = change.session.is_some(),
            "Session change"
        );
        self.apply_session(change.session, cancel).await;
    }

    async fn resync(&self, cancel: &CancellationToken) {
        match self.call(cancel, self.provider.get_current_session()).await {
            Ok(session) => self.apply_session(session, cancel).await,
            Err(e) => tracing::error!(error = %e, "Failed to re-read session after missed changes"),
        }
    }
}

/// Drain provider session changes one at a time until shutdown.
///
/// Changes already queued behind the one just received are folded into it:
/// only the newest is applied, since it describes the provider's current
/// state.
async fn listen(inner: Arc<Inner>, mut subscription: SessionSubscription, shutdown: CancellationToken) {
    tracing::debug!("Session listener started");
    loop {
        let signal = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            signal = subscription.next() => signal,
        };
        let Some(mut signal) = signal else {
            tracing::debug!("Identity provider closed the subscription");
            break;
        };

        let mut superseded = 0u64;
        while let Some(next) = subscription.try_next() {
            superseded += 1;
            signal = next;
        }
        if superseded > 0 {
            tracing::debug!(superseded, "Skipped superseded session changes");
        }

        match signal {
            SessionSignal::Change(change) => inner.apply_change(change, &shutdown).await,
            SessionSignal::Missed(skipped) => {
                tracing::warn!(skipped, "Session listener lagged, re-reading current session");
                inner.resync(&shutdown).await;
            }
        }
    }
    subscription.unsubscribe();
    tracing::debug!("Session listener stopped");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owner of the authentication state. See the module docs for the lifecycle.
pub struct SessionStore {
    inner: Arc<Inner>,
    in_flight: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
    pending: Mutex<CancellationToken>,
    listener: Mutex<Option<JoinHandle<()>>>,
    initialized: AtomicBool,
}

impl SessionStore {
    /// Build a store. It reports `loading` until [`Self::initialize`] has run.
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        records: Arc<dyn IdentityRecordStore>,
        config: SessionConfig,
    ) -> Self {
        let (state, _) = watch::channel(AuthSnapshot {
            loading: true,
            ..Default::default()
        });
        let shutdown = CancellationToken::new();
        let pending = shutdown.child_token();

        Self {
            inner: Arc::new(Inner {
                provider,
                records,
                state,
                config,
                loading_holders: AtomicUsize::new(0),
            }),
            in_flight: tokio::sync::Mutex::new(()),
            shutdown,
            pending: Mutex::new(pending),
            listener: Mutex::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Receiver that sees every published snapshot from now on.
    pub fn watch(&self) -> watch::Receiver<AuthSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn operation_token(&self) -> CancellationToken {
        lock(&self.pending).child_token()
    }

    /// Abort every provider call currently in flight. They fail with
    /// [`AuthError::Cancelled`]. Later calls are unaffected.
    pub fn cancel_pending(&self) {
        let mut pending = lock(&self.pending);
        pending.cancel();
        *pending = self.shutdown.child_token();
        tracing::info!("Cancelled pending session operations");
    }

    fn begin_exclusive(&self) -> Result<tokio::sync::MutexGuard<'_, ()>, AuthError> {
        self.in_flight.try_lock().map_err(|_| {
            tracing::warn!("Rejected overlapping authentication call");
            AuthError::OperationInProgress
        })
    }

    /// Read the provider's existing session and start following its changes.
    ///
    /// Failures are logged, never returned. Only the first call does anything.
    pub async fn initialize(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            tracing::debug!("Session store already initialized");
            return;
        }

        let _loading = LoadingGuard::acquire(&self.inner);
        let subscription = self.inner.provider.subscribe();
        let cancel = self.operation_token();

        match self
            .inner
            .call(&cancel, self.inner.provider.get_current_session())
            .await
        {
            Ok(Some(session)) => {
                let user_id = session.user_id();
                if let Ok(identity) = self.inner.adopt_session(session, &cancel).await {
                    tracing::info!(
                        user_id = %user_id,
                        identity_loaded = identity.is_some(),
                        "Restored existing session"
                    );
                }
            }
            Ok(None) => tracing::info!("No existing session"),
            Err(e) => tracing::error!(error = %e, "Failed to read current session"),
        }

        if self.shutdown.is_cancelled() {
            subscription.unsubscribe();
            return;
        }
        let handle = tokio::spawn(listen(
            Arc::clone(&self.inner),
            subscription,
            self.shutdown.clone(),
        ));
        *lock(&self.listener) = Some(handle);
    }

    /// Authenticate with email and password, then load the identity record.
    ///
    /// Returns `Ok(None)` when the provider accepted the credentials but no
    /// identity record exists. If the record cannot be read for any other
    /// reason the session is withdrawn and the error returned.
    pub async fn sign_in(
        &self,
        credentials: SignInCredentials,
    ) -> Result<Option<Identity>, AuthError> {
        credentials.validate()?;
        let _exclusive = self.begin_exclusive()?;
        let _loading = LoadingGuard::acquire(&self.inner);
        let cancel = self.operation_token();

        let session = self
            .inner
            .call(
                &cancel,
                self.inner
                    .provider
                    .sign_in_with_password(&credentials.email, &credentials.password),
            )
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Sign in failed");
                e
            })?;

        let user_id = session.user_id();
        let identity = self.inner.adopt_session(session, &cancel).await?;
        tracing::info!(user_id = %user_id, identity_loaded = identity.is_some(), "Signed in");
        Ok(identity)
    }

    /// Create a provider account and its identity record.
    ///
    /// Staff tiers cannot be requested here. If the record insert fails after
    /// the account was created, the failure is logged and reported through
    /// [`Registration::record_created`]; the account is left in place.
    pub async fn sign_up(&self, request: SignUpRequest) -> Result<Registration, AuthError> {
        request.validate()?;
        let level = request.capability_level.unwrap_or_default();
        if !level.is_self_service() {
            tracing::warn!(requested = %level, "Rejected sign-up for a staff tier");
            return Err(AuthError::ElevationNotPermitted(level));
        }

        let _exclusive = self.begin_exclusive()?;
        let _loading = LoadingGuard::acquire(&self.inner);
        let cancel = self.operation_token();

        let metadata = SignUpMetadata {
            name: request.name.clone(),
            phone: request.phone.clone(),
            capability_level: level,
        };
        let outcome = self
            .inner
            .call(
                &cancel,
                self.inner
                    .provider
                    .sign_up(&request.email, &request.password, &metadata),
            )
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Sign up failed");
                e
            })?;

        let user_id = outcome.user.id;
        let identity = Identity::register(
            user_id,
            request.email,
            request.name,
            request.phone,
            level,
            Utc::now(),
        );

        let record_created = match self
            .inner
            .call(&cancel, self.inner.records.insert(&identity))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "Provider account created but identity record insert failed; not rolled back"
                );
                false
            }
        };

        let signed_in = outcome.session.is_some();
        if let Some(session) = outcome.session {
            if record_created {
                self.inner.state.send_modify(|snapshot| {
                    snapshot.session = Some(session);
                });
                self.inner.publish_identity(identity.clone());
            } else {
                self.inner.adopt_session(session, &cancel).await?;
            }
        }

        tracing::info!(
            user_id = %user_id,
            capability_level = %level,
            signed_in,
            record_created,
            "Signed up"
        );
        Ok(Registration {
            identity,
            signed_in,
            record_created,
        })
    }

    /// End the provider session. Local state is cleared only if the provider
    /// confirms.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let _exclusive = self.begin_exclusive()?;
        let _loading = LoadingGuard::acquire(&self.inner);
        let cancel = self.operation_token();
        let user_id = self.snapshot().user_id();

        self.inner
            .call(&cancel, self.inner.provider.sign_out())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Sign out failed");
                e
            })?;

        self.inner.clear();
        match user_id {
            Some(id) => tracing::info!(user_id = %id, "Signed out"),
            None => tracing::info!("Signed out"),
        }
        Ok(())
    }

    /// Ask the provider to email a reset link. Local state is not touched.
    pub async fn reset_password(&self, email: &str) -> Result<(), AuthError> {
        PasswordResetRequest {
            email: email.to_string(),
        }
        .validate()?;
        let cancel = self.operation_token();
        let redirect = self.inner.config.reset_redirect();

        self.inner
            .call(
                &cancel,
                self.inner.provider.send_password_reset(email, &redirect),
            )
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Password reset request failed");
                e
            })?;

        tracing::info!(redirect = %redirect, "Password reset email requested");
        Ok(())
    }

    /// Persist profile changes for the signed-in identity, then merge them
    /// into the published one.
    ///
    /// Returns `Ok(None)` without calling anything when nobody is signed in.
    /// On error the published identity is unchanged.
    pub async fn update_profile(
        &self,
        update: ProfileUpdate,
    ) -> Result<Option<Identity>, AuthError> {
        let Some(current) = self.snapshot().identity else {
            tracing::debug!("Profile update skipped, nobody is signed in");
            return Ok(None);
        };
        update.validate()?;
        if update.is_empty() {
            return Ok(Some(current));
        }

        let cancel = self.operation_token();
        let patch = IdentityPatch::stamped(update, Utc::now());
        self.inner
            .call(&cancel, self.inner.records.update(current.id, &patch))
            .await
            .map_err(|e| {
                tracing::error!(user_id = %current.id, error = %e, "Profile update failed");
                e
            })?;

        let mut merged = None;
        self.inner.state.send_if_modified(|snapshot| match snapshot.identity.as_mut() {
            Some(identity) if identity.id == current.id => {
                identity.apply(&patch);
                merged = Some(identity.clone());
                true
            }
            _ => false,
        });

        if merged.is_some() {
            tracing::info!(user_id = %current.id, "Profile updated");
        } else {
            tracing::warn!(
                user_id = %current.id,
                "Profile persisted but the signed-in identity changed meanwhile"
            );
        }
        Ok(merged)
    }

    /// Stop the change listener and fail any call still in flight.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = lock(&self.listener).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Session listener task failed");
            }
        }
        tracing::info!("Session store shut down");
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
