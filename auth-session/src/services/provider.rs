use super::error::ProviderError;
use crate::models::{Session, SessionChange, SignUpMetadata, SignUpOutcome};
use async_trait::async_trait;
use secrecy::Secret;
use tokio::sync::broadcast;

/// Events buffered per subscriber before it is considered lagging.
pub const SUBSCRIPTION_CAPACITY: usize = 64;

/// External authentication service.
///
/// Implementations own the credential exchange and the session lifecycle. The
/// session store never sees raw tokens beyond what `Session` carries.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The session currently held by the provider, refreshed if it expired.
    async fn get_current_session(&self) -> Result<Option<Session>, ProviderError>;

    /// Register for session changes. Events sent after this call are
    /// delivered in order.
    fn subscribe(&self) -> SessionSubscription;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &Secret<String>,
    ) -> Result<Session, ProviderError>;

    async fn sign_up(
        &self,
        email: &str,
        password: &Secret<String>,
        metadata: &SignUpMetadata,
    ) -> Result<SignUpOutcome, ProviderError>;

    async fn sign_out(&self) -> Result<(), ProviderError>;

    /// Ask the provider to email a reset link pointing at `redirect_url`.
    async fn send_password_reset(
        &self,
        email: &str,
        redirect_url: &str,
    ) -> Result<(), ProviderError>;
}

/// What a subscription yields.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionSignal {
    Change(SessionChange),
    /// The subscriber fell behind and this many changes were dropped. The
    /// current session must be re-read from the provider.
    Missed(u64),
}

/// Handle returned by [`IdentityProvider::subscribe`].
///
/// Dropping it, or calling [`SessionSubscription::unsubscribe`], stops
/// delivery.
#[derive(Debug)]
pub struct SessionSubscription {
    receiver: broadcast::Receiver<SessionChange>,
}

impl SessionSubscription {
    pub fn new(receiver: broadcast::Receiver<SessionChange>) -> Self {
        Self { receiver }
    }

    /// Next change, or `None` once the provider has gone away.
    pub async fn next(&mut self) -> Option<SessionSignal> {
        match self.receiver.recv().await {
            Ok(change) => Some(SessionSignal::Change(change)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                Some(SessionSignal::Missed(skipped))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// A change that is already queued, without waiting.
    pub fn try_next(&mut self) -> Option<SessionSignal> {
        match self.receiver.try_recv() {
            Ok(change) => Some(SessionSignal::Change(change)),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                Some(SessionSignal::Missed(skipped))
            }
            Err(_) => None,
        }
    }

    pub fn unsubscribe(self) {
        drop(self.receiver);
    }
}

/// Fan-out used by provider implementations to publish session changes.
#[derive(Debug, Clone)]
pub struct SessionBroadcaster {
    sender: broadcast::Sender<SessionChange>,
}

impl Default for SessionBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(SUBSCRIPTION_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> SessionSubscription {
        SessionSubscription::new(self.sender.subscribe())
    }

    /// Publish a change. Having no subscribers is not an error.
    pub fn publish(&self, change: SessionChange) {
        let receivers = self.sender.send(change).unwrap_or(0);
        tracing::debug!(receivers, "Published session change");
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
