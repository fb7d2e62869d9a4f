//! Shared setup for auth-session integration tests.

#![allow(dead_code)]

use auth_session::models::{CapabilityLevel, Identity};
use auth_session::services::{
    AuthSnapshot, MockIdentityProvider, MockIdentityRecords, SessionConfig, SessionStore,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

pub const PASSWORD: &str = "correct-horse";

/// How long a test waits for the background listener to settle.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// A session store wired to in-memory fakes.
pub struct TestContext {
    pub provider: Arc<MockIdentityProvider>,
    pub records: Arc<MockIdentityRecords>,
    pub store: Arc<SessionStore>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        init_test_tracing();
        let provider = Arc::new(MockIdentityProvider::new());
        let records = Arc::new(MockIdentityRecords::new());
        let store = Arc::new(SessionStore::new(
            provider.clone(),
            records.clone(),
            config,
        ));
        Self {
            provider,
            records,
            store,
        }
    }

    /// An initialized store with nobody signed in.
    pub async fn started() -> Self {
        let ctx = Self::new();
        ctx.store.initialize().await;
        ctx
    }

    /// Provider account plus identity record at `level`, password [`PASSWORD`].
    pub fn add_user(&self, email: &str, level: CapabilityLevel) -> Identity {
        let id = self.provider.register_account(email, PASSWORD);
        let identity = Identity::register(
            id,
            email.to_string(),
            email.split('@').next().unwrap_or(email).to_string(),
            None,
            level,
            Utc::now(),
        );
        self.records.seed(identity.clone());
        identity
    }

    /// Wait until a published snapshot satisfies `check`.
    pub async fn wait_for<F>(&self, check: F) -> AuthSnapshot
    where
        F: Fn(&AuthSnapshot) -> bool,
    {
        let mut rx = self.store.watch();
        tokio::time::timeout(SETTLE_TIMEOUT, async {
            loop {
                {
                    let snapshot = rx.borrow_and_update();
                    if check(&snapshot) {
                        return snapshot.clone();
                    }
                }
                rx.changed().await.expect("session store dropped");
            }
        })
        .await
        .expect("snapshot never reached the expected state")
    }
}

/// Spin until `condition` holds, yielding to other tasks in between.
pub async fn eventually<F>(condition: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(SETTLE_TIMEOUT, async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition never became true");
}
