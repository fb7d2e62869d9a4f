mod common;

use auth_session::models::{AssignedCapability, CapabilityLevel, ProfileUpdate, SessionEvent};
use auth_session::services::{
    AuthError, MockIdentityProvider, ProviderError, RecordError, SessionConfig, SignInCredentials,
    SignUpRequest, SUBSCRIPTION_CAPACITY,
};
use common::{eventually, TestContext, PASSWORD};
use serde_json::{json, Map};
use std::time::Duration;

fn credentials(email: &str) -> SignInCredentials {
    SignInCredentials::new(email, PASSWORD)
}

// --- initialize ---

#[tokio::test]
async fn test_loading_until_initialized() {
    let ctx = TestContext::new();
    assert!(ctx.store.snapshot().loading);

    ctx.store.initialize().await;

    let snapshot = ctx.store.snapshot();
    assert!(!snapshot.loading);
    assert!(snapshot.identity.is_none());
    assert!(snapshot.session.is_none());
    assert!(ctx.store.is_initialized());
}

#[tokio::test]
async fn test_initialize_restores_existing_session() {
    let ctx = TestContext::new();
    let identity = ctx.add_user("ana@example.com", CapabilityLevel::Premium);
    ctx.provider
        .set_current_session(Some(MockIdentityProvider::issue_session(identity.id)));

    ctx.store.initialize().await;

    let snapshot = ctx.store.snapshot();
    assert!(!snapshot.loading);
    assert_eq!(snapshot.user_id(), Some(identity.id));
    assert_eq!(snapshot.identity, Some(identity));
}

#[tokio::test]
async fn test_initialize_failure_is_not_raised() {
    let ctx = TestContext::new();
    ctx.provider
        .fail_next(ProviderError::Unavailable("connection refused".to_string()));

    ctx.store.initialize().await;

    let snapshot = ctx.store.snapshot();
    assert!(!snapshot.loading);
    assert!(snapshot.identity.is_none());
    // Still listening for changes.
    assert_eq!(ctx.provider.subscriber_count(), 1);
}

#[tokio::test]
async fn test_initialize_runs_once() {
    let ctx = TestContext::new();
    ctx.store.initialize().await;
    ctx.store.initialize().await;

    assert_eq!(ctx.provider.call_count(), 1);
    assert_eq!(ctx.provider.subscriber_count(), 1);
}

// --- sign in ---

#[tokio::test]
async fn test_sign_in_publishes_identity() {
    let ctx = TestContext::started().await;
    let identity = ctx.add_user("ana@example.com", CapabilityLevel::Premium);

    let signed_in = ctx.store.sign_in(credentials("ana@example.com")).await.unwrap();

    assert_eq!(signed_in, Some(identity.clone()));
    let snapshot = ctx.store.snapshot();
    assert!(!snapshot.loading);
    assert_eq!(snapshot.user_id(), Some(identity.id));
    assert_eq!(snapshot.identity, Some(identity));
}

#[tokio::test]
async fn test_sign_in_failure_leaves_state_unset() {
    let ctx = TestContext::started().await;
    ctx.add_user("ana@example.com", CapabilityLevel::Premium);

    let result = ctx
        .store
        .sign_in(SignInCredentials::new("ana@example.com", "wrong-password"))
        .await;

    assert!(matches!(
        result,
        Err(AuthError::Provider(ProviderError::InvalidCredentials))
    ));
    let snapshot = ctx.store.snapshot();
    assert!(!snapshot.loading);
    assert!(snapshot.identity.is_none());
    assert!(snapshot.session.is_none());
}

#[tokio::test]
async fn test_sign_in_outage_is_surfaced() {
    let ctx = TestContext::started().await;
    ctx.add_user("ana@example.com", CapabilityLevel::Registered);
    ctx.provider
        .fail_next(ProviderError::Unavailable("503".to_string()));

    let err = ctx
        .store
        .sign_in(credentials("ana@example.com"))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::Provider(ProviderError::Unavailable(_))));
    assert!(!ctx.store.snapshot().loading);
}

#[tokio::test]
async fn test_sign_in_validation_happens_before_provider() {
    let ctx = TestContext::started().await;
    let calls = ctx.provider.call_count();

    let result = ctx
        .store
        .sign_in(SignInCredentials::new("not-an-email", PASSWORD))
        .await;

    assert!(matches!(result, Err(AuthError::Validation(_))));
    assert_eq!(ctx.provider.call_count(), calls);
}

#[tokio::test]
async fn test_sign_in_without_identity_record() {
    let ctx = TestContext::started().await;
    let id = ctx.provider.register_account("ghost@example.com", PASSWORD);

    let signed_in = ctx.store.sign_in(credentials("ghost@example.com")).await.unwrap();

    assert_eq!(signed_in, None);
    let snapshot = ctx.store.snapshot();
    assert_eq!(snapshot.user_id(), Some(id));
    assert!(snapshot.identity.is_none());
    assert!(!snapshot.loading);
}

// --- in-flight guard, cancellation, timeout ---

#[tokio::test]
async fn test_overlapping_calls_are_rejected() {
    let ctx = TestContext::started().await;
    ctx.add_user("ana@example.com", CapabilityLevel::Premium);
    ctx.provider.pause();

    let store = ctx.store.clone();
    let first = tokio::spawn(async move { store.sign_in(credentials("ana@example.com")).await });
    eventually(|| ctx.provider.waiting_calls() == 1).await;
    assert!(ctx.store.snapshot().loading);

    let second = ctx.store.sign_in(credentials("ana@example.com")).await;
    assert!(matches!(second, Err(AuthError::OperationInProgress)));
    assert!(matches!(
        ctx.store.sign_out().await,
        Err(AuthError::OperationInProgress)
    ));
    let sign_up = ctx
        .store
        .sign_up(SignUpRequest::new("other@example.com", "secret1", "Other"))
        .await;
    assert!(matches!(sign_up, Err(AuthError::OperationInProgress)));
    assert!(ctx.store.snapshot().loading);

    ctx.provider.resume();
    let identity = first.await.unwrap().unwrap();
    assert!(identity.is_some());
    assert!(!ctx.store.snapshot().loading);
}

#[tokio::test]
async fn test_cancel_pending_aborts_provider_call() {
    let ctx = TestContext::started().await;
    ctx.add_user("ana@example.com", CapabilityLevel::Premium);
    ctx.provider.pause();

    let store = ctx.store.clone();
    let first = tokio::spawn(async move { store.sign_in(credentials("ana@example.com")).await });
    eventually(|| ctx.provider.waiting_calls() == 1).await;

    ctx.store.cancel_pending();

    assert!(matches!(first.await.unwrap(), Err(AuthError::Cancelled)));
    let snapshot = ctx.store.snapshot();
    assert!(!snapshot.loading);
    assert!(snapshot.identity.is_none());
    assert_eq!(ctx.provider.waiting_calls(), 0);

    // Later calls are not affected.
    ctx.provider.resume();
    let identity = ctx.store.sign_in(credentials("ana@example.com")).await.unwrap();
    assert!(identity.is_some());
}

#[tokio::test]
async fn test_cancel_during_identity_fetch_withdraws_session() {
    let ctx = TestContext::started().await;
    ctx.add_user("ana@example.com", CapabilityLevel::Premium);
    ctx.records.pause();

    let store = ctx.store.clone();
    let first = tokio::spawn(async move { store.sign_in(credentials("ana@example.com")).await });
    eventually(|| ctx.records.waiting_calls() >= 1).await;

    ctx.store.cancel_pending();

    assert!(matches!(first.await.unwrap(), Err(AuthError::Cancelled)));
    let snapshot = ctx.store.snapshot();
    assert!(!snapshot.loading);
    assert!(snapshot.session.is_none());
    assert!(snapshot.identity.is_none());
    assert_eq!(
        snapshot.access(Some(CapabilityLevel::Registered)),
        auth_session::AccessDecision::Unauthenticated
    );
}

#[tokio::test]
async fn test_identity_read_outage_fails_sign_in() {
    let ctx = TestContext::started().await;
    ctx.add_user("ana@example.com", CapabilityLevel::Premium);
    ctx.records.fail_reads(true);

    let err = ctx
        .store
        .sign_in(credentials("ana@example.com"))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::Records(RecordError::Unavailable(_))));
    let snapshot = ctx.store.snapshot();
    assert!(snapshot.session.is_none());
    assert!(snapshot.identity.is_none());
    assert!(!snapshot.loading);
}

#[tokio::test]
async fn test_provider_timeout() {
    let ctx = TestContext::with_config(SessionConfig {
        provider_timeout: Some(Duration::from_millis(50)),
        ..Default::default()
    });
    ctx.store.initialize().await;
    ctx.add_user("ana@example.com", CapabilityLevel::Premium);
    ctx.provider.pause();

    let err = ctx
        .store
        .sign_in(credentials("ana@example.com"))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::TimedOut(limit) if limit == Duration::from_millis(50)));
    let snapshot = ctx.store.snapshot();
    assert!(!snapshot.loading);
    assert!(snapshot.identity.is_none());
}

// --- sign up ---

#[tokio::test]
async fn test_sign_up_creates_identity_record() {
    let ctx = TestContext::started().await;

    let registration = ctx
        .store
        .sign_up(
            SignUpRequest::new("nueva@example.com", "secret1", "Nueva").with_phone("+57 300 000 0000"),
        )
        .await
        .unwrap();

    assert!(registration.record_created);
    assert!(registration.signed_in);

    let record = ctx.records.get(registration.identity.id).unwrap();
    assert_eq!(
        record.capability_level,
        AssignedCapability::Known(CapabilityLevel::Registered)
    );
    assert!(record.verified_at.is_none());
    assert!(!record.is_verified());
    assert_eq!(record.created_at, record.updated_at);
    assert_eq!(record.phone.as_deref(), Some("+57 300 000 0000"));

    let snapshot = ctx.store.snapshot();
    assert!(!snapshot.loading);
    assert_eq!(snapshot.identity, Some(record));
}

#[tokio::test]
async fn test_sign_up_with_requested_tier() {
    let ctx = TestContext::started().await;

    let registration = ctx
        .store
        .sign_up(
            SignUpRequest::new("inversor@example.com", "secret1", "Inversor")
                .with_capability_level(CapabilityLevel::Premium),
        )
        .await
        .unwrap();

    assert_eq!(
        registration.identity.capability_level.level(),
        Some(CapabilityLevel::Premium)
    );
}

#[tokio::test]
async fn test_sign_up_cannot_request_staff_tier() {
    let ctx = TestContext::started().await;
    let calls = ctx.provider.call_count();

    let result = ctx
        .store
        .sign_up(
            SignUpRequest::new("mallory@example.com", "secret1", "Mallory")
                .with_capability_level(CapabilityLevel::Superadmin),
        )
        .await;

    assert!(matches!(
        result,
        Err(AuthError::ElevationNotPermitted(CapabilityLevel::Superadmin))
    ));
    assert_eq!(ctx.provider.call_count(), calls);
    assert!(ctx.records.is_empty());
}

#[tokio::test]
async fn test_sign_up_record_failure_is_not_rolled_back() {
    let ctx = TestContext::started().await;
    ctx.records.fail_writes(true);

    let registration = ctx
        .store
        .sign_up(SignUpRequest::new("nueva@example.com", "secret1", "Nueva"))
        .await
        .unwrap();

    assert!(!registration.record_created);
    assert!(ctx.records.is_empty());
    let snapshot = ctx.store.snapshot();
    assert!(snapshot.identity.is_none());
    assert!(!snapshot.loading);

    // The provider account still exists.
    let again = ctx
        .store
        .sign_up(SignUpRequest::new("nueva@example.com", "secret1", "Nueva"))
        .await;
    assert!(matches!(
        again,
        Err(AuthError::Provider(ProviderError::Rejected { status: 422, .. }))
    ));
}

#[tokio::test]
async fn test_sign_up_pending_email_confirmation() {
    let ctx = TestContext::started().await;
    ctx.provider.require_email_confirmation(true);

    let registration = ctx
        .store
        .sign_up(SignUpRequest::new("nueva@example.com", "secret1", "Nueva"))
        .await
        .unwrap();

    assert!(!registration.signed_in);
    assert!(registration.record_created);
    let snapshot = ctx.store.snapshot();
    assert!(snapshot.session.is_none());
    assert!(snapshot.identity.is_none());
}

#[tokio::test]
async fn test_sign_up_short_password_rejected() {
    let ctx = TestContext::started().await;
    let result = ctx
        .store
        .sign_up(SignUpRequest::new("nueva@example.com", "12345", "Nueva"))
        .await;
    assert!(matches!(result, Err(AuthError::Validation(_))));
}

// --- sign out ---

#[tokio::test]
async fn test_sign_out_clears_session_and_identity() {
    let ctx = TestContext::started().await;
    ctx.add_user("ana@example.com", CapabilityLevel::Premium);
    ctx.store.sign_in(credentials("ana@example.com")).await.unwrap();

    ctx.store.sign_out().await.unwrap();

    let snapshot = ctx.store.snapshot();
    assert!(snapshot.identity.is_none());
    assert!(snapshot.session.is_none());
    assert!(!snapshot.loading);

    // Queued provider events must not bring the identity back.
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(ctx.store.snapshot().identity.is_none());
}

#[tokio::test]
async fn test_sign_out_failure_keeps_state() {
    let ctx = TestContext::started().await;
    let identity = ctx.add_user("ana@example.com", CapabilityLevel::Premium);
    ctx.store.sign_in(credentials("ana@example.com")).await.unwrap();
    ctx.provider
        .fail_next(ProviderError::Unavailable("timeout".to_string()));

    assert!(ctx.store.sign_out().await.is_err());

    let snapshot = ctx.store.snapshot();
    assert_eq!(snapshot.identity, Some(identity));
    assert!(!snapshot.loading);
}

// --- reset password ---

#[tokio::test]
async fn test_reset_password_sends_redirect() {
    let ctx = TestContext::started().await;
    let before = ctx.store.snapshot();

    ctx.store.reset_password("ana@example.com").await.unwrap();

    assert_eq!(
        ctx.provider.reset_requests(),
        vec![(
            "ana@example.com".to_string(),
            "http://localhost:5173/reset-password".to_string()
        )]
    );
    assert_eq!(ctx.store.snapshot(), before);
}

#[tokio::test]
async fn test_reset_password_errors_are_surfaced() {
    let ctx = TestContext::started().await;

    assert!(matches!(
        ctx.store.reset_password("nope").await,
        Err(AuthError::Validation(_))
    ));

    ctx.provider.fail_next(ProviderError::Rejected {
        status: 429,
        message: "For security purposes, you can only request this once every 60 seconds"
            .to_string(),
    });
    assert!(matches!(
        ctx.store.reset_password("ana@example.com").await,
        Err(AuthError::Provider(ProviderError::Rejected { status: 429, .. }))
    ));
    assert!(ctx.provider.reset_requests().is_empty());
}

// --- update profile ---

#[tokio::test]
async fn test_update_profile_without_identity_is_noop() {
    let ctx = TestContext::started().await;

    let result = ctx
        .store
        .update_profile(ProfileUpdate {
            name: Some("Nobody".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(result.is_none());
    assert!(ctx.records.is_empty());

    // Not validated either: there is nothing to apply it to.
    let result = ctx
        .store
        .update_profile(ProfileUpdate {
            name: Some(String::new()),
            ..Default::default()
        })
        .await;
    assert!(matches!(result, Ok(None)));
}

#[tokio::test]
async fn test_update_profile_publishes_persisted_record() {
    let ctx = TestContext::started().await;
    let mut identity = ctx.add_user("ana@example.com", CapabilityLevel::Verified);
    identity
        .preferences
        .insert("language".to_string(), json!("es"));
    ctx.records.seed(identity.clone());
    ctx.store.sign_in(credentials("ana@example.com")).await.unwrap();

    let mut preferences = Map::new();
    preferences.insert("currency".to_string(), json!("COP"));
    let updated = ctx
        .store
        .update_profile(ProfileUpdate {
            name: Some("Ana María".to_string()),
            avatar: Some(Some("https://cdn.example.com/ana.png".to_string())),
            preferences: Some(preferences),
            ..Default::default()
        })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(updated.name, "Ana María");
    assert_eq!(updated.preferences["currency"], "COP");
    // The map is written as a whole, so older keys are gone.
    assert!(!updated.preferences.contains_key("language"));
    assert_eq!(updated.capability_level, identity.capability_level);
    assert!(updated.updated_at >= identity.updated_at);
    assert_eq!(ctx.store.snapshot().identity, Some(updated.clone()));
    assert_eq!(ctx.records.get(identity.id), Some(updated));
}

#[tokio::test]
async fn test_update_profile_failure_leaves_identity_unchanged() {
    let ctx = TestContext::started().await;
    ctx.add_user("ana@example.com", CapabilityLevel::Verified);
    ctx.store.sign_in(credentials("ana@example.com")).await.unwrap();
    let before = ctx.store.snapshot().identity;
    ctx.records.fail_writes(true);

    let result = ctx
        .store
        .update_profile(ProfileUpdate {
            name: Some("Ana María".to_string()),
            ..Default::default()
        })
        .await;

    assert!(matches!(
        result,
        Err(AuthError::Records(RecordError::Unavailable(_)))
    ));
    assert_eq!(ctx.store.snapshot().identity, before);
}

#[tokio::test]
async fn test_update_profile_validation() {
    let ctx = TestContext::started().await;
    ctx.add_user("ana@example.com", CapabilityLevel::Verified);
    ctx.store.sign_in(credentials("ana@example.com")).await.unwrap();

    let result = ctx
        .store
        .update_profile(ProfileUpdate {
            name: Some(String::new()),
            ..Default::default()
        })
        .await;
    assert!(matches!(result, Err(AuthError::Validation(_))));
}

// --- provider session changes ---

#[tokio::test]
async fn test_changes_from_elsewhere_are_followed() {
    let ctx = TestContext::started().await;
    let identity = ctx.add_user("ana@example.com", CapabilityLevel::Lawyer);

    ctx.provider.emit(
        SessionEvent::SignedIn,
        Some(MockIdentityProvider::issue_session(identity.id)),
    );
    let snapshot = ctx.wait_for(|s| s.identity.is_some()).await;
    assert_eq!(snapshot.identity, Some(identity));

    ctx.provider.emit(SessionEvent::SignedOut, None);
    ctx.wait_for(|s| s.identity.is_none() && s.session.is_none())
        .await;
}

#[tokio::test]
async fn test_token_refresh_keeps_identity() {
    let ctx = TestContext::started().await;
    let identity = ctx.add_user("ana@example.com", CapabilityLevel::Premium);
    ctx.store.sign_in(credentials("ana@example.com")).await.unwrap();

    let refreshed = MockIdentityProvider::issue_session(identity.id);
    let token = refreshed.access_token.clone();
    ctx.provider
        .emit(SessionEvent::TokenRefreshed, Some(refreshed));

    let snapshot = ctx
        .wait_for(|s| {
            s.session
                .as_ref()
                .is_some_and(|session| session.access_token == token)
        })
        .await;
    assert_eq!(snapshot.identity, Some(identity));
}

#[tokio::test]
async fn test_change_to_user_without_record_drops_stale_identity() {
    let ctx = TestContext::started().await;
    ctx.add_user("ana@example.com", CapabilityLevel::Premium);
    ctx.store.sign_in(credentials("ana@example.com")).await.unwrap();
    let other = ctx.provider.register_account("luis@example.com", PASSWORD);

    ctx.provider.emit(
        SessionEvent::SignedIn,
        Some(MockIdentityProvider::issue_session(other)),
    );

    ctx.wait_for(|s| s.user_id() == Some(other) && s.identity.is_none())
        .await;
}

#[tokio::test]
async fn test_burst_of_changes_converges_on_latest() {
    let ctx = TestContext::started().await;
    let identity = ctx.add_user("ana@example.com", CapabilityLevel::Premium);

    for _ in 0..SUBSCRIPTION_CAPACITY * 2 {
        ctx.provider.emit(SessionEvent::SignedOut, None);
    }
    ctx.provider.emit(
        SessionEvent::SignedIn,
        Some(MockIdentityProvider::issue_session(identity.id)),
    );

    let snapshot = ctx.wait_for(|s| s.identity.is_some()).await;
    assert_eq!(snapshot.identity, Some(identity));
}

// --- teardown ---

#[tokio::test]
async fn test_shutdown_unsubscribes() {
    let ctx = TestContext::started().await;
    let identity = ctx.add_user("ana@example.com", CapabilityLevel::Premium);
    assert_eq!(ctx.provider.subscriber_count(), 1);

    ctx.store.shutdown().await;
    assert_eq!(ctx.provider.subscriber_count(), 0);

    ctx.provider.emit(
        SessionEvent::SignedIn,
        Some(MockIdentityProvider::issue_session(identity.id)),
    );
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(ctx.store.snapshot().identity.is_none());
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_calls() {
    let ctx = TestContext::started().await;
    ctx.add_user("ana@example.com", CapabilityLevel::Premium);
    ctx.provider.pause();

    let store = ctx.store.clone();
    let pending = tokio::spawn(async move { store.sign_in(credentials("ana@example.com")).await });
    eventually(|| ctx.provider.waiting_calls() == 1).await;

    ctx.store.shutdown().await;

    assert!(matches!(pending.await.unwrap(), Err(AuthError::Cancelled)));
    assert!(!ctx.store.snapshot().loading);
}
