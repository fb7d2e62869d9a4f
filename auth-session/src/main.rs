use auth_session::access::Screen;
use auth_session::config::Settings;
use auth_session::services::SignInCredentials;
use auth_session::startup::build_session_store;
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::observability::init_tracing;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().map_err(|e| {
        eprintln!("Failed to read configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    init_tracing(
        &settings.telemetry.service_name,
        &settings.telemetry.log_level,
        settings.telemetry.otlp_endpoint.as_deref(),
    )
    .map_err(|e| anyhow::anyhow!("Failed to initialise tracing: {}", e))?;

    let (client, store) = build_session_store(&settings);
    info!(backend = %client.base_url(), "Checking access decisions");
    store.initialize().await;

    if let Some(probe) = &settings.probe {
        let credentials =
            SignInCredentials::new(probe.email.clone(), probe.password.expose_secret().clone());
        match store.sign_in(credentials).await {
            Ok(Some(identity)) => info!(
                user_id = %identity.id,
                capability_level = %identity.capability_level,
                verified = identity.is_verified(),
                "Probe signed in"
            ),
            Ok(None) => tracing::warn!("Probe signed in without an identity record"),
            Err(e) => {
                let err = AppError::from(e);
                tracing::error!(
                    kind = err.kind(),
                    transient = err.is_transient(),
                    error = %err,
                    "Probe sign-in failed"
                );
            }
        }
    }

    let snapshot = store.snapshot();
    for screen in Screen::ALL {
        info!(
            screen = %screen,
            required = screen
                .required_capability()
                .map(|level| level.as_str())
                .unwrap_or("public"),
            decision = %screen.access(&snapshot),
            "Access decision"
        );
    }

    if settings.probe.is_some() && snapshot.session.is_some() {
        if let Err(e) = store.sign_out().await {
            tracing::error!(error = %e, "Probe sign-out failed");
        }
    }

    store.shutdown().await;
    Ok(())
}
