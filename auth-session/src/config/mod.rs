use crate::services::{SessionConfig, DEFAULT_RESET_PATH};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::error::AppError;
use std::time::Duration;

/// Directory of this crate inside the workspace.
pub const CRATE_DIR: &str = "auth-session";

#[derive(Deserialize, Clone)]
pub struct Settings {
    pub supabase: SupabaseSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
    /// Credentials the `gatecheck` binary signs in with, if any.
    #[serde(default)]
    pub probe: Option<ProbeSettings>,
}

#[derive(Deserialize, Clone)]
pub struct SupabaseSettings {
    /// Project URL, e.g. `https://xyzcompany.supabase.co`.
    pub url: String,
    pub anon_key: Secret<String>,
    #[serde(default = "default_users_table")]
    pub users_table: String,
}

fn default_users_table() -> String {
    "users".to_string()
}

#[derive(Deserialize, Clone)]
pub struct SessionSettings {
    /// Public origin of the web app; reset links point back here.
    #[serde(default = "default_site_url")]
    pub site_url: String,
    #[serde(default = "default_reset_path")]
    pub reset_path: String,
    /// Unset means provider calls are not bounded.
    #[serde(default)]
    pub provider_timeout_secs: Option<u64>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            site_url: default_site_url(),
            reset_path: default_reset_path(),
            provider_timeout_secs: None,
        }
    }
}

fn default_site_url() -> String {
    "http://localhost:5173".to_string()
}

fn default_reset_path() -> String {
    DEFAULT_RESET_PATH.to_string()
}

impl SessionSettings {
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            site_url: self.site_url.clone(),
            reset_path: self.reset_path.clone(),
            provider_timeout: self.provider_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct TelemetrySettings {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// OTLP collector endpoint. Spans are only exported when set.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_level: default_log_level(),
            otlp_endpoint: None,
        }
    }
}

fn default_service_name() -> String {
    "auth-session".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Deserialize, Clone)]
pub struct ProbeSettings {
    pub email: String,
    pub password: Secret<String>,
}

impl Settings {
    /// Read `auth-session/config/base.yaml` and `APP__*` overrides.
    pub fn load() -> Result<Self, AppError> {
        let settings: Settings = service_core::config::load_settings(CRATE_DIR)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.supabase.url.trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "supabase.url must be set"
            )));
        }

        if self.supabase.anon_key.expose_secret().trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "supabase.anon_key must be set"
            )));
        }

        if self.supabase.users_table.trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "supabase.users_table must not be empty"
            )));
        }

        if self.session.site_url.trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "session.site_url must be set"
            )));
        }

        if self.session.provider_timeout_secs == Some(0) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "session.provider_timeout_secs must be positive"
            )));
        }

        Ok(())
    }
}
