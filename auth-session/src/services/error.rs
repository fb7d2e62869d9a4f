use crate::models::CapabilityLevel;
use service_core::error::AppError;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by the identity provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("No active session")]
    NoSession,

    #[error("Provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Provider transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected provider response: {0}")]
    Decode(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

/// Failure reported by the identity record store.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Identity record not found")]
    NotFound,

    #[error("Record store rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Record store transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected record store response: {0}")]
    Decode(String),

    #[error("Record store unavailable: {0}")]
    Unavailable(String),
}

/// Error returned by session store operations.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Records(#[from] RecordError),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Capability level '{0}' cannot be requested at sign-up")]
    ElevationNotPermitted(CapabilityLevel),

    #[error("Another sign-in, sign-up or sign-out is already in progress")]
    OperationInProgress,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Provider call timed out after {0:?}")]
    TimedOut(Duration),
}

impl AuthError {
    /// True for bad credentials or missing session, as opposed to outages.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            AuthError::Provider(ProviderError::InvalidCredentials)
                | AuthError::Provider(ProviderError::NoSession)
        )
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Provider(ProviderError::InvalidCredentials) => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid credentials"))
            }
            AuthError::Provider(ProviderError::NoSession) => {
                AppError::Unauthorized(anyhow::anyhow!("No active session"))
            }
            AuthError::Provider(ProviderError::Rejected { status, message })
            | AuthError::Records(RecordError::Rejected { status, message }) => {
                if status >= 500 {
                    AppError::BadGateway(message)
                } else {
                    AppError::BadRequest(anyhow::anyhow!(message))
                }
            }
            AuthError::Provider(ProviderError::Transport(e)) => AppError::BadGateway(e.to_string()),
            AuthError::Records(RecordError::Transport(e)) => AppError::BadGateway(e.to_string()),
            AuthError::Provider(ProviderError::Unavailable(_))
            | AuthError::Records(RecordError::Unavailable(_))
            | AuthError::TimedOut(_) => AppError::ServiceUnavailable,
            AuthError::Provider(ProviderError::Decode(e))
            | AuthError::Records(RecordError::Decode(e)) => {
                AppError::InternalError(anyhow::anyhow!(e))
            }
            AuthError::Records(RecordError::NotFound) => {
                AppError::InternalError(anyhow::anyhow!("Identity record not found"))
            }
            AuthError::Validation(e) => AppError::BadRequest(anyhow::anyhow!(e.to_string())),
            AuthError::ElevationNotPermitted(level) => AppError::Forbidden(anyhow::anyhow!(
                "Capability level '{}' cannot be requested at sign-up",
                level
            )),
            AuthError::OperationInProgress => {
                AppError::Conflict(anyhow::anyhow!("Operation already in progress"))
            }
            AuthError::Cancelled => AppError::InternalError(anyhow::anyhow!("Operation cancelled")),
        }
    }
}
