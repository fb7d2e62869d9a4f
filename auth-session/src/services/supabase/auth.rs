use super::wire::{
    PasswordGrant, RecoverBody, RefreshGrant, SignUpBody, SignUpResponse, TokenResponse,
};
use super::{rejection, SupabaseClient, REFRESH_MARGIN_SECS};
use crate::models::{Session, SessionEvent, SignUpMetadata, SignUpOutcome};
use crate::services::error::ProviderError;
use crate::services::provider::{IdentityProvider, SessionSubscription};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, Secret};
use service_core::observability::TracedClientExt;

impl SupabaseClient {
    async fn token_grant<B: serde::Serialize>(
        &self,
        grant_type: &str,
        body: &B,
    ) -> Result<Result<Session, (u16, String)>, ProviderError> {
        let url = self.auth_url(&format!(
            "token?grant_type={}",
            urlencoding::encode(grant_type)
        ));
        let response = self
            .anonymous(self.client.traced_post(&url))
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Ok(Err(rejection(response).await));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(Ok(token.into_session(Utc::now())))
    }

    async fn refresh(&self, session: &Session) -> Result<Option<Session>, ProviderError> {
        let grant = RefreshGrant {
            refresh_token: &session.refresh_token,
        };
        match self.token_grant("refresh_token", &grant).await? {
            Ok(refreshed) => {
                tracing::info!(user_id = %refreshed.user_id(), "Session refreshed");
                self.set_session(SessionEvent::TokenRefreshed, Some(refreshed.clone()));
                Ok(Some(refreshed))
            }
            Err((status, message)) if status == 400 || status == 401 => {
                tracing::warn!(
                    user_id = %session.user_id(),
                    status,
                    message = %message,
                    "Refresh token rejected, dropping session"
                );
                self.set_session(SessionEvent::SignedOut, None);
                Ok(None)
            }
            Err((status, message)) => Err(ProviderError::Rejected { status, message }),
        }
    }
}

#[async_trait]
impl IdentityProvider for SupabaseClient {
    async fn get_current_session(&self) -> Result<Option<Session>, ProviderError> {
        let Some(session) = self.held_session() else {
            return Ok(None);
        };
        if session.needs_refresh(Utc::now(), Duration::seconds(REFRESH_MARGIN_SECS)) {
            return self.refresh(&session).await;
        }
        Ok(Some(session))
    }

    fn subscribe(&self) -> SessionSubscription {
        self.broadcaster.subscribe()
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &Secret<String>,
    ) -> Result<Session, ProviderError> {
        let grant = PasswordGrant {
            email,
            password: password.expose_secret(),
        };
        match self.token_grant("password", &grant).await? {
            Ok(session) => {
                tracing::debug!(user_id = %session.user_id(), "Password grant accepted");
                self.set_session(SessionEvent::SignedIn, Some(session.clone()));
                Ok(session)
            }
            Err((400, _)) | Err((401, _)) => Err(ProviderError::InvalidCredentials),
            Err((status, message)) => Err(ProviderError::Rejected { status, message }),
        }
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &Secret<String>,
        metadata: &SignUpMetadata,
    ) -> Result<SignUpOutcome, ProviderError> {
        let body = SignUpBody {
            email,
            password: password.expose_secret(),
            data: metadata,
        };
        let response = self
            .anonymous(self.client.traced_post(&self.auth_url("signup")))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, message) = rejection(response).await;
            return Err(ProviderError::Rejected { status, message });
        }

        let answer: SignUpResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        match answer {
            SignUpResponse::Session(token) => {
                let session = token.into_session(Utc::now());
                self.set_session(SessionEvent::SignedIn, Some(session.clone()));
                Ok(SignUpOutcome {
                    user: session.user.clone(),
                    session: Some(session),
                })
            }
            SignUpResponse::User(user) => {
                tracing::debug!(user_id = %user.id, "Sign-up pending email confirmation");
                Ok(SignUpOutcome {
                    user,
                    session: None,
                })
            }
        }
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        if self.held_session().is_none() {
            self.set_session(SessionEvent::SignedOut, None);
            return Ok(());
        }

        let response = self
            .authorize(self.client.traced_post(&self.auth_url("logout")))
            .send()
            .await?;

        // An already revoked token still ends the local session.
        let status = response.status();
        if !status.is_success() && status != StatusCode::UNAUTHORIZED {
            let (status, message) = rejection(response).await;
            return Err(ProviderError::Rejected { status, message });
        }

        self.set_session(SessionEvent::SignedOut, None);
        Ok(())
    }

    async fn send_password_reset(
        &self,
        email: &str,
        redirect_url: &str,
    ) -> Result<(), ProviderError> {
        let url = self.auth_url(&format!(
            "recover?redirect_to={}",
            urlencoding::encode(redirect_url)
        ));
        let response = self
            .anonymous(self.client.traced_post(&url))
            .json(&RecoverBody { email })
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, message) = rejection(response).await;
            return Err(ProviderError::Rejected { status, message });
        }
        Ok(())
    }
}
