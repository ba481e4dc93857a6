//! Identity-toolkit style REST provider for email/password accounts.
//!
//! Wraps the `accounts:signUp`, `accounts:signInWithPassword`, and
//! `accounts:update` endpoints and notifies the subscriber of sign-in and
//! sign-out transitions.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use super::{AuthError, AuthEvent, Identity, IdentityProvider};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolkitAccount {
    local_id: String,
    email: String,
    display_name: Option<String>,
    photo_url: Option<String>,
    id_token: Option<String>,
}

#[derive(Deserialize)]
struct ToolkitError {
    error: ToolkitErrorBody,
}

#[derive(Deserialize)]
struct ToolkitErrorBody {
    message: String,
}

pub struct RestIdentityProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    subscriber: Mutex<Option<mpsc::UnboundedSender<AuthEvent>>>,
}

impl RestIdentityProvider {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            subscriber: Mutex::new(None),
        }
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}/v1/{}?key={}", self.base_url, action, self.api_key)
    }

    fn emit(&self, event: AuthEvent) {
        let subscriber = self.subscriber.lock().unwrap();
        if let Some(tx) = subscriber.as_ref() {
            // A dropped receiver just means nobody is listening anymore
            let _ = tx.send(event);
        }
    }

    async fn call(&self, action: &str, body: serde_json::Value) -> Result<ToolkitAccount, AuthError> {
        let response = self
            .http
            .post(self.endpoint(action))
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::other(format!("Identity provider unreachable: {}", e)))?;

        if response.status().is_success() {
            response
                .json::<ToolkitAccount>()
                .await
                .map_err(|e| AuthError::other(format!("Malformed provider response: {}", e)))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(parse_provider_error(&body))
        }
    }
}

/// Extracts the provider error code from a structured error body. Codes can
/// carry trailing detail ("WEAK_PASSWORD : Password should be ...") so only
/// the leading token is mapped.
fn parse_provider_error(body: &str) -> AuthError {
    match serde_json::from_str::<ToolkitError>(body) {
        Ok(parsed) => {
            let code = parsed
                .error
                .message
                .split([' ', ':'])
                .next()
                .unwrap_or(&parsed.error.message)
                .to_string();
            AuthError::from_code(&code)
        }
        Err(_) => AuthError::other(body.to_string()),
    }
}

#[async_trait]
impl IdentityProvider for RestIdentityProvider {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let account = self
            .call(
                "accounts:signInWithPassword",
                json!({
                    "email": email,
                    "password": password,
                    "returnSecureToken": true,
                }),
            )
            .await?;

        let identity = Identity {
            id: account.local_id,
            email: account.email,
            display_name: account.display_name,
            photo_url: account.photo_url,
        };
        self.emit(AuthEvent::SignedIn(identity.clone()));
        Ok(identity)
    }

    async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<Identity, AuthError> {
        let account = self
            .call(
                "accounts:signUp",
                json!({
                    "email": email,
                    "password": password,
                    "returnSecureToken": true,
                }),
            )
            .await?;

        // Setting the display name is best-effort. The account already
        // exists at this point so a failure must not fail the registration.
        let mut applied_name = None;
        if let Some(id_token) = &account.id_token {
            match self
                .call(
                    "accounts:update",
                    json!({
                        "idToken": id_token,
                        "displayName": display_name,
                        "returnSecureToken": false,
                    }),
                )
                .await
            {
                Ok(updated) => applied_name = updated.display_name,
                Err(e) => tracing::warn!("Failed to set display name: {}", e),
            }
        }

        let identity = Identity {
            id: account.local_id,
            email: account.email,
            display_name: applied_name.or_else(|| Some(display_name.to_string())),
            photo_url: account.photo_url,
        };
        self.emit(AuthEvent::SignedIn(identity.clone()));
        Ok(identity)
    }

    fn sign_out(&self) {
        self.emit(AuthEvent::SignedOut);
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<AuthEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.subscriber.lock().unwrap() = Some(tx);
        rx
    }
}
