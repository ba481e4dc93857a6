use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub mod rest;

pub use rest::RestIdentityProvider;

/// The authenticated user as reported by the identity provider. Immutable
/// for the duration of a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

impl Identity {
    /// Display name with the email local-part as the fallback.
    pub fn display_label(&self) -> String {
        match &self.display_name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => self
                .email
                .split('@')
                .next()
                .unwrap_or(&self.email)
                .to_string(),
        }
    }
}

/// Lifecycle events delivered over the provider subscription.
#[derive(Clone, Debug)]
pub enum AuthEvent {
    SignedIn(Identity),
    SignedOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthErrorKind {
    PopupClosed,
    PopupBlocked,
    AccountExistsWithDifferentCredential,
    EmailAlreadyRegistered,
    UserNotFound,
    WrongPassword,
    TooManyRequests,
    WeakPassword,
    InvalidEmail,
    UserDisabled,
    Validation,
    Other,
}

/// An identity provider failure carrying a user-facing message. Provider
/// error codes map to distinct messages; anything unrecognized passes the
/// raw detail through.
#[derive(Clone, Debug)]
pub struct AuthError {
    pub kind: AuthErrorKind,
    pub message: String,
}

impl AuthError {
    pub fn from_code(code: &str) -> Self {
        let (kind, message) = match code {
            "POPUP_CLOSED_BY_USER" | "auth/popup-closed-by-user" => {
                (AuthErrorKind::PopupClosed, "Sign-in was cancelled.")
            }
            "POPUP_BLOCKED" | "auth/popup-blocked" => (
                AuthErrorKind::PopupBlocked,
                "The sign-in window was blocked. Allow popups for this site.",
            ),
            "FEDERATED_USER_ID_ALREADY_LINKED" | "auth/account-exists-with-different-credential" => (
                AuthErrorKind::AccountExistsWithDifferentCredential,
                "An account already exists with a different sign-in method.",
            ),
            "EMAIL_EXISTS" | "auth/email-already-in-use" => (
                AuthErrorKind::EmailAlreadyRegistered,
                "This email is already registered. Try signing in instead.",
            ),
            "EMAIL_NOT_FOUND" | "auth/user-not-found" => (
                AuthErrorKind::UserNotFound,
                "Account not found. Register first.",
            ),
            "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" | "auth/wrong-password" => {
                (AuthErrorKind::WrongPassword, "Wrong password. Try again.")
            }
            "TOO_MANY_ATTEMPTS_TRY_LATER" | "auth/too-many-requests" => (
                AuthErrorKind::TooManyRequests,
                "Too many failed attempts. Try again later.",
            ),
            "WEAK_PASSWORD" | "auth/weak-password" => (
                AuthErrorKind::WeakPassword,
                "Password is too weak. Use at least 6 characters.",
            ),
            "INVALID_EMAIL" | "auth/invalid-email" => {
                (AuthErrorKind::InvalidEmail, "That email address is not valid.")
            }
            "USER_DISABLED" | "auth/user-disabled" => {
                (AuthErrorKind::UserDisabled, "This account has been disabled.")
            }
            other => {
                return Self {
                    kind: AuthErrorKind::Other,
                    message: other.to_string(),
                };
            }
        };
        Self {
            kind,
            message: message.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: AuthErrorKind::Validation,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: AuthErrorKind::Other,
            message: message.into(),
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AuthError {}

/// Checks a sign-in form before any network call is made.
pub fn validate_login(email: &str, password: &str) -> Result<(), AuthError> {
    if email.trim().is_empty() {
        return Err(AuthError::validation("Email is required."));
    }
    if !email.contains('@') {
        return Err(AuthError::validation("Enter a valid email address."));
    }
    if password.is_empty() {
        return Err(AuthError::validation("Password is required."));
    }
    Ok(())
}

/// Checks a registration form before any network call is made.
pub fn validate_registration(
    email: &str,
    password: &str,
    confirm_password: &str,
    display_name: &str,
) -> Result<(), AuthError> {
    validate_login(email, password)?;
    if password.len() < 6 {
        return Err(AuthError::validation(
            "Password must be at least 6 characters.",
        ));
    }
    if password != confirm_password {
        return Err(AuthError::validation("Passwords do not match."));
    }
    if display_name.trim().is_empty() {
        return Err(AuthError::validation("Display name is required."));
    }
    Ok(())
}

/// The identity provider surface the client consumes. Sign-in and sign-out
/// additionally notify the subscriber established via `subscribe`.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError>;

    async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<Identity, AuthError>;

    fn sign_out(&self);

    /// Establish the state-change subscription. Intended to be called once
    /// per session orchestrator lifetime; the subscription ends when the
    /// receiver is dropped.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<AuthEvent>;
}
