//! Settings orchestration: loads, edits, persists, and clears the user's
//! stored provider API keys. Saves normalize the form first so an empty
//! field always round-trips as "not configured" rather than as an empty
//! string.

use std::sync::{Arc, Mutex};

use anyhow::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::api::ApiClient;
use crate::identity::Identity;

pub mod cache;

pub use cache::CredentialCache;

/// Per-account API keys for the downstream model providers. `None` means
/// the slot is not configured.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialSet {
    pub groq_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
}

impl CredentialSet {
    /// Trims both values and collapses empty strings to `None`.
    pub fn normalized(&self) -> Self {
        fn clean(value: &Option<String>) -> Option<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        }
        Self {
            groq_api_key: clean(&self.groq_api_key),
            gemini_api_key: clean(&self.gemini_api_key),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.groq_api_key.is_some() || self.gemini_api_key.is_some()
    }
}

pub struct SettingsOrchestrator {
    api: Arc<ApiClient>,
    cache: CredentialCache,
    form: Mutex<CredentialSet>,
    keys_updated: mpsc::UnboundedSender<()>,
}

impl SettingsOrchestrator {
    pub fn new(
        api: Arc<ApiClient>,
        cache: CredentialCache,
    ) -> (Self, mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                api,
                cache,
                form: Mutex::new(CredentialSet::default()),
                keys_updated: tx,
            },
            rx,
        )
    }

    /// Current form values, normalized. This is what rides along with chat
    /// requests.
    pub fn credentials(&self) -> CredentialSet {
        self.form.lock().unwrap().normalized()
    }

    pub fn is_configured(&self) -> bool {
        self.credentials().is_configured()
    }

    pub fn set_groq_key(&self, value: &str) {
        self.form.lock().unwrap().groq_api_key = Some(value.to_string());
    }

    pub fn set_gemini_key(&self, value: &str) {
        self.form.lock().unwrap().gemini_api_key = Some(value.to_string());
    }

    /// Values from the local convenience cache, if any. Display only; the
    /// backend remains the source of truth.
    pub fn cached(&self) -> Option<CredentialSet> {
        self.cache.load().ok()
    }

    /// Fetches the stored keys and populates the form. A fetch failure is
    /// non-fatal and leaves the form as "no keys configured".
    pub async fn load(&self, identity: &Identity) -> CredentialSet {
        let keys = match self.api.get_keys(&identity.id).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("Failed to load keys for {}: {}", identity.id, e);
                CredentialSet::default()
            }
        };
        *self.form.lock().unwrap() = keys.clone();
        keys
    }

    /// Persists the current form. On success the server-confirmed state is
    /// reloaded and the keys-updated notification fires; on failure the
    /// form keeps the user's draft.
    pub async fn save(&self, identity: &Identity) -> Result<(), Error> {
        let normalized = self.credentials();
        self.api.save_keys(&identity.id, &normalized).await?;

        if let Err(e) = self.cache.store(&normalized) {
            tracing::warn!("Failed to write credential cache: {}", e);
        }
        self.load(identity).await;
        let _ = self.keys_updated.send(());
        Ok(())
    }

    /// Clears every credential slot after the confirmation gate approves.
    /// Returns whether anything was sent.
    pub async fn clear_all<F: FnOnce() -> bool>(
        &self,
        identity: &Identity,
        confirm: F,
    ) -> Result<bool, Error> {
        if !confirm() {
            return Ok(false);
        }
        self.api
            .save_keys(&identity.id, &CredentialSet::default())
            .await?;

        *self.form.lock().unwrap() = CredentialSet::default();
        if let Err(e) = self.cache.clear() {
            tracing::warn!("Failed to clear credential cache: {}", e);
        }
        let _ = self.keys_updated.send(());
        Ok(true)
    }

    /// Drops form state when the session ends. The local cache is left
    /// alone on purpose.
    pub fn reset(&self) {
        *self.form.lock().unwrap() = CredentialSet::default();
    }
}
