//! Typed client for the MAVKUS backend API. Every endpoint gets a concrete
//! request/response shape here so loosely structured payloads never leak
//! into orchestrator state.

use anyhow::{Error, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::Identity;
use crate::session::UserStats;
use crate::settings::CredentialSet;

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct CreateProfileRequest<'a> {
    user_id: &'a str,
    email: &'a str,
    display_name: String,
    photo_url: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    user_id: &'a str,
    message: &'a str,
    enable_critique: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    groq_api_key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gemini_api_key: Option<&'a str>,
}

#[derive(Deserialize)]
struct ChatResponse {
    success: bool,
    response: Option<String>,
    metadata: Option<Value>,
    detail: Option<String>,
}

/// A resolved chat round trip. Transport failures are reported as errors;
/// a reply and a service-reported refusal are both successful round trips.
#[derive(Clone, Debug)]
pub enum ChatOutcome {
    Reply {
        content: String,
        metadata: Option<Value>,
    },
    Refused {
        detail: String,
    },
}

#[derive(Deserialize)]
struct StatsResponse {
    firebase_data: Option<FirebaseData>,
}

#[derive(Deserialize)]
struct FirebaseData {
    total_conversations: Option<u64>,
    total_tokens_used: Option<u64>,
    api_keys_configured: Option<bool>,
}

#[derive(Deserialize)]
struct KeysResponse {
    success: bool,
    api_keys: Option<CredentialSet>,
}

#[derive(Serialize)]
struct SaveKeysRequest<'a> {
    user_id: &'a str,
    groq_api_key: Option<&'a str>,
    gemini_api_key: Option<&'a str>,
}

#[derive(Deserialize)]
struct SaveKeysResponse {
    success: bool,
    detail: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Idempotent profile upsert keyed by the identity id.
    pub async fn ensure_profile(&self, identity: &Identity) -> Result<(), Error> {
        let payload = CreateProfileRequest {
            user_id: &identity.id,
            email: &identity.email,
            display_name: identity.display_label(),
            photo_url: identity.photo_url.clone().unwrap_or_default(),
        };
        let response = self
            .http
            .post(format!("{}/api/auth/create-profile", self.base_url))
            .json(&payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "create-profile returned {}",
                response.status()
            ));
        }
        Ok(())
    }

    /// Advisory reachability probe. 2xx means connected.
    pub async fn health(&self) -> Result<(), Error> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("health returned {}", response.status()));
        }
        Ok(())
    }

    pub async fn stats(&self, user_id: &str) -> Result<UserStats, Error> {
        let response = self
            .http
            .get(format!(
                "{}/api/stats/{}",
                self.base_url,
                urlencoding::encode(user_id)
            ))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("stats returned {}", response.status()));
        }
        let parsed: StatsResponse = response.json().await?;
        let firebase = parsed.firebase_data.unwrap_or(FirebaseData {
            total_conversations: None,
            total_tokens_used: None,
            api_keys_configured: None,
        });
        Ok(UserStats {
            total_conversations: firebase.total_conversations.unwrap_or(0),
            total_tokens_used: firebase.total_tokens_used.unwrap_or(0),
            api_keys_configured: firebase.api_keys_configured.unwrap_or(false),
        })
    }

    /// Sends one user message. Configured provider keys ride along so the
    /// backend can use the account's own quotas.
    pub async fn chat(
        &self,
        user_id: &str,
        message: &str,
        keys: &CredentialSet,
    ) -> Result<ChatOutcome, Error> {
        let payload = ChatRequest {
            user_id,
            message,
            enable_critique: true,
            groq_api_key: keys.groq_api_key.as_deref(),
            gemini_api_key: keys.gemini_api_key.as_deref(),
        };
        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let Ok(parsed) = serde_json::from_str::<ChatResponse>(&body) else {
            // Non-2xx without a structured body is a transport-level failure
            return Err(anyhow!("chat returned {}: {}", status, body));
        };

        if parsed.success {
            let content = parsed
                .response
                .ok_or_else(|| anyhow!("chat succeeded without a response body"))?;
            Ok(ChatOutcome::Reply {
                content,
                metadata: parsed.metadata,
            })
        } else {
            Ok(ChatOutcome::Refused {
                detail: parsed.detail.unwrap_or_else(|| "Unknown error".to_string()),
            })
        }
    }

    pub async fn get_keys(&self, user_id: &str) -> Result<CredentialSet, Error> {
        let response = self
            .http
            .get(format!(
                "{}/api/auth/get-keys/{}",
                self.base_url,
                urlencoding::encode(user_id)
            ))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("get-keys returned {}", response.status()));
        }
        let parsed: KeysResponse = response.json().await?;
        if !parsed.success {
            return Err(anyhow!("get-keys reported failure"));
        }
        Ok(parsed.api_keys.unwrap_or_default().normalized())
    }

    /// Persists the credential set. Cleared slots are sent as explicit
    /// nulls so the backend forgets them.
    pub async fn save_keys(&self, user_id: &str, keys: &CredentialSet) -> Result<(), Error> {
        let payload = SaveKeysRequest {
            user_id,
            groq_api_key: keys.groq_api_key.as_deref(),
            gemini_api_key: keys.gemini_api_key.as_deref(),
        };
        let response = self
            .http
            .post(format!("{}/api/auth/save-keys", self.base_url))
            .json(&payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("save-keys returned {}", response.status()));
        }
        let parsed: SaveKeysResponse = response.json().await?;
        if !parsed.success {
            return Err(anyhow!(
                "{}",
                parsed.detail.unwrap_or_else(|| "Unknown error".to_string())
            ));
        }
        Ok(())
    }
}
