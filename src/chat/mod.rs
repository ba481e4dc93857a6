//! Chat orchestration: owns the transcript and the message submission
//! lifecycle. The transcript is strictly append-only; a user message is
//! appended before the round trip starts and the reply or error entry is
//! appended only after it resolves.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{ApiClient, ChatOutcome};
use crate::session::SessionOrchestrator;
use crate::settings::SettingsOrchestrator;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "error")]
    SystemError,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ChatMessage {
    fn user(content: &str) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    fn assistant(content: String, metadata: Option<Value>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            timestamp: Utc::now(),
            metadata,
        }
    }

    fn system_error(content: String) -> Self {
        Self {
            role: Role::SystemError,
            content,
            timestamp: Utc::now(),
            metadata: None,
        }
    }
}

/// Composer input state. `is_submitting` is the sole guard against
/// overlapping submissions; `focused` models returning input focus to the
/// composer after a submission settles.
#[derive(Clone, Debug, Default)]
pub struct ComposerState {
    pub draft: String,
    pub is_submitting: bool,
    pub focused: bool,
}

struct ChatState {
    transcript: Vec<ChatMessage>,
    composer: ComposerState,
}

pub struct ChatOrchestrator {
    api: Arc<ApiClient>,
    session: Arc<SessionOrchestrator>,
    settings: Arc<SettingsOrchestrator>,
    state: Mutex<ChatState>,
}

impl ChatOrchestrator {
    pub fn new(
        api: Arc<ApiClient>,
        session: Arc<SessionOrchestrator>,
        settings: Arc<SettingsOrchestrator>,
    ) -> Self {
        Self {
            api,
            session,
            settings,
            state: Mutex::new(ChatState {
                transcript: Vec::new(),
                composer: ComposerState::default(),
            }),
        }
    }

    pub fn transcript(&self) -> Vec<ChatMessage> {
        self.state.lock().unwrap().transcript.clone()
    }

    pub fn composer(&self) -> ComposerState {
        self.state.lock().unwrap().composer.clone()
    }

    /// Whether the "assistant is composing" indicator should show.
    pub fn is_composing(&self) -> bool {
        self.state.lock().unwrap().composer.is_submitting
    }

    pub fn set_draft(&self, text: &str) {
        self.state.lock().unwrap().composer.draft = text.to_string();
    }

    /// Submits the current draft. A whitespace-only draft, an in-flight
    /// submission, or a missing identity makes this a no-op with no state
    /// change.
    pub async fn submit(&self) {
        let Some(identity) = self.session.current_identity() else {
            return;
        };

        let text = {
            let mut state = self.state.lock().unwrap();
            let text = state.composer.draft.trim().to_string();
            if text.is_empty() || state.composer.is_submitting {
                return;
            }
            state.composer.is_submitting = true;
            state.composer.draft.clear();
            state.transcript.push(ChatMessage::user(&text));
            text
        };

        let epoch = self.session.epoch();
        let keys = self.settings.credentials();
        let outcome = self.api.chat(&identity.id, &text, &keys).await;

        let mut state = self.state.lock().unwrap();
        // Late replies from a superseded session are dropped on the floor
        if self.session.epoch() == epoch {
            match outcome {
                Ok(ChatOutcome::Reply { content, metadata }) => {
                    state.transcript.push(ChatMessage::assistant(content, metadata));
                }
                Ok(ChatOutcome::Refused { detail }) => {
                    state.transcript.push(ChatMessage::system_error(detail));
                }
                Err(e) => {
                    state
                        .transcript
                        .push(ChatMessage::system_error(format!("Request failed: {}", e)));
                }
            }
        }
        // Terminal step, independent of which branch fired above
        state.composer.is_submitting = false;
        state.composer.focused = true;
    }

    /// Discards the transcript after the confirmation gate approves.
    pub fn clear<F: FnOnce() -> bool>(&self, confirm: F) {
        if !confirm() {
            return;
        }
        self.state.lock().unwrap().transcript.clear();
    }

    /// Unconditional reset used when the session ends.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.transcript.clear();
        state.composer = ComposerState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionViewState;
    use crate::settings::cache::CredentialCache;
    use crate::identity::Identity;

    async fn authenticated_fixture(
        server: &mut mockito::ServerGuard,
    ) -> (Arc<SessionOrchestrator>, Arc<SettingsOrchestrator>, ChatOrchestrator) {
        server
            .mock("POST", "/api/auth/create-profile")
            .with_status(200)
            .with_body(r#"{"message": "ok"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/stats/u1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/health")
            .with_status(200)
            .create_async()
            .await;

        let api = Arc::new(ApiClient::new(&server.url()));
        let (session, _events) = SessionOrchestrator::new(Arc::clone(&api));
        let tmp = tempfile::tempdir().unwrap();
        let (settings, _keys_updated) = SettingsOrchestrator::new(
            Arc::clone(&api),
            CredentialCache::new(tmp.path()),
        );
        let settings = Arc::new(settings);
        let chat = ChatOrchestrator::new(api, Arc::clone(&session), Arc::clone(&settings));

        session
            .on_identity_changed(Some(Identity {
                id: "u1".to_string(),
                email: "u1@example.com".to_string(),
                display_name: None,
                photo_url: None,
            }))
            .await;
        assert!(matches!(session.view(), SessionViewState::Authenticated(_)));
        (session, settings, chat)
    }

    #[tokio::test]
    async fn it_appends_user_and_assistant_messages_in_order() {
        let mut server = mockito::Server::new_async().await;
        let (_session, _settings, chat) = authenticated_fixture(&mut server).await;
        server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": true, "response": "hi"}"#)
            .create_async()
            .await;

        chat.set_draft("  hello  ");
        chat.submit().await;

        let transcript = chat.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].role, Role::User);
        assert_eq!(transcript[0].content, "hello");
        assert_eq!(transcript[1].role, Role::Assistant);
        assert_eq!(transcript[1].content, "hi");

        let composer = chat.composer();
        assert!(!composer.is_submitting);
        assert!(composer.focused);
        assert_eq!(composer.draft, "");
    }

    #[tokio::test]
    async fn it_ignores_empty_and_whitespace_drafts() {
        let mut server = mockito::Server::new_async().await;
        let (_session, _settings, chat) = authenticated_fixture(&mut server).await;
        let unexpected = server
            .mock("POST", "/api/chat")
            .expect(0)
            .create_async()
            .await;

        chat.set_draft("   ");
        chat.submit().await;

        assert!(chat.transcript().is_empty());
        unexpected.assert_async().await;
    }

    #[tokio::test]
    async fn it_rejects_overlapping_submissions() {
        let mut server = mockito::Server::new_async().await;
        let (_session, _settings, chat) = authenticated_fixture(&mut server).await;
        let unexpected = server
            .mock("POST", "/api/chat")
            .expect(0)
            .create_async()
            .await;

        chat.state.lock().unwrap().composer.is_submitting = true;
        chat.set_draft("hello");
        chat.submit().await;
        chat.submit().await;

        assert!(chat.transcript().is_empty());
        assert_eq!(chat.composer().draft, "hello");
        unexpected.assert_async().await;
    }

    #[tokio::test]
    async fn it_does_nothing_without_an_authenticated_identity() {
        let mut server = mockito::Server::new_async().await;
        let api = Arc::new(ApiClient::new(&server.url()));
        let (session, _events) = SessionOrchestrator::new(Arc::clone(&api));
        let tmp = tempfile::tempdir().unwrap();
        let (settings, _rx) =
            SettingsOrchestrator::new(Arc::clone(&api), CredentialCache::new(tmp.path()));
        let chat = ChatOrchestrator::new(api, session, Arc::new(settings));
        let unexpected = server
            .mock("POST", "/api/chat")
            .expect(0)
            .create_async()
            .await;

        chat.set_draft("hello");
        chat.submit().await;

        assert!(chat.transcript().is_empty());
        unexpected.assert_async().await;
    }

    #[tokio::test]
    async fn it_keeps_the_user_message_when_the_service_refuses() {
        let mut server = mockito::Server::new_async().await;
        let (_session, _settings, chat) = authenticated_fixture(&mut server).await;
        server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": false, "detail": "rate limited"}"#)
            .create_async()
            .await;

        chat.set_draft("hello");
        chat.submit().await;

        let transcript = chat.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].role, Role::User);
        assert_eq!(transcript[0].content, "hello");
        assert_eq!(transcript[1].role, Role::SystemError);
        assert!(transcript[1].content.contains("rate limited"));
        assert!(!chat.composer().is_submitting);
        assert!(chat.composer().focused);
    }

    #[tokio::test]
    async fn it_appends_a_system_error_on_transport_failure() {
        let mut server = mockito::Server::new_async().await;
        let (_session, _settings, chat) = authenticated_fixture(&mut server).await;
        server
            .mock("POST", "/api/chat")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        chat.set_draft("hello");
        chat.submit().await;

        let transcript = chat.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[1].role, Role::SystemError);
        assert!(transcript[1].content.contains("Request failed"));
        assert!(!chat.composer().is_submitting);
    }

    #[tokio::test]
    async fn it_only_clears_the_transcript_when_confirmed() {
        let mut server = mockito::Server::new_async().await;
        let (_session, _settings, chat) = authenticated_fixture(&mut server).await;
        server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": true, "response": "hi"}"#)
            .create_async()
            .await;

        chat.set_draft("hello");
        chat.submit().await;
        assert_eq!(chat.transcript().len(), 2);

        chat.clear(|| false);
        assert_eq!(chat.transcript().len(), 2);

        chat.clear(|| true);
        assert!(chat.transcript().is_empty());
    }
}
