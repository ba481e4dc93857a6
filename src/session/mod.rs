//! Session orchestration: translates identity-provider lifecycle events
//! into the top-level view state and keeps the ancillary read models
//! (usage stats, API health) populated.
//!
//! Handlers for identity changes can overlap; every write that happens
//! after an await is guarded by the session epoch captured when the
//! handler started, so the latest event always wins and results from a
//! superseded handler are discarded silently.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::ApiClient;
use crate::identity::{AuthEvent, Identity};

/// Top-level view state. `Loading` is the initial state and is re-entered
/// while a fresh sign-in is resolving.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionViewState {
    Loading,
    Unauthenticated,
    Authenticated(Identity),
}

/// Advisory backend reachability. Never gates chat submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiHealth {
    Checking,
    Connected,
    Unreachable,
}

/// Usage counters narrowed from the stats endpoint payload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UserStats {
    pub total_conversations: u64,
    pub total_tokens_used: u64,
    pub api_keys_configured: bool,
}

/// Notifications for the composition layer (transcript reset on sign-out,
/// prompt redraw on authentication).
#[derive(Clone, Debug)]
pub enum SessionEvent {
    Authenticated(Identity),
    SignedOut,
}

struct SessionState {
    view: SessionViewState,
    health: ApiHealth,
    stats: Option<UserStats>,
    epoch: u64,
}

pub struct SessionOrchestrator {
    api: Arc<ApiClient>,
    state: Mutex<SessionState>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionOrchestrator {
    pub fn new(api: Arc<ApiClient>) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let orchestrator = Arc::new(Self {
            api,
            state: Mutex::new(SessionState {
                view: SessionViewState::Loading,
                health: ApiHealth::Checking,
                stats: None,
                epoch: 0,
            }),
            events: tx,
        });
        (orchestrator, rx)
    }

    pub fn view(&self) -> SessionViewState {
        self.state.lock().unwrap().view.clone()
    }

    pub fn health(&self) -> ApiHealth {
        self.state.lock().unwrap().health
    }

    pub fn stats(&self) -> Option<UserStats> {
        self.state.lock().unwrap().stats.clone()
    }

    pub fn current_identity(&self) -> Option<Identity> {
        match &self.state.lock().unwrap().view {
            SessionViewState::Authenticated(identity) => Some(identity.clone()),
            _ => None,
        }
    }

    /// Monotonic counter claimed in event order on every identity change.
    /// Handlers compare a snapshot against the current value before
    /// applying late results.
    pub fn epoch(&self) -> u64 {
        self.state.lock().unwrap().epoch
    }

    /// Consumes the provider subscription for the lifetime of the returned
    /// task. Each event gets its own handler; the epoch is claimed here, in
    /// receive order, so a later event supersedes an earlier one no matter
    /// how the handler tasks end up scheduled.
    pub fn attach(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<AuthEvent>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let epoch = this.claim_epoch();
                let this = Arc::clone(&this);
                tokio::spawn(async move {
                    match event {
                        AuthEvent::SignedIn(identity) => {
                            this.begin_session(identity, epoch).await
                        }
                        AuthEvent::SignedOut => this.end_session(epoch),
                    }
                });
            }
        })
    }

    pub async fn on_identity_changed(&self, identity: Option<Identity>) {
        let epoch = self.claim_epoch();
        match identity {
            Some(identity) => self.begin_session(identity, epoch).await,
            None => self.end_session(epoch),
        }
    }

    /// Direct callback path used by the login form, bypassing the
    /// provider's own change-notification latency.
    pub async fn on_explicit_auth_success(&self, identity: Identity) {
        let epoch = self.claim_epoch();
        self.begin_session(identity, epoch).await;
    }

    /// Reserves the next epoch. This must happen in event order; handlers
    /// carry the claimed value so every write from an older event can be
    /// discarded once a newer epoch exists.
    fn claim_epoch(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.epoch += 1;
        state.epoch
    }

    fn end_session(&self, epoch: u64) {
        {
            let mut state = self.state.lock().unwrap();
            if state.epoch != epoch {
                // A later identity change won
                return;
            }
            state.view = SessionViewState::Unauthenticated;
            state.stats = None;
        }
        let _ = self.events.send(SessionEvent::SignedOut);
    }

    async fn begin_session(&self, identity: Identity, epoch: u64) {
        {
            let mut state = self.state.lock().unwrap();
            if state.epoch != epoch {
                return;
            }
            state.view = SessionViewState::Loading;
            state.health = ApiHealth::Checking;
            state.stats = None;
        }

        // Profile ensure is non-fatal and must never block sign-in
        if let Err(e) = self.api.ensure_profile(&identity).await {
            tracing::warn!("Failed to ensure profile for {}: {}", identity.id, e);
        }

        let (stats, health) = tokio::join!(self.api.stats(&identity.id), self.api.health());

        {
            let mut state = self.state.lock().unwrap();
            if state.epoch != epoch {
                // A later identity change won
                return;
            }
            state.health = match health {
                Ok(()) => ApiHealth::Connected,
                Err(e) => {
                    tracing::debug!("Health probe failed: {}", e);
                    ApiHealth::Unreachable
                }
            };
            match stats {
                Ok(s) => state.stats = Some(s),
                Err(e) => tracing::warn!("Failed to load stats for {}: {}", identity.id, e),
            }
            state.view = SessionViewState::Authenticated(identity.clone());
        }
        let _ = self.events.send(SessionEvent::Authenticated(identity));
    }

    /// Re-fetches stats for the current identity, e.g. after the stored
    /// provider keys changed. Results from a superseded session are
    /// discarded.
    pub async fn refresh_stats(&self) {
        let Some(identity) = self.current_identity() else {
            return;
        };
        let epoch = self.epoch();
        match self.api.stats(&identity.id).await {
            Ok(stats) => {
                let mut state = self.state.lock().unwrap();
                if state.epoch == epoch {
                    state.stats = Some(stats);
                }
            }
            Err(e) => tracing::warn!("Failed to refresh stats for {}: {}", identity.id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn identity(id: &str) -> Identity {
        Identity {
            id: id.to_string(),
            email: format!("{}@example.com", id),
            display_name: None,
            photo_url: None,
        }
    }

    async fn mock_happy_backend(server: &mut mockito::ServerGuard, user_id: &str) {
        server
            .mock("POST", "/api/auth/create-profile")
            .with_status(200)
            .with_body(r#"{"message": "ok"}"#)
            .create_async()
            .await;
        server
            .mock("GET", format!("/api/stats/{}", user_id).as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"firebase_data": {"total_conversations": 3, "api_keys_configured": false}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/health")
            .with_status(200)
            .create_async()
            .await;
    }

    #[tokio::test]
    async fn it_authenticates_after_ensuring_the_profile() {
        let mut server = mockito::Server::new_async().await;
        let profile = server
            .mock("POST", "/api/auth/create-profile")
            .match_body(mockito::Matcher::PartialJson(
                serde_json::json!({"user_id": "u1", "email": "u1@example.com"}),
            ))
            .with_status(200)
            .with_body(r#"{"message": "ok"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/stats/u1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"firebase_data": {"total_conversations": 3}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/health")
            .with_status(200)
            .create_async()
            .await;

        let api = Arc::new(ApiClient::new(&server.url()));
        let (session, mut events) = SessionOrchestrator::new(api);

        session.on_identity_changed(Some(identity("u1"))).await;

        assert_eq!(session.view(), SessionViewState::Authenticated(identity("u1")));
        assert_eq!(session.health(), ApiHealth::Connected);
        assert_eq!(session.stats().unwrap().total_conversations, 3);
        profile.assert_async().await;
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Authenticated(i)) if i.id == "u1"
        ));
    }

    #[tokio::test]
    async fn it_still_authenticates_when_stats_fail() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/auth/create-profile")
            .with_status(200)
            .with_body(r#"{"message": "ok"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/stats/u1")
            .with_status(500)
            .create_async()
            .await;
        server
            .mock("GET", "/health")
            .with_status(200)
            .create_async()
            .await;

        let api = Arc::new(ApiClient::new(&server.url()));
        let (session, _events) = SessionOrchestrator::new(api);

        session.on_identity_changed(Some(identity("u1"))).await;

        assert_eq!(session.view(), SessionViewState::Authenticated(identity("u1")));
        assert_eq!(session.stats(), None);
    }

    #[tokio::test]
    async fn it_still_authenticates_when_the_profile_ensure_fails() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/auth/create-profile")
            .with_status(500)
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
        let (session, _events) = SessionOrchestrator::new(api);

        session.on_identity_changed(Some(identity("u1"))).await;
        assert_eq!(session.view(), SessionViewState::Authenticated(identity("u1")));
    }

    #[tokio::test]
    async fn it_marks_the_api_unreachable_without_blocking_sign_in() {
        let mut server = mockito::Server::new_async().await;
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
            .with_status(503)
            .create_async()
            .await;

        let api = Arc::new(ApiClient::new(&server.url()));
        let (session, _events) = SessionOrchestrator::new(api);

        session.on_identity_changed(Some(identity("u1"))).await;
        assert_eq!(session.health(), ApiHealth::Unreachable);
        assert!(matches!(session.view(), SessionViewState::Authenticated(_)));
    }

    #[tokio::test]
    async fn it_clears_session_state_on_sign_out() {
        let mut server = mockito::Server::new_async().await;
        mock_happy_backend(&mut server, "u1").await;

        let api = Arc::new(ApiClient::new(&server.url()));
        let (session, mut events) = SessionOrchestrator::new(api);

        session.on_identity_changed(Some(identity("u1"))).await;
        session.on_identity_changed(None).await;

        assert_eq!(session.view(), SessionViewState::Unauthenticated);
        assert_eq!(session.stats(), None);

        assert!(matches!(events.recv().await, Some(SessionEvent::Authenticated(_))));
        assert!(matches!(events.recv().await, Some(SessionEvent::SignedOut)));
    }

    #[tokio::test]
    async fn it_discards_results_from_a_superseded_sign_in() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/auth/create-profile")
            .with_status(200)
            .with_body(r#"{"message": "ok"}"#)
            .create_async()
            .await;
        // Slow stats response so the sign-out lands while the first
        // handler is still waiting
        server
            .mock("GET", "/api/stats/u1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_chunked_body(|w| {
                std::thread::sleep(Duration::from_millis(200));
                w.write_all(br#"{"firebase_data": {"total_conversations": 9}}"#)
            })
            .create_async()
            .await;
        server
            .mock("GET", "/health")
            .with_status(200)
            .create_async()
            .await;

        let api = Arc::new(ApiClient::new(&server.url()));
        let (session, _events) = SessionOrchestrator::new(api);

        let handler = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session.on_identity_changed(Some(identity("u1"))).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.on_identity_changed(None).await;
        handler.await.unwrap();

        assert_eq!(session.view(), SessionViewState::Unauthenticated);
        assert_eq!(session.stats(), None);
    }

    #[tokio::test]
    async fn it_handles_provider_events_from_the_subscription() {
        let mut server = mockito::Server::new_async().await;
        mock_happy_backend(&mut server, "u1").await;

        let api = Arc::new(ApiClient::new(&server.url()));
        let (session, mut events) = SessionOrchestrator::new(api);

        let (tx, rx) = mpsc::unbounded_channel();
        let _listener = session.attach(rx);

        tx.send(AuthEvent::SignedIn(identity("u1"))).unwrap();
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Authenticated(i)) if i.id == "u1"
        ));

        tx.send(AuthEvent::SignedOut).unwrap();
        assert!(matches!(events.recv().await, Some(SessionEvent::SignedOut)));
        assert_eq!(session.view(), SessionViewState::Unauthenticated);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn it_lets_a_queued_sign_out_supersede_an_earlier_sign_in() {
        let mut server = mockito::Server::new_async().await;
        mock_happy_backend(&mut server, "u1").await;
        let api = Arc::new(ApiClient::new(&server.url()));

        // The sign-in handler may still be resolving (or may not have been
        // polled at all) when the sign-out lands; the sign-out must win
        // every time regardless of how the two tasks get scheduled.
        for _ in 0..25 {
            let (session, mut events) = SessionOrchestrator::new(Arc::clone(&api));
            let (tx, rx) = mpsc::unbounded_channel();
            let _listener = session.attach(rx);

            tx.send(AuthEvent::SignedIn(identity("u1"))).unwrap();
            tx.send(AuthEvent::SignedOut).unwrap();

            loop {
                match events.recv().await {
                    Some(SessionEvent::SignedOut) => break,
                    Some(SessionEvent::Authenticated(_)) => {}
                    None => panic!("event channel closed"),
                }
            }
            assert_eq!(session.view(), SessionViewState::Unauthenticated);
            assert_eq!(session.stats(), None);
        }
    }
}
