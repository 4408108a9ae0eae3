//! Keeps exactly one client alive for the current identity.

use tokio::sync::watch;
use tracing::info;

use crate::handlers::client::{ClientContext, ClientHandle, RealtimeClient};
use crate::models::Identity;
use crate::repositories::StoredSession;

struct ActiveClient {
    key: (String, Option<String>),
    client: RealtimeClient,
}

/// Rebuilds the client whenever the identity's `(id, clubId)` changes.
pub struct RealtimeProvider {
    ctx: ClientContext,
    current: Option<ActiveClient>,
}

impl RealtimeProvider {
    pub fn new(ctx: ClientContext) -> Self {
        Self { ctx, current: None }
    }

    /// Handle of the running client, if any.
    pub fn handle(&self) -> Option<ClientHandle> {
        self.current.as_ref().map(|active| active.client.handle())
    }

    /// Bring the running client in line with `session`.
    ///
    /// Same identity key and a live client: nothing happens. Otherwise the old
    /// instance is torn down completely before a new one starts, so two
    /// instances never overlap.
    pub async fn apply(&mut self, session: StoredSession) {
        let key = session.identity().map(Identity::channel_key);

        if let Some(active) = &self.current {
            if Some(&active.key) == key.as_ref() && !active.client.is_finished() {
                return;
            }
        }

        if let Some(previous) = self.current.take() {
            info!(user = %previous.key.0, "identity changed; stopping realtime client");
            previous.client.shutdown().await;
        }

        if let Some(key) = key {
            let client = RealtimeClient::spawn(self.ctx.clone(), session);
            self.current = Some(ActiveClient { key, client });
        }
    }

    pub async fn shutdown(&mut self) {
        if let Some(active) = self.current.take() {
            active.client.shutdown().await;
        }
    }

    /// Follow `sessions` until its sender is dropped, then shut down.
    pub async fn run(mut self, mut sessions: watch::Receiver<StoredSession>) {
        let initial = sessions.borrow_and_update().clone();
        self.apply(initial).await;

        while sessions.changed().await.is_ok() {
            let session = sessions.borrow_and_update().clone();
            self.apply(session).await;
        }

        self.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::config::Config;
    use crate::repositories::FileSessionStore;

    fn provider(dir: &tempfile::TempDir) -> RealtimeProvider {
        let (ui, _) = mpsc::unbounded_channel();
        let config = Config {
            ws_url: "ws://127.0.0.1:9/ws".to_string(),
            reconnect_delay_ms: 60_000,
            ..Config::default()
        };
        let sessions = Arc::new(FileSessionStore::new(dir.path().join("session.json")));
        RealtimeProvider::new(ClientContext::new(Arc::new(config), sessions, ui))
    }

    #[tokio::test]
    async fn anonymous_session_starts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = provider(&dir);
        p.apply(StoredSession::default()).await;
        assert!(p.handle().is_none());
    }

    #[tokio::test]
    async fn same_key_keeps_the_instance() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = provider(&dir);
        let user = Identity::new("42").with_club("7");
        p.apply(StoredSession::for_user(user.clone())).await;
        let before = p.current.as_ref().map(|a| a.key.clone());

        // A different role or token alone does not reconstruct.
        let mut promoted = user;
        promoted.role = Some("ADMIN".to_string());
        p.apply(StoredSession {
            user: Some(promoted),
            token: Some("new".to_string()),
        })
        .await;
        assert_eq!(p.current.as_ref().map(|a| a.key.clone()), before);
        p.shutdown().await;
    }

    #[tokio::test]
    async fn club_change_rebuilds_and_logout_stops() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = provider(&dir);
        p.apply(StoredSession::for_user(Identity::new("42").with_club("7")))
            .await;
        let old = p.handle().unwrap();

        p.apply(StoredSession::for_user(Identity::new("42").with_club("8")))
            .await;
        assert_eq!(
            p.current.as_ref().map(|a| a.key.clone()),
            Some(("42".to_string(), Some("8".to_string())))
        );
        // The old instance is gone for good.
        assert!(old.send("/app/x", "y").is_err());

        p.apply(StoredSession::default()).await;
        assert!(p.handle().is_none());
    }
}
