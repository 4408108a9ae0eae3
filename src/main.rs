//! Entry point: load config, follow the session file, and run the realtime client.

use std::sync::Arc;
use std::time::Duration;

use notif_client::config::Config;
use notif_client::repositories::{FileSessionStore, SessionStore, StoredSession};
use notif_client::{ClientContext, RealtimeProvider, UiEvent};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(config);
    let store = Arc::new(FileSessionStore::new(config.session_file.clone()));

    let initial = store.load().await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "unreadable session; starting logged out");
        StoredSession::default()
    });
    let (session_tx, session_rx) = watch::channel(initial);
    let poller = tokio::spawn(poll_session(
        store.clone(),
        session_tx,
        Duration::from_millis(config.identity_poll_ms),
    ));

    let (ui_tx, ui_rx) = mpsc::unbounded_channel();
    let renderer = tokio::spawn(render(ui_rx));

    tracing::info!(url = %config.ws_url, session = %store.path().display(), "notification client starting");
    let provider = RealtimeProvider::new(ClientContext::new(config.clone(), store, ui_tx));
    let provider = tokio::spawn(provider.run(session_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    // Dropping the session sender ends the provider, which tears the client down.
    poller.abort();
    let _ = poller.await;
    provider.await?;
    renderer.await?;
    Ok(())
}

/// Re-read the session file and publish it when it changes.
async fn poll_session(
    store: Arc<FileSessionStore>,
    sessions: watch::Sender<StoredSession>,
    every: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        match store.load().await {
            Ok(session) => {
                sessions.send_if_modified(|current| {
                    if *current == session {
                        return false;
                    }
                    *current = session;
                    true
                });
            }
            Err(e) => tracing::warn!(error = %e, "session file unreadable; keeping previous identity"),
        }
    }
}

async fn render(mut events: mpsc::UnboundedReceiver<UiEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            UiEvent::ConnectionChanged(state) => tracing::info!(?state, "connection"),
            UiEvent::Toast(toast) => tracing::info!(
                category = ?toast.category,
                titulo = %toast.titulo,
                mensaje = %toast.mensaje,
                "toast"
            ),
            UiEvent::LogoutNotice { seconds_left } => tracing::warn!(
                seconds_left,
                "your role changed; you will be logged out"
            ),
            UiEvent::LogoutCountdown { seconds_left } => {
                tracing::warn!(seconds_left, "logging out")
            }
            UiEvent::LogoutCompleted { redirect_to } => {
                tracing::warn!(redirect_to = %redirect_to, "session ended; log in again")
            }
        }
    }
}
