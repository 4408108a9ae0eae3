//! Integration tests against an in-process STOMP broker served with axum.
//!
//! The broker answers CONNECT, records every client frame, and delivers pushed
//! messages to whichever subscription matches the destination.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use notif_client::repositories::{FileSessionStore, StoredSession};
use notif_client::services::ToastCategory;
use notif_client::stomp::{Command, Decoded, Frame};
use notif_client::{
    Channel, ClientContext, ClientHandle, Config, ConnectionState, Identity, RealtimeClient,
    RealtimeProvider, UiEvent,
};
use tokio::sync::{broadcast, mpsc};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
enum Push {
    Message { destination: String, body: String },
    /// Text written to the socket verbatim.
    Raw(String),
    Kick,
}

#[derive(Clone)]
struct BrokerState {
    frames: mpsc::UnboundedSender<Frame>,
    push: broadcast::Sender<Push>,
}

struct Broker {
    addr: SocketAddr,
    frames: mpsc::UnboundedReceiver<Frame>,
    push: broadcast::Sender<Push>,
}

impl Broker {
    async fn start() -> Self {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (push, _) = broadcast::channel(16);
        let state = BrokerState {
            frames: frames_tx,
            push: push.clone(),
        };
        let app = axum::Router::new()
            .route("/ws", get(upgrade))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            addr,
            frames: frames_rx,
            push,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Next client frame with `command`, skipping others.
    async fn expect(&mut self, command: Command) -> Frame {
        tokio::time::timeout(WAIT, async {
            loop {
                let frame = self.frames.recv().await.expect("broker running");
                if frame.command == command {
                    return frame;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no {command} frame"))
    }

    async fn expect_subscriptions(&mut self, n: usize) -> BTreeSet<String> {
        let mut destinations = BTreeSet::new();
        for _ in 0..n {
            let frame = self.expect(Command::Subscribe).await;
            destinations.insert(frame.get("destination").unwrap().to_string());
        }
        destinations
    }

    fn publish(&self, destination: &str, body: &str) {
        let _ = self.push.send(Push::Message {
            destination: destination.to_string(),
            body: body.to_string(),
        });
    }

    fn publish_raw(&self, text: &str) {
        let _ = self.push.send(Push::Raw(text.to_string()));
    }

    /// Client frames up to and including DISCONNECT.
    async fn frames_until_disconnect(&mut self) -> Vec<Command> {
        tokio::time::timeout(WAIT, async {
            let mut seen = Vec::new();
            loop {
                let frame = self.frames.recv().await.expect("broker running");
                seen.push(frame.command);
                if frame.command == Command::Disconnect {
                    return seen;
                }
            }
        })
        .await
        .expect("no DISCONNECT frame")
    }

    fn kick(&self) {
        let _ = self.push.send(Push::Kick);
    }
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<BrokerState>) -> Response {
    ws.on_upgrade(move |socket| session(socket, state))
}

async fn session(mut socket: WebSocket, state: BrokerState) {
    let mut push = state.push.subscribe();
    let mut subscriptions: HashMap<String, String> = HashMap::new();
    let mut message_id = 0u32;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                    Some(Ok(_)) => continue,
                };
                let Ok(Decoded::Frame(frame)) = Frame::decode(&text) else { continue };
                match frame.command {
                    Command::Connect => {
                        let connected = Frame::new(Command::Connected)
                            .header("version", "1.2")
                            .header("heart-beat", "0,0");
                        if socket.send(Message::Text(connected.encode())).await.is_err() {
                            return;
                        }
                    }
                    Command::Subscribe => {
                        if let (Some(dest), Some(id)) = (frame.get("destination"), frame.get("id")) {
                            subscriptions.insert(dest.to_string(), id.to_string());
                        }
                    }
                    Command::Unsubscribe => {
                        if let Some(id) = frame.get("id") {
                            subscriptions.retain(|_, sub| sub != id);
                        }
                    }
                    _ => {}
                }
                let _ = state.frames.send(frame);
            }
            cmd = push.recv() => match cmd {
                Ok(Push::Message { destination, body }) => {
                    let Some(sub) = subscriptions.get(&destination) else { continue };
                    message_id += 1;
                    let message = Frame::new(Command::Message)
                        .header("subscription", sub.as_str())
                        .header("message-id", message_id.to_string())
                        .header("destination", destination.as_str())
                        .body(body);
                    if socket.send(Message::Text(message.encode())).await.is_err() {
                        return;
                    }
                }
                Ok(Push::Raw(text)) => {
                    if socket.send(Message::Text(text)).await.is_err() {
                        return;
                    }
                }
                Ok(Push::Kick) | Err(_) => {
                    let _ = socket.send(Message::Close(None)).await;
                    return;
                }
            },
        }
    }
}

fn config(url: String, dir: &tempfile::TempDir) -> Config {
    Config {
        ws_url: url,
        heartbeat_ms: 0,
        reconnect_delay_ms: 50,
        max_reconnect_attempts: 3,
        handshake_timeout_ms: 1_000,
        logout_countdown_secs: 1,
        session_file: dir.path().join("session.json"),
        ..Config::default()
    }
}

fn context(
    config: Config,
) -> (
    ClientContext,
    Arc<FileSessionStore>,
    mpsc::UnboundedReceiver<UiEvent>,
) {
    let (ui_tx, ui_rx) = mpsc::unbounded_channel();
    let store = Arc::new(FileSessionStore::new(config.session_file.clone()));
    (
        ClientContext::new(Arc::new(config), store.clone(), ui_tx),
        store,
        ui_rx,
    )
}

fn socio() -> StoredSession {
    StoredSession {
        user: Some(Identity::new("42").with_club("7")),
        token: Some("secret-token".to_string()),
    }
}

fn expected_destinations(club: &str) -> BTreeSet<String> {
    ["/topic/general".to_string(), "/topic/user/42".to_string(), format!("/topic/club/{club}")]
        .into_iter()
        .collect()
}

async fn wait_state(handle: &ClientHandle, state: ConnectionState) {
    let mut rx = handle.watch_state();
    tokio::time::timeout(WAIT, rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("never reached {state:?}"))
        .unwrap();
}

/// Next UI event that is not a connection-state change.
async fn next_ui(ui: &mut mpsc::UnboundedReceiver<UiEvent>) -> UiEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match ui.recv().await.expect("ui channel open") {
                UiEvent::ConnectionChanged(_) => continue,
                other => return other,
            }
        }
    })
    .await
    .expect("ui event")
}

#[tokio::test]
async fn notifications_flow_until_forced_logout() {
    let mut broker = Broker::start().await;
    let dir = tempfile::tempdir().unwrap();
    let (ctx, store, mut ui) = context(config(broker.url(), &dir));
    store.save(&socio()).await.unwrap();

    let mut provider = RealtimeProvider::new(ctx);
    provider.apply(socio()).await;
    let handle = provider.handle().unwrap();

    let connect = broker.expect(Command::Connect).await;
    assert_eq!(connect.get("accept-version"), Some("1.2"));
    assert_eq!(connect.get("Authorization"), Some("Bearer secret-token"));
    assert_eq!(broker.expect_subscriptions(3).await, expected_destinations("7"));
    wait_state(&handle, ConnectionState::Connected).await;
    assert_eq!(handle.subscribed_channels().len(), 3);

    broker.publish(
        "/topic/user/42",
        r#"{"titulo":"Hola","mensaje":"Bienvenido","tipo":"info"}"#,
    );
    match next_ui(&mut ui).await {
        UiEvent::Toast(toast) => {
            assert_eq!(toast.category, ToastCategory::Info);
            assert_eq!(toast.titulo, "Hola");
        }
        other => panic!("expected toast, got {other:?}"),
    }
    let log = handle.notifications();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].channel, Channel::User("42".to_string()));
    assert_eq!(log[0].mensaje, "Bienvenido");
    assert_eq!(handle.unread_count(), 1);

    let mut notifications = handle.watch_notifications();
    handle.mark_read(log[0].id.clone());
    tokio::time::timeout(WAIT, notifications.wait_for(|n| n.iter().all(|n| n.read)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(handle.unread_count(), 0);

    // Bare sentinel on the general channel.
    broker.publish("/topic/general", "CAMBIO_ROL");
    assert_eq!(
        next_ui(&mut ui).await,
        UiEvent::LogoutNotice { seconds_left: 1 }
    );
    assert_eq!(
        next_ui(&mut ui).await,
        UiEvent::LogoutCompleted {
            redirect_to: "/login".to_string()
        }
    );

    broker.expect(Command::Disconnect).await;
    assert!(!store.path().exists());
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert!(handle.notifications().is_empty());

    // The instance is over; the provider replaces it only for a new session.
    provider.apply(StoredSession::default()).await;
    assert!(provider.handle().is_none());
}

#[tokio::test]
async fn gives_up_after_retry_budget() {
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _store, mut ui) = context(config(format!("ws://127.0.0.1:{port}/ws"), &dir));

    let client = RealtimeClient::spawn(ctx, socio());
    let handle = client.handle();
    wait_state(&handle, ConnectionState::Failed).await;

    let mut states = Vec::new();
    while let Ok(UiEvent::ConnectionChanged(s)) = ui.try_recv() {
        states.push(s);
    }
    assert_eq!(
        states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Reconnecting,
            ConnectionState::Failed
        ]
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(handle.state(), ConnectionState::Failed);
    client.shutdown().await;
}

#[tokio::test]
async fn anonymous_identity_opens_nothing() {
    let mut broker = Broker::start().await;
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _store, _ui) = context(config(broker.url(), &dir));

    let client = RealtimeClient::spawn(ctx, StoredSession::for_user(Identity::new("  ")));
    let handle = client.handle();

    let heard = tokio::time::timeout(Duration::from_millis(300), broker.frames.recv()).await;
    assert!(heard.is_err());
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert!(handle.subscribed_channels().is_empty());
    client.shutdown().await;
}

#[tokio::test]
async fn send_publishes_json() {
    let mut broker = Broker::start().await;
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _store, _ui) = context(config(broker.url(), &dir));

    let client = RealtimeClient::spawn(ctx, socio());
    let handle = client.handle();
    broker.expect_subscriptions(3).await;
    wait_state(&handle, ConnectionState::Connected).await;

    handle
        .send("/app/chat", &serde_json::json!({"texto": "hola"}))
        .unwrap();
    let sent = broker.expect(Command::Send).await;
    assert_eq!(sent.get("destination"), Some("/app/chat"));
    assert_eq!(sent.get("content-type"), Some("application/json"));
    let body: serde_json::Value = serde_json::from_str(&sent.body).unwrap();
    assert_eq!(body["texto"], "hola");

    client.shutdown().await;
    broker.expect(Command::Disconnect).await;
}

#[tokio::test]
async fn reconnects_and_resubscribes_after_drop() {
    let mut broker = Broker::start().await;
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _store, _ui) = context(config(broker.url(), &dir));

    let client = RealtimeClient::spawn(ctx, socio());
    let handle = client.handle();
    assert_eq!(broker.expect_subscriptions(3).await, expected_destinations("7"));
    wait_state(&handle, ConnectionState::Connected).await;

    let mut states = handle.watch_state();
    states.borrow_and_update();
    broker.kick();
    tokio::time::timeout(WAIT, states.wait_for(|s| *s == ConnectionState::Reconnecting))
        .await
        .unwrap()
        .unwrap();

    broker.expect(Command::Connect).await;
    assert_eq!(broker.expect_subscriptions(3).await, expected_destinations("7"));
    wait_state(&handle, ConnectionState::Connected).await;
    assert_eq!(handle.subscribed_channels().len(), 3);
    client.shutdown().await;
}

#[tokio::test]
async fn identity_change_rebuilds_the_client() {
    let mut broker = Broker::start().await;
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _store, _ui) = context(config(broker.url(), &dir));

    let mut provider = RealtimeProvider::new(ctx);
    provider.apply(socio()).await;
    assert_eq!(broker.expect_subscriptions(3).await, expected_destinations("7"));
    wait_state(&provider.handle().unwrap(), ConnectionState::Connected).await;

    provider
        .apply(StoredSession::for_user(Identity::new("42").with_club("8")))
        .await;
    broker.expect(Command::Disconnect).await;
    broker.expect(Command::Connect).await;
    assert_eq!(broker.expect_subscriptions(3).await, expected_destinations("8"));

    provider.shutdown().await;
    broker.expect(Command::Disconnect).await;
}

#[tokio::test]
async fn sentinel_without_subscription_header_still_forces_logout() {
    let mut broker = Broker::start().await;
    let dir = tempfile::tempdir().unwrap();
    let (ctx, store, mut ui) = context(config(broker.url(), &dir));
    store.save(&socio()).await.unwrap();

    let client = RealtimeClient::spawn(ctx, socio());
    let handle = client.handle();
    broker.expect_subscriptions(3).await;
    wait_state(&handle, ConnectionState::Connected).await;

    broker.publish_raw("MESSAGE\ndestination:/topic/general\nmessage-id:x-1\n\nCAMBIO_ROL\0");
    assert_eq!(
        next_ui(&mut ui).await,
        UiEvent::LogoutNotice { seconds_left: 1 }
    );
    assert!(matches!(
        next_ui(&mut ui).await,
        UiEvent::LogoutCompleted { .. }
    ));
    assert!(!store.path().exists());
    assert!(handle.notifications().is_empty());
    client.shutdown().await;
}

#[tokio::test]
async fn unrouted_ordinary_message_is_dropped() {
    let mut broker = Broker::start().await;
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _store, _ui) = context(config(broker.url(), &dir));

    let client = RealtimeClient::spawn(ctx, socio());
    let handle = client.handle();
    broker.expect_subscriptions(3).await;
    wait_state(&handle, ConnectionState::Connected).await;

    broker.publish_raw("MESSAGE\nsubscription:nope\nmessage-id:x-2\n\n{\"titulo\":\"t\",\"mensaje\":\"m\"}\0");
    broker.publish("/topic/general", r#"{"titulo":"visible","mensaje":"m"}"#);
    let mut notifications = handle.watch_notifications();
    tokio::time::timeout(WAIT, notifications.wait_for(|n| !n.is_empty()))
        .await
        .unwrap()
        .unwrap();
    let log = handle.notifications();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].titulo, "visible");
    client.shutdown().await;
}

#[tokio::test]
async fn send_is_refused_while_logout_is_pending() {
    let mut broker = Broker::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        logout_countdown_secs: 30,
        ..config(broker.url(), &dir)
    };
    let (ctx, _store, mut ui) = context(config);

    let client = RealtimeClient::spawn(ctx, socio());
    let handle = client.handle();
    broker.expect_subscriptions(3).await;
    wait_state(&handle, ConnectionState::Connected).await;

    broker.publish("/topic/user/42", r#"{"titulo":"x","mensaje":"y","tipo":"CAMBIO_ROL"}"#);
    assert_eq!(
        next_ui(&mut ui).await,
        UiEvent::LogoutNotice { seconds_left: 30 }
    );

    // Still connected, but nothing may be published under the old role.
    assert!(handle.is_connected());
    handle
        .send("/app/chat", &serde_json::json!({"texto": "hola"}))
        .unwrap();
    handle.confirm_logout();

    let seen = broker.frames_until_disconnect().await;
    assert!(!seen.contains(&Command::Send), "unexpected frames {seen:?}");
    assert!(matches!(
        next_ui(&mut ui).await,
        UiEvent::LogoutCompleted { .. }
    ));
    client.shutdown().await;
}
