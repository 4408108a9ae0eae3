//! One client instance per identity.
//!
//! A single task owns every component (connection state, subscriptions, log,
//! security gate, toasts) and reacts to transport events, timers and commands
//! one at a time, so none of them needs a lock. The rest of the application
//! talks to it through a cloneable [`ClientHandle`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::error::{ClientError, ClientResult};
use crate::handlers::ingest::{IngestPipeline, Ingested};
use crate::models::{Channel, ConnectionState, Identity, Notification};
use crate::repositories::{SessionStore, StoredSession};
use crate::services::{
    ConnectionManager, CountdownStep, RetryDecision, SubscriptionRegistry, Toast,
};
use crate::stomp::{self, Command, Frame};
use crate::transport::{tick, FrameSink, TransportEvent, TransportHandle, TransportSettings};

/// Everything the UI layer is asked to present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    ConnectionChanged(ConnectionState),
    Toast(Toast),
    /// Blocking notice: the role changed and the session ends in `seconds_left`.
    LogoutNotice { seconds_left: u32 },
    LogoutCountdown { seconds_left: u32 },
    /// Session cleared; send the user to `redirect_to`.
    LogoutCompleted { redirect_to: String },
}

/// Collaborators shared by every client instance.
#[derive(Clone)]
pub struct ClientContext {
    pub config: Arc<Config>,
    pub sessions: Arc<dyn SessionStore>,
    pub ui: mpsc::UnboundedSender<UiEvent>,
}

impl ClientContext {
    pub fn new(
        config: Arc<Config>,
        sessions: Arc<dyn SessionStore>,
        ui: mpsc::UnboundedSender<UiEvent>,
    ) -> Self {
        Self {
            config,
            sessions,
            ui,
        }
    }
}

#[derive(Debug)]
enum ClientCommand {
    MarkRead(String),
    ClearAll,
    Send { destination: String, body: String },
    ConfirmLogout,
    Shutdown(oneshot::Sender<()>),
}

/// Read side and entry points exposed to the rest of the application.
#[derive(Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<ClientCommand>,
    state: watch::Receiver<ConnectionState>,
    notifications: watch::Receiver<Vec<Notification>>,
    channels: watch::Receiver<Vec<Channel>>,
}

impl ClientHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Newest first, at most the configured capacity.
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.borrow().clone()
    }

    pub fn watch_notifications(&self) -> watch::Receiver<Vec<Notification>> {
        self.notifications.clone()
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.borrow().iter().filter(|n| !n.read).count()
    }

    /// Channels with an open subscription right now.
    pub fn subscribed_channels(&self) -> Vec<Channel> {
        self.channels.borrow().clone()
    }

    pub fn watch_channels(&self) -> watch::Receiver<Vec<Channel>> {
        self.channels.clone()
    }

    pub fn mark_read(&self, id: impl Into<String>) {
        self.command(ClientCommand::MarkRead(id.into()));
    }

    pub fn clear_all(&self) {
        self.command(ClientCommand::ClearAll);
    }

    /// Publish `payload` as JSON to `destination`. Dropped with a warning while disconnected.
    pub fn send<T: Serialize + ?Sized>(&self, destination: &str, payload: &T) -> ClientResult<()> {
        let body = serde_json::to_string(payload)?;
        self.commands
            .send(ClientCommand::Send {
                destination: destination.to_string(),
                body,
            })
            .map_err(|_| ClientError::Closed)
    }

    /// "Close now" on the forced-logout notice.
    pub fn confirm_logout(&self) {
        self.command(ClientCommand::ConfirmLogout);
    }

    fn command(&self, cmd: ClientCommand) {
        if let Err(e) = self.commands.send(cmd) {
            debug!(command = ?e.0, "client stopped; command dropped");
        }
    }
}

/// A running client instance.
pub struct RealtimeClient {
    handle: ClientHandle,
    task: JoinHandle<()>,
}

impl RealtimeClient {
    /// Start a client for `session`. Without an authenticated identity it stays inactive.
    pub fn spawn(ctx: ClientContext, session: StoredSession) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (notifications_tx, notifications_rx) = watch::channel(Vec::new());
        let (channels_tx, channels_rx) = watch::channel(Vec::new());

        let identity = session.identity().cloned();
        let actor = ClientActor {
            manager: ConnectionManager::new(ctx.config.max_reconnect_attempts),
            registry: SubscriptionRegistry::new(identity.as_ref()),
            pipeline: IngestPipeline::new(&ctx.config),
            ctx,
            identity,
            token: session.token,
            transport: None,
            events: None,
            countdown: None,
            commands: commands_rx,
            state_tx,
            notifications_tx,
            channels_tx,
            finished: false,
        };
        let task = tokio::spawn(actor.run());

        Self {
            handle: ClientHandle {
                commands: commands_tx,
                state: state_rx,
                notifications: notifications_rx,
                channels: channels_rx,
            },
            task,
        }
    }

    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    /// True once the instance tore itself down (forced logout) or was shut down.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Tear everything down and wait for it. Safe in any state.
    pub async fn shutdown(self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.handle.commands.send(ClientCommand::Shutdown(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
        if let Err(e) = self.task.await {
            error!(error = %e, "client task ended abnormally");
        }
    }
}

struct ClientActor {
    ctx: ClientContext,
    identity: Option<Identity>,
    token: Option<String>,
    manager: ConnectionManager,
    registry: SubscriptionRegistry,
    pipeline: IngestPipeline,
    transport: Option<TransportHandle>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    countdown: Option<Interval>,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    state_tx: watch::Sender<ConnectionState>,
    notifications_tx: watch::Sender<Vec<Notification>>,
    channels_tx: watch::Sender<Vec<Channel>>,
    finished: bool,
}

impl ClientActor {
    async fn run(mut self) {
        match self.identity.clone() {
            Some(identity) => self.start(&identity),
            None => debug!("no authenticated identity; realtime client stays inactive"),
        }

        while !self.finished {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                event = next_event(&mut self.events) => self.handle_transport_event(event).await,
                _ = tick(&mut self.countdown) => self.on_countdown_tick().await,
            }
        }

        self.teardown().await;
    }

    fn start(&mut self, identity: &Identity) {
        if !self.manager.start() {
            return;
        }
        info!(
            user = %identity.id,
            club = identity.club().unwrap_or("-"),
            channels = self.registry.channels().len(),
            "starting realtime client"
        );
        let settings = TransportSettings::from_config(&self.ctx.config, self.token.clone());
        let (transport, events) = TransportHandle::spawn(settings);
        self.transport = Some(transport);
        self.events = Some(events);
        self.publish_state();
    }

    async fn handle_command(&mut self, cmd: ClientCommand) {
        match cmd {
            ClientCommand::MarkRead(id) => {
                if self.pipeline.store.mark_read(&id) {
                    self.publish_notifications();
                } else {
                    debug!(id = %id, "mark_read: no such notification");
                }
            }
            ClientCommand::ClearAll => {
                self.pipeline.store.clear_all();
                self.publish_notifications();
            }
            ClientCommand::Send { destination, body } => self.send(&destination, body),
            ClientCommand::ConfirmLogout => {
                if self.pipeline.security.confirm() {
                    self.complete_logout().await;
                }
            }
            ClientCommand::Shutdown(done) => {
                self.teardown().await;
                self.finished = true;
                let _ = done.send(());
            }
        }
    }

    fn send(&self, destination: &str, body: String) {
        if self.pipeline.security.is_engaged() {
            warn!(destination = %destination, "privilege change pending; outbound message refused");
            return;
        }
        let transport = match &self.transport {
            Some(transport) if self.manager.state().is_connected() => transport,
            _ => {
                warn!(destination = %destination, state = ?self.manager.state(), "not connected; outbound message dropped");
                return;
            }
        };
        match transport.send_frame(stomp::send_frame(destination, body)) {
            Ok(()) => debug!(destination = %destination, "message published"),
            Err(e) => warn!(destination = %destination, error = %e, "publish failed"),
        }
    }

    async fn handle_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            None => {
                debug!("transport task ended");
                self.events = None;
            }
            Some(TransportEvent::Connected { heartbeat }) => {
                let registry = &mut self.registry;
                let transport = self.transport.as_ref();
                let ready = self.manager.on_connected(|| {
                    if let Some(transport) = transport {
                        registry.open_all(transport);
                    }
                });
                if ready {
                    debug!(?heartbeat, "realtime client ready");
                }
                self.publish_state();
                self.publish_channels();
            }
            Some(TransportEvent::Error(reason)) => {
                self.registry.reset();
                match self.manager.on_transport_error() {
                    RetryDecision::Retry { attempt } => warn!(
                        attempt,
                        max = self.ctx.config.max_reconnect_attempts,
                        reason = %reason,
                        "connection lost; retrying"
                    ),
                    RetryDecision::GiveUp => {
                        error!(reason = %reason, "realtime connection failed; not retrying");
                        self.close_transport().await;
                    }
                }
                self.publish_state();
                self.publish_channels();
            }
            Some(TransportEvent::Frame(frame)) => self.handle_frame(frame).await,
        }
    }

    async fn handle_frame(&mut self, frame: Frame) {
        match frame.command {
            Command::Message => {
                let subscription = frame.get("subscription");
                let channel = subscription
                    .and_then(|id| self.registry.channel_for(id))
                    .cloned();
                match self.pipeline.ingest(channel, &frame.body) {
                    Ingested::Stored { toast, .. } => {
                        self.publish_notifications();
                        if let Some(toast) = toast {
                            self.emit(UiEvent::Toast(toast));
                        }
                    }
                    Ingested::PrivilegeChange {
                        countdown: Some(seconds),
                    } => self.begin_logout(seconds).await,
                    Ingested::PrivilegeChange { countdown: None } => {}
                    Ingested::Unrouted => warn!(
                        subscription = subscription.unwrap_or("-"),
                        "MESSAGE for unknown subscription dropped"
                    ),
                }
            }
            Command::Error => warn!(
                reason = frame.get("message").unwrap_or_default(),
                body = %frame.body,
                "broker reported an error"
            ),
            Command::Receipt => {
                debug!(receipt = frame.get("receipt-id").unwrap_or_default(), "receipt")
            }
            other => debug!(command = %other, "unexpected frame ignored"),
        }
    }

    async fn begin_logout(&mut self, seconds: u32) {
        self.emit(UiEvent::LogoutNotice {
            seconds_left: seconds,
        });
        if self.pipeline.security.complete_if_due() {
            self.complete_logout().await;
            return;
        }
        let period = Duration::from_secs(1);
        self.countdown = Some(tokio::time::interval_at(Instant::now() + period, period));
    }

    async fn on_countdown_tick(&mut self) {
        match self.pipeline.security.tick() {
            CountdownStep::Remaining(seconds_left) => {
                self.emit(UiEvent::LogoutCountdown { seconds_left })
            }
            CountdownStep::Expired => self.complete_logout().await,
            CountdownStep::Inactive => self.countdown = None,
        }
    }

    async fn complete_logout(&mut self) {
        self.countdown = None;
        if let Err(e) = self.ctx.sessions.clear().await {
            error!(error = %e, "failed to clear persisted session");
        }
        self.teardown().await;

        let redirect_to = self.ctx.config.login_url.clone();
        info!(redirect_to = %redirect_to, "forced logout complete");
        self.emit(UiEvent::LogoutCompleted { redirect_to });
        self.finished = true;
    }

    /// Unsubscribe, close the socket, stop retrying.
    async fn close_transport(&mut self) {
        if let Some(transport) = self.transport.take() {
            self.registry.cancel_all(&transport);
            transport.close().await;
        }
        self.registry.reset();
        self.events = None;
    }

    /// Back to a blank, disconnected instance. Safe to call repeatedly.
    async fn teardown(&mut self) {
        self.countdown = None;
        self.close_transport().await;
        self.manager.stop();
        self.pipeline.reset();
        self.publish_state();
        self.publish_notifications();
        self.publish_channels();
    }

    fn publish_state(&self) {
        let state = self.manager.state();
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            self.emit(UiEvent::ConnectionChanged(state));
        }
    }

    fn publish_notifications(&self) {
        self.notifications_tx
            .send_replace(self.pipeline.store.snapshot());
    }

    fn publish_channels(&self) {
        let open: Vec<Channel> = self
            .registry
            .open()
            .into_iter()
            .map(|s| s.channel)
            .collect();
        self.channels_tx.send_if_modified(|current| {
            if *current == open {
                return false;
            }
            *current = open;
            true
        });
    }

    fn emit(&self, event: UiEvent) {
        if self.ctx.ui.send(event).is_err() {
            trace!("ui receiver gone; event dropped");
        }
    }
}

async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
