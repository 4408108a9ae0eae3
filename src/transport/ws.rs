//! STOMP-over-WebSocket transport task.
//!
//! One spawned task owns the socket. It connects, performs the STOMP handshake,
//! pumps frames both ways, sends and checks heartbeats, and after any failure
//! waits a fixed delay and tries again. It never decides to give up; the owner
//! does that by closing the handle.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{tick, FrameSink};
use crate::config::Config;
use crate::error::{ClientError, ClientResult};
use crate::stomp::{self, Command, Decoded, Frame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Events reported to the owner, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// STOMP handshake completed. Heartbeats are the negotiated `(outgoing, incoming)` ms.
    Connected { heartbeat: (u64, u64) },
    /// A server frame after the handshake (MESSAGE, ERROR, RECEIPT).
    Frame(Frame),
    /// The connection failed or dropped. A retry follows after the reconnect delay.
    Error(String),
}

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub url: String,
    pub host: String,
    pub heartbeat_ms: u64,
    pub reconnect_delay: Duration,
    pub handshake_timeout: Duration,
    pub token: Option<String>,
}

impl TransportSettings {
    pub fn from_config(config: &Config, token: Option<String>) -> Self {
        Self {
            url: config.ws_url.clone(),
            host: config.stomp_host.clone(),
            heartbeat_ms: config.heartbeat_ms,
            reconnect_delay: config.reconnect_delay(),
            handshake_timeout: config.handshake_timeout(),
            token,
        }
    }
}

#[derive(Debug)]
enum Outbound {
    Frame(Frame),
    Close,
}

enum PumpExit {
    Closed,
    Failed(String),
}

/// Owner's side of the transport task. Dropping it aborts the task.
#[derive(Debug)]
pub struct TransportHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    task: Option<JoinHandle<()>>,
}

impl TransportHandle {
    /// Start connecting in the background.
    pub fn spawn(settings: TransportSettings) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(settings, outbound_rx, events_tx));
        (
            Self {
                outbound: outbound_tx,
                task: Some(task),
            },
            events_rx,
        )
    }

    /// Send DISCONNECT if connected, close the socket and stop retrying.
    pub async fn close(mut self) {
        let _ = self.outbound.send(Outbound::Close);
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                debug!("transport did not close in time; aborting");
                task.abort();
            }
        }
    }
}

impl FrameSink for TransportHandle {
    fn send_frame(&self, frame: Frame) -> ClientResult<()> {
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| ClientError::Closed)
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run(
    settings: TransportSettings,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    loop {
        let reason = match connect(&settings).await {
            Ok((ws, heartbeat)) => {
                info!(url = %settings.url, ?heartbeat, "stomp session established");
                if events.send(TransportEvent::Connected { heartbeat }).is_err() {
                    return;
                }
                match pump(ws, heartbeat, &mut outbound, &events).await {
                    PumpExit::Closed => return,
                    PumpExit::Failed(reason) => reason,
                }
            }
            Err(e) => e.to_string(),
        };

        warn!(url = %settings.url, reason = %reason, delay_ms = settings.reconnect_delay.as_millis() as u64, "transport error");
        if events.send(TransportEvent::Error(reason)).is_err() {
            return;
        }

        let retry = tokio::time::sleep(settings.reconnect_delay);
        tokio::pin!(retry);
        loop {
            tokio::select! {
                _ = &mut retry => break,
                cmd = outbound.recv() => match cmd {
                    Some(Outbound::Frame(frame)) => {
                        debug!(command = %frame.command, "dropping frame while disconnected");
                    }
                    Some(Outbound::Close) | None => return,
                },
            }
        }
    }
}

/// Socket open plus STOMP handshake, bounded by the handshake timeout as a whole.
async fn connect(settings: &TransportSettings) -> ClientResult<(WsStream, (u64, u64))> {
    tokio::time::timeout(settings.handshake_timeout, handshake(settings))
        .await
        .map_err(|_| ClientError::Protocol("timed out waiting for CONNECTED".to_string()))?
}

async fn handshake(settings: &TransportSettings) -> ClientResult<(WsStream, (u64, u64))> {
    debug!(url = %settings.url, "opening websocket");
    let (mut ws, _response) = connect_async(settings.url.as_str()).await?;

    let hello = stomp::connect_frame(&settings.host, settings.heartbeat_ms, settings.token.as_deref());
    ws.send(Message::Text(hello.encode().into())).await?;

    let connected = await_connected(&mut ws).await?;
    let server = stomp::parse_heartbeat(connected.get("heart-beat"));
    let heartbeat = stomp::negotiate_heartbeat((settings.heartbeat_ms, settings.heartbeat_ms), server);
    Ok((ws, heartbeat))
}

async fn await_connected(ws: &mut WsStream) -> ClientResult<Frame> {
    while let Some(msg) = ws.next().await {
        let text = match msg? {
            Message::Text(text) => text.as_str().to_string(),
            Message::Binary(data) => String::from_utf8_lossy(&data).into_owned(),
            Message::Close(_) => break,
            _ => continue,
        };
        match Frame::decode(&text)? {
            Decoded::Frame(frame) if frame.command == Command::Connected => return Ok(frame),
            Decoded::Frame(frame) if frame.command == Command::Error => {
                let reason = frame.get("message").unwrap_or(frame.body.as_str()).to_string();
                return Err(ClientError::Protocol(format!("broker refused connection: {reason}")));
            }
            _ => continue,
        }
    }
    Err(ClientError::Protocol(
        "connection closed before CONNECTED".to_string(),
    ))
}

async fn pump(
    ws: WsStream,
    (outgoing_ms, incoming_ms): (u64, u64),
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> PumpExit {
    let (mut sink, mut stream) = ws.split();

    let mut heartbeat = every(outgoing_ms);
    // Missed heartbeats: nothing at all heard for twice the negotiated interval.
    let silence_limit = (incoming_ms > 0).then(|| Duration::from_millis(incoming_ms * 2));
    let mut watchdog = every(incoming_ms);
    let mut last_heard = Instant::now();

    loop {
        tokio::select! {
            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => return PumpExit::Failed(e.to_string()),
                    None => return PumpExit::Failed("connection closed by server".to_string()),
                };
                last_heard = Instant::now();
                let text = match msg {
                    Message::Text(text) => text.as_str().to_string(),
                    Message::Binary(data) => String::from_utf8_lossy(&data).into_owned(),
                    Message::Close(_) => return PumpExit::Failed("connection closed by server".to_string()),
                    _ => continue,
                };
                match Frame::decode(&text) {
                    Ok(Decoded::Heartbeat) => {}
                    Ok(Decoded::Frame(frame)) => {
                        if events.send(TransportEvent::Frame(frame)).is_err() {
                            return PumpExit::Closed;
                        }
                    }
                    Err(e) => warn!(error = %e, "undecodable frame"),
                }
            }
            cmd = outbound.recv() => match cmd {
                Some(Outbound::Frame(frame)) => {
                    let command = frame.command;
                    if let Err(e) = sink.send(Message::Text(frame.encode().into())).await {
                        return PumpExit::Failed(format!("{command} failed: {e}"));
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink
                        .send(Message::Text(stomp::disconnect_frame().encode().into()))
                        .await;
                    let _ = sink.close().await;
                    debug!("transport closed");
                    return PumpExit::Closed;
                }
            },
            _ = tick(&mut heartbeat) => {
                if let Err(e) = sink.send(Message::Text(String::from("\n").into())).await {
                    return PumpExit::Failed(format!("heartbeat failed: {e}"));
                }
            }
            _ = tick(&mut watchdog) => {
                if let Some(limit) = silence_limit {
                    if last_heard.elapsed() > limit {
                        return PumpExit::Failed("missed server heartbeat".to_string());
                    }
                }
            }
        }
    }
}

/// Interval that first fires one period from now; `None` when disabled.
fn every(ms: u64) -> Option<Interval> {
    (ms > 0).then(|| {
        let period = Duration::from_millis(ms);
        tokio::time::interval_at(Instant::now() + period, period)
    })
}
