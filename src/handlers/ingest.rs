//! The single entry point for inbound notification payloads.

use chrono::Utc;
use tracing::debug;

use crate::config::Config;
use crate::models::{Channel, InboundMessage, Notification};
use crate::services::{NotificationStore, SecurityProtocol, Toast, ToastDispatcher, Verdict};

/// What happened to one inbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingested {
    Stored {
        notification: Notification,
        toast: Option<Toast>,
    },
    /// Privilege-change signal. `countdown` is set when this payload started the logout flow.
    PrivilegeChange { countdown: Option<u32> },
    /// Passed the gate but belongs to no known channel.
    Unrouted,
}

/// Security gate first, then the log and toasts.
#[derive(Debug)]
pub struct IngestPipeline {
    pub security: SecurityProtocol,
    pub store: NotificationStore,
    pub toasts: ToastDispatcher,
}

impl IngestPipeline {
    pub fn new(config: &Config) -> Self {
        Self {
            security: SecurityProtocol::new(
                config.privilege_sentinel.clone(),
                config.logout_countdown_secs,
            ),
            store: NotificationStore::new(config.store_capacity),
            toasts: ToastDispatcher::new(config.toast_duration()),
        }
    }

    /// Decode `body` and route it to `channel`.
    ///
    /// The security gate sees every payload, including ones whose channel could not be resolved.
    pub fn ingest(&mut self, channel: Option<Channel>, body: &str) -> Ingested {
        let msg = InboundMessage::decode(body);

        if let Verdict::Diverted { countdown, .. } = self.security.inspect(&msg) {
            return Ingested::PrivilegeChange { countdown };
        }
        let Some(channel) = channel else {
            return Ingested::Unrouted;
        };

        let notification = Notification::from_inbound(msg, channel, Utc::now());
        debug!(id = %notification.id, channel = %notification.channel, tipo = %notification.tipo, "notification received");
        let toast = self.toasts.dispatch(&notification);
        self.store.ingest(notification.clone());
        Ingested::Stored {
            notification,
            toast,
        }
    }

    /// Forget everything this identity received.
    pub fn reset(&mut self) {
        self.store.clear_all();
        self.toasts.clear();
    }
}
