//! Connection lifecycle and reconnect budget, independent of any socket.
//!
//! The transport task does the actual I/O and retries on its own fixed timer;
//! this state machine decides whether those retries are still allowed.

use tracing::{debug, info, instrument, warn};

use crate::models::ConnectionState;

/// What the caller should do after a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Keep the transport running; it will reconnect after its delay.
    Retry { attempt: u32 },
    /// Budget exhausted: close the transport for good.
    GiveUp,
}

#[derive(Debug)]
pub struct ConnectionManager {
    state: ConnectionState,
    attempts: u32,
    max_attempts: u32,
}

impl ConnectionManager {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            max_attempts,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive transport errors since the last successful handshake.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// `Disconnected -> Connecting`. Returns false (and does nothing) from any other state.
    pub fn start(&mut self) -> bool {
        if self.state != ConnectionState::Disconnected {
            debug!(state = ?self.state, "start ignored");
            return false;
        }
        self.state = ConnectionState::Connecting;
        info!("connecting");
        true
    }

    /// Handshake succeeded: reset the budget and run `on_ready` (opens subscriptions).
    /// Ignored once stopped or failed, so a late handshake cannot revive a dead instance.
    #[instrument(skip_all, fields(state = ?self.state, attempts = self.attempts))]
    pub fn on_connected(&mut self, on_ready: impl FnOnce()) -> bool {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                self.state = ConnectionState::Connected;
                self.attempts = 0;
                info!("connected");
                on_ready();
                true
            }
            state => {
                debug!(state = ?state, "late handshake ignored");
                false
            }
        }
    }

    /// Count a transport error against the budget.
    #[instrument(skip(self), fields(state = ?self.state, attempts = self.attempts))]
    pub fn on_transport_error(&mut self) -> RetryDecision {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Failed => {
                return RetryDecision::GiveUp;
            }
            _ => {}
        }

        self.attempts += 1;
        if self.attempts >= self.max_attempts {
            warn!(attempts = self.attempts, "reconnect budget exhausted");
            self.stop();
            self.state = ConnectionState::Failed;
            return RetryDecision::GiveUp;
        }

        self.state = ConnectionState::Reconnecting;
        RetryDecision::Retry {
            attempt: self.attempts,
        }
    }

    /// Back to `Disconnected` from any state; safe to call repeatedly.
    pub fn stop(&mut self) {
        if self.state != ConnectionState::Disconnected {
            info!(from = ?self.state, "connection stopped");
        }
        self.state = ConnectionState::Disconnected;
        self.attempts = 0;
    }
}
