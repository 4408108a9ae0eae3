//! Privilege-change detection and the forced-logout flow.
//!
//! Every inbound message passes through [`SecurityProtocol::inspect`] before anything
//! else sees it. A match is never stored or toasted; it starts a countdown after which
//! the persisted session is cleared. Matching is deliberately loose: a false positive
//! costs a re-login, a miss leaves a session running under revoked privileges.

use tracing::{info, instrument, warn};

use crate::models::InboundMessage;

/// One way a privilege-change signal can show up on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalPattern {
    /// `{"tipo": "<sentinel>"}`
    TipoEquals,
    /// `{"mensaje": "<sentinel>"}`, or a bare string that is exactly the sentinel.
    MensajeEquals,
    /// A bare string payload containing the sentinel anywhere.
    RawContains,
}

impl SignalPattern {
    pub const ALL: [SignalPattern; 3] = [
        SignalPattern::TipoEquals,
        SignalPattern::MensajeEquals,
        SignalPattern::RawContains,
    ];

    pub fn matches(&self, msg: &InboundMessage, sentinel: &str) -> bool {
        match self {
            SignalPattern::TipoEquals => msg.tipo.trim() == sentinel,
            SignalPattern::MensajeEquals => msg.mensaje.trim() == sentinel,
            SignalPattern::RawContains => msg
                .raw
                .as_deref()
                .is_some_and(|raw| raw.contains(sentinel)),
        }
    }
}

/// Ordered list of patterns evaluated against each message.
#[derive(Debug, Clone)]
pub struct PrivilegeChangeDetector {
    sentinel: String,
    patterns: Vec<SignalPattern>,
}

impl PrivilegeChangeDetector {
    pub fn new(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: sentinel.into(),
            patterns: SignalPattern::ALL.to_vec(),
        }
    }

    /// First pattern that matches, if any.
    pub fn detect(&self, msg: &InboundMessage) -> Option<SignalPattern> {
        if self.sentinel.is_empty() {
            return None;
        }
        self.patterns
            .iter()
            .copied()
            .find(|p| p.matches(msg, &self.sentinel))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutPhase {
    Idle,
    CountingDown { remaining: u32 },
    /// Session cleared; nothing restarts the flow for this instance.
    Completed,
}

/// Outcome of one countdown step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownStep {
    Remaining(u32),
    Expired,
    Inactive,
}

/// Outcome of running a message through the security gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Ordinary notification; continue ingestion.
    Pass,
    /// Privilege change. `countdown` is `Some(secs)` only when this message started the flow.
    Diverted {
        pattern: SignalPattern,
        countdown: Option<u32>,
    },
}

#[derive(Debug)]
pub struct SecurityProtocol {
    detector: PrivilegeChangeDetector,
    countdown_secs: u32,
    phase: LogoutPhase,
}

impl SecurityProtocol {
    pub fn new(sentinel: impl Into<String>, countdown_secs: u32) -> Self {
        Self {
            detector: PrivilegeChangeDetector::new(sentinel),
            countdown_secs,
            phase: LogoutPhase::Idle,
        }
    }

    pub fn phase(&self) -> LogoutPhase {
        self.phase
    }

    /// True from the first privilege-change signal on. Outbound traffic is refused meanwhile.
    pub fn is_engaged(&self) -> bool {
        self.phase != LogoutPhase::Idle
    }

    /// Gate every inbound message. A second signal while the flow runs is swallowed.
    #[instrument(skip_all, fields(tipo = %msg.tipo, phase = ?self.phase))]
    pub fn inspect(&mut self, msg: &InboundMessage) -> Verdict {
        let Some(pattern) = self.detector.detect(msg) else {
            return Verdict::Pass;
        };

        let countdown = match self.phase {
            LogoutPhase::Idle => {
                warn!(pattern = ?pattern, seconds = self.countdown_secs, "privilege change signalled; forcing logout");
                self.phase = LogoutPhase::CountingDown {
                    remaining: self.countdown_secs,
                };
                Some(self.countdown_secs)
            }
            phase => {
                info!(pattern = ?pattern, phase = ?phase, "privilege change already being handled");
                None
            }
        };
        Verdict::Diverted { pattern, countdown }
    }

    /// Advance the countdown by one second.
    pub fn tick(&mut self) -> CountdownStep {
        match self.phase {
            LogoutPhase::CountingDown { remaining } if remaining > 1 => {
                self.phase = LogoutPhase::CountingDown {
                    remaining: remaining - 1,
                };
                CountdownStep::Remaining(remaining - 1)
            }
            LogoutPhase::CountingDown { .. } => {
                self.phase = LogoutPhase::Completed;
                CountdownStep::Expired
            }
            _ => CountdownStep::Inactive,
        }
    }

    /// The user pressed "close now". Returns true when this ends the countdown.
    pub fn confirm(&mut self) -> bool {
        match self.phase {
            LogoutPhase::CountingDown { .. } => {
                self.phase = LogoutPhase::Completed;
                true
            }
            _ => false,
        }
    }

    /// A zero-second countdown completes on the spot.
    pub fn complete_if_due(&mut self) -> bool {
        if self.phase == (LogoutPhase::CountingDown { remaining: 0 }) {
            self.phase = LogoutPhase::Completed;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENTINEL: &str = "CAMBIO_ROL";

    fn structured(tipo: &str, mensaje: &str) -> InboundMessage {
        InboundMessage::decode(
            &serde_json::json!({ "titulo": "Aviso", "mensaje": mensaje, "tipo": tipo }).to_string(),
        )
    }

    #[test]
    fn detects_every_shape() {
        let detector = PrivilegeChangeDetector::new(SENTINEL);
        assert_eq!(
            detector.detect(&structured(SENTINEL, "Tu rol cambió")),
            Some(SignalPattern::TipoEquals)
        );
        assert_eq!(
            detector.detect(&structured("info", SENTINEL)),
            Some(SignalPattern::MensajeEquals)
        );
        assert_eq!(
            detector.detect(&InboundMessage::decode("CAMBIO_ROL")),
            Some(SignalPattern::MensajeEquals)
        );
        assert_eq!(
            detector.detect(&InboundMessage::decode("evento: CAMBIO_ROL para 42")),
            Some(SignalPattern::RawContains)
        );
    }

    #[test]
    fn ordinary_messages_pass() {
        let detector = PrivilegeChangeDetector::new(SENTINEL);
        assert_eq!(detector.detect(&structured("info", "Bienvenido")), None);
        // Substring matching only applies to bare strings.
        assert_eq!(
            detector.detect(&structured("info", "se habló de CAMBIO_ROL")),
            None
        );
        assert_eq!(detector.detect(&InboundMessage::decode("hola")), None);
    }

    #[test]
    fn countdown_runs_ten_seconds() {
        let mut protocol = SecurityProtocol::new(SENTINEL, 10);
        let verdict = protocol.inspect(&InboundMessage::decode("CAMBIO_ROL"));
        assert!(matches!(verdict, Verdict::Diverted { countdown: Some(10), .. }));
        assert!(protocol.is_engaged());

        for expected in (1..10).rev() {
            assert_eq!(protocol.tick(), CountdownStep::Remaining(expected));
        }
        assert_eq!(protocol.tick(), CountdownStep::Expired);
        assert_eq!(protocol.phase(), LogoutPhase::Completed);
        assert_eq!(protocol.tick(), CountdownStep::Inactive);
    }

    #[test]
    fn second_signal_is_single_flight() {
        let mut protocol = SecurityProtocol::new(SENTINEL, 10);
        protocol.inspect(&structured(SENTINEL, ""));
        protocol.tick();
        let again = protocol.inspect(&structured(SENTINEL, ""));
        assert!(matches!(again, Verdict::Diverted { countdown: None, .. }));
        assert_eq!(protocol.phase(), LogoutPhase::CountingDown { remaining: 9 });
    }

    #[test]
    fn confirm_ends_early() {
        let mut protocol = SecurityProtocol::new(SENTINEL, 10);
        assert!(!protocol.confirm());
        protocol.inspect(&structured(SENTINEL, ""));
        assert!(protocol.confirm());
        assert_eq!(protocol.phase(), LogoutPhase::Completed);
        assert!(!protocol.confirm());
    }

    #[test]
    fn zero_countdown_completes_immediately() {
        let mut protocol = SecurityProtocol::new(SENTINEL, 0);
        protocol.inspect(&structured(SENTINEL, ""));
        assert!(protocol.complete_if_due());
        assert_eq!(protocol.phase(), LogoutPhase::Completed);
    }

    #[test]
    fn signal_after_completion_is_still_diverted() {
        let mut protocol = SecurityProtocol::new(SENTINEL, 1);
        protocol.inspect(&structured(SENTINEL, ""));
        assert_eq!(protocol.tick(), CountdownStep::Expired);
        let verdict = protocol.inspect(&structured(SENTINEL, ""));
        assert!(matches!(verdict, Verdict::Diverted { countdown: None, .. }));
    }
}
