//! Inbound notification payloads and the notifications kept for display.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::channel::Channel;

/// Title used when the server sends a bare string or omits `titulo`.
pub const DEFAULT_TITULO: &str = "Notificación";
/// Type used when the server sends a bare string or omits `tipo`.
pub const DEFAULT_TIPO: &str = "info";

/// A decoded MESSAGE body. Decoding never fails: anything that is not a JSON
/// object is wrapped as an informational notification carrying the raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: Option<String>,
    pub titulo: String,
    pub mensaje: String,
    pub tipo: String,
    /// The payload text when the body was a bare string instead of an object.
    pub raw: Option<String>,
}

impl InboundMessage {
    pub fn decode(body: &str) -> Self {
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(map)) => Self::from_object(&map),
            Ok(Value::String(s)) => Self::bare(s),
            _ => Self::bare(body.to_string()),
        }
    }

    fn from_object(map: &Map<String, Value>) -> Self {
        Self {
            id: field_text(map, "id"),
            titulo: field_text(map, "titulo").unwrap_or_else(|| DEFAULT_TITULO.to_string()),
            mensaje: field_text(map, "mensaje").unwrap_or_default(),
            tipo: field_text(map, "tipo").unwrap_or_else(|| DEFAULT_TIPO.to_string()),
            raw: None,
        }
    }

    fn bare(text: String) -> Self {
        Self {
            id: None,
            titulo: DEFAULT_TITULO.to_string(),
            mensaje: text.clone(),
            tipo: DEFAULT_TIPO.to_string(),
            raw: Some(text),
        }
    }
}

fn field_text(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Entry in the notification log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub titulo: String,
    pub mensaje: String,
    pub tipo: String,
    pub channel: Channel,
    pub read: bool,
    pub received_at: DateTime<Utc>,
}

impl Notification {
    /// Server id when present, otherwise a fresh opaque id.
    pub fn from_inbound(msg: InboundMessage, channel: Channel, received_at: DateTime<Utc>) -> Self {
        Self {
            id: msg.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            titulo: msg.titulo,
            mensaje: msg.mensaje,
            tipo: msg.tipo,
            channel,
            read: false,
            received_at,
        }
    }
}
