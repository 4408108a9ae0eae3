//! Transient toasts, at most one per notification id.

use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use tracing::trace;

use crate::models::Notification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastCategory {
    Success,
    Error,
    Warning,
    Info,
}

const SUCCESS_TIPOS: &[&str] = &[
    "success", "exito", "éxito", "aceptado", "aceptada", "aprobado", "aprobada", "acceptance",
    "accepted",
];
const ERROR_TIPOS: &[&str] = &["error", "rechazado", "rechazada", "rechazo", "rejection", "rejected"];
const WARNING_TIPOS: &[&str] = &["warning", "warn", "alerta", "alert", "advertencia", "aviso"];

impl ToastCategory {
    /// Map a notification `tipo` to how it is presented. Unknown tipos are informational.
    pub fn for_tipo(tipo: &str) -> Self {
        let tipo = tipo.trim().to_lowercase();
        let tipo = tipo.as_str();
        if SUCCESS_TIPOS.contains(&tipo) {
            ToastCategory::Success
        } else if ERROR_TIPOS.contains(&tipo) {
            ToastCategory::Error
        } else if WARNING_TIPOS.contains(&tipo) {
            ToastCategory::Warning
        } else {
            ToastCategory::Info
        }
    }
}

/// A toast to present. Auto-dismisses after `duration`; the user may close it sooner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub notification_id: String,
    pub category: ToastCategory,
    pub titulo: String,
    pub mensaje: String,
    pub duration: Duration,
}

#[derive(Debug)]
pub struct ToastDispatcher {
    shown: HashSet<String>,
    duration: Duration,
}

impl ToastDispatcher {
    pub fn new(duration: Duration) -> Self {
        Self {
            shown: HashSet::new(),
            duration,
        }
    }

    /// Build the toast for `notification`, or `None` if its id was already shown.
    pub fn dispatch(&mut self, notification: &Notification) -> Option<Toast> {
        if !self.shown.insert(notification.id.clone()) {
            trace!(id = %notification.id, "toast already shown");
            return None;
        }
        Some(Toast {
            notification_id: notification.id.clone(),
            category: ToastCategory::for_tipo(&notification.tipo),
            titulo: notification.titulo.clone(),
            mensaje: notification.mensaje.clone(),
            duration: self.duration,
        })
    }

    pub fn clear(&mut self) {
        self.shown.clear();
    }
}
