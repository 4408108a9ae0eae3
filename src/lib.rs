//! Real-time notification client.
//!
//! Connects to a STOMP broker over WebSocket as the logged-in identity,
//! subscribes to its general, personal and club channels, keeps a bounded
//! notification log, raises toasts, and forces a logout when the backend
//! signals a privilege change.

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod services;
pub mod stomp;
pub mod transport;

pub use config::Config;
pub use error::{ClientError, ClientResult};
pub use handlers::{ClientContext, ClientHandle, RealtimeClient, RealtimeProvider, UiEvent};
pub use models::{Channel, ConnectionState, Identity, Notification};
pub use repositories::{FileSessionStore, SessionStore, StoredSession};
