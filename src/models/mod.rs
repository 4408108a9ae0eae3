//! Data models for identity, channels, notifications and connection state.

pub mod channel;
pub mod connection;
pub mod event;
pub mod identity;

pub use channel::*;
pub use connection::*;
pub use event::*;
pub use identity::*;
