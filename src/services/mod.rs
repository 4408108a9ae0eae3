//! Client-side components: connection lifecycle, subscriptions, notification log,
//! security gate and toasts.

pub mod connection;
pub mod security;
pub mod store;
pub mod subscription;
pub mod toast;

pub use connection::{ConnectionManager, RetryDecision};
pub use security::{CountdownStep, LogoutPhase, SecurityProtocol, SignalPattern, Verdict};
pub use store::NotificationStore;
pub use subscription::{Subscription, SubscriptionRegistry};
pub use toast::{Toast, ToastCategory, ToastDispatcher};
