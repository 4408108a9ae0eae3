//! Persistence collaborators.

pub mod session_repo;

pub use session_repo::{FileSessionStore, SessionStore, StoredSession};
