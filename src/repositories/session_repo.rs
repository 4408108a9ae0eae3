//! Persisted session: where the portal leaves the logged-in user and token.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ClientError, ClientResult};
use crate::models::Identity;

/// Contents of the session store. Absent `user` means nobody is logged in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    #[serde(default)]
    pub user: Option<Identity>,
    #[serde(default)]
    pub token: Option<String>,
}

impl StoredSession {
    pub fn for_user(user: Identity) -> Self {
        Self {
            user: Some(user),
            token: None,
        }
    }

    /// The identity, if it is good enough to connect with.
    pub fn identity(&self) -> Option<&Identity> {
        self.user.as_ref().filter(|u| u.is_authenticated())
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> ClientResult<StoredSession>;
    /// Remove every trace of the session. Clearing an empty store is not an error.
    async fn clear(&self) -> ClientResult<()>;
}

/// JSON file store: `{ "user": {...}, "token": "..." }`.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn save(&self, session: &StoredSession) -> ClientResult<()> {
        let data = serde_json::to_vec_pretty(session)?;
        tokio::fs::write(&self.path, data).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> ClientResult<StoredSession> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(StoredSession::default()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&data).map_err(|e| {
            ClientError::Session(format!("{}: {}", self.path.display(), e))
        })
    }

    async fn clear(&self) -> ClientResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "session cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no session to clear");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
