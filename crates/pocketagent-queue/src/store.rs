//! Persistence seam for the queue: an ordered JSON array, rewritten whole.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::action::PendingAction;
use crate::error::QueueError;

/// Backing store for the ordered action list. `save` replaces the entire
/// list; a crash mid-pass can therefore never duplicate or half-apply
/// removals.
#[async_trait]
pub trait ActionStore: Send + Sync {
    async fn load(&self) -> Result<Vec<PendingAction>, QueueError>;
    async fn save(&self, actions: &[PendingAction]) -> Result<(), QueueError>;
}

/// JSON file store. A missing or empty file is an empty queue, not an error.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ActionStore for JsonFileStore {
    async fn load(&self) -> Result<Vec<PendingAction>, QueueError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(QueueError::Store {
                    message: err.to_string(),
                });
            }
        };
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&bytes).map_err(|err| QueueError::Encode {
            message: err.to_string(),
        })
    }

    async fn save(&self, actions: &[PendingAction]) -> Result<(), QueueError> {
        let encoded = serde_json::to_vec(actions).map_err(|err| QueueError::Encode {
            message: err.to_string(),
        })?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| QueueError::Store {
                    message: err.to_string(),
                })?;
        }
        // Write-then-rename keeps the overwrite all-or-nothing.
        let staging = self.path.with_extension("tmp");
        tokio::fs::write(&staging, &encoded)
            .await
            .map_err(|err| QueueError::Store {
                message: err.to_string(),
            })?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|err| QueueError::Store {
                message: err.to_string(),
            })
    }
}

/// In-memory store for tests and for consumers that manage durability
/// themselves.
#[derive(Default)]
pub struct MemoryActionStore {
    actions: Mutex<Vec<PendingAction>>,
}

impl MemoryActionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Vec<PendingAction> {
        self.actions.lock().await.clone()
    }
}

#[async_trait]
impl ActionStore for MemoryActionStore {
    async fn load(&self) -> Result<Vec<PendingAction>, QueueError> {
        Ok(self.actions.lock().await.clone())
    }

    async fn save(&self, actions: &[PendingAction]) -> Result<(), QueueError> {
        *self.actions.lock().await = actions.to_vec();
        Ok(())
    }
}
