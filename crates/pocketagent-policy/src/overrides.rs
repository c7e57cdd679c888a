//! Locally persisted per-project mode preferences (resolution layer 2).

use std::collections::HashMap;
use std::path::PathBuf;

use pocketagent_proto::PermissionMode;
use tokio::sync::Mutex;

use crate::store::PolicyError;

/// Per-project permission mode overrides kept on the device, keyed by project
/// path. Survives process restart; never synced to the server.
pub struct LocalOverrides {
    path: PathBuf,
    entries: Mutex<HashMap<String, PermissionMode>>,
}

impl LocalOverrides {
    /// Load overrides from disk. A missing file is an empty set.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, PolicyError> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|err| PolicyError::Decode {
                message: err.to_string(),
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                return Err(PolicyError::Store {
                    message: err.to_string(),
                });
            }
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub async fn get(&self, project_path: &str) -> Option<PermissionMode> {
        self.entries.lock().await.get(project_path).copied()
    }

    /// Set or clear the override for one project, persisting the whole map.
    pub async fn set(
        &self,
        project_path: impl Into<String>,
        mode: Option<PermissionMode>,
    ) -> Result<(), PolicyError> {
        let mut entries = self.entries.lock().await;
        match mode {
            Some(mode) => {
                entries.insert(project_path.into(), mode);
            }
            None => {
                entries.remove(&project_path.into());
            }
        }
        let encoded = serde_json::to_vec(&*entries).map_err(|err| PolicyError::Decode {
            message: err.to_string(),
        })?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| PolicyError::Store {
                    message: err.to_string(),
                })?;
        }
        tokio::fs::write(&self.path, encoded)
            .await
            .map_err(|err| PolicyError::Store {
                message: err.to_string(),
            })
    }
}
