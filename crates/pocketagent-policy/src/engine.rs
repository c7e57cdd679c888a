//! Permission resolution: session, local, and server-held policy merged into
//! one decision.

use std::sync::Arc;

use pocketagent_proto::PermissionMode;
use tokio::sync::Mutex;

use crate::config::{PermissionConfig, PermissionUpdate, is_file_edit_tool};
use crate::store::{PolicyError, PolicyStore};

/// Caching front for the policy store.
///
/// The cache lock is held across the fetch, so concurrent readers during the
/// invalidate-then-reload window wait on the single in-flight load instead of
/// racing their own fetches or observing a torn document.
pub struct PermissionEngine {
    store: Arc<dyn PolicyStore>,
    cache: Mutex<Option<Arc<PermissionConfig>>>,
}

impl PermissionEngine {
    #[must_use]
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(None),
        }
    }

    /// Cached read of the policy document. "Not found" on first load means
    /// "no policy yet" and resolves to the empty default config.
    pub async fn load_config(&self) -> Result<Arc<PermissionConfig>, PolicyError> {
        let mut cache = self.cache.lock().await;
        if let Some(config) = cache.as_ref() {
            return Ok(Arc::clone(config));
        }
        let fetched = self.store.fetch().await?.unwrap_or_default();
        let config = Arc::new(fetched);
        *cache = Some(Arc::clone(&config));
        tracing::debug!(projects = config.projects.len(), "permission config loaded");
        Ok(config)
    }

    /// Drop the cached document; the next read fetches fresh.
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }

    /// Effective mode for a project, by strict priority: session override,
    /// local per-project override, server project config (bypass flag, then
    /// mode), app-wide setting, server global config (bypass flag, then
    /// default mode), hard default.
    pub async fn resolve_permission_mode(
        &self,
        project_path: &str,
        session_override: Option<PermissionMode>,
        local_project_override: Option<PermissionMode>,
        global_app_setting: Option<PermissionMode>,
    ) -> Result<PermissionMode, PolicyError> {
        if let Some(mode) = session_override {
            return Ok(mode);
        }
        if let Some(mode) = local_project_override {
            return Ok(mode);
        }

        let config = self.load_config().await?;
        if let Some(project) = config.project(project_path) {
            if project.bypass_all == Some(true) {
                return Ok(PermissionMode::BypassPermissions);
            }
            if let Some(mode) = project.permission_mode {
                return Ok(mode);
            }
        }
        if let Some(mode) = global_app_setting {
            return Ok(mode);
        }
        if config.global.bypass_all {
            return Ok(PermissionMode::BypassPermissions);
        }
        Ok(config.global.default_mode)
    }

    /// Per-tool auto-approval. The deny list is absolute: it overrides the
    /// allow list and every bypass setting.
    pub async fn should_auto_approve(
        &self,
        tool: &str,
        project_path: &str,
        session_override: Option<PermissionMode>,
    ) -> Result<bool, PolicyError> {
        let config = self.load_config().await?;
        if let Some(project) = config.project(project_path) {
            if project.always_deny.contains(tool) {
                return Ok(false);
            }
            if project.always_allow.contains(tool) {
                return Ok(true);
            }
        }
        let mode = self
            .resolve_permission_mode(project_path, session_override, None, None)
            .await?;
        Ok(match mode {
            PermissionMode::BypassPermissions => true,
            PermissionMode::AcceptEdits => is_file_edit_tool(tool),
            PermissionMode::Default => false,
        })
    }

    pub async fn set_global_default_mode(&self, mode: PermissionMode) -> Result<(), PolicyError> {
        self.apply(PermissionUpdate::SetGlobalDefaultMode { mode })
            .await
    }

    pub async fn set_global_bypass_all(&self, bypass_all: bool) -> Result<(), PolicyError> {
        self.apply(PermissionUpdate::SetGlobalBypassAll { bypass_all })
            .await
    }

    pub async fn set_project_mode(
        &self,
        project: impl Into<String>,
        mode: Option<PermissionMode>,
    ) -> Result<(), PolicyError> {
        self.apply(PermissionUpdate::SetProjectMode {
            project: project.into(),
            mode,
        })
        .await
    }

    pub async fn set_project_bypass_all(
        &self,
        project: impl Into<String>,
        bypass_all: Option<bool>,
    ) -> Result<(), PolicyError> {
        self.apply(PermissionUpdate::SetProjectBypassAll {
            project: project.into(),
            bypass_all,
        })
        .await
    }

    pub async fn add_always_allow(
        &self,
        project: impl Into<String>,
        tool: impl Into<String>,
    ) -> Result<(), PolicyError> {
        self.apply(PermissionUpdate::AddAlwaysAllow {
            project: project.into(),
            tool: tool.into(),
        })
        .await
    }

    pub async fn remove_always_allow(
        &self,
        project: impl Into<String>,
        tool: impl Into<String>,
    ) -> Result<(), PolicyError> {
        self.apply(PermissionUpdate::RemoveAlwaysAllow {
            project: project.into(),
            tool: tool.into(),
        })
        .await
    }

    pub async fn add_always_deny(
        &self,
        project: impl Into<String>,
        tool: impl Into<String>,
    ) -> Result<(), PolicyError> {
        self.apply(PermissionUpdate::AddAlwaysDeny {
            project: project.into(),
            tool: tool.into(),
        })
        .await
    }

    pub async fn remove_always_deny(
        &self,
        project: impl Into<String>,
        tool: impl Into<String>,
    ) -> Result<(), PolicyError> {
        self.apply(PermissionUpdate::RemoveAlwaysDeny {
            project: project.into(),
            tool: tool.into(),
        })
        .await
    }

    /// Write-through: a failed write leaves the cache untouched; a successful
    /// one invalidates it so the next read sees the server's view.
    async fn apply(&self, update: PermissionUpdate) -> Result<(), PolicyError> {
        self.store.update(&update).await?;
        self.invalidate().await;
        Ok(())
    }
}
