//! Server-held permission policy document and partial updates to it.

use std::collections::{BTreeSet, HashMap};

use pocketagent_proto::PermissionMode;
use serde::{Deserialize, Serialize};

/// Tools that modify files; `acceptEdits` auto-approves exactly these.
pub const FILE_EDIT_TOOLS: &[&str] = &["Edit", "Write", "MultiEdit", "NotebookEdit"];

#[must_use]
pub fn is_file_edit_tool(tool: &str) -> bool {
    FILE_EDIT_TOOLS.contains(&tool)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalPermissions {
    #[serde(default)]
    pub bypass_all: bool,
    #[serde(default)]
    pub default_mode: PermissionMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPermissions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<PermissionMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bypass_all: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub always_allow: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub always_deny: BTreeSet<String>,
}

/// The whole policy document, keyed by project path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionConfig {
    #[serde(default)]
    pub global: GlobalPermissions,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub projects: HashMap<String, ProjectPermissions>,
}

impl PermissionConfig {
    #[must_use]
    pub fn project(&self, project_path: &str) -> Option<&ProjectPermissions> {
        self.projects.get(project_path)
    }
}

/// One partial write to the policy store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum PermissionUpdate {
    SetGlobalDefaultMode { mode: PermissionMode },
    SetGlobalBypassAll { bypass_all: bool },
    SetProjectMode {
        project: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<PermissionMode>,
    },
    SetProjectBypassAll {
        project: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bypass_all: Option<bool>,
    },
    AddAlwaysAllow { project: String, tool: String },
    RemoveAlwaysAllow { project: String, tool: String },
    AddAlwaysDeny { project: String, tool: String },
    RemoveAlwaysDeny { project: String, tool: String },
}

impl PermissionUpdate {
    /// Apply the update to an in-memory document. The HTTP store sends the
    /// update to the server instead; this is what an in-process store (and
    /// the server) do with it.
    pub fn apply_to(&self, config: &mut PermissionConfig) {
        match self {
            Self::SetGlobalDefaultMode { mode } => config.global.default_mode = *mode,
            Self::SetGlobalBypassAll { bypass_all } => config.global.bypass_all = *bypass_all,
            Self::SetProjectMode { project, mode } => {
                config.projects.entry(project.clone()).or_default().permission_mode = *mode;
            }
            Self::SetProjectBypassAll {
                project,
                bypass_all,
            } => {
                config.projects.entry(project.clone()).or_default().bypass_all = *bypass_all;
            }
            Self::AddAlwaysAllow { project, tool } => {
                config
                    .projects
                    .entry(project.clone())
                    .or_default()
                    .always_allow
                    .insert(tool.clone());
            }
            Self::RemoveAlwaysAllow { project, tool } => {
                if let Some(entry) = config.projects.get_mut(project) {
                    entry.always_allow.remove(tool);
                }
            }
            Self::AddAlwaysDeny { project, tool } => {
                config
                    .projects
                    .entry(project.clone())
                    .or_default()
                    .always_deny
                    .insert(tool.clone());
            }
            Self::RemoveAlwaysDeny { project, tool } => {
                if let Some(entry) = config.projects.get_mut(project) {
                    entry.always_deny.remove(tool);
                }
            }
        }
    }
}
