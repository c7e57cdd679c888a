//! Permission policy resolution for the pocketagent bridge.
//!
//! Policy comes from three places: the active session, local per-project
//! preferences, and the server-held document. The engine merges them into a
//! single effective mode and per-tool auto-approval decision; writes go
//! through to the server and invalidate the local cache.

mod config;
mod engine;
mod overrides;
mod store;

pub use config::{
    FILE_EDIT_TOOLS, GlobalPermissions, PermissionConfig, PermissionUpdate, ProjectPermissions,
    is_file_edit_tool,
};
pub use engine::PermissionEngine;
pub use overrides::LocalOverrides;
pub use pocketagent_proto::PermissionMode;
pub use store::{HttpPolicyStore, MemoryPolicyStore, PolicyError, PolicyStore};
