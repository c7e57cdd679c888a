//! Client- and server-originated message variants.

use serde::{Deserialize, Serialize};

use crate::value::DynamicValue;

/// Effective permission mode, transmitted verbatim on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    BypassPermissions,
}

impl PermissionMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::BypassPermissions => "bypassPermissions",
        }
    }
}

/// Image payload attached to user input. Exactly one representation is
/// encoded per attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ImageAttachment {
    Base64 { data: String, mime_type: String },
    Reference { id: String },
}

/// Messages the client sends to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Start {
        project_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        permission_mode: Option<PermissionMode>,
    },
    Input {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        images: Option<Vec<ImageAttachment>>,
    },
    PermissionResponse {
        request_id: String,
        approved: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        always_allow: Option<bool>,
    },
    QuestionResponse {
        request_id: String,
        answer: String,
    },
    Interrupt,
    Stop,
    SubscribeSessions,
    SetModel {
        model: String,
    },
    SetPermissionMode {
        mode: PermissionMode,
    },
    CancelQueued {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
    Retry,
    Ping,
}

/// Second-level variants nested inside a `stream` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StreamContent {
    Assistant {
        content: String,
    },
    User {
        content: String,
    },
    System {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subtype: Option<String>,
    },
    Thinking {
        content: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: DynamicValue,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    Progress {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_use_id: Option<String>,
        data: DynamicValue,
    },
    Usage(Usage),
    State {
        state: String,
    },
    SubagentStart {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    SubagentComplete {
        id: String,
    },
    Question {
        request_id: String,
        question: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        options: Option<Vec<String>>,
    },
    Permission {
        request_id: String,
        tool_name: String,
        input: DynamicValue,
    },
}

/// Token accounting reported by the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
}

/// Session lifecycle notifications carried by `session_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionLifecycle {
    Started,
    Resumed,
    Completed,
    Failed,
}

/// Messages the bridge sends to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Connected {
        agent_id: String,
    },
    Stream {
        message: StreamContent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    SessionEvent {
        session_id: String,
        event: SessionLifecycle,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    History {
        messages: Vec<StreamContent>,
    },
    ModelChanged {
        model: String,
    },
    PermissionModeChanged {
        mode: PermissionMode,
    },
    Queued {
        message_id: String,
    },
    QueueCleared,
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recoverable: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after_seconds: Option<u64>,
    },
    Pong,
    Stopped,
    Interrupted,
}
