//! Glue between the offline action queue and the live connection.

use async_trait::async_trait;
use pocketagent_proto::ClientMessage;
use pocketagent_queue::{Connectivity, DecisionSink, QueueError};

use crate::bridge::BridgeClient;
use crate::state::ConnectionState;

/// Delivers queued permission decisions through the bridge connection.
pub struct BridgeDecisionSink {
    client: BridgeClient,
}

impl BridgeDecisionSink {
    #[must_use]
    pub fn new(client: BridgeClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DecisionSink for BridgeDecisionSink {
    async fn dispatch(&self, request_id: &str, approved: bool) -> Result<(), QueueError> {
        self.client
            .send(ClientMessage::PermissionResponse {
                request_id: request_id.to_string(),
                approved,
                always_allow: None,
            })
            .await
            .map_err(|err| QueueError::Dispatch {
                message: err.to_string(),
            })
    }
}

impl Connectivity for BridgeClient {
    fn is_connected(&self) -> bool {
        matches!(self.current_state(), ConnectionState::Connected { .. })
    }
}
