//! Queue entry shape.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How long a queued decision stays deliverable, in seconds. The server
/// abandons the underlying request well before this, so expiry is a silent
/// drop.
pub const ACTION_TTL_SECONDS: i64 = 120;

/// One user decision recorded while offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
    pub id: Uuid,
    pub request_id: String,
    pub approved: bool,
    pub timestamp: DateTime<Utc>,
}

impl PendingAction {
    #[must_use]
    pub fn new(request_id: impl Into<String>, approved: bool, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id: request_id.into(),
            approved,
            timestamp,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.timestamp) > Duration::seconds(ACTION_TTL_SECONDS)
    }
}
