use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::request::{RequestId, RequestStatus};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransitionId(pub String);

/// Append-only record of a request status change. `from_status` is empty for the creation row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTransition {
    pub id: TransitionId,
    pub request_id: RequestId,
    pub from_status: Option<RequestStatus>,
    pub to_status: RequestStatus,
    pub actor: String,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl RequestTransition {
    pub fn record(
        request_id: &RequestId,
        from_status: Option<RequestStatus>,
        to_status: RequestStatus,
        actor: impl Into<String>,
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransitionId(Uuid::new_v4().to_string()),
            request_id: request_id.clone(),
            from_status,
            to_status,
            actor: actor.into(),
            reason,
            occurred_at,
        }
    }
}
