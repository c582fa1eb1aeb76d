//! Append-only audit trail of lifecycle activity.
//!
//! Every creation, status change, comment, and denied attempt produces
//! one event. The core only defines the event shape; sinks live in the
//! storage layer and nothing in the core ever reads events back.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::request::RequestId;
use crate::domain::user::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Denied,
    Failed,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Denied => "denied",
            AuditOutcome::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub request_id: Option<RequestId>,
    pub actor: UserId,
    pub action: String,
    pub outcome: AuditOutcome,
    pub payload: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        request_id: Option<RequestId>,
        actor: UserId,
        action: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            request_id,
            actor,
            action: action.into(),
            outcome,
            payload: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::request::RequestId;
    use crate::domain::user::UserId;

    use super::{AuditEvent, AuditOutcome};

    #[test]
    fn events_carry_identity_and_payload() {
        let event = AuditEvent::new(
            Some(RequestId(7)),
            UserId(42),
            "request.approved",
            AuditOutcome::Success,
        )
        .with_payload("from", "pending")
        .with_payload("to", "waiting");

        assert_eq!(event.request_id, Some(RequestId(7)));
        assert_eq!(event.payload.get("from").map(String::as_str), Some("pending"));
        assert!(!event.event_id.is_empty());
    }
}
