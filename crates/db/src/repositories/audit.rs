use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::Row;

use outlay_core::audit::{AuditEvent, AuditOutcome};
use outlay_core::domain::request::RequestId;
use outlay_core::domain::user::UserId;

use super::{AuditLogRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAuditLog {
    pool: DbPool,
}

impl SqlAuditLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode_outcome(raw: &str) -> Result<AuditOutcome, RepositoryError> {
    match raw {
        "success" => Ok(AuditOutcome::Success),
        "denied" => Ok(AuditOutcome::Denied),
        "failed" => Ok(AuditOutcome::Failed),
        other => Err(RepositoryError::Decode(format!("unknown outcome `{other}`"))),
    }
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<AuditEvent, RepositoryError> {
    let event_id: String =
        row.try_get("event_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let request_id: Option<i64> =
        row.try_get("request_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let actor: i64 = row.try_get("actor").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let action: String =
        row.try_get("action").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let outcome: String =
        row.try_get("outcome").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let payload: String =
        row.try_get("payload").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let occurred_at: String =
        row.try_get("occurred_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let payload: BTreeMap<String, String> = serde_json::from_str(&payload)
        .map_err(|e| RepositoryError::Decode(format!("payload: {e}")))?;
    let occurred_at = DateTime::parse_from_rfc3339(&occurred_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("timestamp `{occurred_at}`: {e}")))?;

    Ok(AuditEvent {
        event_id,
        request_id: request_id.map(RequestId),
        actor: UserId(actor),
        action,
        outcome: decode_outcome(&outcome)?,
        payload,
        occurred_at,
    })
}

#[async_trait::async_trait]
impl AuditLogRepository for SqlAuditLog {
    async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        let payload = serde_json::to_string(&event.payload)
            .map_err(|e| RepositoryError::Decode(format!("payload: {e}")))?;

        sqlx::query(
            "INSERT INTO audit_log (event_id, request_id, actor, action, outcome, payload, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.event_id)
        .bind(event.request_id.map(|id| id.0))
        .bind(event.actor.0)
        .bind(&event.action)
        .bind(event.outcome.as_str())
        .bind(payload)
        .bind(event.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent(&self, limit: u32) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT event_id, request_id, actor, action, outcome, payload, occurred_at
             FROM audit_log ORDER BY occurred_at DESC, event_id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }
}

#[cfg(test)]
mod tests {
    use outlay_core::audit::{AuditEvent, AuditOutcome};
    use outlay_core::domain::request::RequestId;
    use outlay_core::domain::user::UserId;

    use super::SqlAuditLog;
    use crate::repositories::AuditLogRepository;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn append_then_recent_round_trips_the_event() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let log = SqlAuditLog::new(pool);
        let event = AuditEvent::new(
            Some(RequestId(3)),
            UserId(9),
            "request.rejected",
            AuditOutcome::Success,
        )
        .with_payload("reason", "duplicate invoice");
        log.append(&event).await.expect("append");

        let recent = log.recent(10).await.expect("recent");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0], event);
    }

    #[tokio::test]
    async fn recent_honors_the_limit_newest_first() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let log = SqlAuditLog::new(pool);
        for i in 0..5 {
            let event = AuditEvent::new(None, UserId(1), format!("probe.{i}"), AuditOutcome::Success);
            log.append(&event).await.expect("append");
        }

        let recent = log.recent(2).await.expect("recent");
        assert_eq!(recent.len(), 2);
    }
}
