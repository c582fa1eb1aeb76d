use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{QueryBuilder, Row, Sqlite};

use outlay_core::catalog::{Currency, Project, Source};
use outlay_core::domain::request::{
    FieldChange, Request, RequestId, RequestStatus, StatusEntry,
};
use outlay_core::domain::user::UserId;
use outlay_core::validate::Period;

use super::{
    NewRequest, RepositoryError, RequestPage, RequestQuery, RequestRepository, TransitionResult,
};
use crate::DbPool;

pub struct SqlRequestRepository {
    pool: DbPool,
}

impl SqlRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_history(&self, id: RequestId) -> Result<Vec<StatusEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT status, at, actor, reason FROM status_history
             WHERE request_id = ? ORDER BY seq ASC",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn load(&self, id: RequestId) -> Result<Option<Request>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, requester, project, amount, currency, source, note, partner_account,
                    document_ref, period, expense_date, status, created_at, updated_at
             FROM requests WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref row) => {
                let mut request = row_to_request(row)?;
                request.history = self.load_history(request.id).await?;
                Ok(Some(request))
            }
            None => Ok(None),
        }
    }
}

const DATE_FORMAT: &str = "%Y-%m-%d";

fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("timestamp `{raw}`: {e}")))
}

fn decode_date(raw: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| RepositoryError::Decode(format!("date `{raw}`: {e}")))
}

fn decode_status(raw: &str) -> Result<RequestStatus, RepositoryError> {
    RequestStatus::parse(raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown status `{raw}`")))
}

fn decode_amount(raw: &str) -> Result<Decimal, RepositoryError> {
    raw.parse::<Decimal>()
        .map_err(|e| RepositoryError::Decode(format!("amount `{raw}`: {e}")))
}

fn get_text(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<String, RepositoryError> {
    row.try_get::<String, _>(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> Result<Request, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let requester: i64 =
        row.try_get("requester").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let note: Option<String> =
        row.try_get("note").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let partner_account: Option<String> =
        row.try_get("partner_account").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let document_ref: Option<String> =
        row.try_get("document_ref").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let period: Option<String> =
        row.try_get("period").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let project = get_text(row, "project")?
        .parse::<Project>()
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let currency = get_text(row, "currency")?
        .parse::<Currency>()
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let source = get_text(row, "source")?
        .parse::<Source>()
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let period = period
        .map(|raw| Period::parse(&raw).map_err(|e| RepositoryError::Decode(e.to_string())))
        .transpose()?;

    Ok(Request {
        id: RequestId(id),
        requester: UserId(requester),
        project,
        amount: decode_amount(&get_text(row, "amount")?)?,
        currency,
        source,
        note,
        partner_account,
        document_ref,
        period,
        expense_date: decode_date(&get_text(row, "expense_date")?)?,
        status: decode_status(&get_text(row, "status")?)?,
        history: Vec::new(),
        created_at: decode_timestamp(&get_text(row, "created_at")?)?,
        updated_at: decode_timestamp(&get_text(row, "updated_at")?)?,
    })
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<StatusEntry, RepositoryError> {
    let actor: i64 = row.try_get("actor").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let reason: Option<String> =
        row.try_get("reason").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(StatusEntry {
        status: decode_status(&get_text(row, "status")?)?,
        at: decode_timestamp(&get_text(row, "at")?)?,
        actor: UserId(actor),
        reason,
    })
}

/// Append the visibility predicate: owned by `owner` OR funded from one
/// of `sources`. Callers guarantee at least one of the two is present.
fn push_visibility(
    builder: &mut QueryBuilder<'_, Sqlite>,
    owner: Option<UserId>,
    sources: &[Source],
) {
    builder.push("(");
    if let Some(owner) = owner {
        builder.push("requester = ").push_bind(owner.0);
        if !sources.is_empty() {
            builder.push(" OR ");
        }
    }
    if !sources.is_empty() {
        builder.push("source IN (");
        let mut separated = builder.separated(", ");
        for source in sources {
            separated.push_bind(source.as_str());
        }
        builder.push(")");
    }
    builder.push(")");
}

#[async_trait::async_trait]
impl RequestRepository for SqlRequestRepository {
    async fn create(&self, new: NewRequest) -> Result<Request, RepositoryError> {
        let status = RequestStatus::Pending;
        let result = sqlx::query(
            "INSERT INTO requests (requester, project, amount, currency, source, note,
                                   partner_account, document_ref, period, expense_date,
                                   status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(new.requester.0)
        .bind(new.project.as_str())
        .bind(new.amount.to_string())
        .bind(new.currency.as_str())
        .bind(new.source.as_str())
        .bind(&new.note)
        .bind(&new.partner_account)
        .bind(&new.document_ref)
        .bind(new.period.map(|p| p.to_string()))
        .bind(new.expense_date.format(DATE_FORMAT).to_string())
        .bind(status.as_str())
        .bind(new.created_at.to_rfc3339())
        .bind(new.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(Request {
            id: RequestId(result.last_insert_rowid()),
            requester: new.requester,
            project: new.project,
            amount: new.amount,
            currency: new.currency,
            source: new.source,
            note: new.note,
            partner_account: new.partner_account,
            document_ref: new.document_ref,
            period: new.period,
            expense_date: new.expense_date,
            status,
            history: Vec::new(),
            created_at: new.created_at,
            updated_at: new.created_at,
        })
    }

    async fn find_by_id(&self, id: RequestId) -> Result<Option<Request>, RepositoryError> {
        self.load(id).await
    }

    async fn transition(
        &self,
        id: RequestId,
        expected: RequestStatus,
        entry: StatusEntry,
    ) -> Result<TransitionResult, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE requests SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(entry.status.as_str())
        .bind(entry.at.to_rfc3339())
        .bind(id.0)
        .bind(expected.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            // Lost the race or the id is gone; report which.
            let found = sqlx::query("SELECT status FROM requests WHERE id = ?")
                .bind(id.0)
                .fetch_optional(&mut *tx)
                .await?;
            tx.rollback().await?;
            return match found {
                Some(ref row) => Ok(TransitionResult::Conflict(decode_status(&get_text(
                    row, "status",
                )?)?)),
                None => Ok(TransitionResult::NotFound),
            };
        }

        sqlx::query(
            "INSERT INTO status_history (request_id, seq, status, at, actor, reason)
             VALUES (?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM status_history WHERE request_id = ?),
                     ?, ?, ?, ?)",
        )
        .bind(id.0)
        .bind(id.0)
        .bind(entry.status.as_str())
        .bind(entry.at.to_rfc3339())
        .bind(entry.actor.0)
        .bind(&entry.reason)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let request = self
            .load(id)
            .await?
            .ok_or_else(|| RepositoryError::Decode("request row missing after transition".into()))?;
        Ok(TransitionResult::Applied(request))
    }

    async fn update_field(
        &self,
        id: RequestId,
        change: &FieldChange,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<Request>, RepositoryError> {
        let (column, value): (&str, String) = match change {
            FieldChange::Project(value) => ("project", value.as_str().to_string()),
            FieldChange::Amount(value) => ("amount", value.to_string()),
            FieldChange::Currency(value) => ("currency", value.as_str().to_string()),
            FieldChange::Source(value) => ("source", value.as_str().to_string()),
            FieldChange::Note(value) => ("note", value.clone()),
            FieldChange::PartnerAccount(value) => ("partner_account", value.clone()),
            FieldChange::DocumentRef(value) => ("document_ref", value.clone()),
            FieldChange::Period(value) => ("period", value.to_string()),
            FieldChange::ExpenseDate(value) => {
                ("expense_date", value.format(DATE_FORMAT).to_string())
            }
        };

        // Column names come from the FieldChange enum, never from input.
        let statement = format!("UPDATE requests SET {column} = ?, updated_at = ? WHERE id = ?");
        let updated = sqlx::query(&statement)
            .bind(value)
            .bind(updated_at.to_rfc3339())
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        self.load(id).await
    }

    async fn list_visible(&self, query: RequestQuery) -> Result<RequestPage, RepositoryError> {
        let sources = query.visible_sources.clone().unwrap_or_default();
        if query.owner.is_none() && sources.is_empty() {
            return Ok(RequestPage::default());
        }

        let mut count_builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM requests WHERE ");
        push_visibility(&mut count_builder, query.owner, &sources);
        if let Some(status) = query.status {
            count_builder.push(" AND status = ").push_bind(status.as_str());
        }
        let total: i64 = count_builder.build_query_scalar().fetch_one(&self.pool).await?;

        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "SELECT id, requester, project, amount, currency, source, note, partner_account,
                    document_ref, period, expense_date, status, created_at, updated_at
             FROM requests WHERE ",
        );
        push_visibility(&mut builder, query.owner, &sources);
        if let Some(status) = query.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        builder.push(" ORDER BY created_at DESC, id DESC");
        builder.push(" LIMIT ").push_bind(i64::from(query.page_size));
        builder.push(" OFFSET ").push_bind(i64::from(query.page) * i64::from(query.page_size));

        let rows = builder.build().fetch_all(&self.pool).await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut request = row_to_request(row)?;
            request.history = self.load_history(request.id).await?;
            items.push(request);
        }

        Ok(RequestPage { items, total: total as u64 })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use outlay_core::catalog::{Currency, Project, Source};
    use outlay_core::domain::request::{FieldChange, RequestId, RequestStatus, StatusEntry};
    use outlay_core::domain::user::UserId;

    use super::SqlRequestRepository;
    use crate::repositories::{
        NewRequest, RequestQuery, RequestRepository, SqlUserRepository, TransitionResult,
        UserRepository,
    };
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    async fn insert_user(pool: &sqlx::SqlitePool, id: i64) {
        let users = SqlUserRepository::new(pool.clone());
        users.get_or_create(UserId(id), &format!("user-{id}")).await.expect("insert user");
    }

    fn new_request(requester: i64, source: Source) -> NewRequest {
        NewRequest {
            requester: UserId(requester),
            project: Project::MfRf,
            amount: Decimal::new(12_345, 2),
            currency: Currency::Rub,
            source,
            note: Some("ad spend".to_string()),
            partner_account: None,
            document_ref: None,
            period: None,
            expense_date: NaiveDate::from_ymd_opt(2030, 6, 1).expect("valid date"),
            created_at: Utc::now(),
        }
    }

    fn entry(status: RequestStatus, actor: i64, reason: Option<&str>) -> StatusEntry {
        StatusEntry {
            status,
            at: Utc::now(),
            actor: UserId(actor),
            reason: reason.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn create_then_load_round_trips_pending_with_empty_history() {
        let pool = setup().await;
        insert_user(&pool, 100).await;

        let repo = SqlRequestRepository::new(pool);
        let created = repo.create(new_request(100, Source::RsRf)).await.expect("create");
        assert_eq!(created.status, RequestStatus::Pending);

        let loaded = repo.find_by_id(created.id).await.expect("find").expect("exists");
        assert_eq!(loaded.amount, Decimal::new(12_345, 2));
        assert_eq!(loaded.note.as_deref(), Some("ad spend"));
        assert!(loaded.history.is_empty());
        assert!(loaded.history_consistent());
    }

    #[tokio::test]
    async fn transition_appends_history_and_flips_status() {
        let pool = setup().await;
        insert_user(&pool, 100).await;

        let repo = SqlRequestRepository::new(pool);
        let created = repo.create(new_request(100, Source::RsRf)).await.expect("create");

        let result = repo
            .transition(created.id, RequestStatus::Pending, entry(RequestStatus::Waiting, 1, None))
            .await
            .expect("transition");
        let request = match result {
            TransitionResult::Applied(request) => request,
            other => panic!("expected Applied, got {other:?}"),
        };
        assert_eq!(request.status, RequestStatus::Waiting);
        assert_eq!(request.history.len(), 1);
        assert!(request.history_consistent());

        let result = repo
            .transition(created.id, RequestStatus::Waiting, entry(RequestStatus::Paid, 1, None))
            .await
            .expect("transition");
        let request = match result {
            TransitionResult::Applied(request) => request,
            other => panic!("expected Applied, got {other:?}"),
        };
        assert_eq!(request.status, RequestStatus::Paid);
        assert_eq!(request.history.len(), 2);
    }

    #[tokio::test]
    async fn stale_transition_reports_conflict_and_changes_nothing() {
        let pool = setup().await;
        insert_user(&pool, 100).await;

        let repo = SqlRequestRepository::new(pool);
        let created = repo.create(new_request(100, Source::RsRf)).await.expect("create");
        repo.transition(created.id, RequestStatus::Pending, entry(RequestStatus::Waiting, 1, None))
            .await
            .expect("first transition");

        // A second actor still believes the request is pending.
        let result = repo
            .transition(
                created.id,
                RequestStatus::Pending,
                entry(RequestStatus::Rejected, 2, Some("duplicate")),
            )
            .await
            .expect("stale transition");
        assert!(matches!(result, TransitionResult::Conflict(RequestStatus::Waiting)));

        let loaded = repo.find_by_id(created.id).await.expect("find").expect("exists");
        assert_eq!(loaded.status, RequestStatus::Waiting);
        assert_eq!(loaded.history.len(), 1);
    }

    #[tokio::test]
    async fn transition_on_missing_id_reports_not_found() {
        let pool = setup().await;
        let repo = SqlRequestRepository::new(pool);
        let result = repo
            .transition(RequestId(999), RequestStatus::Pending, entry(RequestStatus::Waiting, 1, None))
            .await
            .expect("transition");
        assert!(matches!(result, TransitionResult::NotFound));
    }

    #[tokio::test]
    async fn update_field_changes_the_field_but_not_the_history() {
        let pool = setup().await;
        insert_user(&pool, 100).await;

        let repo = SqlRequestRepository::new(pool);
        let created = repo.create(new_request(100, Source::RsRf)).await.expect("create");

        let updated = repo
            .update_field(created.id, &FieldChange::Amount(Decimal::new(999, 0)), Utc::now())
            .await
            .expect("update")
            .expect("exists");
        assert_eq!(updated.amount, Decimal::new(999, 0));
        assert_eq!(updated.status, RequestStatus::Pending);
        assert!(updated.history.is_empty());
        assert!(updated.updated_at >= created.updated_at);
    }

    #[tokio::test]
    async fn list_visible_unions_ownership_and_sources() {
        let pool = setup().await;
        insert_user(&pool, 100).await;
        insert_user(&pool, 200).await;

        let repo = SqlRequestRepository::new(pool);
        repo.create(new_request(100, Source::RsRf)).await.expect("own request");
        repo.create(new_request(200, Source::Cash)).await.expect("cash request");
        repo.create(new_request(200, Source::Crypto)).await.expect("crypto request");

        // Owner only: sees exactly their own request.
        let page = repo
            .list_visible(RequestQuery {
                owner: Some(UserId(100)),
                visible_sources: None,
                status: None,
                page: 0,
                page_size: 10,
            })
            .await
            .expect("list owned");
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].requester, UserId(100));

        // Owner plus a visible source: union of both.
        let page = repo
            .list_visible(RequestQuery {
                owner: Some(UserId(100)),
                visible_sources: Some(vec![Source::Cash]),
                status: None,
                page: 0,
                page_size: 10,
            })
            .await
            .expect("list union");
        assert_eq!(page.total, 2);

        // No owner and no sources matches nothing.
        let page = repo
            .list_visible(RequestQuery::default())
            .await
            .expect("list nothing");
        assert_eq!(page.total, 0);
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn list_visible_filters_by_status_and_paginates_newest_first() {
        let pool = setup().await;
        insert_user(&pool, 100).await;

        let repo = SqlRequestRepository::new(pool);
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(repo.create(new_request(100, Source::RsRf)).await.expect("create").id);
        }
        repo.transition(ids[0], RequestStatus::Pending, entry(RequestStatus::Waiting, 1, None))
            .await
            .expect("approve first");

        let pending = repo
            .list_visible(RequestQuery {
                owner: Some(UserId(100)),
                visible_sources: None,
                status: Some(RequestStatus::Pending),
                page: 0,
                page_size: 10,
            })
            .await
            .expect("list pending");
        assert_eq!(pending.total, 2);

        let first_page = repo
            .list_visible(RequestQuery {
                owner: Some(UserId(100)),
                visible_sources: None,
                status: None,
                page: 0,
                page_size: 2,
            })
            .await
            .expect("first page");
        assert_eq!(first_page.total, 3);
        assert_eq!(first_page.items.len(), 2);
        // Newest first: the last created id leads.
        assert_eq!(first_page.items[0].id, ids[2]);

        let second_page = repo
            .list_visible(RequestQuery {
                owner: Some(UserId(100)),
                visible_sources: None,
                status: None,
                page: 1,
                page_size: 2,
            })
            .await
            .expect("second page");
        assert_eq!(second_page.items.len(), 1);
    }
}
