//! In-memory repositories. Behaviorally equivalent to the SQL variants
//! so the lifecycle service can be tested without a database file.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use outlay_core::audit::AuditEvent;
use outlay_core::domain::comment::{Comment, CommentId};
use outlay_core::domain::request::{
    FieldChange, Request, RequestId, RequestStatus, StatusEntry,
};
use outlay_core::domain::user::{User, UserId};

use super::{
    AuditLogRepository, CommentRepository, NewComment, NewRequest, RepositoryError, RequestPage,
    RequestQuery, RequestRepository, TransitionResult, UserRepository,
};

#[derive(Default)]
pub struct InMemoryRequestRepository {
    inner: Mutex<RequestStore>,
}

#[derive(Default)]
struct RequestStore {
    next_id: i64,
    requests: Vec<Request>,
}

impl InMemoryRequestRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RequestRepository for InMemoryRequestRepository {
    async fn create(&self, new: NewRequest) -> Result<Request, RepositoryError> {
        let mut store = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        store.next_id += 1;
        let request = Request {
            id: RequestId(store.next_id),
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
            status: RequestStatus::Pending,
            history: Vec::new(),
            created_at: new.created_at,
            updated_at: new.created_at,
        };
        store.requests.push(request.clone());
        Ok(request)
    }

    async fn find_by_id(&self, id: RequestId) -> Result<Option<Request>, RepositoryError> {
        let store = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(store.requests.iter().find(|r| r.id == id).cloned())
    }

    async fn transition(
        &self,
        id: RequestId,
        expected: RequestStatus,
        entry: StatusEntry,
    ) -> Result<TransitionResult, RepositoryError> {
        let mut store = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(request) = store.requests.iter_mut().find(|r| r.id == id) else {
            return Ok(TransitionResult::NotFound);
        };
        if request.status != expected {
            return Ok(TransitionResult::Conflict(request.status));
        }
        request.status = entry.status;
        request.updated_at = entry.at;
        request.history.push(entry);
        Ok(TransitionResult::Applied(request.clone()))
    }

    async fn update_field(
        &self,
        id: RequestId,
        change: &FieldChange,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<Request>, RepositoryError> {
        let mut store = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(request) = store.requests.iter_mut().find(|r| r.id == id) else {
            return Ok(None);
        };
        change.apply(request);
        request.updated_at = updated_at;
        Ok(Some(request.clone()))
    }

    async fn list_visible(&self, query: RequestQuery) -> Result<RequestPage, RepositoryError> {
        let store = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let sources = query.visible_sources.unwrap_or_default();
        if query.owner.is_none() && sources.is_empty() {
            return Ok(RequestPage::default());
        }

        let mut matched: Vec<Request> = store
            .requests
            .iter()
            .filter(|r| {
                let owned = query.owner.is_some_and(|owner| r.requester == owner);
                let sourced = sources.contains(&r.source);
                (owned || sourced)
                    && query.status.map_or(true, |status| r.status == status)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.0.cmp(&a.id.0)));

        let total = matched.len() as u64;
        let start = (query.page as usize).saturating_mul(query.page_size as usize);
        let items = matched
            .into_iter()
            .skip(start)
            .take(query.page_size as usize)
            .collect();
        Ok(RequestPage { items, total })
    }
}

#[derive(Default)]
pub struct InMemoryUserRepository {
    inner: Mutex<HashMap<i64, User>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn get_or_create(&self, id: UserId, handle: &str) -> Result<User, RepositoryError> {
        let mut users = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let user = users
            .entry(id.0)
            .and_modify(|u| u.handle = handle.to_string())
            .or_insert_with(|| User { id, handle: handle.to_string(), created_at: Utc::now() });
        Ok(user.clone())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let users = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(users.get(&id.0).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryCommentRepository {
    inner: Mutex<CommentStore>,
}

#[derive(Default)]
struct CommentStore {
    next_id: i64,
    comments: Vec<Comment>,
}

impl InMemoryCommentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CommentRepository for InMemoryCommentRepository {
    async fn append(&self, new: NewComment) -> Result<Comment, RepositoryError> {
        let mut store = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        store.next_id += 1;
        let comment = Comment {
            id: CommentId(store.next_id),
            request_id: new.request_id,
            author: new.author,
            body: new.body,
            created_at: new.created_at,
        };
        store.comments.push(comment.clone());
        Ok(comment)
    }

    async fn list_for_request(&self, id: RequestId) -> Result<Vec<Comment>, RepositoryError> {
        let store = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(store.comments.iter().filter(|c| c.request_id == id).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryAuditLog {
    inner: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: snapshot of everything recorded so far, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }
}

#[async_trait::async_trait]
impl AuditLogRepository for InMemoryAuditLog {
    async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(event.clone());
        Ok(())
    }

    async fn recent(&self, limit: u32) -> Result<Vec<AuditEvent>, RepositoryError> {
        let events = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(events.iter().rev().take(limit as usize).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use outlay_core::catalog::{Currency, Project, Source};
    use outlay_core::domain::request::{RequestStatus, StatusEntry};
    use outlay_core::domain::user::UserId;

    use super::InMemoryRequestRepository;
    use crate::repositories::{NewRequest, RequestRepository, TransitionResult};

    fn new_request(requester: i64) -> NewRequest {
        NewRequest {
            requester: UserId(requester),
            project: Project::MfKz,
            amount: Decimal::new(50, 0),
            currency: Currency::Kzt,
            source: Source::RsTooKz,
            note: None,
            partner_account: None,
            document_ref: None,
            period: None,
            expense_date: NaiveDate::from_ymd_opt(2030, 3, 1).expect("date"),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn cas_semantics_match_the_sql_store() {
        let repo = InMemoryRequestRepository::new();
        let created = repo.create(new_request(1)).await.expect("create");

        let entry = StatusEntry {
            status: RequestStatus::Waiting,
            at: Utc::now(),
            actor: UserId(2),
            reason: None,
        };
        let applied = repo
            .transition(created.id, RequestStatus::Pending, entry.clone())
            .await
            .expect("transition");
        assert!(matches!(applied, TransitionResult::Applied(_)));

        let stale = repo
            .transition(created.id, RequestStatus::Pending, entry)
            .await
            .expect("stale");
        assert!(matches!(stale, TransitionResult::Conflict(RequestStatus::Waiting)));
    }
}
