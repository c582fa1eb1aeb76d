//! Repository traits and their SQL / in-memory implementations.
//!
//! The lifecycle service only ever sees these traits. The SQL variants
//! back the real deployment; the in-memory variants exist for service
//! tests and the seed tooling.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use outlay_core::audit::AuditEvent;
use outlay_core::catalog::{Currency, Project, Source};
use outlay_core::domain::comment::Comment;
use outlay_core::domain::request::{
    FieldChange, Request, RequestId, RequestStatus, StatusEntry,
};
use outlay_core::domain::user::{User, UserId};
use outlay_core::validate::Period;

pub mod audit;
pub mod comment;
pub mod memory;
pub mod request;
pub mod user;

pub use audit::SqlAuditLog;
pub use comment::SqlCommentRepository;
pub use memory::{
    InMemoryAuditLog, InMemoryCommentRepository, InMemoryRequestRepository, InMemoryUserRepository,
};
pub use request::SqlRequestRepository;
pub use user::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Insert payload for a new request. The store assigns the id; status is
/// always Pending and the history starts empty.
#[derive(Clone, Debug)]
pub struct NewRequest {
    pub requester: UserId,
    pub project: Project,
    pub amount: Decimal,
    pub currency: Currency,
    pub source: Source,
    pub note: Option<String>,
    pub partner_account: Option<String>,
    pub document_ref: Option<String>,
    pub period: Option<Period>,
    pub expense_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// Visibility-shaped listing query. A request matches when it is owned
/// by `owner` OR funded from one of `visible_sources`; with both unset
/// nothing matches. `status` narrows the result further.
#[derive(Clone, Debug, Default)]
pub struct RequestQuery {
    pub owner: Option<UserId>,
    pub visible_sources: Option<Vec<Source>>,
    pub status: Option<RequestStatus>,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Clone, Debug, Default)]
pub struct RequestPage {
    pub items: Vec<Request>,
    pub total: u64,
}

/// Outcome of a compare-and-set status transition.
#[derive(Clone, Debug)]
pub enum TransitionResult {
    /// The transition was applied; the returned request reflects it.
    Applied(Request),
    /// Another actor changed the status first; carries what was found.
    Conflict(RequestStatus),
    NotFound,
}

#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn create(&self, new: NewRequest) -> Result<Request, RepositoryError>;

    async fn find_by_id(&self, id: RequestId) -> Result<Option<Request>, RepositoryError>;

    /// Append a history entry and move the status, but only if the stored
    /// status still equals `expected`. Runs as one transaction so two
    /// concurrent actors cannot both win.
    async fn transition(
        &self,
        id: RequestId,
        expected: RequestStatus,
        entry: StatusEntry,
    ) -> Result<TransitionResult, RepositoryError>;

    /// Apply one validated field change and refresh `updated_at`. Status
    /// and history are never touched here.
    async fn update_field(
        &self,
        id: RequestId,
        change: &FieldChange,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<Request>, RepositoryError>;

    async fn list_visible(&self, query: RequestQuery) -> Result<RequestPage, RepositoryError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_or_create(&self, id: UserId, handle: &str) -> Result<User, RepositoryError>;
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
}

#[derive(Clone, Debug)]
pub struct NewComment {
    pub request_id: RequestId,
    pub author: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait CommentRepository: Send + Sync {
    async fn append(&self, new: NewComment) -> Result<Comment, RepositoryError>;
    async fn list_for_request(&self, id: RequestId) -> Result<Vec<Comment>, RepositoryError>;
}

#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError>;
    /// Most recent events, newest first. Used by operator tooling only.
    async fn recent(&self, limit: u32) -> Result<Vec<AuditEvent>, RepositoryError>;
}
