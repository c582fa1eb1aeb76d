//! The lifecycle service. Every mutation follows the same shape: load,
//! authorize, validate, apply through the store, audit.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

use outlay_core::audit::{AuditEvent, AuditOutcome};
use outlay_core::config::LimitsConfig;
use outlay_core::domain::comment::Comment;
use outlay_core::domain::request::{
    Request, RequestField, RequestId, RequestStatus, StatusEntry,
};
use outlay_core::domain::user::UserId;
use outlay_core::errors::DomainError;
use outlay_core::permissions::{AccessPolicy, Action};
use outlay_core::validate;
use outlay_db::repositories::{
    AuditLogRepository, CommentRepository, NewComment, NewRequest, RequestPage, RequestQuery,
    RequestRepository, TransitionResult, UserRepository,
};

use crate::errors::ServiceError;

/// Raw submission as it arrives from the outer surface. Everything is a
/// string; the service owns all validation.
#[derive(Clone, Debug)]
pub struct Draft {
    pub requester: UserId,
    pub requester_handle: String,
    pub project: String,
    pub amount: String,
    pub currency: String,
    pub source: String,
    pub note: Option<String>,
    pub partner_account: Option<String>,
    pub document_ref: Option<String>,
    pub period: Option<String>,
    pub expense_date: String,
}

pub struct RequestService {
    policy: AccessPolicy,
    amount_ceiling: Decimal,
    page_size: u32,
    requests: Arc<dyn RequestRepository>,
    users: Arc<dyn UserRepository>,
    comments: Arc<dyn CommentRepository>,
    audit: Arc<dyn AuditLogRepository>,
}

impl RequestService {
    pub fn new(
        policy: AccessPolicy,
        limits: &LimitsConfig,
        requests: Arc<dyn RequestRepository>,
        users: Arc<dyn UserRepository>,
        comments: Arc<dyn CommentRepository>,
        audit: Arc<dyn AuditLogRepository>,
    ) -> Self {
        Self {
            policy,
            amount_ceiling: limits.amount_ceiling(),
            page_size: limits.page_size,
            requests,
            users,
            comments,
            audit,
        }
    }

    /// Audit writes must not be lost silently, but a failed write should
    /// not also fail the action it describes.
    async fn record(&self, event: AuditEvent) {
        if let Err(error) = self.audit.append(&event).await {
            warn!(%error, action = %event.action, "audit write failed");
        }
    }

    async fn deny(&self, actor: UserId, action: Action, id: Option<RequestId>) -> ServiceError {
        self.record(AuditEvent::new(id, actor, format!("request.{action}"), AuditOutcome::Denied))
            .await;
        ServiceError::Forbidden { actor, action }
    }

    async fn load(&self, id: RequestId) -> Result<Request, ServiceError> {
        let request = self
            .requests
            .find_by_id(id)
            .await?
            .ok_or(ServiceError::NotFound(id))?;
        if !request.history_consistent() {
            return Err(DomainError::InvariantViolation(format!(
                "request {id} status does not match its history"
            ))
            .into());
        }
        Ok(request)
    }

    /// Whether `actor` may see this request at all: their own, or one
    /// funded from a source they are scoped to.
    fn can_see(&self, actor: UserId, request: &Request) -> bool {
        request.requester == actor
            || (self.policy.can_view_all(actor)
                && self
                    .policy
                    .can_access_source(actor, request.source, Some(request.project)))
    }

    pub async fn create(&self, draft: Draft) -> Result<Request, ServiceError> {
        let actor = draft.requester;
        if !self.policy.can_perform(actor, Action::Create) {
            return Err(self.deny(actor, Action::Create, None).await);
        }

        let today = Utc::now().date_naive();
        let project = draft.project.parse()?;
        let amount = validate::amount(&draft.amount, self.amount_ceiling)?;
        let currency = draft.currency.parse()?;
        let source = draft.source.parse()?;
        let note = draft.note.as_deref().map(validate::note).transpose()?;
        let partner_account =
            draft.partner_account.as_deref().map(validate::partner_account).transpose()?;
        let document_ref =
            draft.document_ref.as_deref().map(validate::document_ref).transpose()?;
        let period = draft.period.as_deref().map(validate::Period::parse).transpose()?;
        let expense_date = validate::expense_date(&draft.expense_date, today)?;

        self.users.get_or_create(actor, &draft.requester_handle).await?;
        let request = self
            .requests
            .create(NewRequest {
                requester: actor,
                project,
                amount,
                currency,
                source,
                note,
                partner_account,
                document_ref,
                period,
                expense_date,
                created_at: Utc::now(),
            })
            .await?;

        info!(request_id = %request.id, requester = %actor, source = %source, "request created");
        self.record(
            AuditEvent::new(Some(request.id), actor, "request.created", AuditOutcome::Success)
                .with_payload("amount", request.amount.to_string())
                .with_payload("currency", request.currency.as_str())
                .with_payload("source", request.source.as_str()),
        )
        .await;
        Ok(request)
    }

    /// First approval moves Pending to Waiting, second moves Waiting to
    /// Paid. A stale caller loses the compare-and-set race and gets an
    /// invalid-transition error carrying the status that was found.
    pub async fn approve(&self, actor: UserId, id: RequestId) -> Result<Request, ServiceError> {
        let request = self.load(id).await?;
        if !self.policy.can_perform(actor, Action::Approve)
            || !self
                .policy
                .can_access_source(actor, request.source, Some(request.project))
        {
            return Err(self.deny(actor, Action::Approve, Some(id)).await);
        }

        let from = request.status;
        let next = request.next_on_approve()?;
        let entry = StatusEntry { status: next, at: Utc::now(), actor, reason: None };
        let request = self.apply_transition(actor, id, from, entry, Action::Approve).await?;

        info!(request_id = %id, actor = %actor, from = %from, to = %request.status, "request approved");
        self.record(
            AuditEvent::new(Some(id), actor, "request.approved", AuditOutcome::Success)
                .with_payload("from", from.as_str())
                .with_payload("to", request.status.as_str()),
        )
        .await;
        Ok(request)
    }

    /// Rejection is final and requires a reason. Only pending requests
    /// may be rejected.
    pub async fn reject(
        &self,
        actor: UserId,
        id: RequestId,
        reason: &str,
    ) -> Result<Request, ServiceError> {
        let request = self.load(id).await?;
        if !self.policy.can_perform(actor, Action::Reject)
            || !self
                .policy
                .can_access_source(actor, request.source, Some(request.project))
        {
            return Err(self.deny(actor, Action::Reject, Some(id)).await);
        }

        let reason = validate::rejection_reason(reason)?;
        request.ensure_rejectable()?;

        let from = request.status;
        let entry = StatusEntry {
            status: RequestStatus::Rejected,
            at: Utc::now(),
            actor,
            reason: Some(reason.clone()),
        };
        let request = self.apply_transition(actor, id, from, entry, Action::Reject).await?;

        info!(request_id = %id, actor = %actor, "request rejected");
        self.record(
            AuditEvent::new(Some(id), actor, "request.rejected", AuditOutcome::Success)
                .with_payload("reason", reason),
        )
        .await;
        Ok(request)
    }

    /// Update one field of a non-terminal request. The status and the
    /// history are never touched by an edit.
    pub async fn edit_field(
        &self,
        actor: UserId,
        id: RequestId,
        field: RequestField,
        raw: &str,
    ) -> Result<Request, ServiceError> {
        let request = self.load(id).await?;
        if !self.policy.can_perform(actor, Action::Edit)
            || !self
                .policy
                .can_access_source(actor, request.source, Some(request.project))
        {
            return Err(self.deny(actor, Action::Edit, Some(id)).await);
        }

        request.ensure_editable()?;
        let change =
            validate::field_change(field, raw, self.amount_ceiling, Utc::now().date_naive())?;
        let updated = self
            .requests
            .update_field(id, &change, Utc::now())
            .await?
            .ok_or(ServiceError::NotFound(id))?;

        info!(request_id = %id, actor = %actor, field = %field, "request field edited");
        self.record(
            AuditEvent::new(Some(id), actor, "request.edited", AuditOutcome::Success)
                .with_payload("field", field.as_str()),
        )
        .await;
        Ok(updated)
    }

    pub async fn add_comment(
        &self,
        actor: UserId,
        id: RequestId,
        body: &str,
    ) -> Result<Comment, ServiceError> {
        let request = self.load(id).await?;
        if !self.can_see(actor, &request) {
            return Err(self.deny(actor, Action::ViewAll, Some(id)).await);
        }

        let body = validate::comment(body)?;
        let comment = self
            .comments
            .append(NewComment { request_id: id, author: actor, body, created_at: Utc::now() })
            .await?;

        self.record(
            AuditEvent::new(Some(id), actor, "request.commented", AuditOutcome::Success),
        )
        .await;
        Ok(comment)
    }

    pub async fn comments(&self, actor: UserId, id: RequestId) -> Result<Vec<Comment>, ServiceError> {
        let request = self.load(id).await?;
        if !self.can_see(actor, &request) {
            return Err(self.deny(actor, Action::ViewAll, Some(id)).await);
        }
        Ok(self.comments.list_for_request(id).await?)
    }

    pub async fn show(&self, actor: UserId, id: RequestId) -> Result<Request, ServiceError> {
        let request = self.load(id).await?;
        if !self.can_see(actor, &request) {
            return Err(self.deny(actor, Action::ViewAll, Some(id)).await);
        }
        Ok(request)
    }

    /// Paginated listing, newest first. Everyone sees their own requests;
    /// reviewers additionally see every request funded from a source they
    /// are scoped to.
    pub async fn list_requests(
        &self,
        actor: UserId,
        status: Option<RequestStatus>,
        page: u32,
    ) -> Result<RequestPage, ServiceError> {
        let visible_sources = if self.policy.can_view_all(actor) {
            Some(self.policy.visible_sources_for(actor).into_iter().collect())
        } else {
            None
        };
        let page = self
            .requests
            .list_visible(RequestQuery {
                owner: Some(actor),
                visible_sources,
                status,
                page,
                page_size: self.page_size,
            })
            .await?;
        Ok(page)
    }

    async fn apply_transition(
        &self,
        actor: UserId,
        id: RequestId,
        expected: RequestStatus,
        entry: StatusEntry,
        action: Action,
    ) -> Result<Request, ServiceError> {
        match self.requests.transition(id, expected, entry).await? {
            TransitionResult::Applied(request) => Ok(request),
            TransitionResult::Conflict(found) => {
                warn!(request_id = %id, actor = %actor, expected = %expected, found = %found,
                    "concurrent transition lost");
                let action = match action {
                    Action::Reject => outlay_core::domain::request::LifecycleAction::Reject,
                    _ => outlay_core::domain::request::LifecycleAction::Approve,
                };
                Err(DomainError::InvalidTransition { from: found, action }.into())
            }
            TransitionResult::NotFound => Err(ServiceError::NotFound(id)),
        }
    }
}
