//! The expense request aggregate and its lifecycle state machine.
//!
//! A request moves Pending -> Waiting -> Paid under `approve`, or
//! Pending -> Rejected under `reject`. Paid and Rejected are terminal.
//! Rejection from Waiting is deliberately not wired: the deployed
//! workflow only ever offered a reject action on pending requests, and
//! that asymmetry is preserved here rather than silently widened.
//!
//! Invariant: `status` always equals the status of the last history
//! entry; a freshly created request is Pending with empty history.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::catalog::{Currency, Project, Source};
use crate::domain::user::UserId;
use crate::errors::DomainError;
use crate::validate::{Period, ValidationError};

/// Store-assigned integer identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub i64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Waiting,
    Paid,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Waiting => "waiting",
            RequestStatus::Paid => "paid",
            RequestStatus::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<RequestStatus> {
        match raw {
            "pending" => Some(RequestStatus::Pending),
            "waiting" => Some(RequestStatus::Waiting),
            "paid" => Some(RequestStatus::Paid),
            "rejected" => Some(RequestStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Paid | RequestStatus::Rejected)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the actor tried to do when a transition guard fired. Used only
/// for error reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Approve,
    Reject,
    Edit,
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleAction::Approve => "approve",
            LifecycleAction::Reject => "reject",
            LifecycleAction::Edit => "edit",
        })
    }
}

/// One entry of the append-only status trail. `reason` is present only
/// for rejections.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub status: RequestStatus,
    pub at: DateTime<Utc>,
    pub actor: UserId,
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
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
    pub status: RequestStatus,
    pub history: Vec<StatusEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Request {
    /// The status an approval would move this request to.
    pub fn next_on_approve(&self) -> Result<RequestStatus, DomainError> {
        match self.status {
            RequestStatus::Pending => Ok(RequestStatus::Waiting),
            RequestStatus::Waiting => Ok(RequestStatus::Paid),
            other => {
                Err(DomainError::InvalidTransition { from: other, action: LifecycleAction::Approve })
            }
        }
    }

    /// Only pending requests may be rejected. Waiting is excluded on
    /// purpose; see the module docs.
    pub fn ensure_rejectable(&self) -> Result<(), DomainError> {
        match self.status {
            RequestStatus::Pending => Ok(()),
            other => {
                Err(DomainError::InvalidTransition { from: other, action: LifecycleAction::Reject })
            }
        }
    }

    /// Field edits never move the status, but they are refused once a
    /// request has reached a terminal state.
    pub fn ensure_editable(&self) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                action: LifecycleAction::Edit,
            });
        }
        Ok(())
    }

    /// Append a history entry and move the status, keeping the
    /// status/history invariant. `updated_at` is refreshed to the entry
    /// timestamp.
    pub fn record_transition(
        &mut self,
        status: RequestStatus,
        actor: UserId,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) {
        self.history.push(StatusEntry { status, at, actor, reason });
        self.status = status;
        self.updated_at = at;
    }

    /// True when `status` matches the tail of the history (or the history
    /// is empty and the request is still Pending).
    pub fn history_consistent(&self) -> bool {
        match self.history.last() {
            Some(entry) => entry.status == self.status,
            None => self.status == RequestStatus::Pending,
        }
    }
}

/// A single editable request field, as named by the edit API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestField {
    Project,
    Amount,
    Currency,
    Source,
    Note,
    PartnerAccount,
    DocumentRef,
    Period,
    ExpenseDate,
}

impl RequestField {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestField::Project => "project",
            RequestField::Amount => "amount",
            RequestField::Currency => "currency",
            RequestField::Source => "source",
            RequestField::Note => "note",
            RequestField::PartnerAccount => "partner_account",
            RequestField::DocumentRef => "document_ref",
            RequestField::Period => "period",
            RequestField::ExpenseDate => "expense_date",
        }
    }

    pub const ALL: [RequestField; 9] = [
        RequestField::Project,
        RequestField::Amount,
        RequestField::Currency,
        RequestField::Source,
        RequestField::Note,
        RequestField::PartnerAccount,
        RequestField::DocumentRef,
        RequestField::Period,
        RequestField::ExpenseDate,
    ];
}

impl fmt::Display for RequestField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestField {
    type Err = ValidationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == raw.trim())
            .ok_or_else(|| {
                ValidationError::new("field", format!("unknown field `{}`", raw.trim()))
            })
    }
}

/// A validated single-field update, produced by
/// [`crate::validate::field_change`] and applied by the store.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldChange {
    Project(Project),
    Amount(Decimal),
    Currency(Currency),
    Source(Source),
    Note(String),
    PartnerAccount(String),
    DocumentRef(String),
    Period(Period),
    ExpenseDate(NaiveDate),
}

impl FieldChange {
    pub fn field(&self) -> RequestField {
        match self {
            FieldChange::Project(_) => RequestField::Project,
            FieldChange::Amount(_) => RequestField::Amount,
            FieldChange::Currency(_) => RequestField::Currency,
            FieldChange::Source(_) => RequestField::Source,
            FieldChange::Note(_) => RequestField::Note,
            FieldChange::PartnerAccount(_) => RequestField::PartnerAccount,
            FieldChange::DocumentRef(_) => RequestField::DocumentRef,
            FieldChange::Period(_) => RequestField::Period,
            FieldChange::ExpenseDate(_) => RequestField::ExpenseDate,
        }
    }

    /// Apply the change to an in-memory request. Status, history, and
    /// timestamps are left to the caller.
    pub fn apply(&self, request: &mut Request) {
        match self {
            FieldChange::Project(value) => request.project = *value,
            FieldChange::Amount(value) => request.amount = *value,
            FieldChange::Currency(value) => request.currency = *value,
            FieldChange::Source(value) => request.source = *value,
            FieldChange::Note(value) => request.note = Some(value.clone()),
            FieldChange::PartnerAccount(value) => request.partner_account = Some(value.clone()),
            FieldChange::DocumentRef(value) => request.document_ref = Some(value.clone()),
            FieldChange::Period(value) => request.period = Some(*value),
            FieldChange::ExpenseDate(value) => request.expense_date = *value,
        }
    }
}
