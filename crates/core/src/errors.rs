use thiserror::Error;

use crate::domain::request::{LifecycleAction, RequestStatus};

/// Lifecycle rule violations. Field-level failures are
/// [`crate::validate::ValidationError`]; permission denials are plain
/// booleans from [`crate::permissions::AccessPolicy`] and never surface
/// as domain errors.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("cannot {action} a request in status `{from}`")]
    InvalidTransition { from: RequestStatus, action: LifecycleAction },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}
