use thiserror::Error;

use outlay_core::domain::request::RequestId;
use outlay_core::domain::user::UserId;
use outlay_core::errors::DomainError;
use outlay_core::permissions::Action;
use outlay_core::validate::ValidationError;
use outlay_db::repositories::RepositoryError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("request {0} not found")]
    NotFound(RequestId),
    #[error("user {actor} is not allowed to {action}")]
    Forbidden { actor: UserId, action: Action },
    #[error(transparent)]
    InvalidTransition(#[from] DomainError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] RepositoryError),
}
