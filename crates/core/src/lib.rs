pub mod audit;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod errors;
pub mod permissions;
pub mod validate;

pub use audit::{AuditEvent, AuditOutcome};
pub use catalog::{Currency, Project, Source};
pub use config::{AppConfig, ConfigError, LoadOptions};
pub use domain::comment::{Comment, CommentId};
pub use domain::request::{
    FieldChange, LifecycleAction, Request, RequestField, RequestId, RequestStatus, StatusEntry,
};
pub use domain::user::{User, UserId};
pub use errors::DomainError;
pub use permissions::{AccessPolicy, Action, PermissionLevel, PermissionLevels, Role};
pub use validate::{Period, ValidationError};
