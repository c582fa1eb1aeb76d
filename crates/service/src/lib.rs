//! Expense request lifecycle service.
//!
//! Sits between the outer surfaces (CLI, future transports) and the
//! stores. Owns authorization, input validation, the approval state
//! machine, and the audit trail.

pub mod errors;
pub mod service;

pub use errors::ServiceError;
pub use service::{Draft, RequestService};
