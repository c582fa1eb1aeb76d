use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// External numeric identity of a user, as reported by the chat
/// transport. Roles are never stored on the user record; they are
/// derived from the access policy at evaluation time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub handle: String,
    pub created_at: DateTime<Utc>,
}
