//! The permission resolver.
//!
//! Two orthogonal axes decide what a user may do:
//!
//! - **action levels** — each of Create/Approve/Reject/Edit/ViewAll is
//!   configured as open to everyone, admins only, or no one;
//! - **source scoping** — which funding sources an admin or
//!   finance-control reviewer may see. The crypto source is scoped per
//!   project instead of per source.
//!
//! Full-access admins bypass scoping entirely. All answers are booleans;
//! the caller decides how a denial is presented. An unknown action denies
//! by default.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::catalog::{Project, Source};
use crate::domain::user::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    #[serde(alias = "all")]
    Everyone,
    #[serde(alias = "admins")]
    AdminsOnly,
    #[serde(alias = "none")]
    NoOne,
}

impl FromStr for PermissionLevel {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "everyone" | "all" => Ok(PermissionLevel::Everyone),
            "admins_only" | "admins" => Ok(PermissionLevel::AdminsOnly),
            "no_one" | "none" => Ok(PermissionLevel::NoOne),
            other => Err(format!("unsupported permission level `{other}` (expected all|admins|none)")),
        }
    }
}

/// Gated action kinds. `ViewAll` gates listing requests beyond one's own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Approve,
    Reject,
    Edit,
    ViewAll,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Create => "create",
            Action::Approve => "approve",
            Action::Reject => "reject",
            Action::Edit => "edit",
            Action::ViewAll => "view_all",
        })
    }
}

/// Effective role of a user, for display only. Authorization decisions
/// go through the policy methods, never through this.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Regular,
    FinControl,
    Admin,
    FullAccess,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionLevels {
    pub create: PermissionLevel,
    pub approve: PermissionLevel,
    pub reject: PermissionLevel,
    pub edit: PermissionLevel,
    pub view_all: PermissionLevel,
}

impl Default for PermissionLevels {
    /// Deployment default: anyone may submit, only admins act on
    /// submissions.
    fn default() -> Self {
        Self {
            create: PermissionLevel::Everyone,
            approve: PermissionLevel::AdminsOnly,
            reject: PermissionLevel::AdminsOnly,
            edit: PermissionLevel::AdminsOnly,
            view_all: PermissionLevel::AdminsOnly,
        }
    }
}

/// Immutable authorization configuration, built once at startup from
/// [`crate::config::AppConfig`] and passed explicitly to whoever needs
/// an allow/deny answer.
#[derive(Clone, Debug, Default)]
pub struct AccessPolicy {
    pub full_access: HashSet<UserId>,
    pub admins: HashSet<UserId>,
    pub fincontrol: HashSet<UserId>,
    pub source_admins: HashMap<Source, HashSet<UserId>>,
    pub crypto_admins: HashMap<Project, HashSet<UserId>>,
    pub levels: PermissionLevels,
}

impl AccessPolicy {
    pub fn is_admin(&self, user: UserId) -> bool {
        self.admins.contains(&user) || self.full_access.contains(&user)
    }

    pub fn role_of(&self, user: UserId) -> Role {
        if self.full_access.contains(&user) {
            Role::FullAccess
        } else if self.admins.contains(&user) {
            Role::Admin
        } else if self.fincontrol.contains(&user) {
            Role::FinControl
        } else {
            Role::Regular
        }
    }

    fn level_for(&self, action: Action) -> PermissionLevel {
        match action {
            Action::Create => self.levels.create,
            Action::Approve => self.levels.approve,
            Action::Reject => self.levels.reject,
            Action::Edit => self.levels.edit,
            Action::ViewAll => self.levels.view_all,
        }
    }

    pub fn can_perform(&self, user: UserId, action: Action) -> bool {
        match self.level_for(action) {
            PermissionLevel::Everyone => true,
            PermissionLevel::AdminsOnly => self.is_admin(user),
            PermissionLevel::NoOne => false,
        }
    }

    pub fn can_view_all(&self, user: UserId) -> bool {
        self.can_perform(user, Action::ViewAll)
    }

    /// Whether `user` may see requests funded from `source`. For the
    /// crypto source the project mapping decides when a project is known;
    /// without a project the plain source mapping applies, same as the
    /// original deployment behaved.
    pub fn can_access_source(&self, user: UserId, source: Source, project: Option<Project>) -> bool {
        if self.full_access.contains(&user) {
            return true;
        }
        if source == Source::Crypto {
            if let Some(project) = project {
                return self
                    .crypto_admins
                    .get(&project)
                    .is_some_and(|ids| ids.contains(&user));
            }
        }
        self.source_admins.get(&source).is_some_and(|ids| ids.contains(&user))
    }

    /// Sources whose requests `user` may list or export. Crypto counts as
    /// visible when the user appears in any project mapping.
    pub fn visible_sources_for(&self, user: UserId) -> BTreeSet<Source> {
        Source::ALL
            .iter()
            .copied()
            .filter(|source| {
                self.can_access_source(user, *source, None)
                    || (*source == Source::Crypto
                        && self.crypto_admins.values().any(|ids| ids.contains(&user)))
            })
            .collect()
    }
}
