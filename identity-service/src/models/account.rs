//! Account model - the identity root.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Account role codes. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::User => "USER",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "USER" => Ok(Role::User),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// Account lifecycle status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Pending,
    Active,
    Banned,
    Deleted,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Pending => "PENDING",
            AccountStatus::Active => "ACTIVE",
            AccountStatus::Banned => "BANNED",
            AccountStatus::Deleted => "DELETED",
        }
    }

    /// Whether `self -> next` is one of the allowed lifecycle edges.
    ///
    /// Banned and deleted accounts are terminal. Re-applying the current
    /// status is not an edge.
    pub fn can_transition_to(&self, next: AccountStatus) -> bool {
        matches!(
            (self, next),
            (AccountStatus::Pending, AccountStatus::Active)
                | (AccountStatus::Pending, AccountStatus::Deleted)
                | (AccountStatus::Active, AccountStatus::Banned)
                | (AccountStatus::Active, AccountStatus::Deleted)
        )
    }

    /// Banned and deleted accounts keep no sessions.
    pub fn ends_sessions(&self) -> bool {
        matches!(self, AccountStatus::Banned | AccountStatus::Deleted)
    }
}

impl std::str::FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(AccountStatus::Pending),
            "ACTIVE" => Ok(AccountStatus::Active),
            "BANNED" => Ok(AccountStatus::Banned),
            "DELETED" => Ok(AccountStatus::Deleted),
            _ => Err(format!("Invalid account status: {}", s)),
        }
    }
}

/// Account entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub account_id: Uuid,
    pub role: Role,
    pub status: AccountStatus,
    pub created_utc: DateTime<Utc>,
}

impl Account {
    /// Create a new account.
    pub fn new(role: Role, status: AccountStatus, now: DateTime<Utc>) -> Self {
        Self {
            account_id: Uuid::new_v4(),
            role,
            status,
            created_utc: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    pub fn summary(&self) -> AccountSummary {
        AccountSummary {
            account_id: self.account_id,
            role: self.role,
            status: self.status,
        }
    }
}

/// Account info for API responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AccountSummary {
    pub account_id: Uuid,
    pub role: Role,
    pub status: AccountStatus,
}
