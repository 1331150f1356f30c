//! Common type definitions for the credit ledger.
//!
//! This module defines:
//! - Type aliases for entity IDs ([`UserId`], [`BalanceId`], [`LotId`])
//! - [`PlanId`], an opaque identifier owned by the external plan system
//! - [`ActionId`], the closed set of billable actions
//!
//! `ActionId` is deliberately an enum rather than a free-form string: the
//! only way to turn caller input into an `ActionId` is [`str::parse`], which
//! rejects anything outside the known set before storage is ever touched.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::Error;

// Type aliases for IDs
pub type UserId = Uuid;
pub type BalanceId = Uuid;
pub type LotId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Identifier of a subscription plan (e.g. `gogh_essencial`).
///
/// The set of plans is owned by the external subscription system; the ledger
/// only uses it as a key into the allowance table, so this stays an opaque
/// newtype rather than an enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(String);

impl PlanId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PlanId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A billable AI action.
///
/// `script` was historically spelled `roteiro` by some callers; both parse
/// to [`ActionId::Script`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionId {
    Photo,
    Video,
    #[serde(alias = "roteiro")]
    Script,
    Prompts,
    Vangogh,
}

impl ActionId {
    /// All known actions, in pricing-table order.
    pub const ALL: [ActionId; 5] = [
        ActionId::Photo,
        ActionId::Video,
        ActionId::Script,
        ActionId::Prompts,
        ActionId::Vangogh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionId::Photo => "photo",
            ActionId::Video => "video",
            ActionId::Script => "script",
            ActionId::Prompts => "prompts",
            ActionId::Vangogh => "vangogh",
        }
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "photo" => Ok(ActionId::Photo),
            "video" => Ok(ActionId::Video),
            "script" | "roteiro" => Ok(ActionId::Script),
            "prompts" => Ok(ActionId::Prompts),
            "vangogh" => Ok(ActionId::Vangogh),
            other => Err(Error::UnknownAction {
                action: other.to_string(),
            }),
        }
    }
}
