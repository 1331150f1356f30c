//! Database models for purchased credit lots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::types::UserId;

/// A non-expiring block of credits acquired outside the subscription
/// allowance. Lots are append-only: nothing in the ledger ever decrements
/// one, they participate in balance summation only.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PurchasedLot {
    pub id: Uuid,
    pub user_id: UserId,
    pub amount: i64,
    /// Payment reference from the fulfillment collaborator, if any.
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Database request for recording a purchased lot. Issued by the external
/// purchase-fulfillment collaborator, not by the ledger itself.
#[derive(Debug, Clone)]
pub struct PurchasedLotCreateDBRequest {
    pub user_id: UserId,
    pub amount: i64,
    pub source: Option<String>,
}
