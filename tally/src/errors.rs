//! Ledger-level error taxonomy.
//!
//! Business outcomes ([`Error::InsufficientCredits`], [`Error::UnknownAction`])
//! are typed variants so callers are forced to branch on them explicitly.
//! Only infrastructure failures ([`Error::Database`], [`Error::Plan`]) should
//! ever be treated as faults; an insufficient balance is a normal, expected
//! result of running out of credits.

use crate::db::errors::DbError;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// The user cannot afford the requested action. Recoverable: the caller
    /// should offer an upgrade or a credit purchase, not an error page.
    #[error("insufficient credits: balance is {balance}, action requires {required}")]
    InsufficientCredits { balance: i64, required: i64 },

    /// The action identifier is outside the known set. This is a caller bug;
    /// it is rejected before any storage round trip.
    #[error("unknown action identifier: {action:?}")]
    UnknownAction { action: String },

    /// Storage failure. Not retried by the ledger; retry policy belongs to
    /// the caller.
    #[error(transparent)]
    Database(#[from] DbError),

    /// The external plan resolver failed.
    #[error("failed to resolve effective plan: {0}")]
    Plan(anyhow::Error),
}

impl Error {
    pub fn is_insufficient_credits(&self) -> bool {
        matches!(self, Error::InsufficientCredits { .. })
    }

    /// Returns a user-safe message, without leaking internal details.
    pub fn user_message(&self) -> String {
        match self {
            Error::InsufficientCredits { balance, required } => {
                format!(
                    "You need {} more credits for this action ({} required, {} available)",
                    required - balance,
                    required,
                    balance
                )
            }
            Error::UnknownAction { action } => format!("Unknown action: {action}"),
            Error::Database(_) => "Credit service temporarily unavailable".to_string(),
            Error::Plan(_) => "Credit service temporarily unavailable".to_string(),
        }
    }
}

/// Type alias for ledger operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_credits_message_names_the_shortfall() {
        let err = Error::InsufficientCredits {
            balance: 5,
            required: 15,
        };
        assert!(err.is_insufficient_credits());
        assert!(err.user_message().contains("10 more credits"));
    }

    #[test]
    fn test_database_errors_do_not_leak_details() {
        let err = Error::Database(DbError::Other(anyhow::anyhow!(
            "connection refused: 10.0.3.7:5432"
        )));
        assert!(!err.user_message().contains("10.0.3.7"));
    }
}
