//! Repository implementations for database access.
//!
//! Each repository wraps a SQLx connection, provides strongly-typed
//! operations for one table, and returns the row models from
//! [`crate::db::models`]. The ledger core never builds SQL itself; everything
//! it needs from Postgres lives here.
//!
//! - [`Balances`]: monthly balance rows, including the atomic conditional
//!   decrement and the monotonic top-up
//! - [`Lots`]: purchased credit lots (append-only)
//! - [`ConfigRecords`]: the singleton pricing/allowance record

pub mod balances;
pub mod config;
pub mod lots;

pub use balances::Balances;
pub use config::ConfigRecords;
pub use lots::Lots;
