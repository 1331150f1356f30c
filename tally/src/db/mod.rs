//! Database access layer.
//!
//! Follows the repository pattern: each entity gets a repository struct in
//! [`handlers`] that wraps a `&mut PgConnection` and returns the row models
//! from [`models`]. Errors are categorized into [`errors::DbError`] so the
//! ledger can tell an absorbed race (duplicate period key) from a fatal
//! storage failure.

pub mod errors;
pub mod handlers;
pub mod models;
