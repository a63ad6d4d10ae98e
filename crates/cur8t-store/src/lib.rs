//! # cur8t-store
//!
//! SQLite persistence for Cur8t.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every domain model.
//! Multi-row invariants (approve-and-grant, webhook dedup, counter updates)
//! are enforced inside single transactions here, never by callers.

pub mod access_requests;
pub mod billing;
pub mod collections;
pub mod database;
pub mod favorites;
pub mod links;
pub mod migrations;
pub mod models;
pub mod social;
pub mod users;

mod convert;
mod error;

pub use access_requests::{Decision, RequestOutcome, ResponseOutcome};
pub use billing::IngestOutcome;
pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use social::PinOutcome;
