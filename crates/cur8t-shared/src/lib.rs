//! # cur8t-shared
//!
//! Domain types and pure decision logic shared by the Cur8t store and server.
//!
//! Nothing in this crate performs I/O. The store persists what these types
//! describe and the server wires them to HTTP, but every access decision
//! (who may view a collection, what an approved request grants, whether a
//! billing webhook is authentic) is made here so it can be re-derived and
//! tested in isolation.

pub mod billing;
pub mod constants;
pub mod error;
pub mod grant;
pub mod types;
pub mod validate;
pub mod visibility;

pub use error::ActionError;
pub use types::{CollectionId, RequestId, RequestStatus, UserId, Visibility};
