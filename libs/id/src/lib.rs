//! # berth-id
//!
//! Typed identifiers for the entities the scheduler creates itself.
//!
//! Identifiers minted by the cluster manager (offers, agents, frameworks)
//! are opaque strings and live in `berth-proto`. Everything the scheduler
//! mints uses a prefixed ULID: `{prefix}_{ulid}`.
//!
//! - `app_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//! - `ver_01HV4Z4NYPLTRS0JTUA8XDME5F`
//! - `task_01HV4Z5PZQMVST1KVWB9YENF6G`
//!
//! The prefix keeps ids of different kinds from being mixed up in logs and
//! in the store, and ULIDs sort by creation time.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::{AppId, TaskId, VersionId};

#[doc(hidden)]
pub use ulid::Ulid;
