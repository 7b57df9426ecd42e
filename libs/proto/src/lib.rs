//! # berth-proto
//!
//! Messages exchanged with the cluster manager's scheduler endpoint.
//!
//! The scheduler talks to a single HTTP endpoint:
//!
//! - **Calls** (scheduler → manager) are JSON documents POSTed one per request.
//!   `SUBSCRIBE` keeps its response open; every other call expects
//!   `202 Accepted`.
//! - **Events** (manager → scheduler) arrive on the `SUBSCRIBE` response body
//!   as a RecordIO stream: `<decimal length>\n<json bytes>` repeated.
//!
//! Field names and enum spellings follow the manager's v1 JSON API
//! (`snake_case` fields, `SCREAMING_SNAKE_CASE` enum values). Identifiers
//! minted by the manager are `{ "value": "..." }` wrappers.

mod error;
mod ids;
mod recordio;
mod resources;
mod scheduler;
mod task;

pub use error::ProtoError;
pub use ids::*;
pub use recordio::{encode_record, RecordIoCodec, DEFAULT_MAX_RECORD_LEN};
pub use resources::*;
pub use scheduler::*;
pub use task::*;
