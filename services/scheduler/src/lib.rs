//! berth scheduler
//!
//! Places long-running workloads on a cluster manager that hands out
//! resources as offers. The scheduler subscribes to the manager's event
//! stream, matches queued application instances against incoming offers,
//! launches tasks, and follows their status updates through failover and
//! teardown.
//!
//! ## Architecture
//!
//! - **Connector**: master discovery, subscription, RecordIO event decoding
//!   and outbound calls, linked to the control loop by bounded channels
//! - **Pipeline**: per-event-kind handler chains run on the control loop
//! - **State**: applications, slots, tasks and the FIFO offer allocator
//! - **Store**: persistence written before every in-memory transition
//! - **Scheduler**: the control loop, recovery, and operator commands

pub mod config;
pub mod connector;
pub mod pipeline;
pub mod recovery;
pub mod scheduler;
pub mod state;
pub mod store;

pub use config::Config;
pub use scheduler::{RunExit, Scheduler, SchedulerCommand, SchedulerError, SchedulerHandle};
