//! Slots: one desired instance of an application.

use std::fmt;
use std::sync::Arc;

use berth_id::AppId;
use serde::{Deserialize, Serialize};

use super::task::Task;
use super::version::Version;

/// Identity of a slot: owning application plus instance index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub app_id: AppId,
    pub index: u32,
}

impl SlotKey {
    pub fn new(app_id: AppId, index: u32) -> Self {
        Self { app_id, index }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.app_id, self.index)
    }
}

/// Lifecycle of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    /// Waiting in the allocator queue for a matching offer.
    PendingOffer,
    /// Matched against an offer; launch sent, not yet running.
    Reserved,
    Running,
    /// Kill requested, waiting for the terminal update.
    Killing,
    /// No further transitions.
    Terminated,
}

impl SlotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotState::PendingOffer => "pending_offer",
            SlotState::Reserved => "reserved",
            SlotState::Running => "running",
            SlotState::Killing => "killing",
            SlotState::Terminated => "terminated",
        }
    }

    pub fn can_transition_to(&self, to: SlotState) -> bool {
        use SlotState::*;
        matches!(
            (self, to),
            (PendingOffer, Reserved)
                | (PendingOffer, Terminated)
                | (Reserved, Running)
                | (Reserved, Killing)
                | (Reserved, PendingOffer)
                | (Reserved, Terminated)
                | (Running, Killing)
                | (Running, PendingOffer)
                | (Running, Terminated)
                | (Killing, Terminated)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SlotState::Terminated)
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One desired instance of an application and its launch attempts.
#[derive(Debug, Clone)]
pub struct Slot {
    pub key: SlotKey,
    pub state: SlotState,
    pub version: Arc<Version>,
    pub current_task: Option<Task>,
    /// Earlier attempts, oldest first.
    pub task_history: Vec<Task>,
}

impl Slot {
    pub fn new(key: SlotKey, version: Arc<Version>) -> Self {
        Self {
            key,
            state: SlotState::PendingOffer,
            version,
            current_task: None,
            task_history: Vec::new(),
        }
    }

    /// Install a new attempt, moving the previous one into history.
    ///
    /// Returns the attempt that was moved, if any.
    pub fn replace_task(&mut self, task: Task) -> Option<&Task> {
        match self.current_task.replace(task) {
            Some(previous) => {
                self.task_history.push(previous);
                self.task_history.last()
            }
            None => None,
        }
    }

    pub fn is_current_task(&self, task_id: &str) -> bool {
        self.current_task
            .as_ref()
            .is_some_and(|t| t.id.to_string() == task_id)
    }
}
