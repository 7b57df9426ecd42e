//! In-memory scheduling state.
//!
//! Everything here is owned by the control loop. Relationships are ids plus
//! lookup tables: a slot names its application by [`AppId`], tasks are found
//! through the task index, and the allocator is a sibling field rather than
//! a pointer held by slots.
//!
//! Mutations follow a stage/commit split so callers can persist the staged
//! value before it becomes visible:
//!
//! 1. [`SchedulerState::stage_transition`] returns a validated copy of a slot
//! 2. the caller writes it to the store
//! 3. [`SchedulerState::commit_slot`] installs it and fixes queue membership

pub mod allocator;
pub mod app;
pub mod launch;
pub mod offer;
pub mod slot;
pub mod task;
pub mod version;

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use berth_id::AppId;
use berth_reconcile::{RetryTracker, DEFAULT_MAX_FAILOVERS};
use thiserror::Error;

pub use allocator::{Match, OfferAllocator};
pub use app::{AppMode, AppSpec, AppState, AppSummary, Application};
pub use offer::{Constraint, ConstraintOp, OfferCapacity};
pub use slot::{Slot, SlotKey, SlotState};
pub use task::{Task, TaskResources, TaskStatus};
pub use version::Version;

/// Errors from state mutations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("application not found: {0}")]
    AppNotFound(AppId),

    #[error("application already exists: {0}")]
    AppExists(AppId),

    #[error("slot not found: {0}")]
    SlotNotFound(SlotKey),

    #[error("invalid slot transition for {slot}: {from} -> {to}")]
    InvalidTransition {
        slot: SlotKey,
        from: SlotState,
        to: SlotState,
    },

    #[error("invalid constraint {constraint:?}: {reason}")]
    InvalidConstraint { constraint: String, reason: String },

    #[error("invalid application spec: {0}")]
    InvalidSpec(String),
}

// =============================================================================
// Heartbeat monitor
// =============================================================================

/// Missed heartbeats tolerated before the session is considered dead.
pub const HEARTBEAT_MISS_FACTOR: u32 = 3;

/// Tracks subscription heartbeats.
#[derive(Debug, Default, Clone)]
pub struct HeartbeatMonitor {
    interval: Option<Duration>,
    last_seen: Option<Instant>,
}

impl HeartbeatMonitor {
    /// Start watching with the interval announced at subscription.
    pub fn subscribed(&mut self, interval: Option<Duration>, now: Instant) {
        self.interval = interval;
        self.last_seen = Some(now);
    }

    pub fn beat(&mut self, now: Instant) {
        self.last_seen = Some(now);
    }

    /// Forget the previous session.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }

    /// True once no heartbeat arrived for `HEARTBEAT_MISS_FACTOR` intervals.
    ///
    /// Never overdue before the subscription announced an interval.
    pub fn is_overdue(&self, now: Instant) -> bool {
        match (self.interval, self.last_seen) {
            (Some(interval), Some(last)) => {
                now.saturating_duration_since(last) > interval * HEARTBEAT_MISS_FACTOR
            }
            _ => false,
        }
    }
}

// =============================================================================
// Scheduler state
// =============================================================================

/// Applications, the allocator, and the indexes tying them together.
#[derive(Debug)]
pub struct SchedulerState {
    pub apps: BTreeMap<AppId, Application>,
    pub allocator: OfferAllocator,
    /// Wire task id → owning slot, for every task ever recorded.
    tasks: HashMap<String, SlotKey>,
    /// Failover budget per slot, keyed by the slot's display form.
    pub failovers: RetryTracker,
    pub heartbeat: HeartbeatMonitor,
}

impl SchedulerState {
    pub fn new(failover_window: Duration) -> Self {
        Self {
            apps: BTreeMap::new(),
            allocator: OfferAllocator::new(),
            tasks: HashMap::new(),
            failovers: RetryTracker::new(DEFAULT_MAX_FAILOVERS, failover_window),
            heartbeat: HeartbeatMonitor::default(),
        }
    }

    pub fn app(&self, id: &AppId) -> Option<&Application> {
        self.apps.get(id)
    }

    pub fn app_mut(&mut self, id: &AppId) -> Option<&mut Application> {
        self.apps.get_mut(id)
    }

    pub fn slot(&self, key: &SlotKey) -> Option<&Slot> {
        self.apps.get(&key.app_id)?.slot(key.index)
    }

    /// Add an application, indexing its tasks and queueing its pending
    /// slots in index order.
    pub fn insert_app(&mut self, app: Application) -> Result<(), StateError> {
        if self.apps.contains_key(&app.id) {
            return Err(StateError::AppExists(app.id));
        }

        for slot in app.slots.values() {
            for task in slot.task_history.iter().chain(slot.current_task.iter()) {
                self.tasks.insert(task.id.to_string(), slot.key.clone());
            }
            if slot.state == SlotState::PendingOffer {
                self.allocator.enqueue(slot.key.clone());
            }
        }

        self.apps.insert(app.id, app);
        Ok(())
    }

    /// Remove an application and every queue, map and index entry for it.
    pub fn remove_app(&mut self, id: &AppId) -> Option<Application> {
        let app = self.apps.remove(id)?;
        self.allocator.forget_app(id);
        self.tasks.retain(|_, key| &key.app_id != id);
        self.failovers.clear_prefix(&format!("{id}/"));
        Some(app)
    }

    pub fn slot_for_task(&self, task_id: &str) -> Option<&SlotKey> {
        self.tasks.get(task_id)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Validated copy of a slot moved to `to`. Nothing is changed yet.
    pub fn stage_transition(&self, key: &SlotKey, to: SlotState) -> Result<Slot, StateError> {
        let slot = self
            .slot(key)
            .ok_or_else(|| StateError::SlotNotFound(key.clone()))?;

        if !slot.state.can_transition_to(to) {
            return Err(StateError::InvalidTransition {
                slot: key.clone(),
                from: slot.state,
                to,
            });
        }

        let mut staged = slot.clone();
        staged.state = to;
        Ok(staged)
    }

    /// Install a staged slot.
    ///
    /// Entering `PendingOffer` queues the slot; any other state removes it
    /// from the queue. The current task is indexed.
    pub fn commit_slot(&mut self, slot: Slot) -> Result<(), StateError> {
        let key = slot.key.clone();
        let app = self
            .apps
            .get_mut(&key.app_id)
            .ok_or(StateError::AppNotFound(key.app_id))?;
        let existing = app
            .slot_mut(key.index)
            .ok_or_else(|| StateError::SlotNotFound(key.clone()))?;

        if let Some(task) = &slot.current_task {
            self.tasks.insert(task.id.to_string(), key.clone());
        }

        let state = slot.state;
        *existing = slot;
        app.touch();

        if state == SlotState::PendingOffer {
            self.allocator.enqueue(key);
        } else {
            self.allocator.dequeue(&key);
        }
        Ok(())
    }

    /// Move `Creating` to `Normal` once every slot runs.
    ///
    /// Returns true when the state changed.
    pub fn refresh_app_state(&mut self, id: &AppId) -> bool {
        let Some(app) = self.apps.get_mut(id) else {
            return false;
        };
        if app.state == AppState::Creating && app.all_slots_in(SlotState::Running) {
            app.state = AppState::Normal;
            app.touch();
            return true;
        }
        false
    }

    /// Current tasks that have not reached a terminal status.
    pub fn live_tasks(&self) -> impl Iterator<Item = &Task> {
        self.apps
            .values()
            .flat_map(|app| app.slots.values())
            .filter_map(|slot| slot.current_task.as_ref())
            .filter(|task| !task.status.is_terminal())
    }

    /// `Deleting` applications whose slots are all terminated.
    pub fn finished_deletions(&self) -> Vec<AppId> {
        self.apps
            .values()
            .filter(|app| app.state == AppState::Deleting && app.all_slots_in(SlotState::Terminated))
            .map(|app| app.id)
            .collect()
    }

    pub fn summaries(&self) -> Vec<AppSummary> {
        self.apps.values().map(Application::summary).collect()
    }
}
