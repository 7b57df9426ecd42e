//! Persistent storage for scheduling state.
//!
//! The scheduler only needs a narrow contract: read everything back at
//! startup, and write each transition before it is applied in memory.
//! Writes are synchronous and local so handlers can call them inline.

mod memory;
mod sqlite;

use berth_id::{AppId, VersionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::{AppMode, AppState, Application, Slot, SlotState, Task, Version};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

// =============================================================================
// Records
// =============================================================================

/// Persisted application header. Versions and slots are stored separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppRecord {
    pub id: AppId,
    pub name: String,
    pub state: AppState,
    #[serde(default)]
    pub mode: AppMode,
    pub current_version_id: VersionId,
    #[serde(default)]
    pub proposed_version_id: Option<VersionId>,
    /// History order, oldest first.
    #[serde(default)]
    pub version_ids: Vec<VersionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AppRecord {
    pub fn from_app(app: &Application) -> Self {
        Self {
            id: app.id,
            name: app.name.clone(),
            state: app.state,
            mode: app.mode,
            current_version_id: app.current_version.id,
            proposed_version_id: app.proposed_version.as_ref().map(|v| v.id),
            version_ids: app.versions.iter().map(|v| v.id).collect(),
            created_at: app.created_at,
            updated_at: app.updated_at,
        }
    }
}

/// Persisted slot with its current attempt. History is appended separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub app_id: AppId,
    pub index: u32,
    pub state: SlotState,
    #[serde(default)]
    pub version_id: Option<VersionId>,
    #[serde(default)]
    pub current_task: Option<Task>,
}

impl SlotRecord {
    pub fn from_slot(slot: &Slot) -> Self {
        Self {
            app_id: slot.key.app_id,
            index: slot.key.index,
            state: slot.state,
            version_id: Some(slot.version.id),
            current_task: slot.current_task.clone(),
        }
    }
}

/// Offer a reserved slot was launched on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferAllocation {
    pub app_id: AppId,
    pub slot_index: u32,
    pub offer_id: String,
}

// =============================================================================
// Contract
// =============================================================================

/// Storage backend.
pub trait Store: Send + Sync {
    fn list_apps(&self) -> Result<Vec<AppRecord>, StoreError>;

    fn list_versions(&self, app_id: &AppId) -> Result<Vec<Version>, StoreError>;

    /// Slots of an application, ordered by index.
    fn list_slots(&self, app_id: &AppId) -> Result<Vec<SlotRecord>, StoreError>;

    /// Earlier attempts of a slot, oldest first.
    fn list_tasks(&self, app_id: &AppId, slot_index: u32) -> Result<Vec<Task>, StoreError>;

    fn list_offer_allocations(&self) -> Result<Vec<OfferAllocation>, StoreError>;

    fn get_framework_id(&self) -> Result<Option<String>, StoreError>;

    fn set_framework_id(&self, framework_id: &str) -> Result<(), StoreError>;

    fn save_app(&self, app: &AppRecord) -> Result<(), StoreError>;

    fn save_version(&self, version: &Version) -> Result<(), StoreError>;

    fn save_slot(&self, slot: &SlotRecord) -> Result<(), StoreError>;

    /// Record a finished attempt. Appending the same task again is a no-op,
    /// so a retried write does not duplicate history.
    fn append_task_history(
        &self,
        app_id: &AppId,
        slot_index: u32,
        task: &Task,
    ) -> Result<(), StoreError>;

    fn save_offer_allocation(&self, allocation: &OfferAllocation) -> Result<(), StoreError>;

    fn delete_offer_allocation(&self, app_id: &AppId, slot_index: u32) -> Result<(), StoreError>;

    /// Remove an application with its versions, slots, history and
    /// allocations.
    fn delete_app(&self, app_id: &AppId) -> Result<(), StoreError>;
}

/// Persist a whole application: header, versions and slots.
pub fn save_application(store: &dyn Store, app: &Application) -> Result<(), StoreError> {
    for version in &app.versions {
        store.save_version(version)?;
    }
    if let Some(proposed) = &app.proposed_version {
        store.save_version(proposed)?;
    }
    for slot in app.slots.values() {
        store.save_slot(&SlotRecord::from_slot(slot))?;
    }
    store.save_app(&AppRecord::from_app(app))
}
