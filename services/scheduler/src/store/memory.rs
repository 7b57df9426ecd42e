//! In-memory store, for tests and cold-start runs.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use berth_id::{AppId, VersionId};

use super::{AppRecord, OfferAllocation, SlotRecord, Store, StoreError};
use crate::state::{Task, Version};

#[derive(Debug, Default)]
struct Inner {
    framework_id: Option<String>,
    apps: BTreeMap<AppId, AppRecord>,
    versions: BTreeMap<(AppId, VersionId), Version>,
    slots: BTreeMap<(AppId, u32), SlotRecord>,
    history: BTreeMap<(AppId, u32), Vec<Task>>,
    allocations: BTreeMap<(AppId, u32), OfferAllocation>,
}

/// Store backed by maps behind a mutex.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl Store for MemoryStore {
    fn list_apps(&self) -> Result<Vec<AppRecord>, StoreError> {
        Ok(self.lock()?.apps.values().cloned().collect())
    }

    fn list_versions(&self, app_id: &AppId) -> Result<Vec<Version>, StoreError> {
        Ok(self
            .lock()?
            .versions
            .iter()
            .filter(|((app, _), _)| app == app_id)
            .map(|(_, v)| v.clone())
            .collect())
    }

    fn list_slots(&self, app_id: &AppId) -> Result<Vec<SlotRecord>, StoreError> {
        Ok(self
            .lock()?
            .slots
            .range((*app_id, 0)..=(*app_id, u32::MAX))
            .map(|(_, s)| s.clone())
            .collect())
    }

    fn list_tasks(&self, app_id: &AppId, slot_index: u32) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .lock()?
            .history
            .get(&(*app_id, slot_index))
            .cloned()
            .unwrap_or_default())
    }

    fn list_offer_allocations(&self) -> Result<Vec<OfferAllocation>, StoreError> {
        Ok(self.lock()?.allocations.values().cloned().collect())
    }

    fn get_framework_id(&self) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.framework_id.clone())
    }

    fn set_framework_id(&self, framework_id: &str) -> Result<(), StoreError> {
        self.lock()?.framework_id = Some(framework_id.to_string());
        Ok(())
    }

    fn save_app(&self, app: &AppRecord) -> Result<(), StoreError> {
        self.lock()?.apps.insert(app.id, app.clone());
        Ok(())
    }

    fn save_version(&self, version: &Version) -> Result<(), StoreError> {
        self.lock()?
            .versions
            .insert((version.app_id, version.id), version.clone());
        Ok(())
    }

    fn save_slot(&self, slot: &SlotRecord) -> Result<(), StoreError> {
        self.lock()?
            .slots
            .insert((slot.app_id, slot.index), slot.clone());
        Ok(())
    }

    fn append_task_history(
        &self,
        app_id: &AppId,
        slot_index: u32,
        task: &Task,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let history = inner.history.entry((*app_id, slot_index)).or_default();
        if !history.iter().any(|t| t.id == task.id) {
            history.push(task.clone());
        }
        Ok(())
    }

    fn save_offer_allocation(&self, allocation: &OfferAllocation) -> Result<(), StoreError> {
        self.lock()?.allocations.insert(
            (allocation.app_id, allocation.slot_index),
            allocation.clone(),
        );
        Ok(())
    }

    fn delete_offer_allocation(&self, app_id: &AppId, slot_index: u32) -> Result<(), StoreError> {
        self.lock()?.allocations.remove(&(*app_id, slot_index));
        Ok(())
    }

    fn delete_app(&self, app_id: &AppId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.apps.remove(app_id);
        inner.versions.retain(|(app, _), _| app != app_id);
        inner.slots.retain(|(app, _), _| app != app_id);
        inner.history.retain(|(app, _), _| app != app_id);
        inner.allocations.retain(|(app, _), _| app != app_id);
        Ok(())
    }
}
