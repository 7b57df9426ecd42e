//! Rebuilding scheduling state from the store at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use berth_id::{AppId, VersionId};
use berth_proto::OfferId;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::state::{Application, SchedulerState, Slot, SlotKey, StateError, Version};
use crate::store::{AppRecord, SlotRecord, Store, StoreError};

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("application {app_id} references missing version {version_id}")]
    MissingVersion {
        app_id: AppId,
        version_id: VersionId,
    },

    #[error(transparent)]
    State(#[from] StateError),
}

/// What was loaded.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub apps: usize,
    pub slots: usize,
    pub pending: usize,
    pub tasks: usize,
    pub allocations: usize,
}

/// Load every application from `store` into `state`.
///
/// Pending slots are queued once each, in application id then slot index
/// order. Any store error or dangling version reference is fatal.
#[instrument(skip_all)]
pub fn recover(store: &dyn Store, state: &mut SchedulerState) -> Result<RecoveryReport, RecoveryError> {
    let mut report = RecoveryReport::default();

    let mut records = store.list_apps()?;
    records.sort_by_key(|r| r.id);

    for record in records {
        let app = load_app(store, record)?;
        report.apps += 1;
        report.slots += app.slots.len();
        state.insert_app(app)?;
    }

    for allocation in store.list_offer_allocations()? {
        let key = SlotKey::new(allocation.app_id, allocation.slot_index);
        if state.slot(&key).is_none() {
            warn!(slot = %key, offer_id = %allocation.offer_id, "Skipping allocation of unknown slot");
            continue;
        }
        state
            .allocator
            .set_offer_slot(key, OfferId::new(allocation.offer_id));
        report.allocations += 1;
    }

    report.pending = state.allocator.pending_len();
    report.tasks = state.task_count();

    info!(
        apps = report.apps,
        slots = report.slots,
        pending = report.pending,
        tasks = report.tasks,
        allocations = report.allocations,
        "Recovered scheduling state"
    );
    Ok(report)
}

fn load_app(store: &dyn Store, record: AppRecord) -> Result<Application, RecoveryError> {
    let versions: BTreeMap<VersionId, Arc<Version>> = store
        .list_versions(&record.id)?
        .into_iter()
        .map(|v| (v.id, Arc::new(v)))
        .collect();

    let resolve = |id: VersionId| {
        versions
            .get(&id)
            .cloned()
            .ok_or(RecoveryError::MissingVersion {
                app_id: record.id,
                version_id: id,
            })
    };

    let current = resolve(record.current_version_id)?;
    let proposed = record.proposed_version_id.map(&resolve).transpose()?;

    let mut history = Vec::with_capacity(record.version_ids.len().max(1));
    for id in &record.version_ids {
        history.push(resolve(*id)?);
    }
    if !history.iter().any(|v| v.id == current.id) {
        history.push(Arc::clone(&current));
    }

    let mut slots = BTreeMap::new();
    for slot_record in store.list_slots(&record.id)? {
        let slot = load_slot(store, slot_record, &current, &resolve)?;
        slots.insert(slot.key.index, slot);
    }

    Ok(Application {
        id: record.id,
        name: record.name,
        state: record.state,
        mode: record.mode,
        current_version: current,
        proposed_version: proposed,
        versions: history,
        created_at: record.created_at,
        updated_at: record.updated_at,
        slots,
    })
}

fn load_slot<F>(
    store: &dyn Store,
    record: SlotRecord,
    current: &Arc<Version>,
    resolve: &F,
) -> Result<Slot, RecoveryError>
where
    F: Fn(VersionId) -> Result<Arc<Version>, RecoveryError>,
{
    let version = match record.version_id {
        Some(id) => resolve(id)?,
        None => Arc::clone(current),
    };

    let mut task_history = store.list_tasks(&record.app_id, record.index)?;
    for task in &mut task_history {
        task.version_id.get_or_insert(current.id);
    }
    let mut current_task = record.current_task;
    if let Some(task) = current_task.as_mut() {
        task.version_id.get_or_insert(current.id);
    }

    Ok(Slot {
        key: SlotKey::new(record.app_id, record.index),
        state: record.state,
        version,
        current_task,
        task_history,
    })
}
