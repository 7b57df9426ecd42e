//! Periodic housekeeping on the control loop tick.

use berth_id::AppId;
use tracing::{debug, info, warn};

use crate::state::SchedulerState;
use crate::store::Store;

/// Remove `Deleting` applications whose slots have all terminated.
///
/// The store row goes first; an application whose delete fails stays in
/// memory and is retried on the next tick. Returns the removed ids.
pub fn invalidate_apps(state: &mut SchedulerState, store: &dyn Store) -> Vec<AppId> {
    let mut removed = Vec::new();

    for app_id in state.finished_deletions() {
        if let Err(e) = store.delete_app(&app_id) {
            warn!(app_id = %app_id, error = %e, "Failed to delete application; will retry");
            continue;
        }
        if state.remove_app(&app_id).is_some() {
            info!(app_id = %app_id, "Application removed");
            removed.push(app_id);
        }
    }

    state.failovers.prune();
    if !removed.is_empty() {
        debug!(removed = removed.len(), remaining = state.apps.len(), "Reconciliation pass done");
    }
    removed
}
