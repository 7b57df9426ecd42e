//! Operator commands: create, delete, list.

use berth_id::AppId;
use berth_proto::{AgentId, Call, TaskId as WireTaskId};
use tracing::info;

use super::SchedulerError;
use crate::state::{AppSpec, AppState, AppSummary, Application, SchedulerState, SlotState, StateError};
use crate::store::{save_application, AppRecord, SlotRecord, Store};

/// Persist a new application and queue its slots.
pub(super) fn create_app(
    state: &mut SchedulerState,
    store: &dyn Store,
    spec: AppSpec,
) -> Result<AppId, SchedulerError> {
    spec.validate()?;
    if state.apps.values().any(|app| app.name == spec.name) {
        return Err(StateError::InvalidSpec(format!("name {:?} is already in use", spec.name)).into());
    }

    let app = Application::from_spec(spec);
    save_application(store, &app)?;

    let id = app.id;
    info!(
        app_id = %id,
        name = %app.name,
        instances = app.current_version.instances,
        "Application created"
    );
    state.insert_app(app)?;
    Ok(id)
}

/// Start tearing an application down.
///
/// Pending slots terminate at once; reserved and running slots move to
/// `Killing` and a KILL is returned for each. Deleting an application that
/// is already being deleted does nothing.
pub(super) fn delete_app(
    state: &mut SchedulerState,
    store: &dyn Store,
    app_id: AppId,
) -> Result<Vec<Call>, SchedulerError> {
    let app = state.app(&app_id).ok_or(StateError::AppNotFound(app_id))?;
    if app.state == AppState::Deleting {
        return Ok(Vec::new());
    }

    let mut staged = Vec::new();
    let mut kills = Vec::new();
    for slot in app.slots.values() {
        let to = match slot.state {
            SlotState::PendingOffer => SlotState::Terminated,
            SlotState::Reserved | SlotState::Running => SlotState::Killing,
            SlotState::Killing | SlotState::Terminated => continue,
        };
        let next = state.stage_transition(&slot.key, to)?;
        if to == SlotState::Killing {
            if let Some(task) = &next.current_task {
                kills.push(Call::kill(
                    WireTaskId::new(task.id.to_string()),
                    task.agent_id.clone().map(AgentId::new),
                ));
            }
        }
        staged.push(next);
    }

    let mut record = AppRecord::from_app(app);
    record.state = AppState::Deleting;

    for slot in &staged {
        store.save_slot(&SlotRecord::from_slot(slot))?;
    }
    store.save_app(&record)?;

    for slot in staged {
        state.commit_slot(slot)?;
    }
    if let Some(app) = state.app_mut(&app_id) {
        app.state = AppState::Deleting;
        app.touch();
    }

    info!(app_id = %app_id, kills = kills.len(), "Application deleting");
    Ok(kills)
}

pub(super) fn list_apps(state: &SchedulerState) -> Vec<AppSummary> {
    state.summaries()
}
