//! Handlers for every event kind except OFFERS.

use std::time::{Duration, Instant};

use berth_proto::{AgentId, Call, EventType, ReconcileTask, TaskStatus as WireStatus};
use tracing::{debug, error, info, warn};

use super::{HandlerContext, HandlerError};
use crate::connector::update_session;
use crate::state::{AppState, SlotKey, SlotState, StateError, TaskStatus};
use crate::store::{AppRecord, SlotRecord};

pub fn logger_handler(ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
    debug!(kind = %ctx.event.kind, "Event received");
    Ok(())
}

pub fn terminal_handler(_ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
    Ok(())
}

// =============================================================================
// Session events
// =============================================================================

/// Record the framework id and heartbeat interval, then ask the manager to
/// reconcile every live task.
pub fn subscribed_handler(ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
    let subscribed = ctx
        .event
        .event
        .subscribed
        .as_ref()
        .ok_or(HandlerError::MissingPayload(EventType::Subscribed))?;

    let framework_id = subscribed.framework_id.clone();
    ctx.store.set_framework_id(framework_id.as_str())?;
    update_session(ctx.session, |s| s.framework_id = Some(framework_id.clone()));

    let interval = subscribed
        .heartbeat_interval_seconds
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .filter(|d| !d.is_zero());
    ctx.state.heartbeat.subscribed(interval, Instant::now());

    info!(
        framework_id = %framework_id.as_str(),
        heartbeat_interval = ?interval,
        "Subscribed to cluster manager"
    );

    let tasks: Vec<ReconcileTask> = ctx
        .state
        .live_tasks()
        .map(|task| ReconcileTask {
            task_id: berth_proto::TaskId::new(task.id.to_string()),
            agent_id: task.agent_id.clone().map(AgentId::new),
        })
        .collect();

    if !tasks.is_empty() {
        info!(tasks = tasks.len(), "Requesting reconciliation of live tasks");
        ctx.response.calls.push(Call::reconcile(tasks));
    }
    Ok(())
}

pub fn heartbeat_handler(ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
    ctx.state.heartbeat.beat(Instant::now());
    Ok(())
}

pub fn rescind_handler(ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
    let rescind = ctx
        .event
        .event
        .rescind
        .as_ref()
        .ok_or(HandlerError::MissingPayload(EventType::Rescind))?;

    let reserved: Vec<String> = ctx
        .state
        .allocator
        .slots_for_offer(&rescind.offer_id)
        .into_iter()
        .filter(|key| {
            ctx.state
                .slot(key)
                .is_some_and(|slot| slot.state == SlotState::Reserved)
        })
        .map(|key| key.to_string())
        .collect();

    info!(
        offer_id = %rescind.offer_id,
        reserved_slots = ?reserved,
        "Offer rescinded"
    );
    Ok(())
}

pub fn message_handler(ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
    let message = ctx
        .event
        .event
        .message
        .as_ref()
        .ok_or(HandlerError::MissingPayload(EventType::Message))?;
    info!(
        agent_id = %message.agent_id,
        executor_id = %message.executor_id,
        bytes = message.data.len(),
        "Executor message"
    );
    Ok(())
}

pub fn failure_handler(ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
    let failure = ctx
        .event
        .event
        .failure
        .as_ref()
        .ok_or(HandlerError::MissingPayload(EventType::Failure))?;
    warn!(
        agent_id = ?failure.agent_id,
        executor_id = ?failure.executor_id,
        status = ?failure.status,
        "Agent or executor failure"
    );
    Ok(())
}

pub fn error_handler(ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
    let message = ctx
        .event
        .event
        .error
        .as_ref()
        .map(|e| e.message.as_str())
        .unwrap_or("");
    error!(message = %message, "Cluster manager reported an error");
    Ok(())
}

// =============================================================================
// Task status updates
// =============================================================================

/// Apply a task status update, then acknowledge it.
///
/// Ignored updates are still acknowledged. An update whose write fails is
/// not, so the manager delivers it again.
pub fn update_handler(ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
    let event = ctx.event;
    let status = event
        .event
        .update
        .as_ref()
        .map(|u| &u.status)
        .ok_or(HandlerError::MissingPayload(EventType::Update))?;

    apply_update(ctx, status)?;

    if let Some(uuid) = &status.uuid {
        let agent_id = status.agent_id.clone().or_else(|| {
            ctx.state
                .slot_for_task(status.task_id.as_str())
                .and_then(|key| ctx.state.slot(key))
                .and_then(|slot| slot.current_task.as_ref())
                .and_then(|task| task.agent_id.clone())
                .map(AgentId::new)
        });
        match agent_id {
            Some(agent_id) => ctx.response.calls.push(Call::acknowledge(
                agent_id,
                status.task_id.clone(),
                uuid.clone(),
            )),
            None => warn!(task_id = %status.task_id, "Cannot acknowledge update without agent id"),
        }
    }
    Ok(())
}

fn apply_update(ctx: &mut HandlerContext<'_>, status: &WireStatus) -> Result<(), HandlerError> {
    let task_id = status.task_id.as_str();
    let new_status = TaskStatus::from(status.state);

    let Some(key) = ctx.state.slot_for_task(task_id).cloned() else {
        debug!(task_id = %task_id, status = %new_status, "Update for unknown task");
        return Ok(());
    };
    let Some(slot) = ctx.state.slot(&key) else {
        debug!(task_id = %task_id, "Update for task of a removed slot");
        return Ok(());
    };
    let Some(current) = slot.current_task.as_ref().filter(|_| slot.is_current_task(task_id))
    else {
        debug!(task_id = %task_id, slot = %key, "Update for superseded attempt");
        return Ok(());
    };
    if current.status.is_terminal() || new_status.rank() < current.status.rank() {
        debug!(
            task_id = %task_id,
            current = %current.status,
            update = %new_status,
            "Stale update"
        );
        return Ok(());
    }
    let from = slot.state;
    let max_failovers = slot.version.max_failovers();

    let deleting = ctx
        .state
        .app(&key.app_id)
        .is_some_and(|app| app.state == AppState::Deleting);
    let target = target_state(ctx, &key, from, new_status, deleting, max_failovers);

    let mut staged = match target.state {
        Some(to) if to != from => ctx.state.stage_transition(&key, to)?,
        _ => ctx
            .state
            .slot(&key)
            .cloned()
            .ok_or_else(|| StateError::SlotNotFound(key.clone()))?,
    };
    if let Some(task) = staged.current_task.as_mut() {
        task.set_status(new_status, status.message.clone());
        if task.agent_id.is_none() {
            task.agent_id = status.agent_id.as_ref().map(|a| a.as_str().to_string());
        }
    }

    let releases_offer = new_status == TaskStatus::Running || new_status.is_terminal();
    let holds_offer = ctx.state.allocator.offer_for_slot(&key).is_some();

    ctx.store.save_slot(&SlotRecord::from_slot(&staged))?;
    if releases_offer && holds_offer {
        ctx.store.delete_offer_allocation(&key.app_id, key.index)?;
    }

    let to = staged.state;
    ctx.state.commit_slot(staged)?;
    if releases_offer {
        ctx.state.allocator.remove_offer_slot(&key);
    }
    // Counted only once the update is durable; a redelivery after a failed
    // write must not spend the budget twice.
    if target.spends_failover {
        let failure_key = key.to_string();
        ctx.state
            .failovers
            .record_failure_with_limit(&failure_key, max_failovers);
        if to == SlotState::PendingOffer {
            info!(
                slot = %key,
                failures = ctx.state.failovers.failures(&failure_key),
                "Task failed; rescheduling slot"
            );
        }
    }
    if from != to {
        info!(slot = %key, task_id = %task_id, status = %new_status, from = %from, to = %to, "Slot transition");
    }

    refresh_app(ctx, &key)
}

/// Where an update moves a slot.
struct Target {
    state: Option<SlotState>,
    /// The update is a task failure charged to the slot's failover budget.
    spends_failover: bool,
}

impl Target {
    fn to(state: Option<SlotState>) -> Self {
        Self {
            state,
            spends_failover: false,
        }
    }
}

/// Slot state an update moves to, if any. Nothing is recorded here.
fn target_state(
    ctx: &HandlerContext<'_>,
    key: &SlotKey,
    current: SlotState,
    status: TaskStatus,
    deleting: bool,
    max_failovers: u32,
) -> Target {
    match status {
        TaskStatus::Running if current == SlotState::Reserved => {
            Target::to(Some(SlotState::Running))
        }
        TaskStatus::Killing if current.can_transition_to(SlotState::Killing) => {
            Target::to(Some(SlotState::Killing))
        }
        s if s.is_terminal() => {
            if current == SlotState::Killing || deleting || !s.is_failure() {
                return Target::to(Some(SlotState::Terminated));
            }
            let exhausted = ctx
                .state
                .failovers
                .would_exhaust(&key.to_string(), max_failovers);
            let state = if exhausted {
                warn!(slot = %key, max_failovers, "Failover budget exhausted; terminating slot");
                SlotState::Terminated
            } else {
                SlotState::PendingOffer
            };
            Target {
                state: Some(state),
                spends_failover: true,
            }
        }
        _ => Target::to(None),
    }
}

/// Persist and apply `Creating → Normal` once every slot runs.
fn refresh_app(ctx: &mut HandlerContext<'_>, key: &SlotKey) -> Result<(), HandlerError> {
    let Some(app) = ctx.state.app(&key.app_id) else {
        return Ok(());
    };
    if app.state != AppState::Creating || !app.all_slots_in(SlotState::Running) {
        return Ok(());
    }

    let mut record = AppRecord::from_app(app);
    record.state = AppState::Normal;
    ctx.store.save_app(&record)?;

    if ctx.state.refresh_app_state(&key.app_id) {
        info!(app_id = %key.app_id, "Application is fully running");
    }
    Ok(())
}
