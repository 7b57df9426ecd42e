//! OFFERS: match queued slots, persist reservations, answer every offer.

use berth_proto::{Call, EventType, Filters, Offer, Operation, TaskInfo};
use tracing::{debug, info, warn};

use super::{HandlerContext, HandlerError};
use crate::connector::UNNAMED_CLUSTER;
use crate::state::launch::build_task_info;
use crate::state::task::task_name;
use crate::state::{Match, OfferCapacity, SlotState, StateError, Task};
use crate::store::{OfferAllocation, SlotRecord};

/// Every offer in the event is either accepted with one LAUNCH or declined.
pub fn offers_handler(ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
    let event = ctx.event;
    let offers = event
        .event
        .offers
        .as_ref()
        .ok_or(HandlerError::MissingPayload(EventType::Offers))?;

    for offer in &offers.offers {
        handle_offer(ctx, offer.clone());
    }
    Ok(())
}

fn handle_offer(ctx: &mut HandlerContext<'_>, offer: Offer) {
    let filters = Filters::refuse(ctx.settings.refuse_seconds);

    if !ctx.state.allocator.has_pending() {
        debug!(offer_id = %offer.id, "Nothing pending; declining offer");
        ctx.response
            .calls
            .push(Call::decline(vec![offer.id], filters));
        return;
    }

    let mut capacity = OfferCapacity::new(offer);
    let matches = {
        let state = &mut *ctx.state;
        state.allocator.match_offer(&mut capacity, &state.apps)
    };

    let mut launches: Vec<TaskInfo> = Vec::with_capacity(matches.len());
    for matched in matches {
        let slot = matched.slot.clone();
        match reserve(ctx, capacity.offer(), matched) {
            Ok(info) => launches.push(info),
            Err(e) => {
                warn!(slot = %slot, error = %e, "Reservation failed; slot returns to the queue");
                // Only slots still pending go back; a committed slot is queued
                // by its own state.
                if ctx
                    .state
                    .slot(&slot)
                    .is_some_and(|s| s.state == SlotState::PendingOffer)
                {
                    ctx.state.allocator.enqueue(slot);
                }
            }
        }
    }

    let offer = capacity.offer();
    if launches.is_empty() {
        debug!(offer_id = %offer.id, "No queued slot fits; declining offer");
        ctx.response
            .calls
            .push(Call::decline(vec![offer.id.clone()], filters));
        return;
    }

    info!(
        offer_id = %offer.id,
        agent = %offer.hostname,
        tasks = launches.len(),
        "Launching tasks"
    );
    ctx.response.calls.push(Call::accept(
        offer.id.clone(),
        vec![Operation::launch(launches)],
        filters,
    ));
}

/// Turn a match into a persisted reservation and its launch description.
///
/// Writes happen before the in-memory slot changes, so a failed write
/// leaves the slot pending.
fn reserve(
    ctx: &mut HandlerContext<'_>,
    offer: &Offer,
    matched: Match,
) -> Result<TaskInfo, HandlerError> {
    let key = matched.slot;
    let app_name = ctx
        .state
        .app(&key.app_id)
        .map(|app| app.name.clone())
        .ok_or(StateError::AppNotFound(key.app_id))?;

    let cluster_id = {
        let session = ctx.session.load();
        if session.cluster_id.is_empty() {
            UNNAMED_CLUSTER.to_string()
        } else {
            session.cluster_id.clone()
        }
    };

    let mut staged = ctx.state.stage_transition(&key, SlotState::Reserved)?;
    let version = std::sync::Arc::clone(&staged.version);

    let mut task = Task::new(
        key.app_id,
        key.index,
        task_name(key.index, &app_name, &cluster_id),
        version.id,
        matched.resources,
    );
    task.agent_id = Some(offer.agent_id.as_str().to_string());
    task.agent_hostname = Some(offer.hostname.clone());
    task.offer_id = Some(offer.id.as_str().to_string());

    let info = build_task_info(&version, &task, &offer.agent_id, &ctx.settings.framework_role);
    let previous = staged.replace_task(task).cloned();

    if let Some(previous) = &previous {
        ctx.store
            .append_task_history(&key.app_id, key.index, previous)?;
    }
    ctx.store.save_slot(&SlotRecord::from_slot(&staged))?;
    ctx.store.save_offer_allocation(&OfferAllocation {
        app_id: key.app_id,
        slot_index: key.index,
        offer_id: offer.id.as_str().to_string(),
    })?;

    ctx.state.commit_slot(staged)?;
    ctx.state.allocator.set_offer_slot(key.clone(), offer.id.clone());
    debug!(slot = %key, task_id = %info.task_id, "Slot reserved");
    Ok(info)
}
