//! Pending-offer queue and the offer matching pass.
//!
//! The allocator only decides placement. It never talks to the network or
//! the store; committing a match is the caller's job.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use berth_id::AppId;
use berth_proto::OfferId;
use tracing::{debug, warn};

use super::app::Application;
use super::offer::OfferCapacity;
use super::slot::{SlotKey, SlotState};
use super::task::TaskResources;

/// A slot placed on an offer during one matching pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub slot: SlotKey,
    pub resources: TaskResources,
}

/// FIFO of slots awaiting an offer plus the reserved-slot → offer map.
#[derive(Debug, Default)]
pub struct OfferAllocator {
    pending: VecDeque<SlotKey>,
    queued: HashSet<SlotKey>,
    by_slot: HashMap<SlotKey, OfferId>,
}

impl OfferAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Pending queue
    // =========================================================================

    /// Append a slot to the tail. A slot already queued keeps its position.
    pub fn enqueue(&mut self, key: SlotKey) -> bool {
        if !self.queued.insert(key.clone()) {
            return false;
        }
        self.pending.push_back(key);
        true
    }

    /// Remove a slot wherever it sits in the queue.
    pub fn dequeue(&mut self, key: &SlotKey) -> bool {
        if !self.queued.remove(key) {
            return false;
        }
        self.pending.retain(|k| k != key);
        true
    }

    pub fn pop_front(&mut self) -> Option<SlotKey> {
        let key = self.pending.pop_front()?;
        self.queued.remove(&key);
        Some(key)
    }

    pub fn is_queued(&self, key: &SlotKey) -> bool {
        self.queued.contains(key)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Queue contents, front first.
    pub fn pending(&self) -> impl Iterator<Item = &SlotKey> {
        self.pending.iter()
    }

    // =========================================================================
    // Offer ↔ slot map
    // =========================================================================

    pub fn set_offer_slot(&mut self, key: SlotKey, offer_id: OfferId) {
        self.by_slot.insert(key, offer_id);
    }

    pub fn remove_offer_slot(&mut self, key: &SlotKey) -> Option<OfferId> {
        self.by_slot.remove(key)
    }

    pub fn offer_for_slot(&self, key: &SlotKey) -> Option<&OfferId> {
        self.by_slot.get(key)
    }

    /// Slots still reserved against `offer_id`.
    pub fn slots_for_offer(&self, offer_id: &OfferId) -> Vec<SlotKey> {
        let mut slots: Vec<SlotKey> = self
            .by_slot
            .iter()
            .filter(|(_, o)| *o == offer_id)
            .map(|(k, _)| k.clone())
            .collect();
        slots.sort();
        slots
    }

    pub fn reserved_len(&self) -> usize {
        self.by_slot.len()
    }

    /// Drop every queue and map entry belonging to `app_id`.
    pub fn forget_app(&mut self, app_id: &AppId) {
        self.pending.retain(|k| &k.app_id != app_id);
        self.queued.retain(|k| &k.app_id != app_id);
        self.by_slot.retain(|k, _| &k.app_id != app_id);
    }

    // =========================================================================
    // Matching
    // =========================================================================

    /// Place queued slots on `capacity`, first fit in FIFO order.
    ///
    /// Visits at most the slots queued when the pass starts. Matched slots
    /// leave the queue; the rest keep their relative order behind any slot
    /// enqueued meanwhile. Slots whose application or slot record vanished,
    /// or which are no longer pending, are dropped.
    pub fn match_offer(
        &mut self,
        capacity: &mut OfferCapacity,
        apps: &BTreeMap<AppId, Application>,
    ) -> Vec<Match> {
        let mut matches = Vec::new();
        let budget = self.pending.len();

        for _ in 0..budget {
            let Some(key) = self.pop_front() else {
                break;
            };

            let Some(slot) = apps.get(&key.app_id).and_then(|app| app.slot(key.index)) else {
                warn!(slot = %key, "Dropping queued slot of vanished application");
                continue;
            };

            if slot.state != SlotState::PendingOffer {
                warn!(slot = %key, state = %slot.state, "Dropping queued slot that is not pending");
                continue;
            }

            if capacity.fits(&slot.version) {
                let resources = capacity.consume(&slot.version);
                debug!(slot = %key, offer_id = %capacity.offer().id, "Slot matched offer");
                matches.push(Match {
                    slot: key,
                    resources,
                });
            } else {
                self.enqueue(key);
            }
        }

        matches
    }
}
