//! In-flight reassembly table: one slot per possible two-letter message id.
//!
//! Slots are created by the first parcel for an id, cleared after the message is
//! delivered, and swept once no parcel has touched them for the TTL.

use crate::clock::elapsed_ms;
use crate::parcel::{FeedOutcome, MessageId, Reassembly, MESSAGE_ID_SPACE};

#[derive(Debug)]
pub struct InflightSlot {
    pub reassembly: Reassembly,
    pub last_touch_ms: u32,
}

#[derive(Debug)]
pub struct InflightTable {
    slots: Vec<Option<InflightSlot>>,
    ttl_ms: u32,
}

impl InflightTable {
    pub fn new(ttl_ms: u32) -> Self {
        let mut slots = Vec::with_capacity(MESSAGE_ID_SPACE);
        slots.resize_with(MESSAGE_ID_SPACE, || None);
        Self { slots, ttl_ms }
    }

    pub fn ttl_ms(&self) -> u32 {
        self.ttl_ms
    }

    /// Feed `parcel` into the slot for `id`. A slot is only created by a
    /// parcel that is not rejected, and rejected parcels do not refresh it.
    pub fn feed(&mut self, id: MessageId, parcel: &str, now_ms: u32) -> FeedOutcome {
        let entry = &mut self.slots[id.slot()];
        let created = entry.is_none();
        let slot = entry.get_or_insert_with(|| InflightSlot {
            reassembly: Reassembly::new(),
            last_touch_ms: now_ms,
        });
        let outcome = slot.reassembly.feed(parcel);
        if outcome == FeedOutcome::Rejected {
            if created {
                *entry = None;
            }
        } else {
            slot.last_touch_ms = now_ms;
        }
        outcome
    }

    pub fn get(&self, id: MessageId) -> Option<&Reassembly> {
        self.slots[id.slot()].as_ref().map(|s| &s.reassembly)
    }

    /// Remove and return the slot for `id`.
    pub fn take(&mut self, id: MessageId) -> Option<Reassembly> {
        self.slots[id.slot()].take().map(|s| s.reassembly)
    }

    pub fn clear(&mut self, id: MessageId) {
        self.slots[id.slot()] = None;
    }

    /// Drop incomplete slots idle for at least the TTL. Returns how many were cleared.
    pub fn sweep(&mut self, now_ms: u32) -> usize {
        let ttl = self.ttl_ms;
        let mut evicted = 0;
        for slot in self.slots.iter_mut() {
            let expired = matches!(slot, Some(s)
                if !s.reassembly.is_completed() && elapsed_ms(now_ms, s.last_touch_ms) >= ttl);
            if expired {
                *slot = None;
                evicted += 1;
            }
        }
        evicted
    }

    /// Drop every incomplete slot regardless of age.
    pub fn purge(&mut self) -> usize {
        let mut evicted = 0;
        for slot in self.slots.iter_mut() {
            if matches!(slot, Some(s) if !s.reassembly.is_completed()) {
                *slot = None;
                evicted += 1;
            }
        }
        evicted
    }

    /// Number of occupied slots.
    pub fn active(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}
