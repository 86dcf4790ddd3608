//! Process-wide pipeline counters.
//!
//! Counters are monotonic and updated with relaxed ordering; readers take a
//! [`snapshot`] and diff it against an earlier one.
use std::sync::atomic::{AtomicU64, Ordering};

static ADVERTS_SEEN: AtomicU64 = AtomicU64::new(0);
static ADVERTS_REJECTED: AtomicU64 = AtomicU64::new(0);
static ADVERTS_DUPLICATE: AtomicU64 = AtomicU64::new(0);
static TEXT_OBSERVED: AtomicU64 = AtomicU64::new(0);
static PARCELS_FED: AtomicU64 = AtomicU64::new(0);
static MESSAGES_COMPLETED: AtomicU64 = AtomicU64::new(0);
static INFLIGHT_EVICTED: AtomicU64 = AtomicU64::new(0);
static EVENTS_DROPPED: AtomicU64 = AtomicU64::new(0);
static BURSTS_SENT: AtomicU64 = AtomicU64::new(0);
static BURSTS_TRUNCATED: AtomicU64 = AtomicU64::new(0);
static RECORDS_APPENDED: AtomicU64 = AtomicU64::new(0);
static RECORDS_DUPLICATE: AtomicU64 = AtomicU64::new(0);
static SEGMENTS_ROTATED: AtomicU64 = AtomicU64::new(0);

pub fn inc_adverts_seen() {
    ADVERTS_SEEN.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_adverts_rejected() {
    ADVERTS_REJECTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_adverts_duplicate() {
    ADVERTS_DUPLICATE.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_text_observed() {
    TEXT_OBSERVED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_parcels_fed() {
    PARCELS_FED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_messages_completed() {
    MESSAGES_COMPLETED.fetch_add(1, Ordering::Relaxed);
}
pub fn add_inflight_evicted(n: u64) {
    INFLIGHT_EVICTED.fetch_add(n, Ordering::Relaxed);
}
pub fn inc_events_dropped() {
    EVENTS_DROPPED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_bursts_sent() {
    BURSTS_SENT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_bursts_truncated() {
    BURSTS_TRUNCATED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_records_appended() {
    RECORDS_APPENDED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_records_duplicate() {
    RECORDS_DUPLICATE.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_segments_rotated() {
    SEGMENTS_ROTATED.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Snapshot {
    pub adverts_seen: u64,
    pub adverts_rejected: u64,
    pub adverts_duplicate: u64,
    pub text_observed: u64,
    pub parcels_fed: u64,
    pub messages_completed: u64,
    pub inflight_evicted: u64,
    pub events_dropped: u64,
    pub bursts_sent: u64,
    pub bursts_truncated: u64,
    pub records_appended: u64,
    pub records_duplicate: u64,
    pub segments_rotated: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        adverts_seen: ADVERTS_SEEN.load(Ordering::Relaxed),
        adverts_rejected: ADVERTS_REJECTED.load(Ordering::Relaxed),
        adverts_duplicate: ADVERTS_DUPLICATE.load(Ordering::Relaxed),
        text_observed: TEXT_OBSERVED.load(Ordering::Relaxed),
        parcels_fed: PARCELS_FED.load(Ordering::Relaxed),
        messages_completed: MESSAGES_COMPLETED.load(Ordering::Relaxed),
        inflight_evicted: INFLIGHT_EVICTED.load(Ordering::Relaxed),
        events_dropped: EVENTS_DROPPED.load(Ordering::Relaxed),
        bursts_sent: BURSTS_SENT.load(Ordering::Relaxed),
        bursts_truncated: BURSTS_TRUNCATED.load(Ordering::Relaxed),
        records_appended: RECORDS_APPENDED.load(Ordering::Relaxed),
        records_duplicate: RECORDS_DUPLICATE.load(Ordering::Relaxed),
        segments_rotated: SEGMENTS_ROTATED.load(Ordering::Relaxed),
    }
}
