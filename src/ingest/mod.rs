//! # Ingestion Engine
//!
//! Turns raw advertisement payloads into [`Event`]s. Every payload walks the
//! same steps:
//!
//! 1. sweep in-flight reassemblies idle beyond the TTL
//! 2. require the marker byte and validate the rest as one line of text
//! 3. drop content already seen inside the dedup window (keyed on content
//!    only, so the same broadcast heard from several paths counts once)
//! 4. classify as a segmented parcel or a single text line
//! 5. parcels feed the [`InflightTable`]; a completed message is published,
//!    handed to the completion hook and its slot cleared
//!
//! Rejections and duplicates are not errors. They are reported through
//! [`IngestOutcome`] and logged at trace level only.

pub mod dedup;
pub mod inflight;

use std::sync::Arc;

use log::{debug, trace};

use crate::events::{Event, EventBus};
use crate::logutil::{escape_log, hex_snippet};
use crate::metrics;
use crate::parcel::{Checksum, FeedOutcome, MessageId, Reassembly};
use crate::radio::{ScanResult, DEFAULT_MARKER};
use crate::validation::{parcel_id, validate_advertisement, TextRejection};

pub use dedup::DedupWindow;
pub use inflight::InflightTable;

#[derive(Debug, Clone, Copy)]
pub struct IngestConfig {
    pub marker: u8,
    pub min_content_len: usize,
    pub dedup_window_ms: u32,
    pub dedup_capacity: usize,
    pub inflight_ttl_ms: u32,
    /// Bound on strings copied into events.
    pub max_text_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            marker: DEFAULT_MARKER,
            min_content_len: 5,
            dedup_window_ms: 2000,
            dedup_capacity: 128,
            inflight_ttl_ms: 10 * 60 * 1000,
            max_text_bytes: 64,
        }
    }
}

/// A reassembled, checksum-verified message with its full text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedMessage {
    pub id: MessageId,
    pub sender: String,
    pub destination: String,
    pub checksum: Checksum,
    pub text: String,
}

impl CompletedMessage {
    fn from_reassembly(id: MessageId, r: &Reassembly) -> Option<Self> {
        Some(Self {
            id,
            sender: r.sender()?.to_string(),
            destination: r.destination()?.to_string(),
            checksum: r.checksum()?,
            text: r.message()?.to_string(),
        })
    }
}

/// What happened to one advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Rejected(TextRejection),
    Duplicate,
    /// Published as a single-text event.
    Text,
    /// Fed into a reassembly that did not complete.
    Parcel(FeedOutcome),
    /// Completed a message, which was published.
    Completed(MessageId),
}

pub type CompletionHook = Box<dyn FnMut(&CompletedMessage) + Send>;

pub struct IngestEngine {
    config: IngestConfig,
    dedup: DedupWindow,
    inflight: InflightTable,
    bus: Arc<EventBus>,
    on_complete: CompletionHook,
}

impl IngestEngine {
    pub fn new(config: IngestConfig, bus: Arc<EventBus>) -> Self {
        Self {
            dedup: DedupWindow::new(config.dedup_capacity, config.dedup_window_ms),
            inflight: InflightTable::new(config.inflight_ttl_ms),
            config,
            bus,
            on_complete: Box::new(|_| {}),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Replace the completion hook. It runs in the ingestion context and must
    /// not block.
    pub fn set_completion_hook<F>(&mut self, hook: F)
    where
        F: FnMut(&CompletedMessage) + Send + 'static,
    {
        self.on_complete = Box::new(hook);
    }

    pub fn clear_completion_hook(&mut self) {
        self.on_complete = Box::new(|_| {});
    }

    pub fn dedup_window_ms(&self) -> u32 {
        self.dedup.window_ms()
    }

    /// Change the dedup window at runtime; zero becomes 1 ms.
    pub fn set_dedup_window(&mut self, window_ms: u32) {
        self.dedup.set_window_ms(window_ms);
        self.config.dedup_window_ms = self.dedup.window_ms();
    }

    /// Drop every unfinished reassembly now.
    pub fn purge_inflight(&mut self) -> usize {
        let n = self.inflight.purge();
        if n > 0 {
            debug!("Purged {} in-flight reassemblies", n);
            metrics::add_inflight_evicted(n as u64);
        }
        n
    }

    pub fn inflight(&self) -> &InflightTable {
        &self.inflight
    }

    /// Reassembly state for `id`, if any parcel for it is in flight.
    pub fn reassembly(&self, id: MessageId) -> Option<&Reassembly> {
        self.inflight.get(id)
    }

    pub fn on_advertisement(&mut self, scan: &ScanResult, now_ms: u32) -> IngestOutcome {
        metrics::inc_adverts_seen();

        let evicted = self.inflight.sweep(now_ms);
        if evicted > 0 {
            debug!("Evicted {} idle reassemblies", evicted);
            metrics::add_inflight_evicted(evicted as u64);
        }

        let text = match validate_advertisement(
            &scan.data,
            self.config.marker,
            self.config.min_content_len,
        ) {
            Ok(text) => text,
            Err(reason) => {
                trace!(
                    "Rejected advert from {} ({}): {}",
                    scan.origin,
                    reason,
                    hex_snippet(&scan.data, 16)
                );
                metrics::inc_adverts_rejected();
                return IngestOutcome::Rejected(reason);
            }
        };

        if self.dedup.check_and_insert(text.as_bytes(), now_ms) {
            trace!("Duplicate advert from {}: {}", scan.origin, escape_log(text));
            metrics::inc_adverts_duplicate();
            return IngestOutcome::Duplicate;
        }

        let Some(id) = parcel_id(text.as_bytes()) else {
            debug!("Text from {} ({} dBm): {}", scan.origin, scan.rssi, escape_log(text));
            metrics::inc_text_observed();
            self.bus.push(Event::single_text(
                text,
                scan.rssi,
                scan.origin,
                self.config.max_text_bytes,
            ));
            return IngestOutcome::Text;
        };
        metrics::inc_parcels_fed();
        let outcome = self.inflight.feed(id, text, now_ms);
        trace!("Parcel {} -> {:?}", escape_log(text), outcome);
        if outcome != FeedOutcome::Completed {
            return IngestOutcome::Parcel(outcome);
        }

        let done = self
            .inflight
            .take(id)
            .and_then(|r| CompletedMessage::from_reassembly(id, &r));
        let Some(done) = done else {
            return IngestOutcome::Parcel(outcome);
        };
        debug!(
            "Message {} complete: {} -> {} ({} bytes)",
            id,
            escape_log(&done.sender),
            escape_log(&done.destination),
            done.text.len()
        );
        metrics::inc_messages_completed();
        self.bus.push(Event::message_done(
            id,
            &done.sender,
            &done.destination,
            done.checksum,
            &done.text,
            self.config.max_text_bytes,
        ));
        (self.on_complete)(&done);
        IngestOutcome::Completed(id)
    }
}

impl std::fmt::Debug for IngestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestEngine")
            .field("config", &self.config)
            .field("inflight", &self.inflight.active())
            .finish()
    }
}
