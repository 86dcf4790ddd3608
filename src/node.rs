//! # Beacon Node
//!
//! The one pipeline object a device runs. It owns the ingestion engine, the
//! event bus and the transmitter, wires the transport's scan callback into
//! ingestion, and exposes the send side (messages, pings, selective re-sends).
//!
//! ```text
//!             ┌────────────── BeaconNode ───────────────┐
//! transport ─▶│ scan sink ─▶ IngestEngine ─▶ EventBus   │─▶ drain() ─▶ subscribers
//!             │                   └─▶ completion hook ─▶│─▶ recorder
//! transport ◀─│ Transmitter ◀─ send_message / send_ping │
//!             └─────────────────────────────────────────┘
//! ```
//!
//! The scan sink may run on the radio's thread; ingestion state sits behind a
//! mutex that only the sink and configuration calls take.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info};
use rand::Rng;

use crate::clock::MillisClock;
use crate::events::{BusConfig, Event, EventBus, SubscriptionToken};
use crate::ingest::{IngestConfig, IngestEngine, IngestOutcome};
use crate::logutil::escape_log;
use crate::parcel::outbound::DEFAULT_PARCEL_TEXT_LEN;
use crate::parcel::OutboundMessage;
use crate::radio::{ScanResult, ScanSink, Transmitter, TransmitterConfig, Transport, TransportError};
use crate::recorder::RecorderHandle;

/// Destination used for messages addressed to everyone in range.
pub const BROADCAST_DESTINATION: &str = "ANY";

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub callsign: String,
    pub device_model: String,
    pub device_version: String,
    pub ingest: IngestConfig,
    pub bus: BusConfig,
    pub transmitter: TransmitterConfig,
    pub parcel_text_len: usize,
    pub pause_rx_during_tx: bool,
    /// Upper bound of the random pause between parcels of one message.
    pub send_jitter_ms: u64,
}

impl NodeConfig {
    pub fn new(callsign: &str) -> Self {
        Self {
            callsign: callsign.to_string(),
            device_model: "LT1".to_string(),
            device_version: env!("CARGO_PKG_VERSION").to_string(),
            ingest: IngestConfig::default(),
            bus: BusConfig::default(),
            transmitter: TransmitterConfig::default(),
            parcel_text_len: DEFAULT_PARCEL_TEXT_LEN,
            pause_rx_during_tx: true,
            send_jitter_ms: 0,
        }
    }
}

fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

pub struct BeaconNode<T: Transport> {
    config: NodeConfig,
    clock: MillisClock,
    bus: Arc<EventBus>,
    ingest: Arc<Mutex<IngestEngine>>,
    transmitter: Mutex<Transmitter<T>>,
    recorder: Option<RecorderHandle>,
}

impl<T: Transport> BeaconNode<T> {
    pub fn new(config: NodeConfig, mut transport: T) -> Self {
        let clock = MillisClock::new();
        let bus = Arc::new(EventBus::new(config.bus));
        let ingest = Arc::new(Mutex::new(IngestEngine::new(config.ingest, bus.clone())));
        transport.set_scan_sink(scan_sink(ingest.clone(), clock));
        let transmitter = Mutex::new(Transmitter::new(transport, config.transmitter));
        Self {
            config,
            clock,
            bus,
            ingest,
            transmitter,
            recorder: None,
        }
    }

    pub fn callsign(&self) -> &str {
        &self.config.callsign
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Lock the ingestion engine for inspection or runtime tuning.
    pub fn ingest(&self) -> MutexGuard<'_, IngestEngine> {
        relock(&self.ingest)
    }

    pub fn transmitter(&self) -> MutexGuard<'_, Transmitter<T>> {
        relock(&self.transmitter)
    }

    pub fn start(&self) -> Result<(), TransportError> {
        info!("Node {} listening", self.config.callsign);
        self.transmitter().start_listening()
    }

    pub fn stop(&self) -> Result<(), TransportError> {
        self.transmitter().stop_listening()
    }

    /// Persist completed messages, single texts and this node's own sends.
    pub fn attach_recorder(&mut self, recorder: RecorderHandle) {
        let on_complete = recorder.clone();
        self.ingest()
            .set_completion_hook(move |m| on_complete.record_completed(m));
        let on_text = recorder.clone();
        let token = self.bus.subscribe(move |event| {
            if let Event::SingleText { text, .. } = event {
                on_text.record_text(text);
            }
        });
        if token.is_none() {
            log::warn!("Subscriber table full; single texts will not be recorded");
        }
        self.recorder = Some(recorder);
    }

    /// Feed one scan result through ingestion using the node's clock.
    pub fn on_scan_result(&self, scan: &ScanResult) -> IngestOutcome {
        self.ingest_at(scan, self.clock.now_ms())
    }

    /// Feed one scan result with an explicit timestamp (replays, tests).
    pub fn ingest_at(&self, scan: &ScanResult, now_ms: u32) -> IngestOutcome {
        relock(&self.ingest).on_advertisement(scan, now_ms)
    }

    pub fn subscribe<F>(&self, callback: F) -> Option<SubscriptionToken>
    where
        F: FnMut(&Event) + Send + 'static,
    {
        self.bus.subscribe(callback)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) {
        self.bus.unsubscribe(token)
    }

    /// Deliver up to one budget of queued events to subscribers.
    pub fn drain_events(&self) -> usize {
        self.bus.drain()
    }

    /// `+CALLSIGN#MODEL-VERSION`
    pub fn ping_message(&self) -> String {
        format!(
            "+{}#{}-{}",
            self.config.callsign, self.config.device_model, self.config.device_version
        )
    }

    /// Broadcast the presence ping. Returns false when it does not fit in one
    /// advertisement and was not sent.
    pub fn send_ping(&self) -> Result<bool, TransportError> {
        let ping = self.ping_message();
        let max = self.config.transmitter.adv_text_max;
        if ping.len() > max {
            debug!("Ping {} exceeds {} bytes; skipped", escape_log(&ping), max);
            return Ok(false);
        }
        self.send_text(&ping)?;
        Ok(true)
    }

    /// Broadcast one single-line text burst.
    pub fn send_text(&self, text: &str) -> Result<usize, TransportError> {
        self.transmitter()
            .send_text(text, self.config.pause_rx_during_tx)
    }

    /// Split `text` into parcels and broadcast them, header first.
    pub fn send_message(&self, destination: &str, text: &str) -> Result<OutboundMessage, TransportError> {
        let message = OutboundMessage::new(
            &self.config.callsign,
            destination,
            text,
            self.config.parcel_text_len,
        );
        let max = self.config.transmitter.adv_text_max;
        if let Some(long) = message.parcels().iter().find(|p| p.len() > max) {
            return Err(TransportError::TooLong {
                len: long.len(),
                max,
            });
        }
        for (i, parcel) in message.parcels().iter().enumerate() {
            if i > 0 {
                self.jitter();
            }
            self.send_text(parcel)?;
        }
        info!(
            "Sent message {} to {} in {} parcels",
            message.id,
            escape_log(destination),
            message.parcels().len()
        );
        if let Some(recorder) = &self.recorder {
            recorder.record_sent(&message);
        }
        Ok(message)
    }

    /// Re-broadcast selected parcels of an earlier message. Unknown indices are
    /// skipped. Returns how many parcels went out.
    pub fn resend_parcels(&self, message: &OutboundMessage, indices: &[u32]) -> Result<usize, TransportError> {
        let mut sent = 0;
        for &index in indices {
            let Some(parcel) = message.parcel(index) else {
                debug!("Message {} has no parcel {}", message.id, index);
                continue;
            };
            if sent > 0 {
                self.jitter();
            }
            self.send_text(parcel)?;
            sent += 1;
        }
        Ok(sent)
    }

    fn jitter(&self) {
        if self.config.send_jitter_ms == 0 {
            return;
        }
        let ms = rand::thread_rng().gen_range(0..=self.config.send_jitter_ms);
        std::thread::sleep(Duration::from_millis(ms));
    }
}

fn scan_sink(ingest: Arc<Mutex<IngestEngine>>, clock: MillisClock) -> ScanSink {
    Arc::new(move |scan: ScanResult| {
        let now = clock.now_ms();
        relock(&ingest).on_advertisement(&scan, now);
    })
}
