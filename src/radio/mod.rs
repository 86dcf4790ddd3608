//! # Radio Boundary
//!
//! The radio stack is an external collaborator. This module defines the seam
//! ([`Transport`]) through which the node listens for advertisements and
//! broadcasts its own, plus the burst [`Transmitter`] built on top of it.
//!
//! ```text
//! radio stack ──scan callback──▶ ScanSink ──▶ IngestEngine
//! Transmitter ──advertise(payload, burst)──▶ radio stack
//! ```
//!
//! [`loopback`] provides an in-memory medium used by the CLI simulator and the
//! integration tests.

pub mod loopback;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use log::{debug, trace, warn};

use crate::logutil::{escape_log, truncate_utf8};
use crate::metrics;

/// Default sentinel byte in front of every payload this application emits.
pub const DEFAULT_MARKER: u8 = b'>';

/// Default room for text after the marker in one advertisement.
pub const DEFAULT_ADV_TEXT_MAX: usize = 24;

/// Six-byte hardware address of the advertiser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Address(pub [u8; 6]);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a[0], a[1], a[2], a[3], a[4], a[5]
        )
    }
}

impl FromStr for Address {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 6];
        let mut parts = s.split(':');
        for byte in out.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| TransportError::BadAddress(s.to_string()))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| TransportError::BadAddress(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(TransportError::BadAddress(s.to_string()));
        }
        Ok(Address(out))
    }
}

/// One advertisement as delivered by the scan callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    /// Raw service-data bytes, marker included.
    pub data: Bytes,
    pub rssi: i8,
    pub origin: Address,
}

impl ScanResult {
    pub fn new(data: impl Into<Bytes>, rssi: i8, origin: Address) -> Self {
        Self {
            data: data.into(),
            rssi,
            origin,
        }
    }
}

/// Callback the transport invokes for every advertisement it hears. It may be
/// called from the radio's own thread.
pub type ScanSink = Arc<dyn Fn(ScanResult) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not listening")]
    NotListening,
    #[error("radio failure: {0}")]
    Radio(String),
    #[error("refusing to advertise an empty payload")]
    EmptyPayload,
    #[error("parcel of {len} bytes exceeds the {max}-byte advertisement")]
    TooLong { len: usize, max: usize },
    #[error("invalid address {0:?}")]
    BadAddress(String),
}

/// Scan and advertise primitives supplied by the radio stack.
pub trait Transport: Send {
    /// Install the scan callback. Replaces any previous sink.
    fn set_scan_sink(&mut self, sink: ScanSink);

    fn start_listening(&mut self, want_duplicates: bool) -> Result<(), TransportError>;

    fn stop_listening(&mut self) -> Result<(), TransportError>;

    fn is_listening(&self) -> bool;

    /// Advertise `payload` for `duration`, returning once the burst is over.
    fn advertise(&mut self, payload: &[u8], duration: Duration) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, Copy)]
pub struct TransmitterConfig {
    pub marker: u8,
    pub adv_text_max: usize,
    pub burst: Duration,
    pub want_duplicates: bool,
}

impl Default for TransmitterConfig {
    fn default() -> Self {
        Self {
            marker: DEFAULT_MARKER,
            adv_text_max: DEFAULT_ADV_TEXT_MAX,
            burst: Duration::from_millis(100),
            want_duplicates: false,
        }
    }
}

/// Sends text as short, self-terminating advertisement bursts.
pub struct Transmitter<T: Transport> {
    transport: T,
    config: TransmitterConfig,
}

impl<T: Transport> Transmitter<T> {
    pub fn new(transport: T, config: TransmitterConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &TransmitterConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Build the on-air payload: marker followed by `text`, cut to the
    /// advertisement limit on a character boundary.
    pub fn frame(&self, text: &str) -> Bytes {
        let body = truncate_utf8(text, self.config.adv_text_max);
        let mut buf = BytesMut::with_capacity(1 + body.len());
        buf.put_u8(self.config.marker);
        buf.put_slice(body.as_bytes());
        buf.freeze()
    }

    /// Broadcast `text` for one burst. Returns the number of text bytes sent.
    ///
    /// With `pause_rx` set, listening is stopped for the burst and restarted
    /// afterwards, even when the advertisement fails.
    pub fn send_text(&mut self, text: &str, pause_rx: bool) -> Result<usize, TransportError> {
        if text.is_empty() {
            return Err(TransportError::EmptyPayload);
        }
        let payload = self.frame(text);
        let sent = payload.len() - 1;
        if sent < text.len() {
            warn!(
                "Advertisement truncated from {} to {} bytes: {}",
                text.len(),
                sent,
                escape_log(text)
            );
            metrics::inc_bursts_truncated();
        }

        let resume = pause_rx && self.transport.is_listening();
        if resume {
            self.transport.stop_listening()?;
        }
        let result = self.transport.advertise(&payload, self.config.burst);
        if resume {
            if let Err(e) = self.transport.start_listening(self.config.want_duplicates) {
                warn!("Failed to resume listening after burst: {}", e);
            }
        }
        result?;

        metrics::inc_bursts_sent();
        trace!("Burst sent ({} bytes): {}", sent, escape_log(&String::from_utf8_lossy(&payload[1..])));
        Ok(sent)
    }

    pub fn start_listening(&mut self) -> Result<(), TransportError> {
        debug!("Listening (duplicates: {})", self.config.want_duplicates);
        self.transport.start_listening(self.config.want_duplicates)
    }

    pub fn stop_listening(&mut self) -> Result<(), TransportError> {
        self.transport.stop_listening()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        listening: bool,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Transport for RecordingTransport {
        fn set_scan_sink(&mut self, _sink: ScanSink) {}

        fn start_listening(&mut self, _want_duplicates: bool) -> Result<(), TransportError> {
            self.listening = true;
            self.calls.lock().unwrap().push("start".into());
            Ok(())
        }

        fn stop_listening(&mut self) -> Result<(), TransportError> {
            self.listening = false;
            self.calls.lock().unwrap().push("stop".into());
            Ok(())
        }

        fn is_listening(&self) -> bool {
            self.listening
        }

        fn advertise(&mut self, payload: &[u8], _d: Duration) -> Result<(), TransportError> {
            let text = String::from_utf8_lossy(payload).into_owned();
            self.calls.lock().unwrap().push(format!("adv {text}"));
            Ok(())
        }
    }

    #[test]
    fn frames_with_marker_and_truncates() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let transport = RecordingTransport {
            listening: false,
            calls: calls.clone(),
        };
        let mut tx = Transmitter::new(
            transport,
            TransmitterConfig {
                adv_text_max: 5,
                ..TransmitterConfig::default()
            },
        );
        assert_eq!(tx.send_text("HELLO WORLD", false).unwrap(), 5);
        assert_eq!(*calls.lock().unwrap(), vec![">HELLO"]);
    }

    #[test]
    fn truncation_keeps_characters_whole() {
        let tx = Transmitter::new(
            RecordingTransport::default(),
            TransmitterConfig {
                adv_text_max: 4,
                ..TransmitterConfig::default()
            },
        );
        // "é" is two bytes; a cut at 4 would split the second one
        assert_eq!(&tx.frame("aéé")[..], ">aé".as_bytes());
    }

    #[test]
    fn pause_rx_wraps_the_burst() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let transport = RecordingTransport {
            listening: true,
            calls: calls.clone(),
        };
        let mut tx = Transmitter::new(transport, TransmitterConfig::default());
        tx.send_text("PING1", true).unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["stop", "adv >PING1", "start"]);
        assert!(tx.transport().is_listening());
    }

    #[test]
    fn empty_text_is_refused() {
        let mut tx = Transmitter::new(RecordingTransport::default(), TransmitterConfig::default());
        assert!(matches!(tx.send_text("", false), Err(TransportError::EmptyPayload)));
    }

    #[test]
    fn address_display_and_parse() {
        let a = Address([0x02, 0, 0, 0, 0xAB, 0x01]);
        assert_eq!(a.to_string(), "02:00:00:00:AB:01");
        assert_eq!("02:00:00:00:AB:01".parse::<Address>().unwrap(), a);
        assert!("02:00".parse::<Address>().is_err());
    }
}
