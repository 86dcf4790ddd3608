//! # Configuration Management Module
//!
//! TOML configuration for a beacon node, loaded with `tokio::fs` and
//! deserialized with serde. Every section has defaults matching the device
//! firmware, so a file only needs the values it changes.
//!
//! ## Configuration Structure
//!
//! - [`NodeSection`] - callsign and the device model/version used in pings
//! - [`RadioSection`] - marker byte, advertisement and parcel sizes, burst timing
//! - [`IngestSection`] - dedup window, minimum content length, reassembly TTL
//! - [`EventsSection`] - event queue depth, drain budget, subscriber slots
//! - [`StoreSection`] - segmented log location and limits
//! - [`BeaconSection`] - presence ping schedule
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use beaconmesh::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Config::create_default("config.toml").await?;
//!     let config = Config::load("config.toml").await?;
//!     config.validate()?;
//!     println!("Callsign: {}", config.node.callsign);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [node]
//! callsign = "X1K7QZ"
//!
//! [radio]
//! marker = ">"
//! adv_text_max = 24
//! parcel_text_len = 18
//!
//! [store]
//! enabled = true
//! dir = "./log"
//! ```
//!
//! ## Callsign
//!
//! An empty callsign, or the legacy placeholder `geogram`, is replaced by a
//! generated one (`X1` followed by four characters from `0-9A-Z`) when the
//! node starts or when `beaconmesh init` writes a new file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::events::BusConfig;
use crate::ingest::IngestConfig;
use crate::node::NodeConfig;
use crate::radio::TransmitterConfig;
use crate::storage::StoreOptions;

/// Placeholder callsign shipped by older firmware images.
pub const LEGACY_DEFAULT_CALLSIGN: &str = "geogram";

const CALLSIGN_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// `X1` followed by four random characters from `0-9A-Z`.
pub fn generate_callsign() -> String {
    let mut rng = rand::thread_rng();
    let mut callsign = String::from("X1");
    for _ in 0..4 {
        callsign.push(CALLSIGN_ALPHABET[rng.gen_range(0..CALLSIGN_ALPHABET.len())] as char);
    }
    callsign
}

/// True when `callsign` must be replaced by a generated one.
pub fn needs_callsign(callsign: &str) -> bool {
    let trimmed = callsign.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case(LEGACY_DEFAULT_CALLSIGN)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    pub callsign: String,
    pub device_model: String,
    pub device_version: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            callsign: String::new(),
            device_model: "LT1".to_string(),
            device_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioSection {
    /// Single ASCII character in front of every payload.
    pub marker: String,
    pub adv_text_max: usize,
    pub parcel_text_len: usize,
    pub burst_ms: u64,
    pub pause_rx_during_tx: bool,
    pub want_duplicates: bool,
    pub send_jitter_ms: u64,
}

impl Default for RadioSection {
    fn default() -> Self {
        Self {
            marker: ">".to_string(),
            adv_text_max: 24,
            parcel_text_len: 18,
            burst_ms: 100,
            pause_rx_during_tx: true,
            want_duplicates: false,
            send_jitter_ms: 40,
        }
    }
}

impl RadioSection {
    pub fn marker_byte(&self) -> Result<u8> {
        match self.marker.as_bytes() {
            [b] if b.is_ascii_graphic() => Ok(*b),
            _ => Err(anyhow!(
                "radio.marker must be one printable ASCII character, got {:?}",
                self.marker
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSection {
    pub dedup_window_ms: u32,
    pub dedup_capacity: usize,
    pub min_content_len: usize,
    pub inflight_ttl_ms: u32,
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            dedup_window_ms: 2000,
            dedup_capacity: 128,
            min_content_len: 5,
            inflight_ttl_ms: 10 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsSection {
    pub queue_depth: usize,
    pub deliver_budget: usize,
    pub max_subscribers: usize,
    /// Bound on text copied into each event.
    pub max_text_bytes: usize,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            queue_depth: 32,
            deliver_budget: 12,
            max_subscribers: 4,
            max_text_bytes: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub enabled: bool,
    pub dir: String,
    pub segment_bytes: u64,
    pub max_content_bytes: usize,
    pub flush_every: u32,
    pub checksum_hex_len: usize,
    pub file_prefix: String,
    pub file_ext: String,
    pub seq_file: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: "./log".to_string(),
            segment_bytes: 1024 * 1024,
            max_content_bytes: 10_000,
            flush_every: 50,
            checksum_hex_len: 8,
            file_prefix: "messages".to_string(),
            file_ext: ".txt".to_string(),
            seq_file: ".seq".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconSection {
    pub enabled: bool,
    pub interval_secs: u64,
    pub jitter_ms: u64,
}

impl Default for BeaconSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            jitter_ms: 5000,
        }
    }
}

impl BeaconSection {
    /// Delay before the next ping: the interval plus a random jitter.
    pub fn next_delay(&self) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        };
        Duration::from_secs(self.interval_secs) + Duration::from_millis(jitter)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub radio: RadioSection,
    #[serde(default)]
    pub ingest: IngestSection,
    #[serde(default)]
    pub events: EventsSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub beacon: BeaconSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file with a freshly generated callsign
    pub async fn create_default(path: &str) -> Result<()> {
        let mut config = Config::default();
        config.ensure_callsign();
        config.save(path).await
    }

    pub async fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Replace a missing or placeholder callsign. Returns true when one was generated.
    pub fn ensure_callsign(&mut self) -> bool {
        if needs_callsign(&self.node.callsign) {
            self.node.callsign = generate_callsign();
            true
        } else {
            false
        }
    }

    pub fn validate(&self) -> Result<()> {
        let marker = self.radio.marker_byte()?;
        if self.radio.adv_text_max == 0 {
            return Err(anyhow!("radio.adv_text_max must be positive"));
        }
        // data parcel key is at least "AA1:"
        if self.radio.parcel_text_len < 4 || self.radio.parcel_text_len + 4 > self.radio.adv_text_max {
            return Err(anyhow!(
                "radio.parcel_text_len must be between 4 and adv_text_max - 4 ({})",
                self.radio.adv_text_max.saturating_sub(4)
            ));
        }
        if self.node.callsign.contains(':') || self.node.callsign.bytes().any(|b| b == marker) {
            return Err(anyhow!("node.callsign must not contain ':' or the marker"));
        }
        if self.ingest.dedup_capacity == 0 {
            return Err(anyhow!("ingest.dedup_capacity must be positive"));
        }
        if self.events.queue_depth == 0 || self.events.deliver_budget == 0 || self.events.max_subscribers == 0 {
            return Err(anyhow!("events.queue_depth, deliver_budget and max_subscribers must be positive"));
        }
        if self.store.checksum_hex_len == 0 || self.store.checksum_hex_len > 16 {
            return Err(anyhow!("store.checksum_hex_len must be between 1 and 16"));
        }
        if self.store.segment_bytes == 0 {
            return Err(anyhow!("store.segment_bytes must be positive"));
        }
        if self.store.file_prefix.is_empty() || self.store.seq_file.is_empty() {
            return Err(anyhow!("store.file_prefix and store.seq_file must be set"));
        }
        Ok(())
    }

    pub fn node_config(&self) -> Result<NodeConfig> {
        let marker = self.radio.marker_byte()?;
        let mut node = NodeConfig::new(&self.node.callsign);
        node.device_model = self.node.device_model.clone();
        node.device_version = self.node.device_version.clone();
        node.ingest = IngestConfig {
            marker,
            min_content_len: self.ingest.min_content_len,
            dedup_window_ms: self.ingest.dedup_window_ms,
            dedup_capacity: self.ingest.dedup_capacity,
            inflight_ttl_ms: self.ingest.inflight_ttl_ms,
            max_text_bytes: self.events.max_text_bytes,
        };
        node.bus = BusConfig {
            queue_depth: self.events.queue_depth,
            deliver_budget: self.events.deliver_budget,
            max_subscribers: self.events.max_subscribers,
        };
        node.transmitter = TransmitterConfig {
            marker,
            adv_text_max: self.radio.adv_text_max,
            burst: Duration::from_millis(self.radio.burst_ms),
            want_duplicates: self.radio.want_duplicates,
        };
        node.parcel_text_len = self.radio.parcel_text_len;
        node.pause_rx_during_tx = self.radio.pause_rx_during_tx;
        node.send_jitter_ms = self.radio.send_jitter_ms;
        Ok(node)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            dir: PathBuf::from(&self.store.dir),
            segment_bytes: self.store.segment_bytes,
            max_content_bytes: self.store.max_content_bytes,
            flush_every: self.store.flush_every,
            checksum_hex_len: self.store.checksum_hex_len,
            file_prefix: self.store.file_prefix.clone(),
            file_ext: self.store.file_ext.clone(),
            seq_file: self.store.seq_file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_callsign_shape() {
        for _ in 0..50 {
            let callsign = generate_callsign();
            assert_eq!(callsign.len(), 6);
            assert!(callsign.starts_with("X1"));
            assert!(callsign[2..]
                .bytes()
                .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase()));
        }
    }

    #[test]
    fn test_placeholder_callsigns_are_replaced() {
        let mut config = Config::default();
        assert!(config.ensure_callsign());
        let generated = config.node.callsign.clone();
        assert!(!config.ensure_callsign());
        assert_eq!(config.node.callsign, generated);

        config.node.callsign = "geogram".to_string();
        assert!(config.ensure_callsign());
        assert_ne!(config.node.callsign, "geogram");
    }

    #[test]
    fn test_defaults_follow_device_firmware() {
        let config = Config::default();
        assert_eq!(config.radio.marker_byte().unwrap(), b'>');
        assert_eq!(config.radio.adv_text_max, 24);
        assert_eq!(config.ingest.dedup_window_ms, 2000);
        assert_eq!(config.ingest.dedup_capacity, 128);
        assert_eq!(config.ingest.min_content_len, 5);
        assert_eq!(config.events.queue_depth, 32);
        assert_eq!(config.events.deliver_budget, 12);
        assert_eq!(config.store.segment_bytes, 1024 * 1024);
        assert_eq!(config.store.flush_every, 50);
        assert_eq!(config.store_options().segment_name(3), "messages00000003.txt");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [node]
            callsign = "X1TEST"

            [ingest]
            dedup_window_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.node.callsign, "X1TEST");
        assert_eq!(config.ingest.dedup_window_ms, 500);
        assert_eq!(config.ingest.dedup_capacity, 128);
        assert_eq!(config.radio.parcel_text_len, 18);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.radio.marker = ">>".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.radio.parcel_text_len = 22;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.node.callsign = "X1:AB".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_node_config_mapping() {
        let mut config = Config::default();
        config.node.callsign = "X1ABCD".to_string();
        config.radio.burst_ms = 250;
        let node = config.node_config().unwrap();
        assert_eq!(node.callsign, "X1ABCD");
        assert_eq!(node.transmitter.burst, Duration::from_millis(250));
        assert_eq!(node.ingest.marker, b'>');
        assert_eq!(node.bus.deliver_budget, 12);
    }

    #[test]
    fn test_beacon_delay_within_jitter() {
        let beacon = BeaconSection {
            enabled: true,
            interval_secs: 10,
            jitter_ms: 500,
        };
        for _ in 0..20 {
            let d = beacon.next_delay();
            assert!(d >= Duration::from_secs(10));
            assert!(d <= Duration::from_millis(10_500));
        }
    }
}
