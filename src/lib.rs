//! # Beaconmesh - Offline Messaging over Radio Advertisements
//!
//! Beaconmesh turns a device with a short-range radio into a node of an
//! offline, single-hop broadcast mesh. Nodes announce themselves and exchange
//! short messages entirely through connectionless advertisements: no pairing,
//! no connections, no acknowledgements.
//!
//! ## Features
//!
//! - **Parcel Protocol**: Messages longer than one advertisement are split into
//!   a header parcel plus numbered data parcels and reassembled in any order,
//!   gated by a 4-letter checksum.
//! - **Ingestion Pipeline**: Marker filtering, strict UTF-8 text validation,
//!   content-keyed duplicate suppression over a sliding window, and TTL-bounded
//!   in-flight reassembly.
//! - **Event Bus**: Bounded drop-oldest queue between the radio callback and
//!   application subscribers.
//! - **Burst Transmitter**: Short self-terminating advertisements with optional
//!   receive pause to avoid self-reception.
//! - **Segmented Log**: Append-only, size-capped, sequence-numbered log files
//!   with self-framed records, per-segment dedup and newest-first queries.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use beaconmesh::config::Config;
//! use beaconmesh::node::{BeaconNode, BROADCAST_DESTINATION};
//! use beaconmesh::radio::loopback::LoopbackMedium;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load("config.toml").await?;
//!     config.ensure_callsign();
//!
//!     let medium = LoopbackMedium::new();
//!     let node = BeaconNode::new(config.node_config()?, medium.radio());
//!     node.start()?;
//!     node.send_ping()?;
//!     node.send_message(BROADCAST_DESTINATION, "hello from the mesh")?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`parcel`] - checksum, wire framing, split and reassembly
//! - [`validation`] - advertisement text and log field validation
//! - [`ingest`] - ingestion engine, dedup window, in-flight table
//! - [`events`] - event types and the bounded event bus
//! - [`radio`] - transport boundary, burst transmitter, loopback medium
//! - [`node`] - the pipeline object tying ingestion and transmission together
//! - [`storage`] - segmented append-only message log
//! - [`recorder`] - background task persisting observations to the log
//! - [`config`] - configuration management and validation
//! - [`clock`], [`metrics`], [`logutil`] - shared utilities
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   Transport     │ ← radio stack: scan callback + advertise
//! └─────────────────┘
//!          │ raw service data
//! ┌─────────────────┐
//! │   Ingestion     │ ← validate, dedup, classify, reassemble
//! └─────────────────┘
//!          │ events
//! ┌─────────────────┐
//! │   Event Bus     │ ← bounded queue, drained by the application
//! └─────────────────┘
//!          │ completed messages
//! ┌─────────────────┐
//! │   Log Store     │ ← segmented append-only persistence
//! └─────────────────┘
//! ```

pub mod clock;
pub mod config;
pub mod events;
pub mod ingest;
pub mod logutil;
pub mod metrics;
pub mod node;
pub mod parcel;
pub mod radio;
pub mod recorder;
pub mod storage;
pub mod validation;
