//! Background persistence of observations.
//!
//! Ingestion runs in the radio's callback context and must never wait on
//! storage. The recorder owns the [`LogStore`] inside a tokio task; callers
//! hand it entries through an unbounded channel with [`RecorderHandle::record`],
//! which only enqueues.
//!
//! Record types:
//! * `RCV` - a reassembled message, content `SENDER:DEST:TEXT`
//! * `TXT` - a single-line text advertisement
//! * `SNT` - a message this node sent, content `SENDER:DEST:TEXT`
//!
//! The record checksum is the CRC-32 of the type code followed by the content,
//! so a message heard again while its segment is still the tail is stored
//! once, while a sent message and its echo from a peer are kept apart.

use chrono::{DateTime, Utc};
use crc::{Crc, CRC_32_ISO_HDLC};
use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};

use crate::ingest::CompletedMessage;
use crate::parcel::OutboundMessage;
use crate::storage::{format_timestamp, LogStore, WriteOutcome};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Received,
    Text,
    Sent,
}

impl RecordKind {
    pub fn code(&self) -> &'static str {
        match self {
            RecordKind::Received => "RCV",
            RecordKind::Text => "TXT",
            RecordKind::Sent => "SNT",
        }
    }
}

/// Hex CRC-32 over the type code and content, left-padded or cut from the
/// left to `width` digits.
pub fn record_checksum(kind: RecordKind, content: &[u8], width: usize) -> String {
    let mut digest = CRC32.digest();
    digest.update(kind.code().as_bytes());
    digest.update(content);
    fixed_hex(digest.finalize(), width)
}

fn fixed_hex(value: u32, width: usize) -> String {
    let hex = format!("{:0w$x}", value, w = width.max(8));
    hex[hex.len() - width..].to_string()
}

#[derive(Debug)]
pub struct Entry {
    pub kind: RecordKind,
    pub content: Vec<u8>,
    pub at: DateTime<Utc>,
}

enum RecorderCommand {
    Record(Entry),
    Snapshot(oneshot::Sender<RecorderStats>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub appended: u64,
    pub duplicates: u64,
    pub failures: u64,
}

#[derive(Clone, Debug)]
pub struct RecorderHandle {
    tx: mpsc::UnboundedSender<RecorderCommand>,
}

impl std::fmt::Debug for RecorderCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecorderCommand::Record(e) => f.debug_tuple("Record").field(&e.kind).finish(),
            RecorderCommand::Snapshot(_) => f.write_str("Snapshot"),
            RecorderCommand::Shutdown(_) => f.write_str("Shutdown"),
        }
    }
}

impl RecorderHandle {
    /// Queue an entry stamped with the current time. Never blocks.
    pub fn record(&self, kind: RecordKind, content: impl Into<Vec<u8>>) {
        let entry = Entry {
            kind,
            content: content.into(),
            at: Utc::now(),
        };
        if self.tx.send(RecorderCommand::Record(entry)).is_err() {
            debug!("Recorder stopped; dropping {} entry", kind.code());
        }
    }

    pub fn record_completed(&self, message: &CompletedMessage) {
        self.record(
            RecordKind::Received,
            format!("{}:{}:{}", message.sender, message.destination, message.text),
        );
    }

    pub fn record_text(&self, text: &str) {
        self.record(RecordKind::Text, text);
    }

    pub fn record_sent(&self, message: &OutboundMessage) {
        self.record(
            RecordKind::Sent,
            format!("{}:{}:{}", message.sender, message.destination, message.text),
        );
    }

    pub async fn snapshot(&self) -> Option<RecorderStats> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(RecorderCommand::Snapshot(tx)).is_ok() {
            rx.await.ok()
        } else {
            None
        }
    }

    /// Persist everything queued so far, then close the store.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        let _ = self.tx.send(RecorderCommand::Shutdown(tx));
        let _ = rx.await;
    }
}

pub fn start_recorder(mut store: LogStore) -> RecorderHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<RecorderCommand>();
    let handle = RecorderHandle { tx };
    let width = store.options().checksum_hex_len;
    let max_content = store.options().max_content_bytes;

    tokio::spawn(async move {
        let mut stats = RecorderStats::default();
        let mut shutdown_ack = None;
        while let Some(cmd) = rx.recv().await {
            match cmd {
                RecorderCommand::Record(mut entry) => {
                    if entry.content.len() > max_content {
                        warn!(
                            "Truncating {} entry from {} to {} bytes",
                            entry.kind.code(),
                            entry.content.len(),
                            max_content
                        );
                        entry.content.truncate(max_content);
                    }
                    let checksum = record_checksum(entry.kind, &entry.content, width);
                    let ts = format_timestamp(entry.at);
                    match store.write(&checksum, &ts, entry.kind.code(), &entry.content).await {
                        Ok(WriteOutcome::Appended { seq, bytes }) => {
                            stats.appended += 1;
                            debug!("Recorded {} ({} bytes) in segment {}", entry.kind.code(), bytes, seq);
                        }
                        Ok(WriteOutcome::Duplicate) => stats.duplicates += 1,
                        Err(e) => {
                            stats.failures += 1;
                            warn!("Failed to record {} entry: {}", entry.kind.code(), e);
                        }
                    }
                }
                RecorderCommand::Snapshot(resp) => {
                    let _ = resp.send(stats.clone());
                }
                RecorderCommand::Shutdown(done) => {
                    shutdown_ack = Some(done);
                    break;
                }
            }
        }
        // the directory lock is released before the shutdown is acknowledged
        if let Err(e) = store.close().await {
            warn!("Failed to close log store: {}", e);
        }
        if let Some(done) = shutdown_ack {
            let _ = done.send(());
        }
    });

    handle
}
