//! # Storage Module - Segmented Message Log
//!
//! Append-only, size-capped log of received and sent messages.
//!
//! ## Layout
//!
//! ```text
//! log/
//! ├── .lock                 ← held exclusively while a store is open
//! ├── .seq                  ← last segment number handed out (decimal)
//! ├── messages00000001.txt  ← rotated away from, immutable
//! └── messages00000002.txt  ← tail segment, open for append
//! ```
//!
//! Each segment is a concatenation of self-framed records (see [`record`]).
//! Only the tail is ever appended to. A record is never split across
//! segments: if it would push the tail past the cap, a new segment is opened
//! first.
//!
//! ## Durability
//!
//! Every append is written through to the OS so queries always see it. The
//! data is `fsync`ed only every `flush_every` appends and on rotation or
//! close, so an abrupt power loss can lose the appends since the last sync.
//!
//! ## Duplicates
//!
//! A checksum already written to the tail segment is refused with
//! [`WriteOutcome::Duplicate`]. The set is rebuilt from the tail on open and
//! cleared on rotation, so the same checksum is accepted again in a later
//! segment.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use beaconmesh::storage::{LogStore, RecordFilter, StoreOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut store = LogStore::open(StoreOptions::new("./log")).await?;
//!     store.write("0a1b2c3d", "2024-05-01_12:30_45", "RCV", b"X1ABCD:ANY:hello").await?;
//!     let latest = store.query(&RecordFilter::default(), 10).await?;
//!     println!("{} records", latest.len());
//!     store.close().await?;
//!     Ok(())
//! }
//! ```

pub mod record;

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::{debug, info, warn};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::metrics;
use crate::validation::{validate_checksum_field, validate_fixed_field, FieldError};

pub use record::{format_timestamp, LogRecord, RecordFilter, KIND_LEN, TIMESTAMP_LEN};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid record: {0}")]
    Field(#[from] FieldError),

    #[error("log directory {0} is in use by another process")]
    Locked(PathBuf),

    #[error("sequence file {path} is corrupt: {found:?}")]
    CorruptSequence { path: PathBuf, found: String },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Result of a successful [`LogStore::write`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Appended to the given segment.
    Appended { seq: u32, bytes: usize },
    /// Checksum already present in the tail segment; nothing written.
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub dir: PathBuf,
    pub segment_bytes: u64,
    pub max_content_bytes: usize,
    pub flush_every: u32,
    pub checksum_hex_len: usize,
    pub file_prefix: String,
    pub file_ext: String,
    pub seq_file: String,
}

impl StoreOptions {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            segment_bytes: 1024 * 1024,
            max_content_bytes: 10_000,
            flush_every: 50,
            checksum_hex_len: 8,
            file_prefix: "messages".to_string(),
            file_ext: ".txt".to_string(),
            seq_file: ".seq".to_string(),
        }
    }

    pub fn segment_name(&self, seq: u32) -> String {
        format!("{}{:08}{}", self.file_prefix, seq, self.file_ext)
    }

    fn segment_path(&self, seq: u32) -> PathBuf {
        self.dir.join(self.segment_name(seq))
    }

    fn seq_path(&self) -> PathBuf {
        self.dir.join(&self.seq_file)
    }

    /// Sequence number encoded in a segment file name.
    fn parse_segment_name(&self, name: &str) -> Option<u32> {
        let mid = name
            .strip_prefix(&self.file_prefix)?
            .strip_suffix(&self.file_ext)?;
        if mid.is_empty() || !mid.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        mid.parse().ok().filter(|&seq| seq > 0)
    }
}

pub struct LogStore {
    opts: StoreOptions,
    seq: u32,
    tail: Option<File>,
    bytes: u64,
    seen: HashSet<String>,
    since_sync: u32,
    _lock: std::fs::File,
}

impl LogStore {
    /// Open (creating if needed) the log directory and its tail segment.
    pub async fn open(opts: StoreOptions) -> Result<Self, StoreError> {
        fs::create_dir_all(&opts.dir).await.map_err(io_err(&opts.dir))?;

        let lock_path = opts.dir.join(".lock");
        let lock = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .map_err(io_err(&lock_path))?;
        if lock.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked(opts.dir.clone()));
        }

        let existing = list_segments(&opts).await?;
        let newest = existing.last().copied().unwrap_or(0);
        let persisted = read_seq(&opts).await?;

        let mut store = Self {
            seq: newest.max(persisted),
            opts,
            tail: None,
            bytes: 0,
            seen: HashSet::new(),
            since_sync: 0,
            _lock: lock,
        };

        if store.seq > 0 {
            let path = store.opts.segment_path(store.seq);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(io_err(&path))?;
            store.bytes = file.metadata().await.map_err(io_err(&path))?.len();
            store.tail = Some(file);
        }
        if store.tail.is_none() || store.bytes >= store.opts.segment_bytes {
            store.open_new_segment().await?;
        } else {
            store.rebuild_seen().await?;
        }
        info!(
            "Log store open at {} (segment {}, {} bytes)",
            store.opts.dir.display(),
            store.seq,
            store.bytes
        );
        Ok(store)
    }

    pub fn options(&self) -> &StoreOptions {
        &self.opts
    }

    pub fn current_seq(&self) -> u32 {
        self.seq
    }

    pub fn current_bytes(&self) -> u64 {
        self.bytes
    }

    async fn rebuild_seen(&mut self) -> Result<(), StoreError> {
        self.seen.clear();
        let path = self.opts.segment_path(self.seq);
        let data = match fs::read(&path).await {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_err(&path)(e)),
        };
        for rec in record::parse_all(&data, self.opts.checksum_hex_len) {
            self.seen.insert(rec.checksum);
        }
        debug!("Rebuilt {} tail checksums for segment {}", self.seen.len(), self.seq);
        Ok(())
    }

    async fn sync_tail(&mut self) -> Result<(), StoreError> {
        if let Some(file) = self.tail.as_mut() {
            let path = self.opts.segment_path(self.seq);
            file.flush().await.map_err(io_err(&path))?;
            file.sync_data().await.map_err(io_err(&path))?;
        }
        self.since_sync = 0;
        Ok(())
    }

    async fn open_new_segment(&mut self) -> Result<(), StoreError> {
        self.sync_tail().await?;
        self.tail = None;
        self.seen.clear();

        let next = self.seq + 1;
        write_seq(&self.opts, next).await?;
        let path = self.opts.segment_path(next);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_err(&path))?;
        self.bytes = file.metadata().await.map_err(io_err(&path))?.len();
        self.seq = next;
        self.tail = Some(file);
        self.since_sync = 0;
        metrics::inc_segments_rotated();
        debug!("Opened segment {}", path.display());
        Ok(())
    }

    /// Append one record to the tail segment.
    pub async fn write(
        &mut self,
        checksum: &str,
        timestamp: &str,
        kind: &str,
        content: &[u8],
    ) -> Result<WriteOutcome, StoreError> {
        validate_checksum_field(checksum, self.opts.checksum_hex_len)?;
        validate_fixed_field(timestamp, TIMESTAMP_LEN, true)?;
        validate_fixed_field(kind, KIND_LEN, false)?;
        if content.len() > self.opts.max_content_bytes {
            return Err(FieldError::ContentTooLong {
                len: content.len(),
                max: self.opts.max_content_bytes,
            }
            .into());
        }

        if self.seen.contains(checksum) {
            metrics::inc_records_duplicate();
            return Ok(WriteOutcome::Duplicate);
        }

        let line = record::encode(checksum, timestamp, kind, content);
        // An oversized record still gets a segment of its own.
        if self.bytes > 0 && self.bytes + line.len() as u64 > self.opts.segment_bytes {
            self.open_new_segment().await?;
        }
        if self.tail.is_none() {
            self.open_new_segment().await?;
        }

        let path = self.opts.segment_path(self.seq);
        let Some(file) = self.tail.as_mut() else {
            return Err(io_err(&path)(std::io::Error::new(
                ErrorKind::NotFound,
                "tail segment not open",
            )));
        };
        file.write_all(&line).await.map_err(io_err(&path))?;
        file.flush().await.map_err(io_err(&path))?;

        self.bytes += line.len() as u64;
        self.seen.insert(checksum.to_string());
        self.since_sync += 1;
        if self.since_sync >= self.opts.flush_every.max(1) {
            self.sync_tail().await?;
        }
        metrics::inc_records_appended();
        Ok(WriteOutcome::Appended {
            seq: self.seq,
            bytes: line.len(),
        })
    }

    /// Up to `limit` matching records, newest first: segments by descending
    /// sequence, records within a segment in reverse append order.
    pub async fn query(&self, filter: &RecordFilter, limit: usize) -> Result<Vec<LogRecord>, StoreError> {
        let mut out = Vec::new();
        if limit == 0 {
            return Ok(out);
        }
        for seq in list_segments(&self.opts).await?.into_iter().rev() {
            let path = self.opts.segment_path(seq);
            let data = match fs::read(&path).await {
                Ok(d) => d,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(io_err(&path)(e)),
            };
            for rec in record::parse_all(&data, self.opts.checksum_hex_len).into_iter().rev() {
                if filter.matches(&rec) {
                    out.push(rec);
                    if out.len() >= limit {
                        return Ok(out);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Count well-formed records across all segments, skipping corrupt tails.
    pub async fn count_total(&self) -> Result<usize, StoreError> {
        let mut total = 0;
        for seq in list_segments(&self.opts).await? {
            let path = self.opts.segment_path(seq);
            match fs::read(&path).await {
                Ok(data) => {
                    let records = record::parse_all(&data, self.opts.checksum_hex_len);
                    let parsed: usize = records.iter().map(|r| r.size).sum();
                    if parsed < data.len() {
                        warn!(
                            "Segment {} has {} unreadable trailing bytes",
                            path.display(),
                            data.len() - parsed
                        );
                    }
                    total += records.len();
                }
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(io_err(&path)(e)),
            }
        }
        Ok(total)
    }

    /// Remove every segment and leave one fresh, empty tail. With
    /// `reset_sequence` numbering restarts at 1; otherwise it continues from
    /// the persisted counter.
    pub async fn delete_all(&mut self, reset_sequence: bool) -> Result<(), StoreError> {
        self.tail = None;
        self.seen.clear();
        self.bytes = 0;
        self.since_sync = 0;

        for seq in list_segments(&self.opts).await? {
            let path = self.opts.segment_path(seq);
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(&path)(e)),
            }
        }

        if reset_sequence {
            let path = self.opts.seq_path();
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(&path)(e)),
            }
            self.seq = 0;
        } else {
            self.seq = read_seq(&self.opts).await?;
        }
        info!("Log cleared (sequence reset: {})", reset_sequence);
        self.open_new_segment().await
    }

    /// Start a new segment regardless of the tail's size.
    pub async fn roll_segment(&mut self) -> Result<u32, StoreError> {
        self.open_new_segment().await?;
        Ok(self.seq)
    }

    /// Sync pending appends to disk.
    pub async fn flush(&mut self) -> Result<(), StoreError> {
        self.sync_tail().await
    }

    pub async fn close(mut self) -> Result<(), StoreError> {
        self.sync_tail().await?;
        self.tail = None;
        Ok(())
    }
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore")
            .field("dir", &self.opts.dir)
            .field("seq", &self.seq)
            .field("bytes", &self.bytes)
            .finish()
    }
}

/// Segment numbers present on disk, ascending.
async fn list_segments(opts: &StoreOptions) -> Result<Vec<u32>, StoreError> {
    let mut seqs = Vec::new();
    let mut entries = fs::read_dir(&opts.dir).await.map_err(io_err(&opts.dir))?;
    while let Some(entry) = entries.next_entry().await.map_err(io_err(&opts.dir))? {
        if let Some(seq) = entry.file_name().to_str().and_then(|n| opts.parse_segment_name(n)) {
            seqs.push(seq);
        }
    }
    seqs.sort_unstable();
    Ok(seqs)
}

async fn read_seq(opts: &StoreOptions) -> Result<u32, StoreError> {
    let path = opts.seq_path();
    match fs::read_to_string(&path).await {
        Ok(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(0);
            }
            trimmed.parse().map_err(|_| StoreError::CorruptSequence {
                path,
                found: trimmed.to_string(),
            })
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
        Err(e) => Err(io_err(&path)(e)),
    }
}

async fn write_seq(opts: &StoreOptions, seq: u32) -> Result<(), StoreError> {
    let path = opts.seq_path();
    fs::write(&path, seq.to_string()).await.map_err(io_err(&path))
}
