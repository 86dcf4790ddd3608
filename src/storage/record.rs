//! Self-framed log records.
//!
//! ```text
//! SIZE|CHECKSUM|YYYY-MM-DD_HH:MM_SS|TYP|CONTENT
//! ```
//!
//! `SIZE` is the byte length of the whole record including its own digits and
//! the `|` after them. Parsing is driven by `SIZE` and the fixed field widths,
//! so `CONTENT` may hold any byte, `|` and newlines included.

use chrono::{DateTime, Utc};

/// Field delimiter.
pub const DELIM: u8 = b'|';

/// Width of a formatted timestamp (`2024-01-31_23:59_59`).
pub const TIMESTAMP_LEN: usize = 19;

/// Width of the record type (`RCV`, `SNT`, `TXT`).
pub const KIND_LEN: usize = 3;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H:%M_%S";

/// Render `at` in the fixed-width record timestamp format.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub size: usize,
    pub checksum: String,
    pub timestamp: String,
    pub kind: String,
    pub content: Vec<u8>,
}

impl LogRecord {
    pub fn content_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }
}

fn digits(mut n: usize) -> usize {
    let mut d = 1;
    while n >= 10 {
        n /= 10;
        d += 1;
    }
    d
}

/// Total record size for the given field widths, found by iterating until the
/// digit count of the size stops changing.
pub fn record_size(checksum_len: usize, content_len: usize) -> usize {
    // "|" after SIZE, then CHECKSUM|TIMESTAMP|TYP|CONTENT
    let fixed = 1 + checksum_len + 1 + TIMESTAMP_LEN + 1 + KIND_LEN + 1 + content_len;
    let mut width = digits(fixed);
    loop {
        let total = fixed + width;
        let needed = digits(total);
        if needed == width {
            return total;
        }
        width = needed;
    }
}

/// Encode a record. Field widths are the caller's responsibility.
pub fn encode(checksum: &str, timestamp: &str, kind: &str, content: &[u8]) -> Vec<u8> {
    let size = record_size(checksum.len(), content.len());
    let mut out = Vec::with_capacity(size);
    out.extend_from_slice(size.to_string().as_bytes());
    for field in [checksum.as_bytes(), timestamp.as_bytes(), kind.as_bytes()] {
        out.push(DELIM);
        out.extend_from_slice(field);
    }
    out.push(DELIM);
    out.extend_from_slice(content);
    debug_assert_eq!(out.len(), size);
    out
}

/// Parse the record at the start of `buf`. Returns the record and the number of
/// bytes it spans, or `None` when the bytes do not hold a well-formed record
/// (a corrupt or torn tail).
pub fn parse(buf: &[u8], checksum_len: usize) -> Option<(LogRecord, usize)> {
    let width = buf.iter().take(20).take_while(|b| b.is_ascii_digit()).count();
    if width == 0 || buf.get(width) != Some(&DELIM) {
        return None;
    }
    let size: usize = std::str::from_utf8(&buf[..width]).ok()?.parse().ok()?;
    let header_len = width + 1 + checksum_len + 1 + TIMESTAMP_LEN + 1 + KIND_LEN + 1;
    if size < header_len || size > buf.len() || record_size(checksum_len, size - header_len) != size {
        return None;
    }
    let rec = &buf[..size];

    let mut pos = width + 1;
    let mut field = |len: usize| -> Option<String> {
        let bytes = rec.get(pos..pos + len)?;
        if rec.get(pos + len) != Some(&DELIM) {
            return None;
        }
        pos += len + 1;
        String::from_utf8(bytes.to_vec()).ok()
    };
    let checksum = field(checksum_len)?;
    let timestamp = field(TIMESTAMP_LEN)?;
    let kind = field(KIND_LEN)?;
    let content = rec[header_len..].to_vec();

    Some((
        LogRecord {
            size,
            checksum,
            timestamp,
            kind,
            content,
        },
        size,
    ))
}

/// Parse consecutive records from a whole segment, stopping at the first
/// malformed span.
pub fn parse_all(buf: &[u8], checksum_len: usize) -> Vec<LogRecord> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < buf.len() {
        match parse(&buf[offset..], checksum_len) {
            Some((record, used)) => {
                offset += used;
                out.push(record);
            }
            None => break,
        }
    }
    out
}

/// Query predicates, ANDed. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Record type, compared case-insensitively.
    pub kind: Option<String>,
    /// Byte substring of the content.
    pub contains: Option<String>,
    /// Inclusive lower bound on the timestamp.
    pub from: Option<String>,
    /// Inclusive upper bound on the timestamp.
    pub to: Option<String>,
}

impl RecordFilter {
    pub fn matches(&self, record: &LogRecord) -> bool {
        if let Some(kind) = &self.kind {
            if !record.kind.eq_ignore_ascii_case(kind) {
                return false;
            }
        }
        // fixed-width timestamps order lexicographically
        if let Some(from) = &self.from {
            if record.timestamp.as_str() < from.as_str() {
                return false;
            }
        }
        if let Some(to) = &self.to {
            if record.timestamp.as_str() > to.as_str() {
                return false;
            }
        }
        if let Some(needle) = &self.contains {
            let needle = needle.as_bytes();
            if !needle.is_empty() && !record.content.windows(needle.len()).any(|w| w == needle) {
                return false;
            }
        }
        true
    }
}
