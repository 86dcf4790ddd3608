//! Receiver-side reassembly of one logical message.
//!
//! Parcels may arrive in any order and any number of times. A key that was
//! already stored is ignored, so re-delivery is idempotent. The message
//! completes once the header and at least one data parcel are present and the
//! checksum over the data payloads (ascending index) matches the header.

use std::collections::BTreeMap;

use super::{Checksum, Header, MessageId, Parcel, ParcelKey};

/// What a single [`Reassembly::feed`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Parcel stored; message still incomplete.
    Stored,
    /// Key already present, message already completed, or the parcel belongs to another id.
    Ignored,
    /// Unparseable parcel or malformed header.
    Rejected,
    /// This parcel completed the message.
    Completed,
}

#[derive(Debug, Clone, Default)]
pub struct Reassembly {
    id: Option<MessageId>,
    header: Option<Header>,
    /// data index -> payload; index 0 is tracked through `header`
    data: BTreeMap<u32, String>,
    message: Option<String>,
    mismatch: bool,
}

impl Reassembly {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the slot to its freshly-constructed state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn feed(&mut self, text: &str) -> FeedOutcome {
        if self.message.is_some() {
            return FeedOutcome::Ignored;
        }
        match Parcel::parse(text) {
            Ok(Parcel::Single(single)) => {
                self.message = Some(single.to_string());
                FeedOutcome::Completed
            }
            Ok(Parcel::Segment { key, payload }) => self.feed_segment(key, payload),
            Err(_) => FeedOutcome::Rejected,
        }
    }

    fn feed_segment(&mut self, key: ParcelKey, payload: &str) -> FeedOutcome {
        match self.id {
            Some(id) if id != key.id => return FeedOutcome::Ignored,
            Some(_) => {}
            None => self.id = Some(key.id),
        }

        if key.is_header() {
            if self.header.is_some() {
                return FeedOutcome::Ignored;
            }
            match Header::parse(payload) {
                Ok(header) => self.header = Some(header),
                Err(_) => return FeedOutcome::Rejected,
            }
        } else {
            if self.data.contains_key(&key.index) {
                return FeedOutcome::Ignored;
            }
            self.data.insert(key.index, payload.to_string());
        }

        if self.try_complete() {
            FeedOutcome::Completed
        } else {
            FeedOutcome::Stored
        }
    }

    fn try_complete(&mut self) -> bool {
        let Some(header) = &self.header else {
            return false;
        };
        if self.data.is_empty() {
            return false;
        }
        let assembled: String = self.data.values().map(String::as_str).collect();
        if Checksum::of(assembled.as_bytes()) == header.checksum {
            self.message = Some(assembled);
            self.mismatch = false;
            true
        } else {
            self.mismatch = true;
            false
        }
    }

    pub fn is_completed(&self) -> bool {
        self.message.is_some()
    }

    /// Assembled text once completed.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn id(&self) -> Option<MessageId> {
        self.id
    }

    pub fn sender(&self) -> Option<&str> {
        self.header.as_ref().map(|h| h.sender.as_str())
    }

    pub fn destination(&self) -> Option<&str> {
        self.header.as_ref().map(|h| h.destination.as_str())
    }

    pub fn checksum(&self) -> Option<Checksum> {
        self.header.as_ref().map(|h| h.checksum)
    }

    pub fn has_header(&self) -> bool {
        self.header.is_some()
    }

    /// Number of stored parcels, header included.
    pub fn parcel_count(&self) -> usize {
        self.data.len() + usize::from(self.header.is_some())
    }

    /// True when the last completion attempt computed a different checksum.
    /// Such a message may still complete if a missing parcel arrives later.
    pub fn checksum_mismatch(&self) -> bool {
        self.mismatch
    }

    fn highest_index(&self) -> Option<u32> {
        let data_max = self.data.keys().next_back().copied();
        match (data_max, self.header.is_some()) {
            (Some(max), _) => Some(max),
            (None, true) => Some(0),
            (None, false) => None,
        }
    }

    fn has_index(&self, index: u32) -> bool {
        if index == 0 {
            self.header.is_some()
        } else {
            self.data.contains_key(&index)
        }
    }

    /// Next parcel worth asking for: the header if absent, the first gap below the
    /// highest index seen, else the index just past it.
    pub fn first_missing_parcel(&self) -> Option<ParcelKey> {
        let id = self.id?;
        if self.header.is_none() {
            return Some(ParcelKey::new(id, 0));
        }
        let highest = self.highest_index().unwrap_or(0);
        let gap = (1..=highest).find(|&i| !self.has_index(i));
        Some(ParcelKey::new(id, gap.unwrap_or(highest + 1)))
    }

    /// Every index in `0..highest` that has not been seen.
    pub fn missing_parcels(&self) -> Vec<ParcelKey> {
        let (Some(id), Some(highest)) = (self.id, self.highest_index()) else {
            return Vec::new();
        };
        (0..highest)
            .filter(|&i| !self.has_index(i))
            .map(|i| ParcelKey::new(id, i))
            .collect()
    }
}
