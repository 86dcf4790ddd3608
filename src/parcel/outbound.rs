//! Sender-side message: checksum once over the full text, then split into parcels.

use chrono::{DateTime, Utc};

use super::{encode_segment, Checksum, Header, MessageId, ParcelKey};

/// Default number of text bytes per data parcel. Leaves room for the marker byte,
/// a two-letter id, a two-digit index and the separator inside a 24-byte payload.
pub const DEFAULT_PARCEL_TEXT_LEN: usize = 18;

/// A message ready to be broadcast as a header parcel plus data parcels.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub id: MessageId,
    pub sender: String,
    pub destination: String,
    pub text: String,
    pub checksum: Checksum,
    pub created_at: DateTime<Utc>,
    parcels: Vec<String>,
}

impl OutboundMessage {
    /// Build a message with a random id.
    pub fn new(sender: &str, destination: &str, text: &str, parcel_text_len: usize) -> Self {
        Self::with_id(MessageId::random(), sender, destination, text, parcel_text_len)
    }

    pub fn with_id(
        id: MessageId,
        sender: &str,
        destination: &str,
        text: &str,
        parcel_text_len: usize,
    ) -> Self {
        let checksum = Checksum::of(text.as_bytes());
        let header = Header {
            sender: sender.to_string(),
            destination: destination.to_string(),
            checksum,
        };
        let parcels = split(id, &header, text, parcel_text_len);
        Self {
            id,
            sender: sender.to_string(),
            destination: destination.to_string(),
            text: text.to_string(),
            checksum,
            created_at: Utc::now(),
            parcels,
        }
    }

    /// All parcels, header first.
    pub fn parcels(&self) -> &[String] {
        &self.parcels
    }

    /// Parcel at `index` (0 = header), for answering retransmission requests.
    pub fn parcel(&self, index: u32) -> Option<&str> {
        self.parcels.get(index as usize).map(String::as_str)
    }

    /// Number of data parcels (excludes the header).
    pub fn data_parcel_count(&self) -> usize {
        self.parcels.len().saturating_sub(1)
    }
}

/// Produce the header parcel followed by data parcels `1..=N`.
///
/// Slices are positional, `parcel_text_len` bytes each, except that a slice never
/// ends inside a UTF-8 code point. Empty text yields a single empty data parcel.
pub fn split(id: MessageId, header: &Header, text: &str, parcel_text_len: usize) -> Vec<String> {
    let limit = parcel_text_len.max(4);
    let mut parcels = vec![encode_segment(ParcelKey::new(id, 0), &header.encode())];

    if text.is_empty() {
        parcels.push(encode_segment(ParcelKey::new(id, 1), ""));
        return parcels;
    }

    let mut start = 0usize;
    let mut index = 1u32;
    while start < text.len() {
        let mut end = (start + limit).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        parcels.push(encode_segment(ParcelKey::new(id, index), &text[start..end]));
        start = end;
        index += 1;
    }
    parcels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> MessageId {
        "QK".parse().unwrap()
    }

    #[test]
    fn splits_into_header_and_positional_slices() {
        let msg = OutboundMessage::with_id(id(), "X1ABCD", "ANY", "HELLO WORLD THIS IS A TEST", 20);
        let parcels = msg.parcels();
        assert_eq!(parcels.len(), 3);
        assert_eq!(parcels[0], format!("QK0:X1ABCD:ANY:{}", msg.checksum));
        assert_eq!(parcels[1], "QK1:HELLO WORLD THIS IS ");
        assert_eq!(parcels[2], "QK2:A TEST");
        assert_eq!(msg.data_parcel_count(), 2);
        assert_eq!(msg.parcel(2), Some("QK2:A TEST"));
        assert_eq!(msg.parcel(3), None);
    }

    #[test]
    fn never_cuts_inside_a_code_point() {
        // "é" is two bytes; a 5-byte limit would land mid-character after "abcd"
        let msg = OutboundMessage::with_id(id(), "A", "B", "abcdéfgh", 5);
        for parcel in &msg.parcels()[1..] {
            let (_, payload) = parcel.split_once(':').unwrap();
            assert!(payload.len() <= 5);
        }
        let joined: String = msg.parcels()[1..]
            .iter()
            .map(|p| p.split_once(':').unwrap().1)
            .collect();
        assert_eq!(joined, "abcdéfgh");
    }

    #[test]
    fn empty_text_has_one_empty_data_parcel() {
        let msg = OutboundMessage::with_id(id(), "A", "B", "", 18);
        assert_eq!(msg.parcels(), &["QK0:A:B:AAAA".to_string(), "QK1:".to_string()]);
    }
}
