//! # Parcel Codec
//!
//! Wire framing for messages carried over short advertisement payloads.
//!
//! A parcel is one advertisement's worth of text. It comes in two shapes:
//!
//! ```text
//! single command : HELLO-THERE            (no ':' anywhere)
//! segmented unit : <ID><INDEX>:<PAYLOAD>  e.g. "QK0:X1ABCD:ANY:MBAA", "QK1:hello world"
//! ```
//!
//! `ID` is exactly two uppercase letters, `INDEX` a decimal integer. Index `0` is
//! the header parcel whose payload is `SENDER:DEST:CHECKSUM`; indices `1..=N` carry
//! contiguous slices of the message text.
//!
//! - [`outbound`] - sender side: checksum once, split into parcels
//! - [`reassembly`] - receiver side: idempotent feed, checksum-gated completion

pub mod outbound;
pub mod reassembly;

use std::fmt;
use std::str::FromStr;

pub use outbound::OutboundMessage;
pub use reassembly::{FeedOutcome, Reassembly};

/// Separator between a parcel key and its payload, and between header fields.
pub const KEY_SEPARATOR: char = ':';

/// Number of letters in a [`Checksum`].
pub const CHECKSUM_LEN: usize = 4;

/// Number of distinct message ids (`AA`..=`ZZ`).
pub const MESSAGE_ID_SPACE: usize = 26 * 26;

/// Four-letter additive digest used to detect corrupted or truncated reassembly.
///
/// Not cryptographic: collisions are expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; CHECKSUM_LEN]);

impl Checksum {
    /// Checksum reported for empty text.
    pub const EMPTY: Checksum = Checksum(*b"AAAA");

    /// Digest `data`: sum the bytes, then emit `'A' + sum % 26` four times,
    /// dividing the sum by 26 after each letter.
    pub fn of(data: &[u8]) -> Self {
        if data.is_empty() {
            return Self::EMPTY;
        }
        let mut sum: u64 = data.iter().map(|&b| b as u64).sum();
        let mut letters = [b'A'; CHECKSUM_LEN];
        for letter in letters.iter_mut() {
            *letter = b'A' + (sum % 26) as u8;
            sum /= 26;
        }
        Checksum(letters)
    }

    pub fn as_str(&self) -> &str {
        // Always four ASCII uppercase letters.
        std::str::from_utf8(&self.0).unwrap_or("AAAA")
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Checksum {
    type Err = ParcelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != CHECKSUM_LEN || !bytes.iter().all(u8::is_ascii_uppercase) {
            return Err(ParcelError::InvalidChecksum(s.to_string()));
        }
        let mut letters = [0u8; CHECKSUM_LEN];
        letters.copy_from_slice(bytes);
        Ok(Checksum(letters))
    }
}

/// Convenience wrapper over [`Checksum::of`] for text.
pub fn checksum(text: &str) -> Checksum {
    Checksum::of(text.as_bytes())
}

/// Two uppercase letters identifying one logical message on air.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId([u8; 2]);

impl MessageId {
    pub fn new(first: u8, second: u8) -> Option<Self> {
        if first.is_ascii_uppercase() && second.is_ascii_uppercase() {
            Some(MessageId([first, second]))
        } else {
            None
        }
    }

    /// Parse the leading two bytes of `bytes` as an id.
    pub fn from_prefix(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [a, b, ..] => Self::new(*a, *b),
            _ => None,
        }
    }

    /// Draw a uniformly random id.
    pub fn random() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        MessageId([b'A' + rng.gen_range(0..26u8), b'A' + rng.gen_range(0..26u8)])
    }

    /// Dense index in `0..MESSAGE_ID_SPACE`.
    pub fn slot(&self) -> usize {
        (self.0[0] - b'A') as usize * 26 + (self.0[1] - b'A') as usize
    }

    pub fn from_slot(slot: usize) -> Option<Self> {
        if slot >= MESSAGE_ID_SPACE {
            return None;
        }
        Some(MessageId([b'A' + (slot / 26) as u8, b'A' + (slot % 26) as u8]))
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("AA")
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageId {
    type Err = ParcelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.as_bytes() {
            [a, b] => Self::new(*a, *b).ok_or_else(|| ParcelError::InvalidId(s.to_string())),
            _ => Err(ParcelError::InvalidId(s.to_string())),
        }
    }
}

/// `<ID><INDEX>` key of a segmented parcel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParcelKey {
    pub id: MessageId,
    pub index: u32,
}

impl ParcelKey {
    pub fn new(id: MessageId, index: u32) -> Self {
        Self { id, index }
    }

    pub fn is_header(&self) -> bool {
        self.index == 0
    }
}

impl fmt::Display for ParcelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.id, self.index)
    }
}

/// Parsed header payload: `SENDER:DEST:CHECKSUM`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub sender: String,
    pub destination: String,
    pub checksum: Checksum,
}

impl Header {
    /// Split on the first two separators; everything after the second is the checksum.
    pub fn parse(payload: &str) -> Result<Self, ParcelError> {
        let mut fields = payload.splitn(3, KEY_SEPARATOR);
        let (Some(sender), Some(destination), Some(checksum)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(ParcelError::MalformedHeader(payload.to_string()));
        };
        Ok(Header {
            sender: sender.to_string(),
            destination: destination.to_string(),
            checksum: checksum.parse()?,
        })
    }

    pub fn encode(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.sender,
            self.destination,
            self.checksum,
            sep = KEY_SEPARATOR
        )
    }
}

/// One wire unit, borrowed from the text it was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parcel<'a> {
    /// Standalone short message with no separator.
    Single(&'a str),
    /// `<ID><INDEX>:<PAYLOAD>`
    Segment { key: ParcelKey, payload: &'a str },
}

impl<'a> Parcel<'a> {
    /// Classify `text`. Text without a separator is a single command; text with a
    /// separator must carry a valid segmented key.
    pub fn parse(text: &'a str) -> Result<Self, ParcelError> {
        if text.is_empty() {
            return Err(ParcelError::Empty);
        }
        let Some((key, payload)) = text.split_once(KEY_SEPARATOR) else {
            return Ok(Parcel::Single(text));
        };
        let id = MessageId::from_prefix(key.as_bytes())
            .ok_or_else(|| ParcelError::InvalidId(key.to_string()))?;
        let digits = &key[2..];
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParcelError::InvalidIndex(key.to_string()));
        }
        let index: u32 = digits
            .parse()
            .map_err(|_| ParcelError::InvalidIndex(key.to_string()))?;
        Ok(Parcel::Segment {
            key: ParcelKey::new(id, index),
            payload,
        })
    }
}

/// Render a segmented parcel.
pub fn encode_segment(key: ParcelKey, payload: &str) -> String {
    format!("{key}{KEY_SEPARATOR}{payload}")
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParcelError {
    #[error("empty parcel")]
    Empty,

    #[error("invalid message id in {0:?}")]
    InvalidId(String),

    #[error("invalid parcel index in {0:?}")]
    InvalidIndex(String),

    #[error("invalid checksum {0:?}")]
    InvalidChecksum(String),

    #[error("malformed header payload {0:?}")]
    MalformedHeader(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_empty_is_sentinel() {
        assert_eq!(checksum(""), Checksum::EMPTY);
        assert_eq!(checksum("").to_string(), "AAAA");
    }

    #[test]
    fn checksum_letters_follow_base26_digits() {
        // 'A' = 65 -> 65 % 26 = 13 ('N'), 65 / 26 = 2 ('C'), then 0, 0
        assert_eq!(checksum("A").as_str(), "NCAA");
        assert_eq!(checksum("hello"), checksum("hello"));
        // additive: order does not matter
        assert_eq!(checksum("ab"), checksum("ba"));
    }

    #[test]
    fn message_id_slot_round_trip() {
        let id: MessageId = "QK".parse().unwrap();
        assert_eq!(MessageId::from_slot(id.slot()), Some(id));
        assert_eq!("AA".parse::<MessageId>().unwrap().slot(), 0);
        assert_eq!("ZZ".parse::<MessageId>().unwrap().slot(), MESSAGE_ID_SPACE - 1);
        assert!("Qk".parse::<MessageId>().is_err());
        assert!(MessageId::from_slot(MESSAGE_ID_SPACE).is_none());
    }

    #[test]
    fn parse_single_and_segment() {
        assert_eq!(Parcel::parse("+X1ABCD#LT1").unwrap(), Parcel::Single("+X1ABCD#LT1"));
        match Parcel::parse("QK12:a:b:c").unwrap() {
            Parcel::Segment { key, payload } => {
                assert_eq!(key.to_string(), "QK12");
                assert_eq!(payload, "a:b:c");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(Parcel::parse("qk1:x").is_err());
        assert!(Parcel::parse("QK:x").is_err());
        assert!(Parcel::parse("QK1a:x").is_err());
        assert_eq!(Parcel::parse(""), Err(ParcelError::Empty));
    }

    #[test]
    fn header_parse_keeps_remainder_as_checksum() {
        let h = Header::parse("X1ABCD:ANY:MBAA").unwrap();
        assert_eq!(h.sender, "X1ABCD");
        assert_eq!(h.destination, "ANY");
        assert_eq!(h.checksum.as_str(), "MBAA");
        assert_eq!(h.encode(), "X1ABCD:ANY:MBAA");
        assert!(Header::parse("X1ABCD:ANY").is_err());
        assert!(Header::parse("X1ABCD:ANY:MB").is_err());
    }
}
