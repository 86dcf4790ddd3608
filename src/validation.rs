//! Input validation for advertisement text and log record fields

use std::str::Utf8Error;

use crate::parcel::MessageId;

/// Why an advertisement payload was not accepted as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TextRejection {
    #[error("payload does not start with the marker byte")]
    MissingMarker,

    #[error("content shorter than {min} bytes")]
    TooShort { min: usize },

    #[error("control character at byte {at}")]
    ControlCharacter { at: usize },

    #[error("invalid UTF-8 sequence at byte {at}")]
    InvalidUtf8 { at: usize },

    #[error("overlong UTF-8 encoding at byte {at}")]
    Overlong { at: usize },

    #[error("UTF-16 surrogate code point at byte {at}")]
    Surrogate { at: usize },
}

/// Validate `bytes` as one line of UTF-8 text.
///
/// Rejects C0 controls (including TAB/CR/LF), DEL, truncated or malformed
/// sequences, overlong encodings, surrogates and code points above U+10FFFF.
/// Emoji and other non-ASCII text are accepted.
pub fn validate_text_line(bytes: &[u8]) -> Result<&str, TextRejection> {
    let text = std::str::from_utf8(bytes).map_err(|e| classify_utf8_error(bytes, e))?;
    if let Some(at) = text.bytes().position(|b| b < 0x20 || b == 0x7F) {
        return Err(TextRejection::ControlCharacter { at });
    }
    Ok(text)
}

/// Name the fault at the first byte `from_utf8` refused.
fn classify_utf8_error(bytes: &[u8], err: Utf8Error) -> TextRejection {
    let at = err.valid_up_to();
    match (bytes.get(at), bytes.get(at + 1)) {
        (Some(0xC0 | 0xC1), _) => TextRejection::Overlong { at },
        (Some(0xE0), Some(0x80..=0x9F)) | (Some(0xF0), Some(0x80..=0x8F)) => TextRejection::Overlong { at },
        (Some(0xED), Some(0xA0..=0xBF)) => TextRejection::Surrogate { at },
        _ => TextRejection::InvalidUtf8 { at },
    }
}

/// Strip `marker` from a raw service-data payload and validate the remainder.
pub fn validate_advertisement(
    raw: &[u8],
    marker: u8,
    min_content_len: usize,
) -> Result<&str, TextRejection> {
    let Some((&first, content)) = raw.split_first() else {
        return Err(TextRejection::MissingMarker);
    };
    if first != marker {
        return Err(TextRejection::MissingMarker);
    }
    if content.is_empty() {
        return Err(TextRejection::TooShort {
            min: min_content_len.max(1),
        });
    }
    let text = validate_text_line(content)?;
    if text.len() < min_content_len {
        return Err(TextRejection::TooShort {
            min: min_content_len,
        });
    }
    Ok(text)
}

/// Cheap shape test: two uppercase letters, one or more digits, then `:`.
pub fn is_parcel_like(text: &[u8]) -> bool {
    if text.len() < 4 || !text[0].is_ascii_uppercase() || !text[1].is_ascii_uppercase() {
        return false;
    }
    let digits = text[2..].iter().take_while(|b| b.is_ascii_digit()).count();
    digits > 0 && text.get(2 + digits) == Some(&b':')
}

/// Message id of a parcel-shaped payload, `None` for anything else.
pub fn parcel_id(text: &[u8]) -> Option<MessageId> {
    if is_parcel_like(text) {
        MessageId::from_prefix(text)
    } else {
        None
    }
}

/// Log record field validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("checksum must be {expected} hex digits (got {found:?})")]
    Checksum { expected: usize, found: String },

    #[error("timestamp must be {expected} characters (got {found:?})")]
    Timestamp { expected: usize, found: String },

    #[error("type must be exactly {expected} characters (got {found:?})")]
    Kind { expected: usize, found: String },

    #[error("content too long ({len} bytes, max {max})")]
    ContentTooLong { len: usize, max: usize },
}

pub fn validate_checksum_field(checksum: &str, expected: usize) -> Result<(), FieldError> {
    if checksum.len() != expected || !checksum.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(FieldError::Checksum {
            expected,
            found: checksum.to_string(),
        });
    }
    Ok(())
}

pub fn validate_fixed_field(value: &str, expected: usize, timestamp: bool) -> Result<(), FieldError> {
    if value.len() == expected && !value.contains('|') {
        return Ok(());
    }
    let found = value.to_string();
    if timestamp {
        Err(FieldError::Timestamp { expected, found })
    } else {
        Err(FieldError::Kind { expected, found })
    }
}
