//! Helpers for putting untrusted radio text into logs and bounded buffers.

use std::fmt::Write;

/// Longest escaped preview written to a log line.
const MAX_LOG_PREVIEW: usize = 120;

/// Escape a string for single-line logging and cap it at a short preview.
///
/// Newlines, tabs and carriage returns become `\n`, `\t`, `\r`; other control
/// characters become `\xNN`; backslashes are doubled.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_LOG_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_LOG_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Longest prefix of `s` that fits in `max_bytes` without splitting a character.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut cut = max_bytes;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    &s[..cut]
}

/// Hex dump of the first `max` bytes, for logging payloads that are not text.
pub fn hex_snippet(data: &[u8], max: usize) -> String {
    let mut out = String::with_capacity(max.min(data.len()) * 2);
    for b in data.iter().take(max) {
        let _ = write!(&mut out, "{:02x}", b);
    }
    if data.len() > max {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_newlines_and_pipes_through_other_text() {
        assert_eq!(escape_log("Line1\nLine2\r\tEnd|x"), "Line1\\nLine2\\r\\tEnd|x");
        assert_eq!(escape_log("a\\b\u{1}"), "a\\\\b\\x01");
    }

    #[test]
    fn long_input_is_capped() {
        let long = "x".repeat(500);
        let out = escape_log(&long);
        assert_eq!(out.chars().count(), MAX_LOG_PREVIEW + 1);
        assert!(out.ends_with('…'));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        // the em dash is three bytes; a 7-byte cut would land inside it
        assert_eq!(truncate_utf8("12345\u{2014}7890", 7), "12345");
        assert_eq!(truncate_utf8("ab\u{1F642}cd", 5), "ab");
        assert_eq!(truncate_utf8("hello", 10), "hello");
    }

    #[test]
    fn hex_snippet_caps_output() {
        assert_eq!(hex_snippet(&[0x3e, 0x00, 0xff], 8), "3e00ff");
        assert_eq!(hex_snippet(&[1, 2, 3], 2), "0102…");
    }
}
