//! Projection of Unicode text onto the glasses' single-byte character set.
//!
//! The glasses render Latin-1. Text is NFKD-decomposed, combining
//! diacritics (U+0300..U+036F) are dropped so accented letters fall back to
//! their base letter, and anything at or above U+00FF is discarded.

use unicode_normalization::UnicodeNormalization;

/// Left padding byte for fixed-width display strings (`µ` in the glasses font).
pub const SPACE_SENTINEL: u8 = 0xB5;

/// Longest free text accepted by text drawing commands.
pub const TEXT_MAX_LEN: usize = 255;

fn is_combining_mark(c: char) -> bool {
    ('\u{0300}'..='\u{036F}').contains(&c)
}

/// Project `s` onto single bytes, without terminator.
pub fn to_latin1(s: &str) -> Vec<u8> {
    s.nfkd()
        .filter(|&c| !is_combining_mark(c))
        .filter_map(|c| u8::try_from(u32::from(c)).ok())
        .filter(|&b| b < 0xFF)
        .collect()
}

/// Read single-byte text back into a `String`.
pub fn from_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Variable-length text field: at most `max` bytes, NUL-terminated when shorter.
pub fn encode_text(s: &str, max: usize) -> Vec<u8> {
    terminate(to_latin1(s), max)
}

/// Truncate projected bytes to `max` and NUL-terminate them when shorter.
pub fn terminate(mut bytes: Vec<u8>, max: usize) -> Vec<u8> {
    bytes.truncate(max);
    if bytes.len() < max {
        bytes.push(0);
    }
    bytes
}

/// Fixed-width field: truncated or NUL-filled to exactly `width` bytes.
pub fn encode_fixed(s: &str, width: usize) -> Vec<u8> {
    let mut bytes = to_latin1(s);
    bytes.resize(width, 0);
    bytes
}

/// Left-pad projected bytes with [`SPACE_SENTINEL`] up to `width`.
pub fn pad_left(bytes: &[u8], width: usize) -> Vec<u8> {
    let mut padded = vec![SPACE_SENTINEL; width.saturating_sub(bytes.len())];
    padded.extend_from_slice(bytes);
    padded
}
