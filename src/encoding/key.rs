//! # Order-Preserving Key Encoding
//!
//! Keys stored in pages are opaque byte strings whose lexicographic order is
//! the tree order. This module encodes typed values into that form so a plain
//! byte comparison sorts them correctly, which is what the page codec's front
//! compression (elided byte counts against the preceding key) relies on.
//!
//! ## Type Prefix Scheme
//!
//! Each encoded segment starts with a prefix byte fixing the order between
//! types:
//!
//! ```text
//! 0x01  NULL
//! 0x12  negative integer (two's complement, bit-inverted length ordering)
//! 0x14  zero
//! 0x16  positive integer (length byte + big-endian magnitude)
//! 0x20  text
//! 0x21  blob
//! 0xFF  MAX_KEY sentinel (never stored, used as an upper bound)
//! ```
//!
//! ## Text and Blob Encoding
//!
//! Byte strings are escaped so embedded `0x00` bytes cannot collide with the
//! two-byte terminator:
//!
//! ```text
//! 0x00 -> 0x00 0xFF
//! terminator: 0x00 0x00
//! ```
//!
//! Empty strings therefore sort before all non-empty strings of the same
//! type, and the terminator never compares above a content byte.
//!
//! The prefix byte is also what makes front compression effective: every text
//! key shares at least the prefix byte with its page predecessor, so the
//! elided byte count of a text key is always at least one.

use eyre::{Result, bail, ensure};

pub const PREFIX_NULL: u8 = 0x01;
pub const PREFIX_NEG_INT: u8 = 0x12;
pub const PREFIX_ZERO: u8 = 0x14;
pub const PREFIX_POS_INT: u8 = 0x16;
pub const PREFIX_TEXT: u8 = 0x20;
pub const PREFIX_BLOB: u8 = 0x21;
pub const PREFIX_MAX: u8 = 0xFF;

const TERMINATOR: [u8; 2] = [0x00, 0x00];

/// Append-style encoder producing a composite key.
#[derive(Debug, Default)]
pub struct KeyEncoder {
    buf: Vec<u8>,
}

impl KeyEncoder {
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(64) }
    }

    pub fn append_null(&mut self) -> &mut Self {
        self.buf.push(PREFIX_NULL);
        self
    }

    pub fn append_int(&mut self, value: i64) -> &mut Self {
        if value == 0 {
            self.buf.push(PREFIX_ZERO);
        } else if value > 0 {
            let magnitude = value as u64;
            let bytes = magnitude.to_be_bytes();
            let skip = magnitude.leading_zeros() as usize / 8;
            self.buf.push(PREFIX_POS_INT);
            self.buf.push((8 - skip) as u8);
            self.buf.extend_from_slice(&bytes[skip..]);
        } else {
            // Shorter magnitudes are closer to zero, so the length byte is
            // complemented to make them sort later.
            let magnitude = value.unsigned_abs();
            let bytes = (!magnitude).wrapping_add(1).to_be_bytes();
            let skip = magnitude.leading_zeros() as usize / 8;
            self.buf.push(PREFIX_NEG_INT);
            self.buf.push(!((8 - skip) as u8));
            self.buf.extend_from_slice(&bytes[skip..]);
        }
        self
    }

    pub fn append_text(&mut self, text: &str) -> &mut Self {
        self.append_escaped(PREFIX_TEXT, text.as_bytes())
    }

    pub fn append_blob(&mut self, bytes: &[u8]) -> &mut Self {
        self.append_escaped(PREFIX_BLOB, bytes)
    }

    fn append_escaped(&mut self, prefix: u8, bytes: &[u8]) -> &mut Self {
        self.buf.push(prefix);
        for &b in bytes {
            self.buf.push(b);
            if b == 0x00 {
                self.buf.push(0xFF);
            }
        }
        self.buf.extend_from_slice(&TERMINATOR);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

/// Encode a single text key. The common case for tree and directory names.
pub fn encode_text(text: &str) -> Vec<u8> {
    let mut enc = KeyEncoder::new();
    enc.append_text(text);
    enc.finish()
}

/// Decode a single text key produced by [`encode_text`].
pub fn decode_text(key: &[u8]) -> Result<String> {
    ensure!(!key.is_empty(), "empty key");
    ensure!(key[0] == PREFIX_TEXT, "key is not a text key (prefix {:#04x})", key[0]);

    let mut out = Vec::with_capacity(key.len());
    let mut index = 1;
    loop {
        ensure!(index < key.len(), "unterminated text key");
        let b = key[index];
        if b == 0x00 {
            ensure!(index + 1 < key.len(), "truncated escape in text key");
            match key[index + 1] {
                0x00 => break,
                0xFF => {
                    out.push(0x00);
                    index += 2;
                }
                other => bail!("invalid escape byte {:#04x} in text key", other),
            }
        } else {
            out.push(b);
            index += 1;
        }
    }
    String::from_utf8(out).map_err(|e| eyre::eyre!("text key is not valid utf-8: {}", e))
}
