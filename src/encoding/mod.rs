//! # Encoding Primitives
//!
//! Byte-level codecs shared by the page and value layers:
//!
//! - [`varint`]: variable-length integer encoding used for version handles
//!   and value lengths inside multi-version value regions.
//! - [`key`]: order-preserving key encoding. Encoded keys compare correctly
//!   with a plain byte comparison, which is what the page codec's front
//!   compression and the tree's ordering invariants are built on.

pub mod key;
pub mod varint;

pub use key::KeyEncoder;
pub use varint::{decode_varint, encode_varint, varint_len};
