//! # Vellum Configuration Module
//!
//! This module centralizes all configuration constants for the engine core.
//! Constants are grouped by functional area and interdependencies are
//! documented and enforced through compile-time assertions.
//!
//! ## Why Centralization?
//!
//! The page layout, the journal format, and the verifier all share the same
//! page-address and timestamp vocabulary. Scattering the constants that tie
//! them together invites mismatch bugs, so every layout constant lives in
//! [`constants`] and is imported from there rather than redefined locally.

pub mod constants;
pub use constants::*;
