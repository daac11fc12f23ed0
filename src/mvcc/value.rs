//! # Multi-Version Value Codec
//!
//! Encoding, iteration, and snapshot resolution for multi-version value
//! regions. See the module docs in [`super`] for the byte layout.

use eyre::{Result, bail, ensure};

use crate::encoding::varint::{decode_varint, encode_varint, varint_len};
use crate::mvcc::{CommitStatus, PRIMORDIAL_VALUE_VERSION, TYPE_ANTIVALUE, TYPE_MVV, TransactionIndex};
use crate::page::long_record::LONGREC_TYPE;

/// Decide "primordial byte string" versus "has a multi-version overlay" from
/// the first byte alone.
pub fn is_primordial(value: &[u8]) -> bool {
    value.first() != Some(&TYPE_MVV)
}

/// Is this version body the deletion sentinel?
pub fn is_anti_value(body: &[u8]) -> bool {
    body == [TYPE_ANTIVALUE]
}

/// Would these raw bytes be mistaken for a tagged region? Such values are
/// wrapped as a version-0 entry when stored.
pub fn needs_wrapping(value: &[u8]) -> bool {
    matches!(value.first(), Some(&TYPE_MVV) | Some(&TYPE_ANTIVALUE) | Some(&LONGREC_TYPE))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionEntry {
    pub handle: u64,
    /// Offset of the body within the value region.
    pub offset: usize,
    pub length: usize,
}

/// Decode the entry list of a multi-version region. A primordial region
/// decodes as a single version-0 entry spanning the whole slice.
pub fn decode_entries(value: &[u8]) -> Result<Vec<VersionEntry>> {
    if is_primordial(value) {
        return Ok(vec![VersionEntry { handle: PRIMORDIAL_VALUE_VERSION, offset: 0, length: value.len() }]);
    }
    let mut entries = Vec::new();
    let mut at = 1;
    while at < value.len() {
        let (handle, n) = decode_varint(&value[at..])?;
        at += n;
        let (length, n) = decode_varint(&value[at..])?;
        at += n;
        ensure!(
            at + length as usize <= value.len(),
            "version body at offset {} overruns the value region ({} of {} bytes)",
            at,
            length,
            value.len() - at
        );
        entries.push(VersionEntry { handle, offset: at, length: length as usize });
        at += length as usize;
    }
    Ok(entries)
}

/// Iterate versions oldest-first, invoking `visitor(version, offset, body)`.
pub fn visit_versions<F>(value: &[u8], mut visitor: F) -> Result<()>
where
    F: FnMut(u64, usize, &[u8]) -> Result<()>,
{
    for entry in decode_entries(value)? {
        visitor(entry.handle, entry.offset, &value[entry.offset..entry.offset + entry.length])?;
    }
    Ok(())
}

/// Aggregate facts about a value region, computed in one pass. The verifier
/// uses these for its MVV counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MvvSummary {
    /// Count of entries with a non-primordial version handle.
    pub version_count: usize,
    /// Total region length.
    pub total_length: usize,
    /// Length of the newest version's body.
    pub newest_length: usize,
    /// Newest version ends in the deletion sentinel.
    pub newest_is_anti: bool,
}

impl MvvSummary {
    /// Bytes the overlay costs beyond the newest body.
    pub fn overhead(&self) -> usize {
        self.total_length - self.newest_length + usize::from(self.newest_is_anti)
    }
}

pub fn summarize(value: &[u8]) -> Result<MvvSummary> {
    let entries = decode_entries(value)?;
    let newest = entries.last();
    Ok(MvvSummary {
        version_count: entries.iter().filter(|e| e.handle != PRIMORDIAL_VALUE_VERSION).count(),
        total_length: value.len(),
        newest_length: newest.map_or(0, |e| e.length),
        newest_is_anti: newest.is_some_and(|e| is_anti_value(&value[e.offset..e.offset + e.length])),
    })
}

/// Check the ordering invariant: every entry's handle exceeds all before it.
/// The primordial entry, if present, must come first.
pub fn check_version_order(value: &[u8]) -> Result<()> {
    let entries = decode_entries(value)?;
    for pair in entries.windows(2) {
        ensure!(
            pair[1].handle > pair[0].handle,
            "version {} does not exceed prior version {}",
            pair[1].handle,
            pair[0].handle
        );
    }
    Ok(())
}

fn encode_entries(bodies: &[(u64, &[u8])]) -> Vec<u8> {
    let size = 1 + bodies
        .iter()
        .map(|(handle, body)| varint_len(*handle) + varint_len(body.len() as u64) + body.len())
        .sum::<usize>();
    let mut out = Vec::with_capacity(size);
    out.push(TYPE_MVV);
    let mut scratch = [0u8; 9];
    for (handle, body) in bodies {
        let n = encode_varint(*handle, &mut scratch);
        out.extend_from_slice(&scratch[..n]);
        let n = encode_varint(body.len() as u64, &mut scratch);
        out.extend_from_slice(&scratch[..n]);
        out.extend_from_slice(body);
    }
    out
}

/// Append a version to a value region, producing the new region bytes.
///
/// - `existing == None` starts a fresh overlay with only the new version.
/// - A primordial existing value becomes the version-0 entry.
/// - Re-writing the newest version (same handle) replaces its body.
/// - A handle below the newest is rejected; versions only move forward.
pub fn append_version(existing: Option<&[u8]>, version: u64, body: &[u8]) -> Result<Vec<u8>> {
    ensure!(version != PRIMORDIAL_VALUE_VERSION, "cannot append the primordial version");
    let mut bodies: Vec<(u64, &[u8])> = Vec::new();
    let entries;
    if let Some(existing) = existing {
        entries = decode_entries(existing)?;
        for entry in &entries {
            bodies.push((entry.handle, &existing[entry.offset..entry.offset + entry.length]));
        }
    }
    match bodies.last() {
        Some((newest, _)) if *newest == version => {
            bodies.pop();
        }
        Some((newest, _)) if *newest > version => {
            bail!(
                crate::error::ErrorKind::StateViolation(format!(
                    "version {} is below the newest existing version {}",
                    version, newest
                ))
            );
        }
        _ => {}
    }
    bodies.push((version, body));
    Ok(encode_entries(&bodies))
}

/// Resolve the value visible to `snapshot`: the newest committed version at
/// or below it. Returns `None` when the key is invisible (deleted or never
/// committed at this snapshot).
pub fn visible_at<'a>(
    value: &'a [u8],
    snapshot: u64,
    oracle: &dyn TransactionIndex,
) -> Result<Option<&'a [u8]>> {
    let mut best: Option<VersionEntry> = None;
    for entry in decode_entries(value)? {
        if entry.handle > snapshot {
            continue;
        }
        let committed = entry.handle == PRIMORDIAL_VALUE_VERSION
            || oracle.committed(entry.handle) == CommitStatus::Committed;
        if committed && best.is_none_or(|b| entry.handle >= b.handle) {
            best = Some(entry);
        }
    }
    Ok(best.and_then(|entry| {
        let body = &value[entry.offset..entry.offset + entry.length];
        (!is_anti_value(body)).then_some(body)
    }))
}
