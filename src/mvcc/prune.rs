//! # Version Pruning
//!
//! Pruning shrinks a multi-version region once old versions can no longer be
//! reached. It is an optimization only: the value any live snapshot resolves
//! is the same before and after. It runs under the enclosing page's exclusive
//! claim, invoked by the verifier's prune pass and the cleanup worker.
//!
//! ## Rules
//!
//! Given the transaction index and `minimum_required_version`, the low-water
//! mark below which no snapshot can exist any more:
//!
//! 1. Entries whose writer aborted are dropped.
//! 2. Committed entries below the low-water mark are dropped when a newer
//!    committed entry supersedes them.
//! 3. Entries whose writer is still unresolved are left intact.
//!
//! When a single committed entry survives and nothing unresolved remains, the
//! overlay collapses to a plain primordial byte string. If that survivor is
//! the deletion sentinel, the key itself is removed from its page, which is
//! what [`Pruned::RemoveKey`] instructs the caller to do.

use eyre::Result;

use crate::mvcc::value::{decode_entries, is_anti_value, is_primordial, needs_wrapping};
use crate::mvcc::{CommitStatus, PRIMORDIAL_VALUE_VERSION, TYPE_MVV, TransactionIndex};

use crate::encoding::varint::encode_varint;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pruned {
    /// Nothing could be dropped.
    Unchanged,
    /// The region shrank; store these bytes in place of the old region.
    Rewritten(Vec<u8>),
    /// Every surviving version agrees the key is deleted; remove it.
    RemoveKey,
}

pub fn prune(value: &[u8], oracle: &dyn TransactionIndex, minimum_required_version: u64) -> Result<Pruned> {
    if is_primordial(value) {
        return Ok(Pruned::Unchanged);
    }
    let entries = decode_entries(value)?;

    let mut survivors: Vec<(u64, &[u8], CommitStatus)> = Vec::with_capacity(entries.len());
    for entry in &entries {
        let status = if entry.handle == PRIMORDIAL_VALUE_VERSION {
            CommitStatus::Committed
        } else {
            oracle.committed(entry.handle)
        };
        if status == CommitStatus::Aborted {
            continue;
        }
        survivors.push((entry.handle, &value[entry.offset..entry.offset + entry.length], status));
    }

    let newest_committed = survivors
        .iter()
        .filter(|(_, _, status)| *status == CommitStatus::Committed)
        .map(|(handle, _, _)| *handle)
        .max();
    if let Some(newest) = newest_committed {
        survivors.retain(|(handle, _, status)| {
            *status != CommitStatus::Committed
                || *handle == newest
                || *handle >= minimum_required_version
        });
    }

    if survivors.is_empty() {
        // Every write to this key aborted; no snapshot can see it.
        return Ok(Pruned::RemoveKey);
    }

    let all_committed = survivors.iter().all(|(_, _, status)| *status == CommitStatus::Committed);
    if all_committed && survivors.len() == 1 {
        let body = survivors[0].1;
        if is_anti_value(body) {
            return Ok(Pruned::RemoveKey);
        }
        if needs_wrapping(body) {
            // The raw bytes would read as a tagged region; keep the wrapper.
            let mut out = Vec::with_capacity(body.len() + 11);
            out.push(TYPE_MVV);
            let mut scratch = [0u8; 9];
            let n = encode_varint(PRIMORDIAL_VALUE_VERSION, &mut scratch);
            out.extend_from_slice(&scratch[..n]);
            let n = encode_varint(body.len() as u64, &mut scratch);
            out.extend_from_slice(&scratch[..n]);
            out.extend_from_slice(body);
            return Ok(if out == value { Pruned::Unchanged } else { Pruned::Rewritten(out) });
        }
        return Ok(Pruned::Rewritten(body.to_vec()));
    }

    if survivors.len() == entries.len() {
        return Ok(Pruned::Unchanged);
    }

    let mut out = Vec::with_capacity(value.len());
    out.push(TYPE_MVV);
    let mut scratch = [0u8; 9];
    for (handle, body, _) in &survivors {
        let n = encode_varint(*handle, &mut scratch);
        out.extend_from_slice(&scratch[..n]);
        let n = encode_varint(body.len() as u64, &mut scratch);
        out.extend_from_slice(&scratch[..n]);
        out.extend_from_slice(body);
    }
    Ok(Pruned::Rewritten(out))
}
