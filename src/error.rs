//! # Error Taxonomy
//!
//! Fallible operations throughout the crate return [`eyre::Result`], matching
//! the storage layer's style of `ensure!`/`bail!` with contextual messages.
//! The abstract error kinds that callers need to react to programmatically
//! are carried by [`ErrorKind`], attached to reports so they survive wrapping
//! and can be recovered with [`kind_of`].
//!
//! ## Propagation Policy
//!
//! Errors scoped to a single page or record are recorded as verifier faults
//! and traversal advances. Errors that concern the integrity of a whole
//! stream, such as a corrupt journal header or an unreadable volume head,
//! abort the operation. Nothing is silently swallowed: every error either
//! becomes a fault with location information or surfaces to the caller.

use thiserror::Error;

/// Abstract error kinds. Attach one to a report with
/// `Err(eyre::Report::new(ErrorKind::InUse))` or wrap an underlying error and
/// let the kind ride along as context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    /// Journal record length, type, or checksum invalid, or a structural
    /// count mismatch. Non-recoverable for scanning.
    #[error("corrupt journal: {0}")]
    CorruptJournal(String),

    /// Page verification failure. The verifier records these as faults and
    /// continues; direct page accessors surface them.
    #[error("corrupt volume: {0}")]
    CorruptVolume(String),

    /// A page claim could not be acquired before the timeout.
    #[error("resource in use: {0}")]
    InUse(String),

    /// Underlying storage failure.
    #[error("i/o failure: {0}")]
    Io(String),

    /// CLI parse failure, bad range term, or an unsupported page size.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A precondition was not met; the operation was not performed.
    #[error("state violation: {0}")]
    StateViolation(String),
}

/// Recover the [`ErrorKind`] from a report, if one was attached anywhere in
/// its chain.
pub fn kind_of(report: &eyre::Report) -> Option<&ErrorKind> {
    report.chain().find_map(|cause| cause.downcast_ref::<ErrorKind>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::WrapErr;

    #[test]
    fn kind_survives_wrapping() {
        let base: eyre::Result<()> = Err(eyre::Report::new(ErrorKind::InUse("page 12".into())));
        let wrapped = base.wrap_err("while splitting").wrap_err("while storing");

        let report = wrapped.unwrap_err();
        assert_eq!(kind_of(&report), Some(&ErrorKind::InUse("page 12".into())));
    }

    #[test]
    fn kind_absent_for_plain_reports() {
        let report = eyre::eyre!("no kind here");
        assert!(kind_of(&report).is_none());
    }

    #[test]
    fn kinds_format_with_detail() {
        let kind = ErrorKind::CorruptJournal("bad record length 3".into());
        assert_eq!(kind.to_string(), "corrupt journal: bad record length 3");
    }
}
