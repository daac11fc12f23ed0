//! # icheck
//!
//! `icheck trees=<selector> [r|u|h|p|P|v|c]`
//!
//! | Flag | Meaning                                                   |
//! |------|-----------------------------------------------------------|
//! | r    | the selector is a regex (default is glob `*` and `?`)     |
//! | u    | do NOT freeze updates (the default freezes them)          |
//! | h    | enqueue index-hole fixes with the cleanup worker          |
//! | p    | prune multi-version values                                |
//! | P    | prune and clear the transaction index (needs `trees=*`)   |
//! | v    | verbose results                                           |
//! | c    | CSV output                                                |

use eyre::Result;

use crate::cli::args::{ArgSpec, parse_args};
use crate::cli::selector::TreeSelector;
use crate::mvcc::TransactionIndex;
use crate::pool::CleanupQueue;
use crate::verify::{IntegrityCheck, VerifyOptions, VolumePlan};
use crate::volume::Volume;

pub const ICHECK_ARGS: &[ArgSpec] = &[
    ArgSpec::string("trees", "*", "Tree selector: volumes/trees to check"),
    ArgSpec::flag("r", "Use regex expression"),
    ArgSpec::flag("u", "Don't freeze updates (default is to freeze updates)"),
    ArgSpec::flag("h", "Fix index holes"),
    ArgSpec::flag("p", "Prune MVV values"),
    ArgSpec::flag("P", "Prune MVV values and clear TransactionIndex"),
    ArgSpec::flag("v", "Verbose results"),
    ArgSpec::flag("c", "Format as CSV"),
];

#[derive(Debug, Clone)]
pub struct IcheckCommand {
    pub selector: TreeSelector,
    pub options: VerifyOptions,
}

impl IcheckCommand {
    pub fn parse(tokens: &[&str]) -> Result<Self> {
        let matches = parse_args(ICHECK_ARGS, tokens)?;
        let selector = TreeSelector::parse(matches.get_str("trees"), matches.is_flag('r'))?;
        let prune_and_clear = matches.is_flag('P');
        let options = VerifyOptions {
            suspend_updates: !matches.is_flag('u'),
            fix_holes: matches.is_flag('h'),
            prune: matches.is_flag('p') || prune_and_clear,
            prune_and_clear,
            verbose: matches.is_flag('v'),
            csv: matches.is_flag('c'),
            ..VerifyOptions::default()
        };
        Ok(Self { selector, options })
    }

    /// Resolve the selector against `volumes` and run the verifier. The
    /// returned check holds the faults, counters, and output lines.
    pub fn run<'e>(
        &self,
        volumes: &'e [&'e Volume],
        txn_index: &'e dyn TransactionIndex,
        cleanup: Option<&'e dyn CleanupQueue>,
    ) -> Result<IntegrityCheck<'e>> {
        let mut check = IntegrityCheck::new(txn_index, self.options.clone());
        if let Some(cleanup) = cleanup {
            check = check.with_cleanup(cleanup);
        }

        let mut plans = Vec::new();
        for &volume in volumes {
            if !self.selector.selects_volume(volume.name()) {
                continue;
            }
            if self.selector.selects_whole_volume(volume.name()) {
                plans.push(VolumePlan { volume, whole_volume: true, trees: Vec::new() });
                continue;
            }
            let mut trees = Vec::new();
            for name in volume.tree_names()? {
                if self.selector.selects_tree(volume.name(), &name) {
                    if let Some(tree) = volume.get_tree(&name)? {
                        trees.push(tree);
                    }
                }
            }
            if !trees.is_empty() {
                plans.push(VolumePlan { volume, whole_volume: false, trees });
            }
        }

        check.run(&plans, self.selector.is_select_all())?;
        Ok(check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults_check_everything_frozen() {
        let command = IcheckCommand::parse(&["trees=*"]).unwrap();
        assert!(command.selector.is_select_all());
        assert!(command.options.suspend_updates);
        assert!(!command.options.prune);
        assert!(!command.options.fix_holes);
    }

    #[test]
    fn flags_map_to_options() {
        let command = IcheckCommand::parse(&["trees=main:acc*", "uhpvc"]).unwrap();
        assert!(!command.options.suspend_updates);
        assert!(command.options.fix_holes);
        assert!(command.options.prune);
        assert!(!command.options.prune_and_clear);
        assert!(command.options.verbose);
        assert!(command.options.csv);
    }

    #[test]
    fn prune_and_clear_implies_prune() {
        let command = IcheckCommand::parse(&["trees=*", "P"]).unwrap();
        assert!(command.options.prune);
        assert!(command.options.prune_and_clear);
    }

    #[test]
    fn bad_selector_is_rejected() {
        assert!(IcheckCommand::parse(&["trees=[oops", "r"]).is_err());
        assert!(IcheckCommand::parse(&["bogus=1"]).is_err());
    }
}
