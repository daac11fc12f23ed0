//! # jview
//!
//! `jview path=<prefix> [start=<addr>] [end=<addr>] [types=*|<list>]
//! [pages=*|<ranges>] [timestamps=*|<ranges>] [maxkey=<n>] [maxvalue=<n>] [v]`
//!
//! Dumps the selected journal range, one line per record. When `path` names
//! a concrete journal file (with its generation suffix) rather than a
//! prefix, the default range narrows to that file's block.

use std::io::Write;
use std::path::{Path, PathBuf};

use eyre::{Result, ensure};

use crate::cli::args::{ArgSpec, parse_args};
use crate::config::DEFAULT_BLOCK_SIZE;
use crate::error::ErrorKind;
use crate::journal::scanner::{JournalScanner, RangePredicate, ScanConfig, TypeFilter};
use crate::journal::{DumpWriter, file_to_generation};

pub const JVIEW_ARGS: &[ArgSpec] = &[
    ArgSpec::string("path", "", "Journal file name or prefix"),
    ArgSpec::long("start", "0", 0, 10_000_000_000_000_000, "Start journal address"),
    ArgSpec::long(
        "end",
        "1000000000000000000",
        0,
        1_000_000_000_000_000_000,
        "End journal address",
    ),
    ArgSpec::string("types", "*", "Selected record types, for example \"PA,PM,CP\""),
    ArgSpec::string("pages", "*", "Selected pages, for example \"0,1,200-299,33333-\""),
    ArgSpec::string("timestamps", "*", "Selected timestamps, for example \"132466-132499\""),
    ArgSpec::int("maxkey", "42", 4, 10_000, "Maximum displayed key length"),
    ArgSpec::int("maxvalue", "42", 4, 100_000, "Maximum displayed value length"),
    ArgSpec::flag("v", "Verbose dump including PageMap and TransactionMap details"),
];

#[derive(Debug, Clone)]
pub struct JviewCommand {
    pub config: ScanConfig,
    pub max_key: usize,
    pub max_value: usize,
    pub verbose: bool,
}

impl JviewCommand {
    pub fn parse(tokens: &[&str]) -> Result<Self> {
        let matches = parse_args(JVIEW_ARGS, tokens)?;
        let path = matches.get_str("path");
        ensure!(
            !path.is_empty(),
            ErrorKind::InvalidArgument(
                "the path parameter must name a journal prefix, for example /x/y/jjj \
                 where journal files are like jjj.000000001234"
                    .to_string()
            )
        );

        let mut start = matches.get_u64("start");
        let mut end = matches.get_u64("end");
        let mut base = PathBuf::from(path);
        if let Some(generation) = file_to_generation(Path::new(path)) {
            // A concrete file was named: strip the suffix and narrow the
            // range to that block unless overridden.
            let stem = path.rsplit_once('.').expect("generation implies a dot").0;
            base = PathBuf::from(stem);
            if start == 0 {
                start = generation * DEFAULT_BLOCK_SIZE;
            }
            if end == 1_000_000_000_000_000_000 {
                end = (generation + 1) * DEFAULT_BLOCK_SIZE;
            }
        }

        let mut config = ScanConfig::new(base);
        config.start = start;
        config.end = end;
        config.types = TypeFilter::parse(matches.get_str("types"))?;
        config.pages = RangePredicate::parse(matches.get_str("pages"))?;
        config.timestamps = RangePredicate::parse(matches.get_str("timestamps"))?;
        Ok(Self {
            config,
            max_key: matches.get_usize("maxkey"),
            max_value: matches.get_usize("maxvalue"),
            verbose: matches.is_flag('v'),
        })
    }

    /// Scan and write one line per selected record. Returns the number of
    /// records dispatched.
    pub fn run<W: Write>(&self, out: W) -> Result<u64> {
        let mut dump = DumpWriter::new(out, self.max_key, self.max_value, self.verbose)
            .with_entry_filters(self.config.pages.clone(), self.config.timestamps.clone());
        let mut scanner = JournalScanner::new(self.config.clone());
        scanner.scan(&mut dump)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_is_required() {
        let err = JviewCommand::parse(&[]).unwrap_err();
        assert!(matches!(
            crate::error::kind_of(&err),
            Some(ErrorKind::InvalidArgument(_))
        ));
    }

    #[test]
    fn defaults_cover_the_whole_journal() {
        let command = JviewCommand::parse(&["path=/tmp/j"]).unwrap();
        assert_eq!(command.config.start, 0);
        assert_eq!(command.config.end, 1_000_000_000_000_000_000);
        assert_eq!(command.max_key, 42);
        assert_eq!(command.max_value, 42);
        assert!(!command.verbose);
    }

    #[test]
    fn naming_a_generation_file_narrows_the_range() {
        let command = JviewCommand::parse(&["path=/tmp/j.000000000002"]).unwrap();
        assert_eq!(command.config.base, PathBuf::from("/tmp/j"));
        assert_eq!(command.config.start, 2 * DEFAULT_BLOCK_SIZE);
        assert_eq!(command.config.end, 3 * DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn filters_parse_through() {
        let command =
            JviewCommand::parse(&["path=/tmp/j", "types=TS,SR,TC", "pages=1-10", "timestamps=100-", "v"])
                .unwrap();
        assert!(command.verbose);
        assert!(command.config.types.is_selected(crate::journal::TYPE_SR));
        assert!(!command.config.types.is_selected(crate::journal::TYPE_PA));
        assert!(command.config.pages.is_selected(5));
        assert!(!command.config.pages.is_selected(20));
        assert!(command.config.timestamps.is_selected(150));
        assert!(!command.config.timestamps.is_selected(50));
    }

    #[test]
    fn bad_filter_terms_are_invalid_arguments() {
        assert!(JviewCommand::parse(&["path=/tmp/j", "types=QQ"]).is_err());
        assert!(JviewCommand::parse(&["path=/tmp/j", "pages=x-y"]).is_err());
    }
}
