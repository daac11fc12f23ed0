//! Operational tools for vellum volumes and journals.
//!
//! ```text
//! vellum-tools icheck volume=<file> pagesize=<n> trees=<selector> [r|u|h|p|P|v|c]
//! vellum-tools jview path=<prefix> [start= end= types= pages= timestamps= maxkey= maxvalue= v]
//! ```
//!
//! `icheck` opens the volume file read-only through a memory map, so it can
//! inspect a volume offline. Pruning flags require a writable engine and are
//! rejected here.

use std::process::ExitCode;
use std::sync::Arc;

use eyre::{Result, ensure};

use vellum::cli::args::{ArgSpec, parse_args, usage};
use vellum::cli::{IcheckCommand, JviewCommand};
use vellum::error::ErrorKind;
use vellum::mvcc::AllCommitted;
use vellum::pool::{BufferPool, MmapVolumePool, RecordingCleanupQueue};
use vellum::volume::Volume;

const VOLUME_ARGS: &[ArgSpec] = &[
    ArgSpec::string("volume", "", "Volume file to check"),
    ArgSpec::long("pagesize", "16384", 1024, 16384, "Page size of the volume"),
];

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let tokens: Vec<&str> = args.iter().map(String::as_str).collect();
    match tokens.split_first() {
        Some((&"icheck", rest)) => icheck(rest),
        Some((&"jview", rest)) => jview(rest),
        _ => {
            eprintln!("usage: vellum-tools <icheck|jview> ...");
            eprintln!("{}", usage("icheck", vellum::cli::icheck::ICHECK_ARGS));
            eprintln!("{}", usage("jview", vellum::cli::jview::JVIEW_ARGS));
            Err(eyre::Report::new(ErrorKind::InvalidArgument("missing subcommand".to_string())))
        }
    }
}

fn icheck(tokens: &[&str]) -> Result<()> {
    let (volume_tokens, check_tokens): (Vec<&str>, Vec<&str>) = tokens
        .iter()
        .copied()
        .partition(|token| token.starts_with("volume=") || token.starts_with("pagesize="));
    let matches = parse_args(VOLUME_ARGS, &volume_tokens)?;
    let path = matches.get_str("volume");
    ensure!(
        !path.is_empty(),
        ErrorKind::InvalidArgument("the volume parameter must name a volume file".to_string())
    );

    let command = IcheckCommand::parse(&check_tokens)?;
    ensure!(
        !command.options.prune && !command.options.prune_and_clear,
        ErrorKind::InvalidArgument(
            "pruning flags need a writable engine; this tool opens volumes read-only".to_string()
        )
    );

    let page_size = matches.get_usize("pagesize");
    let pool = Arc::new(MmapVolumePool::open(std::path::Path::new(path), page_size)?);
    let volume = Volume::open(path, pool as Arc<dyn BufferPool>, true)?;
    let volumes = [&volume];

    let cleanup = RecordingCleanupQueue::new();
    let check = command.run(&volumes, &AllCommitted, Some(&cleanup))?;
    for line in check.output() {
        println!("{}", line);
    }
    if !command.options.verbose {
        for fault in check.faults() {
            println!("{}", fault);
        }
    }
    if check.has_faults() {
        return Err(eyre::Report::new(ErrorKind::CorruptVolume(format!(
            "{} faults found",
            check.faults().len()
        ))));
    }
    Ok(())
}

fn jview(tokens: &[&str]) -> Result<()> {
    let command = JviewCommand::parse(tokens)?;
    let stdout = std::io::stdout();
    command.run(stdout.lock())?;
    Ok(())
}
