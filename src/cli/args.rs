//! # Declarative Argument Templates
//!
//! Each command publishes a table of [`ArgSpec`] rows; [`parse_args`] turns
//! `name=value` tokens and bare flag letters into validated [`ArgMatches`].
//! Numeric arguments are range-checked against their template row, missing arguments
//! fall back to their declared defaults, and anything unknown is an
//! `InvalidArgument` error.

use eyre::{Result, ensure};
use hashbrown::HashMap;

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Str,
    Long,
    Int,
    Flag,
}

#[derive(Debug, Clone, Copy)]
pub struct ArgSpec {
    pub name: &'static str,
    pub kind: ArgKind,
    pub default: &'static str,
    pub min: u64,
    pub max: u64,
    pub help: &'static str,
}

impl ArgSpec {
    pub const fn string(name: &'static str, default: &'static str, help: &'static str) -> Self {
        Self { name, kind: ArgKind::Str, default, min: 0, max: 0, help }
    }

    pub const fn long(
        name: &'static str,
        default: &'static str,
        min: u64,
        max: u64,
        help: &'static str,
    ) -> Self {
        Self { name, kind: ArgKind::Long, default, min, max, help }
    }

    pub const fn int(
        name: &'static str,
        default: &'static str,
        min: u64,
        max: u64,
        help: &'static str,
    ) -> Self {
        Self { name, kind: ArgKind::Int, default, min, max, help }
    }

    pub const fn flag(name: &'static str, help: &'static str) -> Self {
        Self { name, kind: ArgKind::Flag, default: "", min: 0, max: 0, help }
    }
}

#[derive(Debug, Default)]
pub struct ArgMatches {
    values: HashMap<&'static str, String>,
    flags: String,
}

impl ArgMatches {
    pub fn get_str(&self, name: &str) -> &str {
        self.values.get(name).map(String::as_str).unwrap_or("")
    }

    pub fn get_u64(&self, name: &str) -> u64 {
        self.values.get(name).and_then(|v| v.parse().ok()).unwrap_or(0)
    }

    pub fn get_usize(&self, name: &str) -> usize {
        self.get_u64(name) as usize
    }

    pub fn is_flag(&self, flag: char) -> bool {
        self.flags.contains(flag)
    }
}

/// Render a usage block from a template, one row per argument.
pub fn usage(command: &str, specs: &[ArgSpec]) -> String {
    let mut out = format!("usage: {}", command);
    for spec in specs {
        match spec.kind {
            ArgKind::Flag => out.push_str(&format!(" [{}]", spec.name)),
            _ => out.push_str(&format!(" [{}=<{:?}>]", spec.name, spec.kind)),
        }
    }
    out.push('\n');
    for spec in specs {
        out.push_str(&format!("  {:<12} {}\n", spec.name, spec.help));
    }
    out
}

/// Parse tokens against a template. Tokens are either `name=value` or a
/// cluster of flag letters.
pub fn parse_args(specs: &[ArgSpec], tokens: &[&str]) -> Result<ArgMatches> {
    let mut matches = ArgMatches::default();
    for spec in specs {
        if spec.kind != ArgKind::Flag && !spec.default.is_empty() {
            matches.values.insert(spec.name, spec.default.to_string());
        }
    }

    for token in tokens {
        if let Some((name, value)) = token.split_once('=') {
            let spec = specs
                .iter()
                .find(|spec| spec.kind != ArgKind::Flag && spec.name == name)
                .ok_or_else(|| {
                    eyre::Report::new(ErrorKind::InvalidArgument(format!(
                        "unknown argument {:?}",
                        name
                    )))
                })?;
            if matches!(spec.kind, ArgKind::Long | ArgKind::Int) {
                let parsed: u64 = value.parse().map_err(|_| {
                    eyre::Report::new(ErrorKind::InvalidArgument(format!(
                        "argument {} needs a number, got {:?}",
                        name, value
                    )))
                })?;
                ensure!(
                    (spec.min..=spec.max).contains(&parsed),
                    ErrorKind::InvalidArgument(format!(
                        "argument {}={} outside [{}, {}]",
                        name, parsed, spec.min, spec.max
                    ))
                );
            }
            matches.values.insert(spec.name, value.to_string());
        } else {
            for flag in token.chars() {
                ensure!(
                    specs.iter().any(|spec| spec.kind == ArgKind::Flag && spec.name.contains(flag)),
                    ErrorKind::InvalidArgument(format!("unknown flag {:?}", flag))
                );
                matches.flags.push(flag);
            }
        }
    }
    Ok(matches)
}
