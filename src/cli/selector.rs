//! # Tree Selector
//!
//! Selects volumes and trees by name for the verifier. A selector is a
//! comma-separated list of terms, each `volume` or `volume:tree`. Patterns
//! are globs by default (`*`, `?`); with the `r` flag they use the regex
//! subset from [`crate::pattern`]. A term without a tree part selects the
//! whole volume, garbage chain included.

use eyre::Result;

use crate::pattern::{Pattern, glob_match};

#[derive(Debug, Clone)]
enum Matcher {
    Glob(String),
    Regex(Pattern),
}

impl Matcher {
    fn parse(text: &str, regex: bool) -> Result<Self> {
        Ok(if regex { Matcher::Regex(Pattern::parse(text)?) } else { Matcher::Glob(text.to_string()) })
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            Matcher::Glob(pattern) => glob_match(pattern, name),
            Matcher::Regex(pattern) => pattern.matches(name),
        }
    }
}

#[derive(Debug, Clone)]
struct SelectorTerm {
    volume: Matcher,
    tree: Option<Matcher>,
}

#[derive(Debug, Clone)]
pub struct TreeSelector {
    terms: Vec<SelectorTerm>,
    select_all: bool,
}

impl TreeSelector {
    /// Parse a selector; `regex` switches pattern grammar.
    pub fn parse(spec: &str, regex: bool) -> Result<Self> {
        let select_all = spec == "*";
        let mut terms = Vec::new();
        for term in spec.split(',') {
            let (volume, tree) = match term.split_once(':') {
                Some((volume, tree)) => (volume, Some(tree)),
                None => (term, None),
            };
            terms.push(SelectorTerm {
                volume: Matcher::parse(volume, regex)?,
                tree: tree.map(|t| Matcher::parse(t, regex)).transpose()?,
            });
        }
        Ok(Self { terms, select_all })
    }

    /// Was the selector literally `*`? Prune-and-clear requires this.
    pub fn is_select_all(&self) -> bool {
        self.select_all
    }

    pub fn selects_volume(&self, volume: &str) -> bool {
        self.terms.iter().any(|term| term.volume.matches(volume))
    }

    /// A term with no tree part selects the volume as a whole.
    pub fn selects_whole_volume(&self, volume: &str) -> bool {
        self.terms.iter().any(|term| term.tree.is_none() && term.volume.matches(volume))
    }

    pub fn selects_tree(&self, volume: &str, tree: &str) -> bool {
        self.terms.iter().any(|term| {
            term.volume.matches(volume)
                && term.tree.as_ref().is_none_or(|pattern| pattern.matches(tree))
        })
    }
}
