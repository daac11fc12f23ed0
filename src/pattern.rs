//! # Name Pattern Matching
//!
//! Small matchers for selecting trees and alert categories by name. Two
//! grammars:
//!
//! - **Glob** (the default): `*` matches any run of characters, `?` matches
//!   exactly one. Everything else is literal.
//! - **Regex subset** (behind the `r` flag): literals, `.`, postfix `*`,
//!   `+`, `?`, and character classes `[...]` with ranges and leading `^`
//!   negation. Patterns are anchored at both ends.
//!
//! Matching is plain backtracking over bytes. Name selection deals in short
//! identifiers, so the pathological inputs that justify a compiled engine do
//! not arise here.

use eyre::{Result, ensure};

use crate::error::ErrorKind;

/// Match `name` against a glob pattern with `*` and `?`.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    glob_inner(pattern.as_bytes(), name.as_bytes())
}

fn glob_inner(pattern: &[u8], name: &[u8]) -> bool {
    match pattern.split_first() {
        None => name.is_empty(),
        Some((b'*', rest)) => {
            (0..=name.len()).any(|skip| glob_inner(rest, &name[skip..]))
        }
        Some((b'?', rest)) => match name.split_first() {
            Some((_, name_rest)) => glob_inner(rest, name_rest),
            None => false,
        },
        Some((literal, rest)) => match name.split_first() {
            Some((first, name_rest)) => literal == first && glob_inner(rest, name_rest),
            None => false,
        },
    }
}

/// A parsed regex-subset pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    atoms: Vec<(Atom, Repeat)>,
}

#[derive(Debug, Clone)]
enum Atom {
    Literal(u8),
    Any,
    Class { negated: bool, ranges: Vec<(u8, u8)> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Repeat {
    One,
    ZeroOrOne,
    ZeroOrMore,
    OneOrMore,
}

impl Pattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let bytes = pattern.as_bytes();
        let mut atoms = Vec::new();
        let mut at = 0;
        while at < bytes.len() {
            let atom = match bytes[at] {
                b'.' => {
                    at += 1;
                    Atom::Any
                }
                b'[' => {
                    let (class, next) = Self::parse_class(bytes, at + 1, pattern)?;
                    at = next;
                    class
                }
                b'*' | b'+' | b'?' => {
                    return Err(eyre::Report::new(ErrorKind::InvalidArgument(format!(
                        "dangling repeat at position {} in pattern {:?}",
                        at, pattern
                    ))));
                }
                b'\\' => {
                    ensure!(
                        at + 1 < bytes.len(),
                        ErrorKind::InvalidArgument(format!("trailing escape in pattern {:?}", pattern))
                    );
                    at += 2;
                    Atom::Literal(bytes[at - 1])
                }
                literal => {
                    at += 1;
                    Atom::Literal(literal)
                }
            };
            let repeat = match bytes.get(at) {
                Some(b'*') => {
                    at += 1;
                    Repeat::ZeroOrMore
                }
                Some(b'+') => {
                    at += 1;
                    Repeat::OneOrMore
                }
                Some(b'?') => {
                    at += 1;
                    Repeat::ZeroOrOne
                }
                _ => Repeat::One,
            };
            atoms.push((atom, repeat));
        }
        Ok(Self { atoms })
    }

    fn parse_class(bytes: &[u8], mut at: usize, pattern: &str) -> Result<(Atom, usize)> {
        let negated = bytes.get(at) == Some(&b'^');
        if negated {
            at += 1;
        }
        let mut ranges = Vec::new();
        while at < bytes.len() && bytes[at] != b']' {
            let low = bytes[at];
            if bytes.get(at + 1) == Some(&b'-') && at + 2 < bytes.len() && bytes[at + 2] != b']' {
                ranges.push((low, bytes[at + 2]));
                at += 3;
            } else {
                ranges.push((low, low));
                at += 1;
            }
        }
        ensure!(
            bytes.get(at) == Some(&b']') && !ranges.is_empty(),
            ErrorKind::InvalidArgument(format!("unterminated character class in pattern {:?}", pattern))
        );
        Ok((Atom::Class { negated, ranges }, at + 1))
    }

    pub fn matches(&self, name: &str) -> bool {
        self.match_from(0, name.as_bytes())
    }

    fn match_from(&self, atom_index: usize, name: &[u8]) -> bool {
        let Some((atom, repeat)) = self.atoms.get(atom_index) else {
            return name.is_empty();
        };
        match repeat {
            Repeat::One => {
                !name.is_empty()
                    && atom_matches(atom, name[0])
                    && self.match_from(atom_index + 1, &name[1..])
            }
            Repeat::ZeroOrOne => {
                self.match_from(atom_index + 1, name)
                    || (!name.is_empty()
                        && atom_matches(atom, name[0])
                        && self.match_from(atom_index + 1, &name[1..]))
            }
            Repeat::ZeroOrMore | Repeat::OneOrMore => {
                let minimum = if *repeat == Repeat::OneOrMore { 1 } else { 0 };
                let mut taken = 0;
                while taken < name.len() && atom_matches(atom, name[taken]) {
                    taken += 1;
                }
                while taken + 1 > minimum {
                    if taken >= minimum && self.match_from(atom_index + 1, &name[taken..]) {
                        return true;
                    }
                    if taken == 0 {
                        break;
                    }
                    taken -= 1;
                }
                false
            }
        }
    }
}

fn atom_matches(atom: &Atom, byte: u8) -> bool {
    match atom {
        Atom::Literal(literal) => *literal == byte,
        Atom::Any => true,
        Atom::Class { negated, ranges } => {
            let inside = ranges.iter().any(|(low, high)| (*low..=*high).contains(&byte));
            inside != *negated
        }
    }
}
