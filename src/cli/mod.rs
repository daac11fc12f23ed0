//! # Command-Line Surfaces
//!
//! The flag semantics of the two operational tools are part of the engine's
//! contract:
//!
//! - `icheck trees=<selector> [r|u|h|p|P|v|c]` runs the integrity verifier.
//! - `jview path=<prefix> [start= end= types= pages= timestamps= maxkey=
//!   maxvalue= v]` dumps a journal range, one line per record.
//!
//! Arguments are described by declarative templates (name, kind, default,
//! range, help) consumed by a generic parser in [`args`].

pub mod args;
pub mod icheck;
pub mod jview;
pub mod selector;

pub use args::{ArgKind, ArgMatches, ArgSpec, parse_args};
pub use icheck::IcheckCommand;
pub use jview::JviewCommand;
pub use selector::TreeSelector;
