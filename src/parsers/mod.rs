//! PEG grammars used to make sense of command output and the GEOM topology document.
use pest_derive::Parser;

pub mod geom;
pub mod zfs;

/// Rows of the `config:` section of `zpool status`.
#[derive(Parser)]
#[grammar = "parsers/status.pest"] // relative to src
pub struct StatusParser;
