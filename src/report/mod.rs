//! Report renderers for parser results.
//!
//! - [`terminal`]: summary table plus an indented dependency tree per parser.
//!   JSON output is serialized directly in `main`.

pub mod terminal;
