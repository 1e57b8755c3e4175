//! # relsim
//!
//! Command-line front end for `relsim-core`. The CLI module is exposed as a
//! library so the command implementations can be tested directly.

pub mod cli;
