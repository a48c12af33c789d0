//! Memory report CLI library
//!
//! Argument parsing and the load/collect/render pipeline behind the
//! `memory-report` binary.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cli;
pub mod error;
pub mod runner;

pub use cli::{Cli, OutputFormat};
pub use error::{CliError, CliResult};
pub use runner::run;
