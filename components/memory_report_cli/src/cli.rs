//! Command line arguments

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use memory_usage::object_tag::MAX_ENCODABLE_DEPTH;

/// What the tool prints to stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human readable memory report
    #[default]
    Text,
    /// Telemetry event as JSON
    Json,
    /// Extended crash report, if any threshold was exceeded
    Crash,
}

/// Component memory usage report over a heap description
#[derive(Debug, Parser)]
#[command(name = "memory-report")]
#[command(version)]
#[command(about = "Attributes heap memory to components and reports the result")]
pub struct Cli {
    /// Heap description (JSON)
    pub heap: PathBuf,

    /// Component configuration (JSON); the bundled default is used otherwise
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Print exact byte counts instead of scaled units
    #[arg(long)]
    pub bytes: bool,

    /// Nodes at this depth are not expanded
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_ENCODABLE_DEPTH)))]
    pub max_depth: Option<u32>,

    /// Do not follow disposer tree edges
    #[arg(long)]
    pub no_disposer_tree: bool,

    /// Leave shared clusters out of the text report
    #[arg(long)]
    pub hide_shared_clusters: bool,
}
