//! Loads the inputs, runs a collection and renders the chosen output.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use heap_model::HeapDescription;
use memory_usage::{
    CancellationToken, ComponentsSet, HeapSnapshotPresentationConfig, HeapTraverseConfig, MemoryReportCollector,
    MemoryUsageReport, MemoryUsageReportConfiguration, PresentationStyle,
};

use crate::cli::{Cli, OutputFormat};
use crate::error::{CliError, CliResult};

/// Printed in crash mode when nothing exceeded its threshold.
pub const NO_CRASH_REPORT: &str = "No memory usage threshold was exceeded\n";

fn read(path: &Path) -> CliResult<String> {
    fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Components from `--config`, or the bundled default.
pub fn load_components(cli: &Cli) -> CliResult<ComponentsSet> {
    let Some(path) = &cli.config else {
        return Ok(ComponentsSet::bundled_default());
    };
    let configuration = MemoryUsageReportConfiguration::from_json(&read(path)?)?;
    let components = ComponentsSet::from_configuration(&configuration)?;
    tracing::info!(
        components = components.components().len(),
        categories = components.categories().len(),
        "loaded component configuration from {}",
        path.display()
    );
    Ok(components)
}

/// Traversal configuration for the given flags.
pub fn traverse_config(cli: &Cli, components: ComponentsSet) -> HeapTraverseConfig {
    let mut config = HeapTraverseConfig::new(Arc::new(components));
    if let Some(max_depth) = cli.max_depth {
        config.max_depth = max_depth;
    }
    if cli.no_disposer_tree {
        config.use_disposer_tree_references = false;
    }
    config
}

/// Runs the tool and returns what goes to stdout.
pub fn run(cli: &Cli) -> CliResult<String> {
    let description: HeapDescription = serde_json::from_str(&read(&cli.heap)?)?;
    let materialized = description.materialize()?;
    tracing::info!(
        objects = materialized.heap.object_count(),
        "materialized heap from {}",
        cli.heap.display()
    );

    let config = traverse_config(cli, load_components(cli)?);
    let mut collector = MemoryReportCollector::new(&materialized.heap, config, CancellationToken::new());
    let report = collector.analyze_and_report()?;
    render(cli, &report)
}

/// Renders `report` in the format chosen by `cli`.
pub fn render(cli: &Cli, report: &MemoryUsageReport) -> CliResult<String> {
    match cli.format {
        OutputFormat::Text => {
            let presentation = HeapSnapshotPresentationConfig {
                style: if cli.bytes {
                    PresentationStyle::Bytes
                } else {
                    PresentationStyle::OptimalUnits
                },
                should_log_shared_clusters: !cli.hide_shared_clusters,
                ..HeapSnapshotPresentationConfig::default()
            };
            let mut out = String::new();
            report
                .statistics
                .print(&mut out, &presentation, report.collection_time_ms)?;
            Ok(out)
        }
        OutputFormat::Json => {
            let mut json = serde_json::to_string_pretty(&report.event)?;
            json.push('\n');
            Ok(json)
        }
        OutputFormat::Crash => Ok(report
            .crash_report
            .as_ref()
            .map_or_else(|| NO_CRASH_REPORT.to_string(), |crash| crash.to_text())),
    }
}
