//! Human readable rendering of counts and sizes.

use serde::{Deserialize, Serialize};

use crate::ObjectsStatistics;

const SI_PREFIXES: [char; 6] = ['K', 'M', 'G', 'T', 'P', 'E'];

/// How statistics are rendered in the text report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentationStyle {
    /// Exact byte and object counts
    Bytes,
    /// Sizes scaled to K/M/G units
    #[default]
    OptimalUnits,
}

/// Switches of the text report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapSnapshotPresentationConfig {
    /// Rendering of statistics
    pub style: PresentationStyle,
    /// Print the largest shared clusters
    pub should_log_shared_clusters: bool,
    /// Print retained sizes next to owned sizes
    pub should_log_retained_sizes: bool,
}

impl Default for HeapSnapshotPresentationConfig {
    fn default() -> Self {
        Self {
            style: PresentationStyle::OptimalUnits,
            should_log_shared_clusters: true,
            should_log_retained_sizes: true,
        }
    }
}

/// Short form of a count: `999`, `1.5K`, `12M`.
///
/// # Examples
///
/// ```
/// use memory_usage::to_short_string_as_count;
///
/// assert_eq!(to_short_string_as_count(999), "999");
/// assert_eq!(to_short_string_as_count(1_500), "1.5K");
/// assert_eq!(to_short_string_as_count(12_345_678), "12M");
/// ```
pub fn to_short_string_as_count(count: u64) -> String {
    to_short_string(count)
}

/// Short form of a byte size: `512B`, `1.5KB`, `12MB`.
pub fn to_short_string_as_size(size: u64) -> String {
    format!("{}B", to_short_string(size))
}

fn to_short_string(number: u64) -> String {
    if number < 1000 {
        return number.to_string();
    }
    let mut value = number as f64 / 1000.0;
    let mut prefix = 0;
    while value >= 999.5 && prefix + 1 < SI_PREFIXES.len() {
        value /= 1000.0;
        prefix += 1;
    }
    if value < 9.95 {
        format!("{:.1}{}", value, SI_PREFIXES[prefix])
    } else {
        format!("{:.0}{}", value, SI_PREFIXES[prefix])
    }
}

/// Renders `stats` in `style`.
pub fn objects_stats_presentation(stats: &ObjectsStatistics, style: PresentationStyle) -> String {
    match style {
        PresentationStyle::Bytes => format!("{} bytes/{} objects", stats.total_size_bytes, stats.objects_count),
        PresentationStyle::OptimalUnits => format!(
            "{}/{} objects",
            to_short_string_as_size(stats.total_size_bytes),
            stats.objects_count
        ),
    }
}

/// Left-pads `text` with spaces to `width` characters.
pub(crate) fn pad_start(text: &str, width: usize) -> String {
    format!("{text:>width$}")
}
