//! Traversal limits and feature switches.

use std::sync::Arc;

use crate::field_cache::DEFAULT_MAX_FIELD_CACHE_ENTRIES;
use crate::object_tag::{MAX_DEPTH, MAX_OBJECT_ID};
use crate::ComponentsSet;

/// Default limit on both the DFS stack length and the number of enumerated objects.
pub const MAX_ALLOWED_OBJECT_MAP_SIZE: usize = 10_000_000;
/// Default number of shared clusters put into the telemetry event.
pub const DEFAULT_SHARED_COMPONENTS_LIMIT: usize = 10;

/// A field that is never followed, for instances of `class_name` and its subclasses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoredField {
    /// Class (or superclass) name
    pub class_name: String,
    /// Field name
    pub field_name: String,
}

impl IgnoredField {
    /// Creates an ignored field entry.
    pub fn new(class_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            field_name: field_name.into(),
        }
    }
}

/// Phantom references held by the image pool are managed by the collector
/// and make results flaky.
fn default_ignored_fields() -> Vec<IgnoredField> {
    vec![IgnoredField::new(
        "com.android.tools.rendering.imagepool.ImagePool",
        "myReferences",
    )]
}

/// Configuration of one collection session.
#[derive(Debug, Clone)]
pub struct HeapTraverseConfig {
    /// Components memory is attributed to
    pub components: Arc<ComponentsSet>,
    /// Nodes at this depth are not expanded
    pub max_depth: u32,
    /// Largest allowed DFS stack
    pub max_stack_size: usize,
    /// Largest number of objects the enumeration pass may number
    pub max_objects: u32,
    /// Field cache flush threshold
    pub max_field_cache_entries: usize,
    /// Follow parent to child edges of the disposer tree
    pub use_disposer_tree_references: bool,
    /// Fields that are never followed
    pub ignored_fields: Vec<IgnoredField>,
    /// Collect class histograms and build the extended report
    pub collect_histograms: bool,
    /// Collect disposed-but-referenced statistics
    pub collect_disposer_tree_info: bool,
    /// Shared clusters put into the telemetry event
    pub shared_components_limit: usize,
}

impl HeapTraverseConfig {
    /// Default limits for the given components.
    pub fn new(components: Arc<ComponentsSet>) -> Self {
        Self {
            components,
            max_depth: MAX_DEPTH,
            max_stack_size: MAX_ALLOWED_OBJECT_MAP_SIZE,
            max_objects: MAX_ALLOWED_OBJECT_MAP_SIZE.min(MAX_OBJECT_ID as usize) as u32,
            max_field_cache_entries: DEFAULT_MAX_FIELD_CACHE_ENTRIES,
            use_disposer_tree_references: true,
            ignored_fields: default_ignored_fields(),
            collect_histograms: false,
            collect_disposer_tree_info: false,
            shared_components_limit: DEFAULT_SHARED_COMPONENTS_LIMIT,
        }
    }

    /// Same limits with histograms and disposer tree info switched on.
    pub fn extended(&self) -> Self {
        Self {
            collect_histograms: true,
            collect_disposer_tree_info: true,
            ..self.clone()
        }
    }
}
