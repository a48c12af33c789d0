//! Memory usage attribution over a live heap.
//!
//! This crate walks the object graph of a [`HeapHost`](heap_model::HeapHost)
//! and attributes every reachable object to the component (logical subsystem)
//! that owns it:
//! - Components and categories resolved from class and package names
//! - A packed 64-bit tag per object carrying all per-session traversal state
//! - Explicit-stack depth first traversal with pluggable strategies
//! - Owned, retained and shared statistics per component and category
//! - Threshold detection and an extended report with root path trees
//! - Text report, telemetry event and crash report renderings
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use heap_model::{ClassDefinition, InMemoryHeap};
//! use memory_usage::{
//!     CancellationToken, ComponentRegistration, ComponentsSet, HeapTraverseConfig,
//!     MemoryReportCollector,
//! };
//!
//! let mut components = ComponentsSet::new(u64::MAX, u64::MAX);
//! let category = components.register_category("ide", u64::MAX, Vec::new()).unwrap();
//! components
//!     .add_component_with_packages_and_class_names(
//!         category,
//!         ComponentRegistration::new("editor").package("com.editor"),
//!     )
//!     .unwrap();
//!
//! let heap = InMemoryHeap::new();
//! let document = heap.define_class(ClassDefinition::new("com.editor.Document")).unwrap();
//! heap.add_root(heap.allocate(document, 128).unwrap());
//!
//! let config = HeapTraverseConfig::new(Arc::new(components));
//! let mut collector = MemoryReportCollector::new(&heap, config, CancellationToken::new());
//! let statistics = collector.collect_memory_usage().unwrap();
//! assert_eq!(statistics.component_stats()[1].owned().objects.total_size_bytes, 128);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod child_processor;
pub mod collector;
pub mod components_set;
pub mod configuration;
pub mod crash_report;
pub mod enumeration;
pub mod error;
pub mod extended_report;
pub mod extended_traverse;
pub mod field_cache;
pub mod object_tag;
pub mod objects_statistics;
pub mod presentation;
pub mod report_event;
pub mod root_path_tree;
pub mod statistics;
pub mod statistics_pass;
pub mod traverse;
pub mod traverse_config;
pub mod traverse_node;

// Re-export main types at crate root
pub use child_processor::{ChildReference, HeapTraverseChildProcessor, RefWeight};
pub use collector::{MemoryReportCollector, MemoryUsageReport};
pub use components_set::{Component, ComponentCategory, ComponentRegistration, ComponentsSet};
pub use configuration::{CategoryConfiguration, ComponentConfiguration, MemoryUsageReportConfiguration};
pub use crash_report::{CrashReport, CrashReportField};
pub use error::{ConfigurationError, HeapSnapshotTraverseError, ReportError, StatusCode, TraverseResult};
pub use extended_report::{ExceededClusterKind, ExceededClusters, ExtendedReportStatistics};
pub use field_cache::FieldCache;
pub use object_tag::{IterationId, ObjectTag};
pub use objects_statistics::{
    ClusterObjectsStatistics, ObjectsStatistics, ObjectsStatisticsWithPlatformTracking, SharedClusterStatistics,
};
pub use presentation::{
    objects_stats_presentation, to_short_string_as_count, to_short_string_as_size, HeapSnapshotPresentationConfig,
    PresentationStyle,
};
pub use report_event::MemoryUsageReportEvent;
pub use root_path_tree::RootPathTree;
pub use statistics::HeapSnapshotStatistics;
pub use traverse::{CancellationToken, DepthFirstSearchTraverse, StackNode, TraverseStrategy};
pub use traverse_config::{HeapTraverseConfig, IgnoredField};
pub use traverse_node::{mask_bits, HeapTraverseNode};
