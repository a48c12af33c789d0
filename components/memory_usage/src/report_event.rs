//! Structured telemetry payload of one collection cycle.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{ClusterObjectsStatistics, ObjectsStatistics, ObjectsStatisticsWithPlatformTracking, StatusCode};

/// Total, platform-own and platform-retained statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryTrafficStatistics {
    /// Every object
    pub total_stats: ObjectsStatistics,
    /// Platform objects
    pub platform_objects_stats: ObjectsStatistics,
    /// Objects retained by platform objects
    pub platform_retained_stats: ObjectsStatistics,
}

impl From<&ObjectsStatisticsWithPlatformTracking> for MemoryTrafficStatistics {
    fn from(stats: &ObjectsStatisticsWithPlatformTracking) -> Self {
        Self {
            total_stats: stats.objects,
            platform_objects_stats: stats.platform_objects_self,
            platform_retained_stats: stats.platform_retained_objects,
        }
    }
}

/// Owned and retained statistics of a cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClusterObjectsStatisticsEvent {
    /// Owned objects
    pub owned_cluster_stats: MemoryTrafficStatistics,
    /// Exclusively retained objects
    pub retained_cluster_stats: MemoryTrafficStatistics,
}

impl From<&ClusterObjectsStatistics> for ClusterObjectsStatisticsEvent {
    fn from(stats: &ClusterObjectsStatistics) -> Self {
        Self {
            owned_cluster_stats: stats.owned().into(),
            retained_cluster_stats: stats.retained().into(),
        }
    }
}

/// Usage of one component or category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterMemoryUsage {
    /// Component or category label
    pub label: String,
    /// Statistics
    pub stats: ClusterObjectsStatisticsEvent,
    /// Instances per tracked class name
    pub instance_count_per_class_name: BTreeMap<String, u64>,
}

/// Usage of one shared cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SharedClusterMemoryUsage {
    /// Ids of the components sharing the objects
    pub ids: Vec<usize>,
    /// Statistics
    pub stats: MemoryTrafficStatistics,
}

/// Counters describing the collection itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryUsageCollectionMetadata {
    /// Outcome
    pub status_code: StatusCode,
    /// Every traversed object
    pub total_heap_objects_stats: MemoryTrafficStatistics,
    /// Peak number of field cache entries
    pub field_cache_count_peak: usize,
    /// Peak DFS stack length
    pub object_queue_length_peak: usize,
    /// Objects enumerated and then collected before the statistics pass
    pub garbage_collected_before_2_pass_count: u64,
    /// Wall clock duration
    pub collection_time_seconds: f64,
    /// Field reads that failed
    pub unsuccessful_field_accesses_count: u64,
    /// Unix time the collection started at
    pub collection_start_timestamp_seconds: f64,
    /// Session id
    pub collection_iteration: u8,
}

/// The telemetry event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryUsageReportEvent {
    /// Per component usage, in id order
    pub component_stats: Vec<ClusterMemoryUsage>,
    /// Largest shared clusters
    pub shared_component_stats: Vec<SharedClusterMemoryUsage>,
    /// Per category usage, in id order
    pub component_category_stats: Vec<ClusterMemoryUsage>,
    /// Collection metadata
    pub metadata: MemoryUsageCollectionMetadata,
}
