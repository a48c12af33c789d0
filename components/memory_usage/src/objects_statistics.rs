//! Count and size accumulators.

use std::collections::BTreeMap;

use serde::Serialize;

/// Running number of objects and their total shallow size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ObjectsStatistics {
    /// Number of objects
    pub objects_count: u64,
    /// Sum of shallow sizes in bytes
    pub total_size_bytes: u64,
}

impl ObjectsStatistics {
    /// Counts one object of `size` bytes.
    pub fn add_object(&mut self, size: u64) {
        self.objects_count += 1;
        self.total_size_bytes += size;
    }

    /// Adds another accumulator.
    pub fn add_stats(&mut self, other: &ObjectsStatistics) {
        self.objects_count += other.objects_count;
        self.total_size_bytes += other.total_size_bytes;
    }

    /// Returns true if nothing was counted.
    pub fn is_empty(&self) -> bool {
        self.objects_count == 0
    }
}

/// Statistics split by platform ownership.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ObjectsStatisticsWithPlatformTracking {
    /// Every object
    pub objects: ObjectsStatistics,
    /// Objects whose class was defined by a platform loader
    pub platform_objects_self: ObjectsStatistics,
    /// Objects only reachable through platform objects
    pub platform_retained_objects: ObjectsStatistics,
}

impl ObjectsStatisticsWithPlatformTracking {
    /// Counts one object.
    pub fn add_object(&mut self, size: u64, is_platform_object: bool, is_retained_by_platform: bool) {
        self.objects.add_object(size);
        if is_platform_object {
            self.platform_objects_self.add_object(size);
        }
        if is_retained_by_platform {
            self.platform_retained_objects.add_object(size);
        }
    }
}

/// Owned and retained statistics of one component or category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterObjectsStatistics {
    owned: ObjectsStatisticsWithPlatformTracking,
    retained: ObjectsStatisticsWithPlatformTracking,
    tracked_fqn_instance_counter: BTreeMap<String, u64>,
}

impl ClusterObjectsStatistics {
    /// Counts an object owned by the cluster.
    pub fn add_owned_object(&mut self, size: u64, is_platform_object: bool, is_retained_by_platform: bool) {
        self.owned.add_object(size, is_platform_object, is_retained_by_platform);
    }

    /// Counts an object retained by the cluster.
    pub fn add_retained_object(&mut self, size: u64, is_platform_object: bool, is_retained_by_platform: bool) {
        self.retained.add_object(size, is_platform_object, is_retained_by_platform);
    }

    /// Counts one instance of a tracked class.
    pub fn add_tracked_fqn_instance(&mut self, class_name: &str) {
        *self
            .tracked_fqn_instance_counter
            .entry(class_name.to_string())
            .or_default() += 1;
    }

    /// Owned statistics.
    pub fn owned(&self) -> &ObjectsStatisticsWithPlatformTracking {
        &self.owned
    }

    /// Retained statistics.
    pub fn retained(&self) -> &ObjectsStatisticsWithPlatformTracking {
        &self.retained
    }

    /// Instances per tracked class name, sorted by name.
    pub fn tracked_fqn_instance_counter(&self) -> &BTreeMap<String, u64> {
        &self.tracked_fqn_instance_counter
    }
}

/// Statistics of objects kept alive by several components at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedClusterStatistics {
    components_mask: u64,
    statistics: ObjectsStatisticsWithPlatformTracking,
}

impl SharedClusterStatistics {
    /// Empty statistics for the cluster of the components in `components_mask`.
    pub fn new(components_mask: u64) -> Self {
        Self {
            components_mask,
            statistics: ObjectsStatisticsWithPlatformTracking::default(),
        }
    }

    /// Bit `i` is set if component `i` is part of the cluster.
    pub fn components_mask(&self) -> u64 {
        self.components_mask
    }

    /// Ids of the components in the cluster, ascending.
    pub fn component_ids(&self) -> Vec<usize> {
        crate::traverse_node::mask_bits(self.components_mask).collect()
    }

    /// Statistics of the cluster.
    pub fn statistics(&self) -> &ObjectsStatisticsWithPlatformTracking {
        &self.statistics
    }

    pub(crate) fn statistics_mut(&mut self) -> &mut ObjectsStatisticsWithPlatformTracking {
        &mut self.statistics
    }
}
