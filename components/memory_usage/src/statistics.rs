//! Aggregated memory usage of one collection cycle.

use std::collections::HashMap;
use std::fmt::{self, Write};

use crate::crash_report::CrashReport;
use crate::extended_report::{ExceededClusters, ExtendedReportStatistics};
use crate::presentation::{objects_stats_presentation, HeapSnapshotPresentationConfig, PresentationStyle};
use crate::report_event::{
    ClusterMemoryUsage, MemoryUsageCollectionMetadata, MemoryUsageReportEvent, SharedClusterMemoryUsage,
};
use crate::{
    ClusterObjectsStatistics, HeapTraverseConfig, IterationId, ObjectsStatistics, ObjectsStatisticsWithPlatformTracking,
    ReportError, SharedClusterStatistics, StatusCode,
};

/// Title of the extended crash report.
pub const EXTENDED_REPORT_TITLE: &str = "Extended Memory Report";
/// Shared clusters printed in the text and crash reports.
pub const SHARED_CLUSTERS_PRINT_LIMIT: usize = 10;

/// Accumulator of owned, retained and shared statistics.
///
/// One method per attribution event; every call updates the count and size
/// sums and, for tracked classes, the per-class instance counters.
#[derive(Debug)]
pub struct HeapSnapshotStatistics {
    config: HeapTraverseConfig,
    total: ObjectsStatisticsWithPlatformTracking,
    component_stats: Vec<ClusterObjectsStatistics>,
    category_stats: Vec<ClusterObjectsStatistics>,
    shared_stats: HashMap<u64, SharedClusterStatistics>,
    max_field_cache_size: usize,
    max_objects_queue_size: usize,
    enumerated_garbage_collected_objects: u64,
    unsuccessful_field_access_counter: u64,
    heap_object_count: u64,
    traverse_session_id: IterationId,
    extended: Option<ExtendedReportStatistics>,
}

impl HeapSnapshotStatistics {
    /// Empty statistics for the components of `config`.
    pub fn new(config: HeapTraverseConfig) -> Self {
        let components = config.components.components().len();
        let categories = config.components.categories().len();
        Self {
            config,
            total: ObjectsStatisticsWithPlatformTracking::default(),
            component_stats: vec![ClusterObjectsStatistics::default(); components],
            category_stats: vec![ClusterObjectsStatistics::default(); categories],
            shared_stats: HashMap::new(),
            max_field_cache_size: 0,
            max_objects_queue_size: 0,
            enumerated_garbage_collected_objects: 0,
            unsuccessful_field_access_counter: 0,
            heap_object_count: 0,
            traverse_session_id: IterationId::FIRST,
            extended: None,
        }
    }

    /// Empty statistics that also collect the extended report for `exceeded`.
    pub fn with_extended_report(config: HeapTraverseConfig, exceeded: &ExceededClusters) -> Self {
        let extended = ExtendedReportStatistics::new(&config.components, exceeded);
        Self {
            extended: Some(extended),
            ..Self::new(config)
        }
    }

    /// Counts an object towards the heap total.
    pub fn add_object_to_total(&mut self, size: u64, is_platform_object: bool, is_retained_by_platform: bool) {
        self.total.add_object(size, is_platform_object, is_retained_by_platform);
    }

    /// Counts an object owned by component `id`.
    #[allow(clippy::too_many_arguments)]
    pub fn add_owned_object_size_to_component(
        &mut self,
        id: usize,
        size: u64,
        class_name: &str,
        is_root: bool,
        is_platform_object: bool,
        is_retained_by_platform: bool,
        is_disposed_but_referenced: bool,
    ) {
        let Some(stats) = self.component_stats.get_mut(id) else {
            return;
        };
        stats.add_owned_object(size, is_platform_object, is_retained_by_platform);
        if self.config.components.component(id).is_some_and(|c| c.is_tracked(class_name)) {
            stats.add_tracked_fqn_instance(class_name);
        }
        if let Some(extended) = self.extended.as_mut().filter(|_| self.config.collect_histograms) {
            extended.add_class_name_to_component_owned_histogram(id, class_name, size, is_root, is_disposed_but_referenced);
        }
    }

    /// Counts an object exclusively retained by component `id`.
    pub fn add_retained_object_size_to_component(
        &mut self,
        id: usize,
        size: u64,
        is_platform_object: bool,
        is_retained_by_platform: bool,
    ) {
        if let Some(stats) = self.component_stats.get_mut(id) {
            stats.add_retained_object(size, is_platform_object, is_retained_by_platform);
        }
    }

    /// Counts an object kept alive by every component in `mask`.
    #[allow(clippy::too_many_arguments)]
    pub fn add_object_size_to_shared_component(
        &mut self,
        mask: u64,
        size: u64,
        class_name: &str,
        is_merge_point: bool,
        is_platform_object: bool,
        is_retained_by_platform: bool,
        is_disposed_but_referenced: bool,
    ) {
        self.shared_stats
            .entry(mask)
            .or_insert_with(|| SharedClusterStatistics::new(mask))
            .statistics_mut()
            .add_object(size, is_platform_object, is_retained_by_platform);
        if let Some(extended) = self.extended.as_mut().filter(|_| self.config.collect_histograms) {
            extended.add_class_name_to_shared_cluster_histogram(
                mask,
                class_name,
                size,
                is_merge_point,
                is_disposed_but_referenced,
            );
        }
    }

    /// Counts an object owned by category `id`.
    #[allow(clippy::too_many_arguments)]
    pub fn add_owned_object_size_to_category_component(
        &mut self,
        id: usize,
        size: u64,
        class_name: &str,
        is_root: bool,
        is_platform_object: bool,
        is_retained_by_platform: bool,
        is_disposed_but_referenced: bool,
    ) {
        let Some(stats) = self.category_stats.get_mut(id) else {
            return;
        };
        stats.add_owned_object(size, is_platform_object, is_retained_by_platform);
        if self.config.components.category(id).is_some_and(|c| c.is_tracked(class_name)) {
            stats.add_tracked_fqn_instance(class_name);
        }
        if let Some(extended) = self.extended.as_mut().filter(|_| self.config.collect_histograms) {
            extended.add_class_name_to_category_owned_histogram(id, class_name, size, is_root, is_disposed_but_referenced);
        }
    }

    /// Counts an object exclusively retained by category `id`.
    pub fn add_retained_object_size_to_category_component(
        &mut self,
        id: usize,
        size: u64,
        is_platform_object: bool,
        is_retained_by_platform: bool,
    ) {
        if let Some(stats) = self.category_stats.get_mut(id) {
            stats.add_retained_object(size, is_platform_object, is_retained_by_platform);
        }
    }

    /// Counts a disposed object that is still reachable.
    pub fn add_disposed_but_referenced_object(&mut self, size: u64, class_name: &str) {
        if let Some(extended) = self.extended.as_mut().filter(|_| self.config.collect_disposer_tree_info) {
            extended.add_disposed_but_referenced_object(size, class_name);
        }
    }

    /// Records a field cache size.
    pub fn update_max_fields_cache_size(&mut self, size: usize) {
        self.max_field_cache_size = self.max_field_cache_size.max(size);
    }

    /// Records a DFS stack length.
    pub fn update_max_objects_queue_size(&mut self, size: usize) {
        self.max_objects_queue_size = self.max_objects_queue_size.max(size);
    }

    /// Counts an object that was enumerated but collected before the statistics pass.
    pub fn increment_garbage_collected_objects_counter(&mut self) {
        self.enumerated_garbage_collected_objects += 1;
    }

    /// Adds failed field reads.
    pub fn add_unsuccessful_field_accesses(&mut self, count: u64) {
        self.unsuccessful_field_access_counter += count;
    }

    /// Sets the number of enumerated objects.
    pub fn set_heap_object_count(&mut self, count: u64) {
        self.heap_object_count = count;
    }

    /// Sets the session id.
    pub fn set_traverse_session_id(&mut self, id: IterationId) {
        self.traverse_session_id = id;
    }

    /// Configuration the statistics were collected with.
    pub fn config(&self) -> &HeapTraverseConfig {
        &self.config
    }

    /// Heap totals.
    pub fn total(&self) -> &ObjectsStatisticsWithPlatformTracking {
        &self.total
    }

    /// Per component statistics, in id order.
    pub fn component_stats(&self) -> &[ClusterObjectsStatistics] {
        &self.component_stats
    }

    /// Per category statistics, in id order.
    pub fn category_stats(&self) -> &[ClusterObjectsStatistics] {
        &self.category_stats
    }

    /// Statistics of the shared cluster `mask`.
    pub fn shared_cluster(&self, mask: u64) -> Option<&SharedClusterStatistics> {
        self.shared_stats.get(&mask)
    }

    /// Shared clusters by total size, largest first.
    pub fn shared_clusters_by_size(&self) -> Vec<&SharedClusterStatistics> {
        let mut clusters: Vec<_> = self.shared_stats.values().collect();
        clusters.sort_by(|a, b| {
            b.statistics()
                .objects
                .total_size_bytes
                .cmp(&a.statistics().objects.total_size_bytes)
                .then(a.components_mask().cmp(&b.components_mask()))
        });
        clusters
    }

    /// Sum over every shared cluster.
    pub fn total_shared(&self) -> ObjectsStatistics {
        let mut total = ObjectsStatistics::default();
        for cluster in self.shared_stats.values() {
            total.add_stats(&cluster.statistics().objects);
        }
        total
    }

    /// Peak field cache size.
    pub fn max_field_cache_size(&self) -> usize {
        self.max_field_cache_size
    }

    /// Peak DFS stack length.
    pub fn max_objects_queue_size(&self) -> usize {
        self.max_objects_queue_size
    }

    /// Objects enumerated but collected before the statistics pass.
    pub fn enumerated_garbage_collected_objects(&self) -> u64 {
        self.enumerated_garbage_collected_objects
    }

    /// Failed field reads.
    pub fn unsuccessful_field_access_counter(&self) -> u64 {
        self.unsuccessful_field_access_counter
    }

    /// Number of enumerated objects.
    pub fn heap_object_count(&self) -> u64 {
        self.heap_object_count
    }

    /// Session id.
    pub fn traverse_session_id(&self) -> IterationId {
        self.traverse_session_id
    }

    /// Extended report state, present on the extended run.
    pub fn extended_report(&self) -> Option<&ExtendedReportStatistics> {
        self.extended.as_ref()
    }

    /// Mutable extended report state.
    pub fn extended_report_mut(&mut self) -> Option<&mut ExtendedReportStatistics> {
        self.extended.as_mut()
    }

    /// Clusters whose owned size exceeds their threshold. Shared clusters
    /// are ordered largest first.
    pub fn exceeded_clusters(&self) -> ExceededClusters {
        let components = &self.config.components;
        let exceeded_components = self
            .component_stats
            .iter()
            .enumerate()
            .filter(|(id, stats)| {
                components
                    .component(*id)
                    .is_some_and(|c| stats.owned().objects.total_size_bytes > c.extended_report_threshold_bytes())
            })
            .map(|(id, _)| id)
            .collect();
        let exceeded_categories = self
            .category_stats
            .iter()
            .enumerate()
            .filter(|(id, stats)| {
                components
                    .category(*id)
                    .is_some_and(|c| stats.owned().objects.total_size_bytes > c.extended_report_threshold_bytes())
            })
            .map(|(id, _)| id)
            .collect();
        let shared_threshold = components.shared_cluster_extended_report_threshold();
        let shared_masks = self
            .shared_clusters_by_size()
            .into_iter()
            .filter(|cluster| cluster.statistics().objects.total_size_bytes > shared_threshold)
            .map(SharedClusterStatistics::components_mask)
            .collect();
        ExceededClusters {
            components: exceeded_components,
            categories: exceeded_categories,
            shared_masks,
        }
    }

    fn component_label(&self, id: usize) -> &str {
        self.config.components.component(id).map_or("", |c| c.label())
    }

    fn category_label(&self, id: usize) -> &str {
        self.config.components.category(id).map_or("", |c| c.label())
    }

    /// Labels of the components of a shared cluster, formatted as `[a, b]`.
    pub fn shared_cluster_presentation_label(&self, mask: u64) -> String {
        let labels: Vec<&str> = crate::mask_bits(mask).map(|id| self.component_label(id)).collect();
        format!("[{}]", labels.join(", "))
    }

    /// Writes the text report.
    pub fn print<W: fmt::Write>(
        &self,
        writer: &mut W,
        presentation: &HeapSnapshotPresentationConfig,
        collection_time_ms: u64,
    ) -> fmt::Result {
        let style = presentation.style;
        let present = |stats: &ObjectsStatistics| objects_stats_presentation(stats, style);

        writeln!(writer, "Total used memory: {}", present(&self.total.objects))?;
        writeln!(
            writer,
            "Total platform objects memory: {}[{}]",
            present(&self.total.platform_objects_self),
            present(&self.total.platform_retained_objects)
        )?;
        writeln!(writer, "Total shared memory: {}", present(&self.total_shared()))?;
        writeln!(writer, "Report collection time: {collection_time_ms} ms")?;

        writeln!(writer, "{} Categories:", self.category_stats.len())?;
        for (id, stats) in self.category_stats.iter().enumerate() {
            writeln!(writer, "  Category {}:", self.category_label(id))?;
            writeln!(writer, "    Owned: {}", present(&stats.owned().objects))?;
            if let Some(extended) = self.histograms() {
                extended.log_category_histogram(writer, id)?;
            }
            self.print_cluster_tail(writer, stats, presentation)?;
        }

        writeln!(writer, "{} Components:", self.component_stats.len())?;
        for (id, stats) in self.component_stats.iter().enumerate() {
            writeln!(writer, "  Component {}:", self.component_label(id))?;
            writeln!(writer, "    Owned: {}", present(&stats.owned().objects))?;
            if let Some(extended) = self.histograms() {
                extended.log_component_histogram(writer, id)?;
            }
            self.print_cluster_tail(writer, stats, presentation)?;
        }

        if presentation.should_log_shared_clusters {
            writeln!(writer, "Shared clusters:")?;
            for cluster in self.shared_clusters_by_size().into_iter().take(SHARED_CLUSTERS_PRINT_LIMIT) {
                writeln!(
                    writer,
                    "  {}: {}",
                    self.shared_cluster_presentation_label(cluster.components_mask()),
                    present(&cluster.statistics().objects)
                )?;
                if let Some(extended) = self.histograms() {
                    extended.log_shared_cluster_histogram(writer, cluster.components_mask())?;
                }
            }
        }
        if let Some(extended) = &self.extended {
            extended.log_disposer_tree_report(writer)?;
        }
        Ok(())
    }

    fn histograms(&self) -> Option<&ExtendedReportStatistics> {
        self.extended.as_ref().filter(|_| self.config.collect_histograms)
    }

    fn print_cluster_tail<W: fmt::Write>(
        &self,
        writer: &mut W,
        stats: &ClusterObjectsStatistics,
        presentation: &HeapSnapshotPresentationConfig,
    ) -> fmt::Result {
        let present = |stats: &ObjectsStatistics| objects_stats_presentation(stats, presentation.style);
        if presentation.should_log_retained_sizes {
            writeln!(writer, "    Retained: {}", present(&stats.retained().objects))?;
        }
        writeln!(
            writer,
            "    Platform object: {}[{}]",
            present(&stats.owned().platform_objects_self),
            present(&stats.owned().platform_retained_objects)
        )
    }

    /// Builds the telemetry event.
    pub fn build_memory_usage_report_event(
        &self,
        status: StatusCode,
        execution_time_ms: u64,
        execution_start_ms: u64,
        shared_components_limit: usize,
    ) -> MemoryUsageReportEvent {
        let component_stats = self
            .component_stats
            .iter()
            .enumerate()
            .map(|(id, stats)| ClusterMemoryUsage {
                label: self.component_label(id).to_string(),
                stats: stats.into(),
                instance_count_per_class_name: stats.tracked_fqn_instance_counter().clone(),
            })
            .collect();
        let shared_component_stats = self
            .shared_clusters_by_size()
            .into_iter()
            .take(shared_components_limit)
            .map(|cluster| SharedClusterMemoryUsage {
                ids: cluster.component_ids(),
                stats: cluster.statistics().into(),
            })
            .collect();
        let component_category_stats = self
            .category_stats
            .iter()
            .enumerate()
            .map(|(id, stats)| ClusterMemoryUsage {
                label: self.category_label(id).to_string(),
                stats: stats.into(),
                instance_count_per_class_name: stats.tracked_fqn_instance_counter().clone(),
            })
            .collect();
        MemoryUsageReportEvent {
            component_stats,
            shared_component_stats,
            component_category_stats,
            metadata: MemoryUsageCollectionMetadata {
                status_code: status,
                total_heap_objects_stats: (&self.total).into(),
                field_cache_count_peak: self.max_field_cache_size,
                object_queue_length_peak: self.max_objects_queue_size,
                garbage_collected_before_2_pass_count: self.enumerated_garbage_collected_objects,
                collection_time_seconds: execution_time_ms as f64 / 1000.0,
                unsuccessful_field_accesses_count: self.unsuccessful_field_access_counter,
                collection_start_timestamp_seconds: execution_start_ms as f64 / 1000.0,
                collection_iteration: self.traverse_session_id.get(),
            },
        }
    }

    /// Builds the extended crash report for `exceeded`.
    ///
    /// Fails if the statistics were collected without the extended report.
    pub fn as_crash_report(&self, exceeded: &ExceededClusters) -> Result<CrashReport, ReportError> {
        let extended = self.extended.as_ref().ok_or(ReportError::ExtendedReportMissing)?;
        let present = |stats: &ObjectsStatistics| objects_stats_presentation(stats, PresentationStyle::OptimalUnits);

        let exceeded_labels: Vec<String> = exceeded
            .components
            .iter()
            .map(|id| self.component_label(*id).to_string())
            .chain(exceeded.shared_masks.iter().map(|mask| self.shared_cluster_presentation_label(*mask)))
            .collect();
        let exceeded_presentation = exceeded_labels.join(",");

        let mut report = CrashReport::new(EXTENDED_REPORT_TITLE);
        report.add_field("Total used memory", present(&self.total.objects));
        report.add_field(
            "Total platform objects memory",
            format!(
                "{}[{}]",
                present(&self.total.platform_objects_self),
                present(&self.total.platform_retained_objects)
            ),
        );
        report.add_field(
            "signature",
            format!("Clusters that exceeded the memory usage threshold:{exceeded_presentation}"),
        );
        report.add_field("Clusters that exceeded the memory usage threshold", exceeded_presentation);

        for (id, stats) in self.category_stats.iter().enumerate() {
            let mut body = String::new();
            writeln!(body, "Owned: {}", present(&stats.owned().objects))?;
            extended.log_category_histogram(&mut body, id)?;
            write_cluster_details(&mut body, stats)?;
            report.add_field(format!("Category {}", self.category_label(id)), body);
        }

        for (id, stats) in self.component_stats.iter().enumerate() {
            let mut body = String::new();
            writeln!(body, "Owned: {}", present(&stats.owned().objects))?;
            extended.log_component_histogram(&mut body, id)?;
            write_cluster_details(&mut body, stats)?;
            if let Some(index) = extended.exceeded_cluster_of_component(id) {
                let loaders = self
                    .config
                    .components
                    .component(id)
                    .map_or(&[][..], |c| c.custom_class_loaders());
                extended.print_exceeded_cluster_statistics(&mut body, index, loaders)?;
            }
            report.add_field(format!("Component {}", self.component_label(id)), body);
        }

        for cluster in self.shared_clusters_by_size().into_iter().take(SHARED_CLUSTERS_PRINT_LIMIT) {
            let mask = cluster.components_mask();
            let mut body = String::new();
            writeln!(body, "Owned: {}", present(&cluster.statistics().objects))?;
            extended.log_shared_cluster_histogram(&mut body, mask)?;
            if let Some(index) = extended.exceeded_cluster_of_mask(mask) {
                extended.print_exceeded_cluster_statistics(&mut body, index, &[])?;
            }
            report.add_field(format!("Shared cluster {}", self.shared_cluster_presentation_label(mask)), body);
        }

        let mut disposer_info = String::new();
        extended.log_disposer_tree_report(&mut disposer_info)?;
        report.add_field("Disposer tree information", disposer_info);
        report.add_field(
            "Number of nodes in GC root paths trees",
            extended.root_path_tree.number_of_nodes().to_string(),
        );
        Ok(report)
    }
}

fn write_cluster_details(body: &mut String, stats: &ClusterObjectsStatistics) -> fmt::Result {
    let present = |stats: &ObjectsStatistics| objects_stats_presentation(stats, PresentationStyle::OptimalUnits);
    if !stats.tracked_fqn_instance_counter().is_empty() {
        writeln!(body, "Number of instances of tracked classes:")?;
        for (name, count) in stats.tracked_fqn_instance_counter() {
            writeln!(body, "      {name}:{count}")?;
        }
    }
    writeln!(
        body,
        "Platform object: {}[{}]",
        present(&stats.owned().platform_objects_self),
        present(&stats.owned().platform_retained_objects)
    )
}
