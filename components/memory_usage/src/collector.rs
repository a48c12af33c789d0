//! Session orchestration: enumeration, statistics and extended passes.

use std::collections::HashMap;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use heap_model::HeapHost;

use crate::child_processor::HeapTraverseChildProcessor;
use crate::crash_report::CrashReport;
use crate::enumeration::ObjectsEnumerationTraverse;
use crate::extended_report::ExceededClusters;
use crate::extended_traverse::ExtendedReportCollectionTraverse;
use crate::field_cache::FieldCache;
use crate::object_tag::{IterationId, ObjectTag};
use crate::report_event::MemoryUsageReportEvent;
use crate::statistics_pass::HeapStatisticsPass;
use crate::traverse::{CancellationToken, DepthFirstSearchTraverse, TraverseLimits};
use crate::traverse_node::HeapTraverseNode;
use crate::{HeapSnapshotStatistics, HeapTraverseConfig, StatusCode, TraverseResult};

/// Everything produced by [`MemoryReportCollector::analyze_and_report`].
#[derive(Debug)]
pub struct MemoryUsageReport {
    /// Statistics of the regular run
    pub statistics: HeapSnapshotStatistics,
    /// Telemetry event of the regular run
    pub event: MemoryUsageReportEvent,
    /// Clusters over their threshold
    pub exceeded: ExceededClusters,
    /// Statistics of the extended run, if something exceeded its threshold
    pub extended: Option<HeapSnapshotStatistics>,
    /// Crash report built from the extended run
    pub crash_report: Option<CrashReport>,
    /// Wall clock duration of the regular run
    pub collection_time_ms: u64,
}

/// Runs collection sessions over one host.
///
/// The collector remembers the last session id so consecutive sessions never
/// mistake each other's tags. Each pass is public so callers can mutate the
/// heap between passes.
pub struct MemoryReportCollector<'h, H: HeapHost + ?Sized> {
    host: &'h H,
    config: HeapTraverseConfig,
    cancellation: CancellationToken,
    iteration: Option<IterationId>,
    field_cache: FieldCache,
    child_processor: HeapTraverseChildProcessor,
    nodes: HashMap<u32, HeapTraverseNode>,
    last_object_id: u32,
    peak_stack_size: usize,
    unsuccessful_field_accesses: u64,
}

impl<'h, H: HeapHost + ?Sized> MemoryReportCollector<'h, H> {
    /// Creates a collector over `host`.
    pub fn new(host: &'h H, config: HeapTraverseConfig, cancellation: CancellationToken) -> Self {
        let child_processor = HeapTraverseChildProcessor::new(host, &config);
        Self {
            host,
            field_cache: FieldCache::new(config.max_field_cache_entries),
            config,
            cancellation,
            iteration: None,
            child_processor,
            nodes: HashMap::new(),
            last_object_id: 0,
            peak_stack_size: 0,
            unsuccessful_field_accesses: 0,
        }
    }

    /// Continues numbering sessions after `previous`.
    pub fn with_previous_iteration(mut self, previous: IterationId) -> Self {
        self.iteration = Some(previous);
        self
    }

    /// Id of the current session.
    pub fn iteration(&self) -> Option<IterationId> {
        self.iteration
    }

    /// Traversal configuration.
    pub fn config(&self) -> &HeapTraverseConfig {
        &self.config
    }

    /// Token that aborts the running pass.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Largest id assigned by the last enumeration pass.
    pub fn last_object_id(&self) -> u32 {
        self.last_object_id
    }

    /// Starts a session: advances the id and clears tags left by the session
    /// that used the same id 255 sessions ago.
    pub fn begin_session(&mut self) -> IterationId {
        let iteration = self.iteration.map_or(IterationId::FIRST, IterationId::next);
        self.iteration = Some(iteration);
        let mut stale = 0usize;
        for (obj, raw) in self.host.tagged_objects() {
            if ObjectTag::from_raw(raw).belongs_to(iteration) {
                self.host.set_tag(obj, ObjectTag::EMPTY.raw());
                stale += 1;
            }
        }
        if stale > 0 {
            tracing::debug!(%iteration, stale, "cleared stale tags");
        }
        self.child_processor = HeapTraverseChildProcessor::new(self.host, &self.config);
        self.field_cache.clear();
        self.nodes.clear();
        self.last_object_id = 0;
        self.peak_stack_size = 0;
        self.unsuccessful_field_accesses = 0;
        iteration
    }

    fn current_iteration(&mut self) -> IterationId {
        match self.iteration {
            Some(iteration) => iteration,
            None => self.begin_session(),
        }
    }

    fn limits(&self) -> TraverseLimits {
        TraverseLimits {
            max_depth: self.config.max_depth,
            max_stack_size: self.config.max_stack_size,
        }
    }

    /// Numbers every object reachable from the host's roots. Returns the
    /// number of enumerated objects.
    pub fn run_enumeration_pass(&mut self) -> TraverseResult<u32> {
        let iteration = self.current_iteration();
        let limits = self.limits();
        let roots = self.host.roots();
        let mut strategy = ObjectsEnumerationTraverse::new(iteration, self.config.max_objects);
        let (result, counters) = {
            let mut traverse = DepthFirstSearchTraverse::new(
                self.host,
                &self.child_processor,
                &mut self.field_cache,
                &self.cancellation,
                iteration,
                limits,
            );
            let result = traverse.start(&roots, &mut strategy);
            (result, traverse.counters())
        };
        self.peak_stack_size = self.peak_stack_size.max(counters.peak_stack_size);
        self.unsuccessful_field_accesses += counters.unsuccessful_field_accesses as u64;
        result?;
        self.last_object_id = strategy.last_object_id();
        self.nodes = strategy.into_nodes();
        tracing::debug!(%iteration, objects = self.last_object_id, roots = roots.len(), "enumeration pass finished");
        Ok(self.last_object_id)
    }

    /// Attributes the enumerated objects into `statistics`.
    pub fn run_statistics_pass(&mut self, statistics: &mut HeapSnapshotStatistics) -> TraverseResult<()> {
        let iteration = self.current_iteration();
        let nodes = std::mem::take(&mut self.nodes);
        HeapStatisticsPass::new(
            self.host,
            &self.child_processor,
            &mut self.field_cache,
            &self.cancellation,
            iteration,
        )
        .run(nodes, self.last_object_id, statistics)?;
        statistics.set_traverse_session_id(iteration);
        statistics.update_max_objects_queue_size(self.peak_stack_size);
        statistics.add_unsuccessful_field_accesses(self.unsuccessful_field_accesses);
        tracing::debug!(%iteration, "statistics pass finished");
        Ok(())
    }

    /// Walks shortest root paths and fills the root path tree of `statistics`.
    /// Does nothing for statistics without an extended report.
    pub fn run_extended_pass(&mut self, statistics: &mut HeapSnapshotStatistics) -> TraverseResult<()> {
        let iteration = self.current_iteration();
        let limits = self.limits();
        let components = self.config.components.clone();
        let Some(extended) = statistics.extended_report_mut() else {
            return Ok(());
        };
        extended.compute_nominated_classes();
        let roots = self.host.roots();
        let peak = {
            let mut strategy = ExtendedReportCollectionTraverse::new(extended, &components, iteration);
            let mut traverse = DepthFirstSearchTraverse::new(
                self.host,
                &self.child_processor,
                &mut self.field_cache,
                &self.cancellation,
                iteration,
                limits,
            );
            traverse.start(&roots, &mut strategy)?;
            traverse.counters().peak_stack_size
        };
        statistics.update_max_objects_queue_size(peak);
        tracing::debug!(%iteration, "extended pass finished");
        Ok(())
    }

    /// Runs a regular session.
    pub fn collect_memory_usage(&mut self) -> TraverseResult<HeapSnapshotStatistics> {
        let iteration = self.begin_session();
        tracing::info!(%iteration, "collecting memory usage");
        let mut statistics = HeapSnapshotStatistics::new(self.config.clone());
        self.run_enumeration_pass()?;
        self.run_statistics_pass(&mut statistics)?;
        tracing::info!(
            %iteration,
            objects = statistics.heap_object_count(),
            total_bytes = statistics.total().objects.total_size_bytes,
            "memory usage collected"
        );
        Ok(statistics)
    }

    /// Runs a session that also builds the extended report for `exceeded`.
    pub fn collect_extended_report(&mut self, exceeded: &ExceededClusters) -> TraverseResult<HeapSnapshotStatistics> {
        let iteration = self.begin_session();
        tracing::info!(
            %iteration,
            components = exceeded.components.len(),
            shared_clusters = exceeded.shared_masks.len(),
            "collecting extended memory report"
        );
        let mut statistics = HeapSnapshotStatistics::with_extended_report(self.config.extended(), exceeded);
        self.run_enumeration_pass()?;
        self.run_statistics_pass(&mut statistics)?;
        self.run_extended_pass(&mut statistics)?;
        if let Some(extended) = statistics.extended_report() {
            tracing::info!(
                %iteration,
                root_path_nodes = extended.root_path_tree.number_of_nodes(),
                "extended memory report collected"
            );
        }
        Ok(statistics)
    }

    /// Clusters of `statistics` over their threshold.
    pub fn exceeded_clusters(&self, statistics: &HeapSnapshotStatistics) -> ExceededClusters {
        statistics.exceeded_clusters()
    }

    /// Runs a regular session and, when a threshold was exceeded, an extended
    /// session with its crash report.
    pub fn analyze_and_report(&mut self) -> TraverseResult<MemoryUsageReport> {
        let start_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis() as u64);
        let started = Instant::now();
        let statistics = self.collect_memory_usage()?;
        let collection_time_ms = started.elapsed().as_millis() as u64;
        let event = statistics.build_memory_usage_report_event(
            StatusCode::NoError,
            collection_time_ms,
            start_ms,
            self.config.shared_components_limit,
        );
        let exceeded = self.exceeded_clusters(&statistics);
        if exceeded.is_empty() {
            return Ok(MemoryUsageReport {
                statistics,
                event,
                exceeded,
                extended: None,
                crash_report: None,
                collection_time_ms,
            });
        }

        tracing::warn!(
            components = ?exceeded.components,
            categories = ?exceeded.categories,
            shared_clusters = exceeded.shared_masks.len(),
            "memory usage thresholds exceeded"
        );
        let extended = self.collect_extended_report(&exceeded)?;
        let crash_report = match extended.as_crash_report(&exceeded) {
            Ok(report) => Some(report),
            Err(err) => {
                tracing::warn!(error = %err, "failed to build the extended memory report");
                None
            }
        };
        Ok(MemoryUsageReport {
            statistics,
            event,
            exceeded,
            extended: Some(extended),
            crash_report,
            collection_time_ms,
        })
    }
}
