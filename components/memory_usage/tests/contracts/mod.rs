//! Contract tests for the memory_usage public API
//!
//! These tests pin the behavior hosts and report consumers rely on.

use std::sync::Arc;
use std::thread;

use heap_model::{ClassDefinition, HeapHost, InMemoryHeap, ObjectRef};
use memory_usage::child_processor::HeapTraverseChildProcessor;
use memory_usage::traverse::TraverseLimits;
use memory_usage::{
    mask_bits, to_short_string_as_count, to_short_string_as_size, CancellationToken, ComponentsSet,
    DepthFirstSearchTraverse, ExceededClusters, FieldCache, HeapSnapshotStatistics, HeapTraverseConfig, IterationId,
    MemoryReportCollector, ObjectTag, ReportError, StackNode, StatusCode, TraverseResult, TraverseStrategy,
};

/// Tag fields survive each other's updates
#[test]
fn test_object_tag_contract() {
    let iteration = IterationId::new(42);
    let tag = ObjectTag::EMPTY
        .mark_visited(iteration, 7)
        .with_object_id(123_456)
        .with_exceeded_cluster(Some(5));
    assert!(tag.was_visited(iteration));
    assert_eq!(tag.depth(iteration), 7);
    assert_eq!(tag.object_id(iteration), 123_456);
    assert_eq!(tag.exceeded_cluster_index(), Some(5));

    let cleared = tag.with_visited_cleared();
    assert!(!cleared.was_visited(iteration));
    assert_eq!(cleared.depth(iteration), 7);
    assert_eq!(cleared.object_id(iteration), 123_456);

    // Another session sees an empty tag.
    let other = iteration.next();
    assert!(!tag.was_visited(other));
    assert_eq!(tag.depth(other), 0);
    assert_eq!(tag.object_id(other), 0);
}

/// Session ids are 8 bit and never 0
#[test]
fn test_iteration_id_wraps_past_zero() {
    assert_eq!(IterationId::new(0), IterationId::FIRST);
    assert_eq!(IterationId::new(u8::MAX).next(), IterationId::FIRST);
}

/// Cancellation from another thread is observed through clones
#[test]
fn test_cancellation_token_is_shared() {
    let token = CancellationToken::new();
    let remote = token.clone();
    thread::spawn(move || remote.cancel()).join().unwrap();
    assert!(token.is_cancelled());
    assert_eq!(token.check().unwrap_err().status, StatusCode::TraversalAborted);
    token.reset();
    assert!(token.check().is_ok());
}

/// Short strings used by every report
#[test]
fn test_short_string_contract() {
    assert_eq!(to_short_string_as_count(42), "42");
    assert_eq!(to_short_string_as_count(1_234), "1.2K");
    assert_eq!(to_short_string_as_size(1_500_000), "1.5MB");
    assert_eq!(to_short_string_as_size(250_000_000), "250MB");
}

/// Mask bits come out in ascending order
#[test]
fn test_mask_bits_contract() {
    assert_eq!(mask_bits(1 << 63 | 0b101).collect::<Vec<_>>(), vec![0, 2, 63]);
}

struct Counting {
    postorder: Vec<ObjectRef>,
    refused: usize,
}

impl<H: HeapHost + ?Sized> TraverseStrategy<H> for Counting {
    fn handle_processed_node(&mut self, _host: &H, node: &StackNode, _root: ObjectRef) -> TraverseResult<()> {
        self.postorder.push(node.object);
        Ok(())
    }

    fn should_add_object_to_stack(
        &mut self,
        _host: &H,
        _parent: &StackNode,
        _child_tag: ObjectTag,
        _child: ObjectRef,
        label: &str,
    ) -> bool {
        if label == "skip" {
            self.refused += 1;
            return false;
        }
        true
    }
}

/// Custom strategies plug into the generic walk
#[test]
fn test_custom_strategy_contract() {
    let heap = InMemoryHeap::new();
    let class = heap
        .define_class(ClassDefinition::new("c.Node").field("keep").field("skip"))
        .unwrap();
    let root = heap.allocate(class, 1).unwrap();
    let kept = heap.allocate(class, 1).unwrap();
    let skipped = heap.allocate(class, 1).unwrap();
    heap.set_field(root, "keep", Some(kept)).unwrap();
    heap.set_field(root, "skip", Some(skipped)).unwrap();

    let config = HeapTraverseConfig::new(Arc::new(ComponentsSet::default()));
    let processor = HeapTraverseChildProcessor::new(&heap, &config);
    let mut cache = FieldCache::default();
    let token = CancellationToken::new();
    let limits = TraverseLimits {
        max_depth: 10,
        max_stack_size: 10,
    };
    let mut strategy = Counting {
        postorder: Vec::new(),
        refused: 0,
    };
    let mut traverse = DepthFirstSearchTraverse::new(&heap, &processor, &mut cache, &token, IterationId::FIRST, limits);
    traverse.start(&[root], &mut strategy).unwrap();
    assert_eq!(strategy.postorder, vec![kept, root]);
    assert_eq!(strategy.refused, 1);
    assert_eq!(traverse.counters().peak_stack_size, 2);
}

/// Crash reports need the extended run
#[test]
fn test_crash_report_requires_extended_run() {
    let statistics = HeapSnapshotStatistics::new(HeapTraverseConfig::new(Arc::new(ComponentsSet::default())));
    assert_eq!(
        statistics.as_crash_report(&ExceededClusters::default()).unwrap_err(),
        ReportError::ExtendedReportMissing
    );
}

/// Telemetry event field names
#[test]
fn test_event_json_shape() {
    let heap = InMemoryHeap::new();
    let class = heap.define_class(ClassDefinition::new("c.Node")).unwrap();
    heap.add_root(heap.allocate(class, 10).unwrap());
    let mut collector = MemoryReportCollector::new(
        &heap,
        HeapTraverseConfig::new(Arc::new(ComponentsSet::default())),
        CancellationToken::new(),
    );
    let statistics = collector.collect_memory_usage().unwrap();
    let event = statistics.build_memory_usage_report_event(StatusCode::NoError, 2_500, 1_000, 10);
    let json = serde_json::to_value(&event).unwrap();

    let metadata = &json["metadata"];
    assert_eq!(metadata["status_code"], "NO_ERROR");
    assert_eq!(metadata["collection_time_seconds"], 2.5);
    assert_eq!(metadata["collection_start_timestamp_seconds"], 1.0);
    assert_eq!(metadata["collection_iteration"], 1);
    assert_eq!(metadata["total_heap_objects_stats"]["total_stats"]["total_size_bytes"], 10);
    assert_eq!(json["component_stats"][0]["label"], "uncategorized_main");
    assert_eq!(
        json["component_stats"][0]["stats"]["owned_cluster_stats"]["total_stats"]["objects_count"],
        1
    );
    assert!(json["shared_component_stats"].as_array().unwrap().is_empty());
}
