//! Traversal Integration Tests
//!
//! Tests the depth first walk and the enumeration pass against an
//! `InMemoryHeap`: visitation, depth cap, cancellation and collection of
//! objects between passes.

use std::collections::HashSet;
use std::sync::Arc;

use heap_model::{ClassDefinition, HeapHost, InMemoryHeap, ObjectRef, ObjectTagStore};
use integration_tests::components_by_package;
use memory_usage::child_processor::HeapTraverseChildProcessor;
use memory_usage::object_tag::MAX_ENCODABLE_DEPTH;
use memory_usage::traverse::TraverseLimits;
use memory_usage::{
    CancellationToken, ComponentsSet, DepthFirstSearchTraverse, FieldCache, HeapSnapshotStatistics,
    HeapTraverseConfig, IterationId, MemoryReportCollector, ObjectTag, StackNode, StatusCode, TraverseResult,
    TraverseStrategy,
};

fn enumerate(heap: &InMemoryHeap) -> (IterationId, u32) {
    let config = HeapTraverseConfig::new(Arc::new(ComponentsSet::default()));
    let mut collector = MemoryReportCollector::new(heap, config, CancellationToken::new());
    let iteration = collector.begin_session();
    let count = collector.run_enumeration_pass().unwrap();
    (iteration, count)
}

fn object_id(heap: &InMemoryHeap, obj: ObjectRef, iteration: IterationId) -> u32 {
    ObjectTag::from_raw(heap.tag(obj)).object_id(iteration)
}

// ============================================================================
// Visitation
// ============================================================================

/// A 2-cycle terminates and both objects get one postorder id
#[test]
fn test_two_cycle_gets_one_id_each() {
    let heap = InMemoryHeap::new();
    let node = heap.define_class(ClassDefinition::new("c.Node").field("other")).unwrap();
    let a = heap.allocate(node, 8).unwrap();
    let b = heap.allocate(node, 8).unwrap();
    heap.set_field(a, "other", Some(b)).unwrap();
    heap.set_field(b, "other", Some(a)).unwrap();
    heap.add_root(a);

    let (iteration, count) = enumerate(&heap);
    assert_eq!(count, 2);
    assert_eq!(object_id(&heap, b, iteration), 1);
    assert_eq!(object_id(&heap, a, iteration), 2);
}

/// Objects reachable along several paths are numbered once
#[test]
fn test_diamond_ids_are_unique() {
    let heap = InMemoryHeap::new();
    let node = heap.define_class(ClassDefinition::new("c.Node").field("left").field("right")).unwrap();
    let objects: Vec<ObjectRef> = (0..4).map(|_| heap.allocate(node, 8).unwrap()).collect();
    heap.set_field(objects[0], "left", Some(objects[1])).unwrap();
    heap.set_field(objects[0], "right", Some(objects[2])).unwrap();
    heap.set_field(objects[1], "left", Some(objects[3])).unwrap();
    heap.set_field(objects[2], "right", Some(objects[3])).unwrap();
    heap.add_root(objects[0]);
    heap.add_root(objects[3]);

    let (iteration, count) = enumerate(&heap);
    assert_eq!(count, 4);
    let ids: HashSet<u32> = objects.iter().map(|obj| object_id(&heap, *obj, iteration)).collect();
    assert_eq!(ids, (1..=4).collect());
    // The root is numbered last.
    assert_eq!(object_id(&heap, objects[0], iteration), 4);
}

// ============================================================================
// Depth cap
// ============================================================================

/// A chain of 100,050 objects stops expanding at object 100,000
#[test]
fn test_depth_cap_on_long_chain() {
    const CHAIN_LENGTH: usize = 100_050;
    let heap = InMemoryHeap::new();
    let link = heap.define_class(ClassDefinition::new("c.Link").field("next")).unwrap();
    let chain: Vec<ObjectRef> = (0..CHAIN_LENGTH).map(|_| heap.allocate(link, 1).unwrap()).collect();
    for pair in chain.windows(2) {
        heap.set_field(pair[0], "next", Some(pair[1])).unwrap();
    }
    heap.add_root(chain[0]);

    let (iteration, count) = enumerate(&heap);
    assert_eq!(count, 100_000);
    let last_visited = ObjectTag::from_raw(heap.tag(chain[99_999]));
    assert_eq!(last_visited.depth(iteration), 100_000);
    assert_eq!(heap.tag(chain[100_000]), 0);
    assert_eq!(heap.tag(chain[CHAIN_LENGTH - 1]), 0);
}

/// A depth limit past what a tag holds is lowered, so depths stay exact
#[test]
fn test_depth_limit_beyond_tag_range_is_lowered() {
    let chain_length = MAX_ENCODABLE_DEPTH as usize + 4;
    let heap = InMemoryHeap::new();
    let link = heap.define_class(ClassDefinition::new("c.Link").field("next")).unwrap();
    let chain: Vec<ObjectRef> = (0..chain_length).map(|_| heap.allocate(link, 1).unwrap()).collect();
    for pair in chain.windows(2) {
        heap.set_field(pair[0], "next", Some(pair[1])).unwrap();
    }
    heap.add_root(chain[0]);

    let mut config = HeapTraverseConfig::new(Arc::new(ComponentsSet::default()));
    config.max_depth = 200_000;
    let mut collector = MemoryReportCollector::new(&heap, config, CancellationToken::new());
    let iteration = collector.begin_session();
    let count = collector.run_enumeration_pass().unwrap();

    assert_eq!(count, MAX_ENCODABLE_DEPTH);
    let depth = |index: usize| ObjectTag::from_raw(heap.tag(chain[index])).depth(iteration);
    let last = MAX_ENCODABLE_DEPTH as usize - 1;
    assert_eq!(depth(last - 1), MAX_ENCODABLE_DEPTH - 1);
    assert_eq!(depth(last), MAX_ENCODABLE_DEPTH);
    assert_eq!(heap.tag(chain[last + 1]), 0);
    assert_eq!(heap.tag(chain[chain_length - 1]), 0);
}

// ============================================================================
// Cancellation
// ============================================================================

struct CancelAfter {
    token: CancellationToken,
    remaining: usize,
    cleanups: usize,
}

impl<H: HeapHost + ?Sized> TraverseStrategy<H> for CancelAfter {
    fn handle_node(&mut self, _host: &H, _node: &StackNode) -> TraverseResult<()> {
        if self.remaining == 0 {
            self.token.cancel();
        } else {
            self.remaining -= 1;
        }
        Ok(())
    }

    fn handle_processed_node(&mut self, _host: &H, _node: &StackNode, _root: ObjectRef) -> TraverseResult<()> {
        Ok(())
    }

    fn should_add_object_to_stack(
        &mut self,
        _host: &H,
        _parent: &StackNode,
        _child_tag: ObjectTag,
        _child: ObjectRef,
        _label: &str,
    ) -> bool {
        true
    }

    fn cleanup(&mut self) {
        self.cleanups += 1;
    }
}

/// Cancelling mid-walk aborts and clears the stack exactly once
#[test]
fn test_cancellation_mid_traversal() {
    let heap = InMemoryHeap::new();
    let link = heap.define_class(ClassDefinition::new("c.Link").field("next")).unwrap();
    let chain: Vec<ObjectRef> = (0..50).map(|_| heap.allocate(link, 1).unwrap()).collect();
    for pair in chain.windows(2) {
        heap.set_field(pair[0], "next", Some(pair[1])).unwrap();
    }

    let config = HeapTraverseConfig::new(Arc::new(ComponentsSet::default()));
    let processor = HeapTraverseChildProcessor::new(&heap, &config);
    let mut cache = FieldCache::default();
    let token = CancellationToken::new();
    let mut strategy = CancelAfter {
        token: token.clone(),
        remaining: 10,
        cleanups: 0,
    };
    let limits = TraverseLimits {
        max_depth: 1_000,
        max_stack_size: 1_000,
    };
    let mut traverse = DepthFirstSearchTraverse::new(&heap, &processor, &mut cache, &token, IterationId::FIRST, limits);

    let err = traverse.start(&[chain[0]], &mut strategy).unwrap_err();
    assert_eq!(err.status, StatusCode::TraversalAborted);
    assert_eq!(strategy.cleanups, 1);
    assert_eq!(traverse.stack_size(), 0);
}

/// A collector whose token is cancelled returns no report
#[test]
fn test_cancelled_collector_fails() {
    let heap = InMemoryHeap::new();
    let node = heap.define_class(ClassDefinition::new("c.Node")).unwrap();
    heap.add_root(heap.allocate(node, 8).unwrap());
    let token = CancellationToken::new();
    token.cancel();

    let config = HeapTraverseConfig::new(Arc::new(ComponentsSet::default()));
    let mut collector = MemoryReportCollector::new(&heap, config, token);
    let err = collector.analyze_and_report().unwrap_err();
    assert_eq!(err.status, StatusCode::TraversalAborted);
}

// ============================================================================
// Collection between passes
// ============================================================================

/// Objects collected after enumeration are counted and skipped
#[test]
fn test_objects_collected_between_passes() {
    let components = components_by_package(&[("editor", "com.editor")]);
    let heap = InMemoryHeap::new();
    let holder = heap
        .define_class(ClassDefinition::new("com.editor.Holder").field("a").field("b"))
        .unwrap();
    let plain = heap.define_class(ClassDefinition::new("org.Plain")).unwrap();
    let root = heap.allocate(holder, 16).unwrap();
    let first = heap.allocate(plain, 100).unwrap();
    let second = heap.allocate(plain, 200).unwrap();
    heap.set_field(root, "a", Some(first)).unwrap();
    heap.set_field(root, "b", Some(second)).unwrap();
    heap.add_root(root);

    let config = HeapTraverseConfig::new(components);
    let mut collector = MemoryReportCollector::new(&heap, config.clone(), CancellationToken::new());
    collector.begin_session();
    assert_eq!(collector.run_enumeration_pass().unwrap(), 3);
    heap.collect(first).unwrap();
    heap.collect(second).unwrap();

    let mut statistics = HeapSnapshotStatistics::new(config);
    collector.run_statistics_pass(&mut statistics).unwrap();
    assert_eq!(statistics.enumerated_garbage_collected_objects(), 2);
    assert_eq!(statistics.total().objects.total_size_bytes, 16);
    assert_eq!(statistics.component_stats()[1].owned().objects.objects_count, 1);
}

/// Consecutive sessions use fresh ids and see their own tags only
#[test]
fn test_consecutive_sessions() {
    let components = components_by_package(&[("editor", "com.editor")]);
    let heap = InMemoryHeap::new();
    let document = heap.define_class(ClassDefinition::new("com.editor.Document")).unwrap();
    heap.add_root(heap.allocate(document, 64).unwrap());

    let mut collector =
        MemoryReportCollector::new(&heap, HeapTraverseConfig::new(components), CancellationToken::new());
    let first = collector.collect_memory_usage().unwrap();
    let second = collector.collect_memory_usage().unwrap();
    assert_eq!(first.traverse_session_id(), IterationId::FIRST);
    assert_eq!(second.traverse_session_id(), IterationId::FIRST.next());
    assert_eq!(
        first.component_stats()[1].owned().objects,
        second.component_stats()[1].owned().objects
    );
}
