//! Root Path Integration Tests
//!
//! Tests the root path trie directly and through an extended collection.

use heap_model::{ClassDefinition, InMemoryHeap, ObjectTagStore};
use integration_tests::components_by_package;
use memory_usage::root_path_tree::{ExtendedStackNode, RootPathElement};
use memory_usage::{
    CancellationToken, ComponentRegistration, ComponentsSet, HeapTraverseConfig, MemoryReportCollector,
    ObjectsStatistics, RootPathTree,
};
use std::sync::Arc;

fn path(steps: &[(&str, &str)]) -> Vec<RootPathElement> {
    steps
        .iter()
        .map(|(label, class)| RootPathElement::new(ExtendedStackNode::new(*class, *label), 16))
        .collect()
}

fn print(tree: &RootPathTree, objects_count: u64) -> String {
    let total = ObjectsStatistics {
        objects_count,
        total_size_bytes: 16 * objects_count,
    };
    let mut out = String::new();
    tree.print_path_tree_for_cluster_and_type(&mut out, 0, 0, &total).unwrap();
    out
}

// ============================================================================
// Trie shape
// ============================================================================

/// Paths sharing a root-to-depth-2 prefix share one branch
#[test]
fn test_shared_prefix_is_one_branch() {
    let mut tree = RootPathTree::new();
    tree.add_object_with_path_to_root(&mut path(&[("(root)", "a.App"), ("services", "a.Services"), ("cache", "a.Cache")]), 0, 0);
    tree.add_object_with_path_to_root(&mut path(&[("(root)", "a.App"), ("services", "a.Services"), ("index", "a.Index")]), 0, 0);

    assert_eq!(tree.number_of_nodes(), 4);
    let out = print(&tree, 2);
    assert_eq!(out.matches("(root): a.App").count(), 1);
    assert_eq!(out.matches("services: a.Services").count(), 1);
    assert!(out.contains("cache: a.Cache"));
    assert!(out.contains("index: a.Index"));
}

/// The same (label, class) directly below itself folds into one repeated node
#[test]
fn test_repeated_step_folds_into_one_node() {
    let mut tree = RootPathTree::new();
    tree.add_object_with_path_to_root(
        &mut path(&[("(root)", "l.List"), ("next", "l.Node"), ("next", "l.Node"), ("next", "l.Node")]),
        0,
        0,
    );

    assert_eq!(tree.number_of_nodes(), 2);
    let out = print(&tree, 1);
    let node_line = out.lines().find(|line| line.ends_with("next: l.Node")).unwrap();
    assert!(node_line.contains("(rep)"));
}

/// Paths from different roots stay in separate trees
#[test]
fn test_distinct_roots() {
    let mut tree = RootPathTree::new();
    tree.add_object_with_path_to_root(&mut path(&[("(root)", "a.First"), ("f", "a.Leaf")]), 0, 0);
    tree.add_object_with_path_to_root(&mut path(&[("(root)", "a.Second"), ("f", "a.Leaf")]), 0, 0);

    assert_eq!(tree.number_of_nodes(), 4);
    let out = print(&tree, 2);
    assert!(out.contains("Root 1:"));
    assert!(out.contains("Root 2:"));
}

/// Paths from the same (label, class) root print under one root
#[test]
fn test_same_root_is_merged() {
    let mut tree = RootPathTree::new();
    tree.add_object_with_path_to_root(&mut path(&[("(root)", "a.App"), ("f", "a.Left")]), 0, 0);
    tree.add_object_with_path_to_root(&mut path(&[("(root)", "a.App"), ("g", "a.Right")]), 0, 0);

    assert_eq!(tree.number_of_nodes(), 3);
    let out = print(&tree, 2);
    assert!(out.contains("Root 1:"));
    assert!(!out.contains("Root 2:"));
    assert_eq!(out.matches("(root): a.App").count(), 1);
}

// ============================================================================
// Extended collection
// ============================================================================

fn leaking_heap() -> InMemoryHeap {
    let heap = InMemoryHeap::new();
    let holder = heap
        .define_class(ClassDefinition::new("com.editor.Holder").field("cache"))
        .unwrap();
    let cache = heap.define_class(ClassDefinition::new("com.editor.Cache")).unwrap();
    let root = heap.allocate(holder, 16).unwrap();
    let leaked = heap.allocate(cache, 2000).unwrap();
    heap.set_field(root, "cache", Some(leaked)).unwrap();
    heap.add_root(root);
    heap
}

/// An exceeded component gets root paths to its largest classes
#[test]
fn test_extended_report_traces_exceeded_component() {
    let mut components = ComponentsSet::new(u64::MAX, u64::MAX);
    let category = components.register_category("ide", u64::MAX, Vec::new()).unwrap();
    components
        .add_component_with_packages_and_class_names(
            category,
            ComponentRegistration::new("editor").package("com.editor").threshold(1000),
        )
        .unwrap();
    let heap = leaking_heap();

    let mut collector =
        MemoryReportCollector::new(&heap, HeapTraverseConfig::new(Arc::new(components)), CancellationToken::new());
    let report = collector.analyze_and_report().unwrap();

    assert_eq!(report.exceeded.components, vec![1]);
    let extended = report.extended.as_ref().unwrap();
    assert!(extended.extended_report().unwrap().root_path_tree.number_of_nodes() >= 2);

    let crash = report.crash_report.as_ref().unwrap();
    let body = crash.field("Component editor").unwrap();
    assert!(body.contains("================= com.editor.Cache (owned) ================"));
    assert!(body.contains("(root): com.editor.Holder"));
    assert!(body.contains("cache: com.editor.Cache"));

    // The extended pass leaves no tags behind.
    assert!(heap.tagged_objects().is_empty());
}

/// Nothing over its threshold means no extended run
#[test]
fn test_no_extended_report_below_thresholds() {
    let heap = leaking_heap();
    let mut collector = MemoryReportCollector::new(
        &heap,
        HeapTraverseConfig::new(components_by_package(&[("editor", "com.editor")])),
        CancellationToken::new(),
    );
    let report = collector.analyze_and_report().unwrap();

    assert!(report.exceeded.is_empty());
    assert!(report.extended.is_none());
    assert!(report.crash_report.is_none());
}
