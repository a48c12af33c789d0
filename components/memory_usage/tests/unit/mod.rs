//! Unit tests for memory usage collection over small synthetic heaps

use std::sync::Arc;

use heap_model::{ClassDefinition, InMemoryHeap, ObjectRef, ObjectTagStore};
use memory_usage::{
    CancellationToken, ComponentRegistration, ComponentsSet, ExceededClusters, HeapSnapshotPresentationConfig,
    HeapSnapshotStatistics, HeapTraverseConfig, MemoryReportCollector, PresentationStyle,
};

fn components() -> Arc<ComponentsSet> {
    let mut set = ComponentsSet::new(u64::MAX, u64::MAX);
    let ide = set.register_category("ide", u64::MAX, Vec::new()).unwrap();
    set.add_component_with_packages_and_class_names(
        ide,
        ComponentRegistration::new("editor")
            .package("com.editor")
            .tracked_fqn("com.editor.Document")
            .threshold(1_000),
    )
    .unwrap();
    set.add_component_with_packages_and_class_names(ide, ComponentRegistration::new("vcs").package("com.vcs"))
        .unwrap();
    Arc::new(set)
}

fn collect(heap: &InMemoryHeap) -> HeapSnapshotStatistics {
    let mut collector = MemoryReportCollector::new(heap, HeapTraverseConfig::new(components()), CancellationToken::new());
    collector.collect_memory_usage().unwrap()
}

fn owned_bytes(statistics: &HeapSnapshotStatistics, id: usize) -> u64 {
    statistics.component_stats()[id].owned().objects.total_size_bytes
}

fn holder(heap: &InMemoryHeap) -> ObjectRef {
    let class = heap
        .define_class(ClassDefinition::new("com.editor.Holder").field("first").field("second"))
        .unwrap();
    let obj = heap.allocate(class, 16).unwrap();
    heap.add_root(obj);
    obj
}

// ============================================================================
// Child edges
// ============================================================================

#[test]
fn test_array_elements_are_owned_through_the_array() {
    let heap = InMemoryHeap::new();
    let root = holder(&heap);
    let plain = heap.define_class(ClassDefinition::new("org.Plain")).unwrap();
    let array_class = heap.define_class(ClassDefinition::object_array("java.lang.Object[]")).unwrap();
    let a = heap.allocate(plain, 10).unwrap();
    let b = heap.allocate(plain, 20).unwrap();
    let array = heap.allocate_array(array_class, 24, vec![Some(a), None, Some(b)]).unwrap();
    heap.set_field(root, "first", Some(array)).unwrap();

    let statistics = collect(&heap);
    assert_eq!(owned_bytes(&statistics, 1), 70);
    assert_eq!(statistics.heap_object_count(), 4);
}

#[test]
fn test_weak_referent_is_not_followed() {
    let heap = InMemoryHeap::new();
    let root = holder(&heap);
    let weak = heap
        .define_class(ClassDefinition::new("java.lang.ref.WeakReference").reference().field("referent"))
        .unwrap();
    let plain = heap.define_class(ClassDefinition::new("org.Big")).unwrap();
    let reference = heap.allocate(weak, 32).unwrap();
    let big = heap.allocate(plain, 10_000).unwrap();
    heap.set_field(reference, "referent", Some(big)).unwrap();
    heap.set_field(root, "first", Some(reference)).unwrap();

    let statistics = collect(&heap);
    assert_eq!(statistics.total().objects.total_size_bytes, 48);
}

#[test]
fn test_threads_and_class_loaders_are_not_entered() {
    let heap = InMemoryHeap::new();
    let root = holder(&heap);
    let thread = heap.define_class(ClassDefinition::new("java.lang.Thread").thread()).unwrap();
    let loader = heap.define_class(ClassDefinition::new("com.editor.Loader").class_loader()).unwrap();
    heap.set_field(root, "first", Some(heap.allocate(thread, 100).unwrap())).unwrap();
    heap.set_field(root, "second", Some(heap.allocate(loader, 100).unwrap())).unwrap();

    let statistics = collect(&heap);
    assert_eq!(statistics.total().objects.objects_count, 1);
}

#[test]
fn test_static_fields_of_initialized_classes() {
    let heap = InMemoryHeap::new();
    let registry = heap
        .define_class(ClassDefinition::new("com.editor.Registry").static_field("INSTANCE"))
        .unwrap();
    let lazy = heap
        .define_class(ClassDefinition::new("com.vcs.Lazy").static_field("INSTANCE").uninitialized())
        .unwrap();
    let plain = heap.define_class(ClassDefinition::new("org.Plain")).unwrap();
    heap.set_static_field(registry, "INSTANCE", Some(heap.allocate(plain, 40).unwrap()))
        .unwrap();
    heap.set_static_field(lazy, "INSTANCE", Some(heap.allocate(plain, 50).unwrap()))
        .unwrap();
    heap.add_root(heap.class_object(registry).unwrap());
    heap.add_root(heap.class_object(lazy).unwrap());

    let statistics = collect(&heap);
    let class_size = heap_model::CLASS_OBJECT_SIZE;
    assert_eq!(owned_bytes(&statistics, 1), class_size + 40);
    assert_eq!(owned_bytes(&statistics, 2), class_size);
}

#[test]
fn test_disposer_tree_edges_attribute_children() {
    let heap = InMemoryHeap::new();
    let panel = heap
        .define_class(ClassDefinition::new("com.editor.Panel").disposable())
        .unwrap();
    let widget = heap.define_class(ClassDefinition::new("org.Widget").disposable()).unwrap();
    let registry_class = heap.define_class(ClassDefinition::new("org.Disposer").field("root")).unwrap();
    let registry = heap.allocate(registry_class, 8).unwrap();
    let parent = heap.allocate(panel, 100).unwrap();
    let child = heap.allocate(widget, 30).unwrap();
    heap.set_field(registry, "root", Some(child)).unwrap();
    heap.set_disposer_registry(registry);
    heap.register_disposable(parent, child).unwrap();
    heap.add_root(parent);

    let statistics = collect(&heap);
    assert_eq!(owned_bytes(&statistics, 1), 130);
}

// ============================================================================
// Session behavior
// ============================================================================

#[test]
fn test_object_collected_between_passes_is_counted() {
    let heap = InMemoryHeap::new();
    let root = holder(&heap);
    let plain = heap.define_class(ClassDefinition::new("org.Plain")).unwrap();
    let doomed = heap.allocate(plain, 10).unwrap();
    heap.set_field(root, "first", Some(doomed)).unwrap();

    let config = HeapTraverseConfig::new(components());
    let mut collector = MemoryReportCollector::new(&heap, config.clone(), CancellationToken::new());
    collector.begin_session();
    assert_eq!(collector.run_enumeration_pass().unwrap(), 2);
    heap.collect(doomed).unwrap();
    let mut statistics = HeapSnapshotStatistics::new(config);
    collector.run_statistics_pass(&mut statistics).unwrap();

    assert_eq!(statistics.enumerated_garbage_collected_objects(), 1);
    assert_eq!(statistics.total().objects.total_size_bytes, 16);
}

#[test]
fn test_depth_limit_from_config() {
    let heap = InMemoryHeap::new();
    let link = heap.define_class(ClassDefinition::new("com.editor.Link").field("next")).unwrap();
    let chain: Vec<_> = (0..6).map(|_| heap.allocate(link, 1).unwrap()).collect();
    for pair in chain.windows(2) {
        heap.set_field(pair[0], "next", Some(pair[1])).unwrap();
    }
    heap.add_root(chain[0]);

    let mut config = HeapTraverseConfig::new(components());
    config.max_depth = 3;
    let mut collector = MemoryReportCollector::new(&heap, config, CancellationToken::new());
    let statistics = collector.collect_memory_usage().unwrap();
    assert_eq!(statistics.heap_object_count(), 3);
    assert_eq!(heap.tag(chain[3]), 0);
}

#[test]
fn test_tracked_instances_in_event() {
    let heap = InMemoryHeap::new();
    let root = holder(&heap);
    let document = heap.define_class(ClassDefinition::new("com.editor.Document")).unwrap();
    heap.set_field(root, "first", Some(heap.allocate(document, 5).unwrap())).unwrap();
    heap.set_field(root, "second", Some(heap.allocate(document, 5).unwrap())).unwrap();

    let statistics = collect(&heap);
    let event = statistics.build_memory_usage_report_event(memory_usage::StatusCode::NoError, 10, 0, 5);
    let editor = &event.component_stats[1];
    assert_eq!(editor.label, "editor");
    assert_eq!(editor.instance_count_per_class_name.get("com.editor.Document"), Some(&2));
    assert_eq!(editor.stats.owned_cluster_stats.total_stats.total_size_bytes, 26);
}

#[test]
fn test_text_report_lists_shared_clusters() {
    let heap = InMemoryHeap::new();
    let root = holder(&heap);
    let vcs = heap.define_class(ClassDefinition::new("com.vcs.Repo").field("data")).unwrap();
    let plain = heap.define_class(ClassDefinition::new("org.Blob")).unwrap();
    let repo = heap.allocate(vcs, 8).unwrap();
    let blob = heap.allocate(plain, 2_000).unwrap();
    heap.add_root(repo);
    heap.set_field(repo, "data", Some(blob)).unwrap();
    heap.set_field(root, "first", Some(blob)).unwrap();

    let statistics = collect(&heap);
    let mut out = String::new();
    statistics
        .print(&mut out, &HeapSnapshotPresentationConfig::default(), 3)
        .unwrap();
    assert!(out.contains("Total shared memory: 2.0KB/1 objects"));
    assert!(out.contains("Shared clusters:\n  [editor, vcs]: 2.0KB/1 objects"));

    let exceeded = statistics.exceeded_clusters();
    assert!(exceeded.is_empty());
}

#[test]
fn test_bytes_presentation() {
    let heap = InMemoryHeap::new();
    holder(&heap);
    let statistics = collect(&heap);
    let mut out = String::new();
    let presentation = HeapSnapshotPresentationConfig {
        style: PresentationStyle::Bytes,
        ..HeapSnapshotPresentationConfig::default()
    };
    statistics.print(&mut out, &presentation, 0).unwrap();
    assert!(out.starts_with("Total used memory: 16 bytes/1 objects\n"));
    assert!(out.contains("    Retained: 16 bytes/1 objects\n"));
}

// ============================================================================
// Extended report
// ============================================================================

#[test]
fn test_disposed_but_referenced_objects() {
    let heap = InMemoryHeap::new();
    let root = holder(&heap);
    let panel = heap
        .define_class(ClassDefinition::new("com.editor.Panel").disposable())
        .unwrap();
    let leaked = heap.allocate(panel, 2_000).unwrap();
    heap.dispose(leaked).unwrap();
    heap.set_field(root, "first", Some(leaked)).unwrap();

    let config = HeapTraverseConfig::new(components());
    let mut collector = MemoryReportCollector::new(&heap, config, CancellationToken::new());
    let regular = collector.collect_memory_usage().unwrap();
    let exceeded = regular.exceeded_clusters();
    assert_eq!(exceeded.components, vec![1]);

    let extended = collector.collect_extended_report(&exceeded).unwrap();
    let report = extended.extended_report().unwrap();
    assert_eq!(report.disposed_but_referenced().objects_count, 1);
    assert_eq!(report.disposed_but_referenced().total_size_bytes, 2_000);
    assert!(report.root_path_tree.number_of_nodes() >= 2);

    let mut out = String::new();
    report.log_disposer_tree_report(&mut out).unwrap();
    assert_eq!(
        out,
        "Disposed but referenced objects: 2.0KB/1 objects\n  2.0KB/1 objects: com.editor.Panel\n"
    );
}

#[test]
fn test_class_loader_crossing_is_recorded() {
    let mut set = ComponentsSet::new(u64::MAX, u64::MAX);
    let ide = set.register_category("ide", u64::MAX, Vec::new()).unwrap();
    set.add_component_with_packages_and_class_names(
        ide,
        ComponentRegistration::new("plugins")
            .package("com.plugins")
            .custom_class_loader("com.plugins.PluginLoader")
            .threshold(0),
    )
    .unwrap();

    let heap = InMemoryHeap::new();
    let loader_class = heap
        .define_class(ClassDefinition::new("com.plugins.PluginLoader").class_loader())
        .unwrap();
    let loader = heap.allocate(loader_class, 64).unwrap();
    let plugin_class = heap
        .define_class(ClassDefinition::new("com.plugins.Plugin").defined_by(loader))
        .unwrap();
    let host_class = heap
        .define_class(ClassDefinition::new("com.plugins.Host").field("plugin"))
        .unwrap();
    let host = heap.allocate(host_class, 16).unwrap();
    let plugin = heap.allocate(plugin_class, 200).unwrap();
    heap.set_field(host, "plugin", Some(plugin)).unwrap();
    heap.add_root(host);

    let config = HeapTraverseConfig::new(Arc::new(set));
    let mut collector = MemoryReportCollector::new(&heap, config, CancellationToken::new());
    let exceeded = ExceededClusters {
        components: vec![1],
        ..ExceededClusters::default()
    };
    let extended = collector.collect_extended_report(&exceeded).unwrap();
    let tree = &extended.extended_report().unwrap().root_path_tree;
    assert_eq!(tree.total_nominated_loaders_referring_objects().objects_count, 1);
    assert_eq!(tree.total_nominated_loaders_referring_objects().total_size_bytes, 200);

    let mut out = String::new();
    tree.print_path_tree_for_objects_referring_nominated_loaders(&mut out, 0, &["com.plugins.PluginLoader".to_string()])
        .unwrap();
    assert!(out.contains("com.plugins.Plugin"));
}

#[test]
fn test_crash_report_fields() {
    let heap = InMemoryHeap::new();
    let root = holder(&heap);
    let document = heap.define_class(ClassDefinition::new("com.editor.Document")).unwrap();
    heap.set_field(root, "first", Some(heap.allocate(document, 3_000).unwrap())).unwrap();

    let mut collector = MemoryReportCollector::new(&heap, HeapTraverseConfig::new(components()), CancellationToken::new());
    let report = collector.analyze_and_report().unwrap();
    let crash_report = report.crash_report.unwrap();
    assert_eq!(crash_report.title, "Extended Memory Report");
    assert_eq!(crash_report.field("Total used memory"), Some("3.0KB/2 objects"));
    assert_eq!(
        crash_report.field("Clusters that exceeded the memory usage threshold"),
        Some("editor")
    );
    let editor = crash_report.field("Component editor").unwrap();
    assert!(editor.contains("Number of instances of tracked classes:\n      com.editor.Document:1\n"));
    assert!(crash_report.field("Disposer tree information").is_some());
    assert!(heap.tagged_objects().is_empty());
}

// ============================================================================
// Partition property
// ============================================================================

mod partition {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    const CLASSES: [&str; 3] = ["com.editor.Node", "com.vcs.Node", "org.Node"];

    #[derive(Debug, Clone)]
    struct Shape {
        class: usize,
        size: u64,
        a: Option<usize>,
        b: Option<usize>,
    }

    fn graph() -> impl Strategy<Value = (Vec<Shape>, Vec<usize>)> {
        (1usize..24).prop_flat_map(|n| {
            let object = (0..CLASSES.len(), 0u64..500, proptest::option::of(0..n), proptest::option::of(0..n))
                .prop_map(|(class, size, a, b)| Shape { class, size, a, b });
            (
                proptest::collection::vec(object, n),
                proptest::collection::vec(0..n, 1..4),
            )
        })
    }

    fn reachable(shapes: &[Shape], roots: &[usize]) -> HashSet<usize> {
        let mut seen = HashSet::new();
        let mut pending: Vec<usize> = roots.to_vec();
        while let Some(index) = pending.pop() {
            if seen.insert(index) {
                pending.extend(shapes[index].a);
                pending.extend(shapes[index].b);
            }
        }
        seen
    }

    proptest! {
        #[test]
        fn owned_and_shared_partition_reachable_bytes((shapes, roots) in graph()) {
            let heap = InMemoryHeap::new();
            let classes: Vec<_> = CLASSES
                .iter()
                .map(|name| heap.define_class(ClassDefinition::new(*name).field("a").field("b")).unwrap())
                .collect();
            let objects: Vec<ObjectRef> = shapes
                .iter()
                .map(|shape| heap.allocate(classes[shape.class], shape.size).unwrap())
                .collect();
            for (obj, shape) in objects.iter().zip(&shapes) {
                heap.set_field(*obj, "a", shape.a.map(|i| objects[i])).unwrap();
                heap.set_field(*obj, "b", shape.b.map(|i| objects[i])).unwrap();
            }
            for root in &roots {
                heap.add_root(objects[*root]);
            }

            let statistics = collect(&heap);
            let live = reachable(&shapes, &roots);
            let expected: u64 = live.iter().map(|i| shapes[*i].size).sum();
            let total = statistics.total().objects.total_size_bytes;
            let owned: u64 = (0..statistics.component_stats().len()).map(|id| owned_bytes(&statistics, id)).sum();
            let category_owned: u64 = statistics
                .category_stats()
                .iter()
                .map(|stats| stats.owned().objects.total_size_bytes)
                .sum();

            prop_assert_eq!(total, expected);
            prop_assert_eq!(statistics.heap_object_count(), live.len() as u64);
            prop_assert_eq!(owned + statistics.total_shared().total_size_bytes, total);
            // Both named components live in one category.
            prop_assert_eq!(category_owned, total);
        }
    }
}
