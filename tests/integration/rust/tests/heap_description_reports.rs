//! Heap Description Report Integration Tests
//!
//! Tests full report generation for heaps and component configurations
//! written down as JSON.

use std::sync::Arc;

use heap_model::HeapDescription;
use memory_usage::{
    CancellationToken, ComponentsSet, HeapSnapshotPresentationConfig, HeapTraverseConfig, MemoryReportCollector,
    MemoryUsageReportConfiguration, PresentationStyle, StatusCode,
};

const CONFIGURATION: &str = r#"{
    "categories": [{
        "label": "ide",
        "components": [
            { "label": "editor", "extended_report_threshold_bytes": 1000,
              "package_names": ["com.editor"], "tracked_fqns": ["com.editor.Panel"] },
            { "label": "plugins", "extended_report_threshold_bytes": 0,
              "package_names": ["com.plugins"],
              "custom_class_loaders": ["com.plugins.PluginLoader"] }
        ]
    }]
}"#;

const DISPOSED_PANEL: &str = r#"{
    "classes": [
        { "name": "com.editor.Holder", "fields": ["panel"] },
        { "name": "com.editor.Panel", "flags": { "disposable": true } }
    ],
    "objects": [
        { "id": "holder", "class": "com.editor.Holder", "size": 16, "fields": { "panel": "panel" } },
        { "id": "panel", "class": "com.editor.Panel", "size": 2000 }
    ],
    "roots": ["holder"],
    "disposer": { "disposed": ["panel"] }
}"#;

const PLUGIN_LOADER: &str = r#"{
    "classes": [
        { "name": "com.plugins.PluginLoader", "flags": { "class_loader": true } },
        { "name": "com.plugins.Host", "fields": ["plugin"] },
        { "name": "com.plugins.Plugin", "loader": "loader" }
    ],
    "objects": [
        { "id": "loader", "class": "com.plugins.PluginLoader", "size": 40 },
        { "id": "host", "class": "com.plugins.Host", "size": 16, "fields": { "plugin": "plugin" } },
        { "id": "plugin", "class": "com.plugins.Plugin", "size": 200 }
    ],
    "roots": ["host"]
}"#;

fn components() -> Arc<ComponentsSet> {
    let configuration = MemoryUsageReportConfiguration::from_json(CONFIGURATION).unwrap();
    Arc::new(ComponentsSet::from_configuration(&configuration).unwrap())
}

fn materialize(json: &str) -> heap_model::MaterializedHeap {
    serde_json::from_str::<HeapDescription>(json).unwrap().materialize().unwrap()
}

/// Disposed objects still reachable show up in the crash report
#[test]
fn test_disposed_but_referenced_panel() {
    let materialized = materialize(DISPOSED_PANEL);
    let mut collector = MemoryReportCollector::new(
        &materialized.heap,
        HeapTraverseConfig::new(components()),
        CancellationToken::new(),
    );
    let report = collector.analyze_and_report().unwrap();

    assert_eq!(report.exceeded.components, vec![1]);
    assert_eq!(report.event.metadata.status_code, StatusCode::NoError);
    assert_eq!(
        report.event.component_stats[1].instance_count_per_class_name.get("com.editor.Panel"),
        Some(&1)
    );

    let crash = report.crash_report.as_ref().unwrap();
    assert_eq!(
        crash.field("Disposer tree information"),
        Some("Disposed but referenced objects: 2.0KB/1 objects\n  2.0KB/1 objects: com.editor.Panel\n")
    );
    let body = crash.field("Component editor").unwrap();
    assert!(body.contains("================= DISPOSED OBJECTS ================"));
    assert!(body.contains("panel: com.editor.Panel"));
}

/// References crossing into a nominated class loader are traced
#[test]
fn test_objects_retaining_nominated_loader() {
    let materialized = materialize(PLUGIN_LOADER);
    let mut collector = MemoryReportCollector::new(
        &materialized.heap,
        HeapTraverseConfig::new(components()),
        CancellationToken::new(),
    );
    let report = collector.analyze_and_report().unwrap();

    assert_eq!(report.exceeded.components, vec![2]);
    let extended = report.extended.as_ref().unwrap().extended_report().unwrap();
    assert_eq!(extended.root_path_tree.total_nominated_loaders_referring_objects().objects_count, 1);

    let body = report.crash_report.as_ref().unwrap().field("Component plugins").unwrap();
    assert!(body.contains("Nominated ClassLoaders:\n --> com.plugins.PluginLoader\n"));
    assert!(body.contains("plugin: com.plugins.Plugin"));
}

/// The text report renders both presentation styles
#[test]
fn test_text_report_styles() {
    let materialized = materialize(DISPOSED_PANEL);
    let mut collector = MemoryReportCollector::new(
        &materialized.heap,
        HeapTraverseConfig::new(components()),
        CancellationToken::new(),
    );
    let statistics = collector.collect_memory_usage().unwrap();

    let mut optimal = String::new();
    statistics
        .print(&mut optimal, &HeapSnapshotPresentationConfig::default(), 5)
        .unwrap();
    assert!(optimal.starts_with("Total used memory: 2.0KB/2 objects\n"));
    assert!(optimal.contains("Report collection time: 5 ms\n"));

    let bytes = HeapSnapshotPresentationConfig {
        style: PresentationStyle::Bytes,
        ..HeapSnapshotPresentationConfig::default()
    };
    let mut exact = String::new();
    statistics.print(&mut exact, &bytes, 5).unwrap();
    assert!(exact.starts_with("Total used memory: 2016 bytes/2 objects\n"));
    assert!(exact.contains("  Component editor:\n    Owned: 2016 bytes/2 objects\n"));
}

/// The event serializes with every section present
#[test]
fn test_event_serializes() {
    let materialized = materialize(PLUGIN_LOADER);
    let mut collector = MemoryReportCollector::new(
        &materialized.heap,
        HeapTraverseConfig::new(components()),
        CancellationToken::new(),
    );
    let report = collector.analyze_and_report().unwrap();
    let json = serde_json::to_value(&report.event).unwrap();

    assert_eq!(json["component_stats"].as_array().unwrap().len(), 3);
    assert_eq!(json["component_category_stats"].as_array().unwrap().len(), 2);
    assert_eq!(json["component_stats"][2]["label"], "plugins");
    assert_eq!(
        json["component_stats"][2]["stats"]["owned_cluster_stats"]["total_stats"]["total_size_bytes"],
        216
    );
}
