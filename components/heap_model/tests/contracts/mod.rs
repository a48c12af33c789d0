//! Contract tests for heap_model
//!
//! Pins the host behavior the traversal engine depends on.

use std::thread;

use heap_model::{ClassDefinition, HeapDescription, HeapError, HeapHost, InMemoryHeap, ObjectTagStore};

// ============================================================================
// Handles
// ============================================================================

/// A reused slot never revives an old handle
#[test]
fn test_reused_slot_keeps_old_handle_stale() {
    let heap = InMemoryHeap::new();
    let node = heap.define_class(ClassDefinition::new("c.Node")).unwrap();
    let old = heap.allocate(node, 8).unwrap();
    heap.set_tag(old, 7);
    heap.collect(old).unwrap();
    let new = heap.allocate(node, 16).unwrap();

    assert_eq!(new.index(), old.index());
    assert_ne!(new, old);
    assert!(!heap.is_alive(old));
    assert_eq!(heap.tag(old), 0);
    assert_eq!(heap.tag(new), 0);
    assert_eq!(heap.shallow_size(old), 0);
    assert_eq!(heap.collect(old).unwrap_err(), HeapError::StaleObject(old));
}

/// Collected roots drop out of the root set
#[test]
fn test_collected_root_is_unrooted() {
    let heap = InMemoryHeap::new();
    let node = heap.define_class(ClassDefinition::new("c.Node")).unwrap();
    let kept = heap.allocate(node, 8).unwrap();
    let gone = heap.allocate(node, 8).unwrap();
    heap.add_root(kept);
    heap.add_root(gone);
    heap.collect(gone).unwrap();
    assert_eq!(heap.roots(), vec![kept]);
}

// ============================================================================
// Tags
// ============================================================================

/// Tags can be written from one thread and read from another
#[test]
fn test_tags_across_threads() {
    let heap = InMemoryHeap::new();
    let node = heap.define_class(ClassDefinition::new("c.Node")).unwrap();
    let objects: Vec<_> = (0..16).map(|_| heap.allocate(node, 8).unwrap()).collect();

    thread::scope(|scope| {
        for (chunk_index, chunk) in objects.chunks(4).enumerate() {
            let heap = &heap;
            scope.spawn(move || {
                for obj in chunk {
                    heap.set_tag(*obj, chunk_index as u64 + 1);
                }
            });
        }
    });

    assert_eq!(heap.tagged_objects().len(), 16);
    assert_eq!(heap.tag(objects[15]), 4);
    heap.clear_tags();
    assert!(heap.tagged_objects().is_empty());
}

// ============================================================================
// Descriptions
// ============================================================================

/// Descriptions survive a trip through JSON
#[test]
fn test_description_json_round_trip() {
    let json = r#"{
        "classes": [
            { "name": "com.example.Panel", "fields": ["child"], "flags": { "disposable": true } }
        ],
        "objects": [
            { "id": "parent", "class": "com.example.Panel", "size": 24, "fields": { "child": "child" } },
            { "id": "child", "class": "com.example.Panel", "size": 24 }
        ],
        "roots": ["parent"],
        "disposer": { "edges": [["parent", "child"]], "disposed": ["child"] }
    }"#;
    let description: HeapDescription = serde_json::from_str(json).unwrap();
    let reparsed: HeapDescription = serde_json::from_str(&serde_json::to_string(&description).unwrap()).unwrap();
    assert_eq!(reparsed, description);

    let materialized = reparsed.materialize().unwrap();
    let child = materialized.object("child").unwrap();
    assert!(materialized.heap.is_disposed(child));
    assert!(materialized.heap.class_info_of(child).unwrap().flags.disposable);
}

/// Unknown class names are reported by name
#[test]
fn test_description_with_unknown_class() {
    let json = r#"{ "objects": [{ "id": "a", "class": "com.example.Missing", "size": 1 }] }"#;
    let description: HeapDescription = serde_json::from_str(json).unwrap();
    assert_eq!(
        description.materialize().unwrap_err(),
        HeapError::UnknownClassName("com.example.Missing".to_string())
    );
}
