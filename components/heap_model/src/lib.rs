//! Host heap model for memory-usage traversal.
//!
//! This crate provides the vocabulary the traversal engine uses to talk to a
//! live heap: opaque object handles, class descriptors, host capability
//! traits, and an in-memory reference heap implementing all of them.
//!
//! # Overview
//!
//! - [`ObjectRef`] - Opaque, weak handle to a heap object
//! - [`ClassInfo`] - Class descriptor (name, loader, flags)
//! - [`HeapHost`] - Roots, classes, fields, sizes and disposer tree
//! - [`ObjectTagStore`] - Per-object 64-bit tags
//! - [`InMemoryHeap`] - Slot-based heap implementing every capability
//! - [`HeapDescription`] - JSON-friendly heap description
//!
//! # Examples
//!
//! ```
//! use heap_model::{ClassDefinition, HeapHost, InMemoryHeap, ObjectTagStore};
//!
//! let heap = InMemoryHeap::new();
//! let node = heap.define_class(ClassDefinition::new("com.example.Node")).unwrap();
//! let obj = heap.allocate(node, 16).unwrap();
//! heap.add_root(obj);
//! heap.set_tag(obj, 5);
//!
//! assert_eq!(heap.roots(), vec![obj]);
//! assert_eq!(heap.tag(obj), 5);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod description;
mod error;
mod host;
mod in_memory;
mod object;

pub use description::{
    ClassDescription, ClassKindDescription, DisposerDescription, FlagsDescription,
    HeapDescription, MaterializedHeap, ObjectDescription,
};
pub use error::{HeapError, HeapResult};
pub use host::{FieldEnumerator, HeapHost, ObjectTagStore};
pub use in_memory::{
    ClassDefinition, InMemoryHeap, CLASS_CLASS_NAME, CLASS_OBJECT_SIZE, OBJECT_CLASS_NAME,
};
pub use object::{ClassFlags, ClassId, ClassInfo, ClassKind, FieldRef, ObjectRef};
