//! Capabilities a host heap provides to the traversal engine.
//!
//! The engine never owns heap objects. It asks the host for roots, classes,
//! fields and sizes, and stores its per-object bookkeeping in the host's tag
//! side table. All methods take `&self`: hosts are expected to use interior
//! mutability because the heap keeps changing while a traversal runs.

use std::sync::Arc;

use crate::{ClassId, ClassInfo, FieldRef, HeapResult, ObjectRef};

/// Per-object 64-bit tag storage.
///
/// Tags of collected objects disappear together with the object. The engine
/// relies on this to detect objects that were collected between two passes.
pub trait ObjectTagStore {
    /// Returns the tag of `obj`, or 0 if the object is untagged or not alive.
    fn tag(&self, obj: ObjectRef) -> u64;

    /// Attaches `tag` to `obj`. Ignored for objects that are not alive.
    fn set_tag(&self, obj: ObjectRef, tag: u64);

    /// Returns every live object carrying a non-zero tag.
    fn tagged_objects(&self) -> Vec<(ObjectRef, u64)>;
}

/// Reflective access to declared fields.
pub trait FieldEnumerator {
    /// Instance fields declared by `class` itself (inherited fields excluded).
    fn declared_instance_fields(&self, class: ClassId) -> Vec<FieldRef>;

    /// Static fields declared by `class`.
    fn declared_static_fields(&self, class: ClassId) -> Vec<FieldRef>;

    /// Reads a reference-typed instance field of `obj`.
    fn read_field(&self, obj: ObjectRef, field: &FieldRef) -> HeapResult<Option<ObjectRef>>;

    /// Reads a reference-typed static field.
    fn read_static_field(&self, field: &FieldRef) -> HeapResult<Option<ObjectRef>>;
}

/// A live heap as seen by the traversal engine.
pub trait HeapHost: ObjectTagStore + FieldEnumerator {
    /// Current GC roots. Entries may already be stale.
    fn roots(&self) -> Vec<ObjectRef>;

    /// Returns true while `obj` has not been collected.
    fn is_alive(&self, obj: ObjectRef) -> bool;

    /// Dynamic class of `obj`.
    fn class_of(&self, obj: ObjectRef) -> Option<ClassId>;

    /// Descriptor of `class`.
    fn class_info(&self, class: ClassId) -> Option<Arc<ClassInfo>>;

    /// If `obj` is a class object, the class it represents.
    fn mirrored_class(&self, obj: ObjectRef) -> Option<ClassId>;

    /// Shallow size of `obj` in bytes, 0 if it is not alive.
    fn shallow_size(&self, obj: ObjectRef) -> u64;

    /// Elements of an object array. Empty for anything else.
    fn array_elements(&self, obj: ObjectRef) -> Vec<Option<ObjectRef>>;

    /// The disposer registry object, if the host has one.
    fn disposer_registry(&self) -> Option<ObjectRef> {
        None
    }

    /// Children of `obj` in the disposer tree, `None` if `obj` is not registered.
    fn disposer_children(&self, _obj: ObjectRef) -> Option<Vec<ObjectRef>> {
        None
    }

    /// Whether `obj` has already been disposed.
    fn is_disposed(&self, _obj: ObjectRef) -> bool {
        false
    }

    /// Returns the class descriptor of `obj` in one call.
    fn class_info_of(&self, obj: ObjectRef) -> Option<Arc<ClassInfo>> {
        self.class_of(obj).and_then(|class| self.class_info(class))
    }

    /// Returns true if `class` is `ancestor_name` or inherits from it.
    fn is_instance_of(&self, class: ClassId, ancestor_name: &str) -> bool {
        let mut current = Some(class);
        while let Some(id) = current {
            let Some(info) = self.class_info(id) else {
                return false;
            };
            if &*info.name == ancestor_name {
                return true;
            }
            current = info.superclass;
        }
        false
    }
}
