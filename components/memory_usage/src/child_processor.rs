//! Enumeration of the outgoing references of one object.

use std::sync::Arc;

use heap_model::{ClassInfo, HeapHost, ObjectRef};

use crate::field_cache::FieldCache;
use crate::traverse_config::{HeapTraverseConfig, IgnoredField};

/// Internal fields of reference wrappers that are never followed.
pub const REFERENCE_CLASS_FIELDS_TO_IGNORE: [&str; 3] = ["referent", "discovered", "next"];
/// Label of array element references.
pub const ARRAY_ELEMENT_REFERENCE_LABEL: &str = "[]";
/// Label of static field references.
pub const STATIC_FIELD_REFERENCE_LABEL: &str = "(static)";
/// Label of disposer tree references.
pub const DISPOSER_TREE_REFERENCE_LABEL: &str = "(disposer-tree)";
/// Superclass of weak, soft and phantom reference wrappers.
pub const REFERENCE_CLASS_NAME: &str = "java.lang.ref.Reference";

/// Kind of an outgoing reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefWeight {
    /// Instance field
    InstanceField,
    /// Element of an object array
    ArrayElement,
    /// Static field of a class object
    StaticField,
    /// Parent to child edge of the disposer tree
    DisposerTreeReference,
}

/// One outgoing reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildReference {
    /// Referenced object
    pub object: ObjectRef,
    /// Reference kind
    pub weight: RefWeight,
    /// Field name or one of the synthetic labels
    pub label: Arc<str>,
}

#[derive(Debug, Clone)]
struct ReferenceLabels {
    array_element: Arc<str>,
    static_field: Arc<str>,
    disposer_tree: Arc<str>,
}

impl Default for ReferenceLabels {
    fn default() -> Self {
        Self {
            array_element: ARRAY_ELEMENT_REFERENCE_LABEL.into(),
            static_field: STATIC_FIELD_REFERENCE_LABEL.into(),
            disposer_tree: DISPOSER_TREE_REFERENCE_LABEL.into(),
        }
    }
}

/// Yields the children of an object, applying the exclusion rules.
#[derive(Debug, Clone)]
pub struct HeapTraverseChildProcessor {
    disposer_registry: Option<ObjectRef>,
    use_disposer_tree_references: bool,
    ignored_fields: Vec<IgnoredField>,
    labels: ReferenceLabels,
}

impl HeapTraverseChildProcessor {
    /// Creates a processor for `host` with the switches of `config`.
    pub fn new<H: HeapHost + ?Sized>(host: &H, config: &HeapTraverseConfig) -> Self {
        Self {
            disposer_registry: host.disposer_registry(),
            use_disposer_tree_references: config.use_disposer_tree_references,
            ignored_fields: config.ignored_fields.clone(),
            labels: ReferenceLabels::default(),
        }
    }

    /// Appends every outgoing reference of `obj` to `out`.
    ///
    /// Field reads that fail are skipped. Returns how many failed.
    pub fn process_child_objects<H: HeapHost + ?Sized>(
        &self,
        host: &H,
        obj: ObjectRef,
        field_cache: &mut FieldCache,
        out: &mut Vec<ChildReference>,
    ) -> usize {
        // The registry only manages lifecycles; following it would make it
        // the owner of every registered disposable.
        if Some(obj) == self.disposer_registry {
            return 0;
        }
        let Some(class) = host.class_info_of(obj) else {
            return 0;
        };
        let mut failures = 0;

        let is_reference = class.flags.reference || host.is_instance_of(class.id, REFERENCE_CLASS_NAME);
        let ignored: Vec<&str> = self
            .ignored_fields
            .iter()
            .filter(|ignored| host.is_instance_of(class.id, &ignored.class_name))
            .map(|ignored| ignored.field_name.as_str())
            .collect();

        for field in field_cache.instance_fields(host, class.id).iter() {
            if is_reference && REFERENCE_CLASS_FIELDS_TO_IGNORE.contains(&&*field.name) {
                continue;
            }
            if ignored.contains(&&*field.name) {
                continue;
            }
            match host.read_field(obj, field) {
                Ok(Some(value)) => out.push(ChildReference {
                    object: value,
                    weight: RefWeight::InstanceField,
                    label: Arc::clone(&field.name),
                }),
                Ok(None) => {}
                Err(_) => failures += 1,
            }
        }

        if class.is_object_array() {
            out.extend(host.array_elements(obj).into_iter().flatten().map(|value| ChildReference {
                object: value,
                weight: RefWeight::ArrayElement,
                label: Arc::clone(&self.labels.array_element),
            }));
        }

        // Uninitialized classes are skipped so the walk never observes
        // statics before their initializer ran.
        if let Some(mirrored) = host.mirrored_class(obj) {
            if host.class_info(mirrored).is_some_and(|info| info.initialized) {
                for field in field_cache.static_fields(host, mirrored).iter() {
                    match host.read_static_field(field) {
                        Ok(Some(value)) => out.push(ChildReference {
                            object: value,
                            weight: RefWeight::StaticField,
                            label: Arc::clone(&self.labels.static_field),
                        }),
                        Ok(None) => {}
                        Err(_) => failures += 1,
                    }
                }
            }
        }

        if self.use_disposer_tree_references && class.flags.disposable {
            self.add_disposer_children(host, obj, out);
        }
        failures
    }

    fn add_disposer_children<H: HeapHost + ?Sized>(&self, host: &H, obj: ObjectRef, out: &mut Vec<ChildReference>) {
        let Some(children) = host.disposer_children(obj) else {
            return;
        };
        for child in children {
            let is_disposable = host
                .class_info_of(child)
                .is_some_and(|info: Arc<ClassInfo>| info.flags.disposable);
            if !is_disposable {
                continue;
            }
            out.push(ChildReference {
                object: child,
                weight: RefWeight::DisposerTreeReference,
                label: Arc::clone(&self.labels.disposer_tree),
            });
        }
    }
}
