//! Serializable heap descriptions.
//!
//! A [`HeapDescription`] lists classes, objects and roots by name so that a
//! heap can be written down as JSON and materialized into an
//! [`InMemoryHeap`]. Objects refer to each other through string keys.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::{ClassDefinition, ClassFlags, HeapError, HeapResult, InMemoryHeap, ObjectRef};

/// Instance shape of a described class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassKindDescription {
    /// Ordinary class
    #[default]
    Regular,
    /// Array of references
    ObjectArray,
    /// Array of primitives
    PrimitiveArray,
}

fn default_true() -> bool {
    true
}

/// A described class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassDescription {
    /// Fully qualified name
    pub name: String,
    /// Superclass name, defaults to `java.lang.Object`
    #[serde(default)]
    pub superclass: Option<String>,
    /// Instance shape
    #[serde(default)]
    pub kind: ClassKindDescription,
    /// Reference-typed instance fields
    #[serde(default)]
    pub fields: Vec<String>,
    /// Instance fields whose reads fail
    #[serde(default)]
    pub inaccessible_fields: Vec<String>,
    /// Static field name to object key
    #[serde(default)]
    pub static_fields: BTreeMap<String, Option<String>>,
    /// Traversal flags
    #[serde(default)]
    pub flags: FlagsDescription,
    /// Key of the defining class loader object
    #[serde(default)]
    pub loader: Option<String>,
    /// Whether the defining loader is a platform loader
    #[serde(default)]
    pub platform_loader: bool,
    /// Whether static initialization has run
    #[serde(default = "default_true")]
    pub initialized: bool,
}

/// Serializable form of [`ClassFlags`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagsDescription {
    /// See [`ClassFlags::synthetic`]
    pub synthetic: bool,
    /// See [`ClassFlags::member`]
    pub member: bool,
    /// See [`ClassFlags::anonymous`]
    pub anonymous: bool,
    /// See [`ClassFlags::reference`]
    pub reference: bool,
    /// See [`ClassFlags::thread`]
    pub thread: bool,
    /// See [`ClassFlags::class_loader`]
    pub class_loader: bool,
    /// See [`ClassFlags::primitive_wrapper`]
    pub primitive_wrapper: bool,
    /// See [`ClassFlags::disposable`]
    pub disposable: bool,
}

impl From<FlagsDescription> for ClassFlags {
    fn from(flags: FlagsDescription) -> Self {
        ClassFlags {
            synthetic: flags.synthetic,
            member: flags.member,
            anonymous: flags.anonymous,
            reference: flags.reference,
            thread: flags.thread,
            class_loader: flags.class_loader,
            primitive_wrapper: flags.primitive_wrapper,
            disposable: flags.disposable,
        }
    }
}

/// A described object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectDescription {
    /// Key other objects use to refer to this one
    pub id: String,
    /// Class name
    pub class: String,
    /// Shallow size in bytes
    pub size: u64,
    /// Field name to referenced object key
    #[serde(default)]
    pub fields: BTreeMap<String, Option<String>>,
    /// Array elements as object keys
    #[serde(default)]
    pub elements: Vec<Option<String>>,
}

/// Disposer tree of a described heap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisposerDescription {
    /// Key of the registry object
    #[serde(default)]
    pub registry: Option<String>,
    /// `(parent, child)` registrations
    #[serde(default)]
    pub edges: Vec<(String, String)>,
    /// Keys of disposed objects
    #[serde(default)]
    pub disposed: Vec<String>,
}

/// A complete heap written down by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeapDescription {
    /// Classes in definition order (superclasses first)
    #[serde(default)]
    pub classes: Vec<ClassDescription>,
    /// Objects
    #[serde(default)]
    pub objects: Vec<ObjectDescription>,
    /// Root object keys
    #[serde(default)]
    pub roots: Vec<String>,
    /// Disposer tree
    #[serde(default)]
    pub disposer: DisposerDescription,
}

/// A materialized heap together with its object keys.
#[derive(Debug)]
pub struct MaterializedHeap {
    /// The heap
    pub heap: InMemoryHeap,
    /// Object key to handle
    pub objects: HashMap<String, ObjectRef>,
}

impl MaterializedHeap {
    /// Handle of the object with key `id`.
    pub fn object(&self, id: &str) -> HeapResult<ObjectRef> {
        self.objects
            .get(id)
            .copied()
            .ok_or_else(|| HeapError::UndefinedObject(id.to_string()))
    }
}

struct Materializer<'d> {
    description: &'d HeapDescription,
    heap: InMemoryHeap,
    objects: HashMap<String, ObjectRef>,
}

impl<'d> Materializer<'d> {
    fn ensure_allocated(&mut self, id: &str) -> HeapResult<ObjectRef> {
        if let Some(obj) = self.objects.get(id) {
            return Ok(*obj);
        }
        let description = self
            .description
            .objects
            .iter()
            .find(|o| o.id == id)
            .ok_or_else(|| HeapError::UndefinedObject(id.to_string()))?;
        let class = self
            .heap
            .class_id(&description.class)
            .ok_or_else(|| HeapError::UnknownClassName(description.class.clone()))?;
        let obj = if description.elements.is_empty() {
            self.heap.allocate(class, description.size)?
        } else {
            self.heap
                .allocate_array(class, description.size, vec![None; description.elements.len()])?
        };
        self.objects.insert(id.to_string(), obj);
        Ok(obj)
    }

    fn resolve(&mut self, key: &Option<String>) -> HeapResult<Option<ObjectRef>> {
        key.as_deref().map(|k| self.ensure_allocated(k)).transpose()
    }

    fn define_classes(&mut self) -> HeapResult<()> {
        for class in &self.description.classes {
            let mut definition = match class.kind {
                ClassKindDescription::Regular => ClassDefinition::new(&class.name),
                ClassKindDescription::ObjectArray => ClassDefinition::object_array(&class.name),
                ClassKindDescription::PrimitiveArray => ClassDefinition::primitive_array(&class.name),
            }
            .flags(class.flags.into());
            if let Some(superclass) = &class.superclass {
                definition = definition.extends(superclass);
            }
            for field in &class.fields {
                definition = definition.field(field);
            }
            for field in &class.inaccessible_fields {
                definition = definition.inaccessible_field(field);
            }
            for field in class.static_fields.keys() {
                definition = definition.static_field(field);
            }
            if let Some(loader) = &class.loader {
                definition = definition.defined_by(self.ensure_allocated(loader)?);
            }
            if class.platform_loader {
                definition = definition.platform_loader();
            }
            if !class.initialized {
                definition = definition.uninitialized();
            }
            self.heap.define_class(definition)?;
        }
        Ok(())
    }

    fn link_objects(&mut self) -> HeapResult<()> {
        let description = self.description;
        for object in &description.objects {
            self.ensure_allocated(&object.id)?;
        }
        for object in &description.objects {
            let obj = self.ensure_allocated(&object.id)?;
            for (field, value) in &object.fields {
                let value = self.resolve(value)?;
                self.heap.set_field(obj, field, value)?;
            }
            for (index, element) in object.elements.iter().enumerate() {
                let value = self.resolve(element)?;
                self.heap.set_element(obj, index, value)?;
            }
        }
        for class in &description.classes {
            let class_id = self
                .heap
                .class_id(&class.name)
                .ok_or_else(|| HeapError::UnknownClassName(class.name.clone()))?;
            for (field, value) in &class.static_fields {
                let value = self.resolve(value)?;
                self.heap.set_static_field(class_id, field, value)?;
            }
        }
        Ok(())
    }

    fn register_roots_and_disposer(&mut self) -> HeapResult<()> {
        let description = self.description;
        for root in &description.roots {
            let obj = self.ensure_allocated(root)?;
            self.heap.add_root(obj);
        }
        if let Some(registry) = &description.disposer.registry {
            let obj = self.ensure_allocated(registry)?;
            self.heap.set_disposer_registry(obj);
        }
        for (parent, child) in &description.disposer.edges {
            let parent = self.ensure_allocated(parent)?;
            let child = self.ensure_allocated(child)?;
            self.heap.register_disposable(parent, child)?;
        }
        for disposed in &description.disposer.disposed {
            let obj = self.ensure_allocated(disposed)?;
            self.heap.dispose(obj)?;
        }
        Ok(())
    }
}

impl HeapDescription {
    /// Builds an [`InMemoryHeap`] holding the described classes and objects.
    ///
    /// # Errors
    ///
    /// Fails if a class or object key is referenced before it can be defined.
    pub fn materialize(&self) -> HeapResult<MaterializedHeap> {
        let mut materializer = Materializer {
            description: self,
            heap: InMemoryHeap::new(),
            objects: HashMap::new(),
        };
        materializer.define_classes()?;
        materializer.link_objects()?;
        materializer.register_roots_and_disposer()?;
        Ok(MaterializedHeap {
            heap: materializer.heap,
            objects: materializer.objects,
        })
    }
}
