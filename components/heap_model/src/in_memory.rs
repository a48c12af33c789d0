//! In-memory reference heap.
//!
//! `InMemoryHeap` is a slot-based object store implementing [`HeapHost`].
//! Slots carry a generation counter so that handles to collected objects go
//! stale instead of aliasing new allocations, which gives tags the weak-key
//! behaviour the traversal engine expects.
//!
//! The heap is guarded by a `parking_lot::RwLock`, so it can be mutated from
//! one thread while a traversal reads it from another.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{
    ClassFlags, ClassId, ClassInfo, ClassKind, FieldEnumerator, FieldRef, HeapError, HeapHost,
    HeapResult, ObjectRef, ObjectTagStore,
};

/// Name of the root of the class hierarchy.
pub const OBJECT_CLASS_NAME: &str = "java.lang.Object";
/// Name of the class of class objects.
pub const CLASS_CLASS_NAME: &str = "java.lang.Class";
/// Shallow size reported for class objects.
pub const CLASS_OBJECT_SIZE: u64 = 64;

/// Builder describing a class to register with [`InMemoryHeap::define_class`].
///
/// # Examples
///
/// ```
/// use heap_model::{ClassDefinition, InMemoryHeap};
///
/// let heap = InMemoryHeap::new();
/// let node = heap
///     .define_class(ClassDefinition::new("com.example.Node").field("next"))
///     .unwrap();
/// let a = heap.allocate(node, 24).unwrap();
/// let b = heap.allocate(node, 24).unwrap();
/// heap.set_field(a, "next", Some(b)).unwrap();
/// assert_eq!(heap.field_value(a, "next").unwrap(), Some(b));
/// ```
#[derive(Debug, Clone)]
pub struct ClassDefinition {
    name: String,
    superclass: Option<String>,
    kind: ClassKind,
    flags: ClassFlags,
    fields: Vec<String>,
    static_fields: Vec<String>,
    inaccessible_fields: Vec<String>,
    loader: Option<ObjectRef>,
    platform_loader: bool,
    initialized: bool,
}

impl ClassDefinition {
    /// Regular class extending `java.lang.Object`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            superclass: None,
            kind: ClassKind::Regular,
            flags: ClassFlags::default(),
            fields: Vec::new(),
            static_fields: Vec::new(),
            inaccessible_fields: Vec::new(),
            loader: None,
            platform_loader: false,
            initialized: true,
        }
    }

    /// Array class whose elements are object references.
    pub fn object_array(name: impl Into<String>) -> Self {
        Self {
            kind: ClassKind::ObjectArray,
            ..Self::new(name)
        }
    }

    /// Array class of primitive elements.
    pub fn primitive_array(name: impl Into<String>) -> Self {
        Self {
            kind: ClassKind::PrimitiveArray,
            ..Self::new(name)
        }
    }

    /// Sets the superclass by name. It must already be defined.
    pub fn extends(mut self, superclass: impl Into<String>) -> Self {
        self.superclass = Some(superclass.into());
        self
    }

    /// Declares a reference-typed instance field.
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(name.into());
        self
    }

    /// Declares a reference-typed static field.
    pub fn static_field(mut self, name: impl Into<String>) -> Self {
        self.static_fields.push(name.into());
        self
    }

    /// Declares an instance field whose reads always fail.
    pub fn inaccessible_field(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.fields.push(name.clone());
        self.inaccessible_fields.push(name);
        self
    }

    /// Replaces all flags.
    pub fn flags(mut self, flags: ClassFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Marks the class as a weak/soft reference wrapper.
    pub fn reference(mut self) -> Self {
        self.flags.reference = true;
        self
    }

    /// Marks the class as a thread class.
    pub fn thread(mut self) -> Self {
        self.flags.thread = true;
        self
    }

    /// Marks the class as a class loader class.
    pub fn class_loader(mut self) -> Self {
        self.flags.class_loader = true;
        self
    }

    /// Marks the class as a boxed primitive.
    pub fn primitive_wrapper(mut self) -> Self {
        self.flags.primitive_wrapper = true;
        self
    }

    /// Marks the class as disposable.
    pub fn disposable(mut self) -> Self {
        self.flags.disposable = true;
        self
    }

    /// Marks the class as synthetic.
    pub fn synthetic(mut self) -> Self {
        self.flags.synthetic = true;
        self
    }

    /// Marks the class as a member (nested) class.
    pub fn member(mut self) -> Self {
        self.flags.member = true;
        self
    }

    /// Marks the class as anonymous.
    pub fn anonymous(mut self) -> Self {
        self.flags.anonymous = true;
        self
    }

    /// Sets the defining class loader object.
    pub fn defined_by(mut self, loader: ObjectRef) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Marks the defining loader as a platform loader.
    pub fn platform_loader(mut self) -> Self {
        self.platform_loader = true;
        self
    }

    /// Marks static initialization as not yet run.
    pub fn uninitialized(mut self) -> Self {
        self.initialized = false;
        self
    }
}

#[derive(Debug)]
struct ClassEntry {
    info: Arc<ClassInfo>,
    instance_fields: Vec<FieldRef>,
    static_fields: Vec<FieldRef>,
    static_values: Vec<Option<ObjectRef>>,
    inaccessible: HashSet<u32>,
    /// Number of instance fields inherited from superclasses
    layout_offset: usize,
    mirror: ObjectRef,
}

#[derive(Debug)]
struct HeapObject {
    class: ClassId,
    size: u64,
    tag: u64,
    fields: Vec<Option<ObjectRef>>,
    elements: Vec<Option<ObjectRef>>,
    mirrored: Option<ClassId>,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    object: Option<HeapObject>,
}

#[derive(Debug, Default)]
struct DisposerTree {
    registry: Option<ObjectRef>,
    children: HashMap<ObjectRef, Vec<ObjectRef>>,
    disposed: HashSet<ObjectRef>,
}

#[derive(Debug, Default)]
struct HeapState {
    classes: Vec<ClassEntry>,
    class_by_name: HashMap<String, ClassId>,
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    roots: Vec<ObjectRef>,
    disposer: DisposerTree,
}

impl HeapState {
    fn object(&self, obj: ObjectRef) -> Option<&HeapObject> {
        let slot = self.slots.get(obj.index() as usize)?;
        if slot.generation != obj.generation() {
            return None;
        }
        slot.object.as_ref()
    }

    fn object_mut(&mut self, obj: ObjectRef) -> Option<&mut HeapObject> {
        let slot = self.slots.get_mut(obj.index() as usize)?;
        if slot.generation != obj.generation() {
            return None;
        }
        slot.object.as_mut()
    }

    fn class(&self, class: ClassId) -> HeapResult<&ClassEntry> {
        self.classes
            .get(class.index())
            .ok_or(HeapError::UnknownClass(class))
    }

    fn store(&mut self, object: HeapObject) -> ObjectRef {
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.object = Some(object);
            ObjectRef::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                object: Some(object),
            });
            ObjectRef::new(index, 0)
        }
    }

    fn instance_field_count(&self, class: ClassId) -> HeapResult<usize> {
        let entry = self.class(class)?;
        Ok(entry.layout_offset + entry.instance_fields.len())
    }

    /// Finds a field by name, most derived class first.
    fn find_instance_field(&self, class: ClassId, name: &str) -> HeapResult<(usize, FieldRef)> {
        let mut current = Some(class);
        while let Some(id) = current {
            let entry = self.class(id)?;
            if let Some(field) = entry.instance_fields.iter().find(|f| &*f.name == name) {
                return Ok((entry.layout_offset + field.slot as usize, field.clone()));
            }
            current = entry.info.superclass;
        }
        let class_name = self.class(class)?.info.name.to_string();
        Err(HeapError::UnknownField {
            class: class_name,
            field: name.to_string(),
        })
    }

    fn is_subclass(&self, class: ClassId, ancestor: ClassId) -> bool {
        let mut current = Some(class);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.classes.get(id.index()).and_then(|c| c.info.superclass);
        }
        false
    }
}

/// Slot-based heap implementing every host capability.
#[derive(Debug)]
pub struct InMemoryHeap {
    state: RwLock<HeapState>,
}

impl Default for InMemoryHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryHeap {
    /// Creates a heap with `java.lang.Object` and `java.lang.Class` defined.
    pub fn new() -> Self {
        let mut state = HeapState::default();
        for (index, name) in [OBJECT_CLASS_NAME, CLASS_CLASS_NAME].into_iter().enumerate() {
            let id = ClassId(index as u32);
            let info = ClassInfo {
                id,
                name: name.into(),
                superclass: if index == 0 { None } else { Some(ClassId(0)) },
                kind: ClassKind::Regular,
                flags: ClassFlags::default(),
                loader: None,
                platform_loader: true,
                initialized: true,
            };
            state.classes.push(ClassEntry {
                info: Arc::new(info),
                instance_fields: Vec::new(),
                static_fields: Vec::new(),
                static_values: Vec::new(),
                inaccessible: HashSet::new(),
                layout_offset: 0,
                mirror: ObjectRef::new(u32::MAX, 0),
            });
            state.class_by_name.insert(name.to_string(), id);
        }
        for index in 0..2 {
            let mirror = state.store(Self::mirror_object(ClassId(index)));
            state.classes[index as usize].mirror = mirror;
        }
        Self {
            state: RwLock::new(state),
        }
    }

    fn mirror_object(class: ClassId) -> HeapObject {
        HeapObject {
            class: ClassId(1),
            size: CLASS_OBJECT_SIZE,
            tag: 0,
            fields: Vec::new(),
            elements: Vec::new(),
            mirrored: Some(class),
        }
    }

    /// Registers a class and allocates its class object.
    pub fn define_class(&self, definition: ClassDefinition) -> HeapResult<ClassId> {
        let mut state = self.state.write();
        let superclass = match &definition.superclass {
            Some(name) => *state
                .class_by_name
                .get(name)
                .ok_or_else(|| HeapError::UnknownClassName(name.clone()))?,
            None => ClassId(0),
        };
        let layout_offset = state.instance_field_count(superclass)?;
        let id = ClassId(state.classes.len() as u32);

        let make_fields = |names: &[String]| -> Vec<FieldRef> {
            names
                .iter()
                .enumerate()
                .map(|(slot, name)| FieldRef {
                    declaring_class: id,
                    name: name.as_str().into(),
                    slot: slot as u32,
                })
                .collect()
        };
        let instance_fields = make_fields(&definition.fields);
        let static_fields = make_fields(&definition.static_fields);
        let inaccessible = instance_fields
            .iter()
            .filter(|f| definition.inaccessible_fields.iter().any(|n| **n == *f.name))
            .map(|f| f.slot)
            .collect();

        let info = ClassInfo {
            id,
            name: definition.name.as_str().into(),
            superclass: Some(superclass),
            kind: definition.kind,
            flags: definition.flags,
            loader: definition.loader,
            platform_loader: definition.platform_loader,
            initialized: definition.initialized,
        };
        let mirror = state.store(Self::mirror_object(id));
        state.classes.push(ClassEntry {
            info: Arc::new(info),
            static_values: vec![None; static_fields.len()],
            instance_fields,
            static_fields,
            inaccessible,
            layout_offset,
            mirror,
        });
        state.class_by_name.insert(definition.name, id);
        Ok(id)
    }

    /// Looks a class up by its fully qualified name.
    pub fn class_id(&self, name: &str) -> Option<ClassId> {
        self.state.read().class_by_name.get(name).copied()
    }

    /// Returns the class object of `class`.
    pub fn class_object(&self, class: ClassId) -> HeapResult<ObjectRef> {
        Ok(self.state.read().class(class)?.mirror)
    }

    /// Marks the static initializer of `class` as run.
    pub fn mark_initialized(&self, class: ClassId) -> HeapResult<()> {
        let mut state = self.state.write();
        let entry = state
            .classes
            .get_mut(class.index())
            .ok_or(HeapError::UnknownClass(class))?;
        let mut info = (*entry.info).clone();
        info.initialized = true;
        entry.info = Arc::new(info);
        Ok(())
    }

    /// Allocates an instance of a regular class with all fields null.
    pub fn allocate(&self, class: ClassId, size: u64) -> HeapResult<ObjectRef> {
        let mut state = self.state.write();
        let field_count = state.instance_field_count(class)?;
        Ok(state.store(HeapObject {
            class,
            size,
            tag: 0,
            fields: vec![None; field_count],
            elements: Vec::new(),
            mirrored: None,
        }))
    }

    /// Allocates an array with the given elements.
    pub fn allocate_array(
        &self,
        class: ClassId,
        size: u64,
        elements: Vec<Option<ObjectRef>>,
    ) -> HeapResult<ObjectRef> {
        let mut state = self.state.write();
        state.class(class)?;
        Ok(state.store(HeapObject {
            class,
            size,
            tag: 0,
            fields: Vec::new(),
            elements,
            mirrored: None,
        }))
    }

    /// Assigns an instance field by name.
    pub fn set_field(&self, obj: ObjectRef, name: &str, value: Option<ObjectRef>) -> HeapResult<()> {
        let mut state = self.state.write();
        let class = state.object(obj).ok_or(HeapError::StaleObject(obj))?.class;
        let (position, _) = state.find_instance_field(class, name)?;
        let object = state.object_mut(obj).ok_or(HeapError::StaleObject(obj))?;
        if let Some(slot) = object.fields.get_mut(position) {
            *slot = value;
        }
        Ok(())
    }

    /// Reads an instance field by name.
    pub fn field_value(&self, obj: ObjectRef, name: &str) -> HeapResult<Option<ObjectRef>> {
        let state = self.state.read();
        let object = state.object(obj).ok_or(HeapError::StaleObject(obj))?;
        let (position, _) = state.find_instance_field(object.class, name)?;
        Ok(object.fields.get(position).copied().flatten())
    }

    /// Replaces one element of an object array.
    pub fn set_element(&self, array: ObjectRef, index: usize, value: Option<ObjectRef>) -> HeapResult<()> {
        let mut state = self.state.write();
        let object = state.object_mut(array).ok_or(HeapError::StaleObject(array))?;
        match object.elements.get_mut(index) {
            Some(element) => {
                *element = value;
                Ok(())
            }
            None => Err(HeapError::NotAnArray(array)),
        }
    }

    /// Assigns a static field by name.
    pub fn set_static_field(&self, class: ClassId, name: &str, value: Option<ObjectRef>) -> HeapResult<()> {
        let mut state = self.state.write();
        let entry = state
            .classes
            .get_mut(class.index())
            .ok_or(HeapError::UnknownClass(class))?;
        let slot = entry
            .static_fields
            .iter()
            .find(|f| &*f.name == name)
            .map(|f| f.slot as usize)
            .ok_or_else(|| HeapError::UnknownField {
                class: entry.info.name.to_string(),
                field: name.to_string(),
            })?;
        if let Some(stored) = entry.static_values.get_mut(slot) {
            *stored = value;
        }
        Ok(())
    }

    /// Adds a GC root.
    pub fn add_root(&self, obj: ObjectRef) {
        self.state.write().roots.push(obj);
    }

    /// Removes a GC root.
    pub fn remove_root(&self, obj: ObjectRef) {
        self.state.write().roots.retain(|r| *r != obj);
    }

    /// Frees `obj` as a collector would. Its handle and tag become stale.
    pub fn collect(&self, obj: ObjectRef) -> HeapResult<()> {
        let mut state = self.state.write();
        let slot = state
            .slots
            .get_mut(obj.index() as usize)
            .filter(|slot| slot.generation == obj.generation() && slot.object.is_some())
            .ok_or(HeapError::StaleObject(obj))?;
        slot.object = None;
        slot.generation = slot.generation.wrapping_add(1);
        state.free_list.push(obj.index());
        state.roots.retain(|r| *r != obj);
        state.disposer.children.remove(&obj);
        for children in state.disposer.children.values_mut() {
            children.retain(|c| *c != obj);
        }
        state.disposer.disposed.remove(&obj);
        Ok(())
    }

    /// Sets the object that holds the disposer tree.
    pub fn set_disposer_registry(&self, registry: ObjectRef) {
        self.state.write().disposer.registry = Some(registry);
    }

    /// Registers `child` under `parent` in the disposer tree.
    pub fn register_disposable(&self, parent: ObjectRef, child: ObjectRef) -> HeapResult<()> {
        let mut state = self.state.write();
        for obj in [parent, child] {
            state.object(obj).ok_or(HeapError::StaleObject(obj))?;
        }
        state.disposer.children.entry(child).or_default();
        state.disposer.children.entry(parent).or_default().push(child);
        Ok(())
    }

    /// Marks `obj` disposed and unregisters it from the disposer tree.
    pub fn dispose(&self, obj: ObjectRef) -> HeapResult<()> {
        let mut state = self.state.write();
        state.object(obj).ok_or(HeapError::StaleObject(obj))?;
        state.disposer.disposed.insert(obj);
        state.disposer.children.remove(&obj);
        for children in state.disposer.children.values_mut() {
            children.retain(|c| *c != obj);
        }
        Ok(())
    }

    /// Number of live objects, class objects included.
    pub fn object_count(&self) -> usize {
        self.state
            .read()
            .slots
            .iter()
            .filter(|slot| slot.object.is_some())
            .count()
    }

    /// Resets every tag to 0.
    pub fn clear_tags(&self) {
        let mut state = self.state.write();
        for object in state.slots.iter_mut().filter_map(|slot| slot.object.as_mut()) {
            object.tag = 0;
        }
    }
}

impl ObjectTagStore for InMemoryHeap {
    fn tag(&self, obj: ObjectRef) -> u64 {
        self.state.read().object(obj).map_or(0, |o| o.tag)
    }

    fn set_tag(&self, obj: ObjectRef, tag: u64) {
        if let Some(object) = self.state.write().object_mut(obj) {
            object.tag = tag;
        }
    }

    fn tagged_objects(&self) -> Vec<(ObjectRef, u64)> {
        let state = self.state.read();
        state
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let object = slot.object.as_ref()?;
                (object.tag != 0).then(|| (ObjectRef::new(index as u32, slot.generation), object.tag))
            })
            .collect()
    }
}

impl FieldEnumerator for InMemoryHeap {
    fn declared_instance_fields(&self, class: ClassId) -> Vec<FieldRef> {
        let state = self.state.read();
        state
            .class(class)
            .map(|c| c.instance_fields.clone())
            .unwrap_or_default()
    }

    fn declared_static_fields(&self, class: ClassId) -> Vec<FieldRef> {
        let state = self.state.read();
        state
            .class(class)
            .map(|c| c.static_fields.clone())
            .unwrap_or_default()
    }

    fn read_field(&self, obj: ObjectRef, field: &FieldRef) -> HeapResult<Option<ObjectRef>> {
        let state = self.state.read();
        let object = state.object(obj).ok_or(HeapError::StaleObject(obj))?;
        let declaring = state.class(field.declaring_class)?;
        let inaccessible = || HeapError::InaccessibleField {
            class: declaring.info.name.to_string(),
            field: field.name.to_string(),
        };
        if declaring.inaccessible.contains(&field.slot)
            || !state.is_subclass(object.class, field.declaring_class)
        {
            return Err(inaccessible());
        }
        object
            .fields
            .get(declaring.layout_offset + field.slot as usize)
            .copied()
            .ok_or_else(inaccessible)
    }

    fn read_static_field(&self, field: &FieldRef) -> HeapResult<Option<ObjectRef>> {
        let state = self.state.read();
        let declaring = state.class(field.declaring_class)?;
        declaring
            .static_values
            .get(field.slot as usize)
            .copied()
            .ok_or_else(|| HeapError::InaccessibleField {
                class: declaring.info.name.to_string(),
                field: field.name.to_string(),
            })
    }
}

impl HeapHost for InMemoryHeap {
    fn roots(&self) -> Vec<ObjectRef> {
        self.state.read().roots.clone()
    }

    fn is_alive(&self, obj: ObjectRef) -> bool {
        self.state.read().object(obj).is_some()
    }

    fn class_of(&self, obj: ObjectRef) -> Option<ClassId> {
        self.state.read().object(obj).map(|o| o.class)
    }

    fn class_info(&self, class: ClassId) -> Option<Arc<ClassInfo>> {
        self.state
            .read()
            .classes
            .get(class.index())
            .map(|c| Arc::clone(&c.info))
    }

    fn mirrored_class(&self, obj: ObjectRef) -> Option<ClassId> {
        self.state.read().object(obj).and_then(|o| o.mirrored)
    }

    fn shallow_size(&self, obj: ObjectRef) -> u64 {
        self.state.read().object(obj).map_or(0, |o| o.size)
    }

    fn array_elements(&self, obj: ObjectRef) -> Vec<Option<ObjectRef>> {
        self.state
            .read()
            .object(obj)
            .map(|o| o.elements.clone())
            .unwrap_or_default()
    }

    fn disposer_registry(&self) -> Option<ObjectRef> {
        self.state.read().disposer.registry
    }

    fn disposer_children(&self, obj: ObjectRef) -> Option<Vec<ObjectRef>> {
        self.state.read().disposer.children.get(&obj).cloned()
    }

    fn is_disposed(&self, obj: ObjectRef) -> bool {
        self.state.read().disposer.disposed.contains(&obj)
    }
}
