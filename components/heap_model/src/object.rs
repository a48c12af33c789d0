//! Object handles and class descriptors.
//!
//! This module provides the identity types the traversal engine works with:
//! opaque object handles, class ids, class descriptors and declared fields.

use std::fmt;
use std::sync::Arc;

/// Opaque handle to an object living in a host heap.
///
/// A handle never keeps its object alive. Once the host collects the object
/// the handle becomes stale and every host capability answers as if the
/// object did not exist.
///
/// # Examples
///
/// ```
/// use heap_model::ObjectRef;
///
/// let obj = ObjectRef::new(7, 1);
/// assert_eq!(obj.index(), 7);
/// assert_eq!(obj.generation(), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    index: u32,
    generation: u32,
}

impl ObjectRef {
    /// Creates a handle from a heap slot index and the slot generation.
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Returns the heap slot index.
    pub fn index(self) -> u32 {
        self.index
    }

    /// Returns the slot generation the handle was issued for.
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{}", self.index, self.generation)
    }
}

/// Dense identifier of a class registered in a host heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

impl ClassId {
    /// Returns the raw index of the class.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Shape of the instances of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    /// Ordinary object with declared fields
    Regular,
    /// Array whose elements are object references
    ObjectArray,
    /// Array of primitive values (has no outgoing references)
    PrimitiveArray,
}

/// Boolean properties of a class that affect traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassFlags {
    /// Compiler generated class
    pub synthetic: bool,
    /// Class nested in another class
    pub member: bool,
    /// Anonymous class
    pub anonymous: bool,
    /// Weak/soft/phantom reference wrapper
    pub reference: bool,
    /// Thread objects are roots on their own and are never followed
    pub thread: bool,
    /// Class loader objects are never followed
    pub class_loader: bool,
    /// Boxed primitive value
    pub primitive_wrapper: bool,
    /// Instances take part in the disposer lifecycle
    pub disposable: bool,
}

/// Descriptor of a class known to the host.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    /// Class id in the host
    pub id: ClassId,
    /// Fully qualified class name, e.g. `com.example.Widget$Inner`
    pub name: Arc<str>,
    /// Superclass, `None` for the hierarchy root
    pub superclass: Option<ClassId>,
    /// Instance shape
    pub kind: ClassKind,
    /// Traversal-relevant flags
    pub flags: ClassFlags,
    /// Defining class loader object, `None` for the bootstrap loader
    pub loader: Option<ObjectRef>,
    /// Whether the defining loader belongs to the platform
    pub platform_loader: bool,
    /// Whether static initialization of the class has run
    pub initialized: bool,
}

impl ClassInfo {
    /// Returns the package part of the class name (empty for the default package).
    ///
    /// # Examples
    ///
    /// ```
    /// use heap_model::{ClassFlags, ClassId, ClassInfo, ClassKind};
    ///
    /// let info = ClassInfo {
    ///     id: ClassId(0),
    ///     name: "a.b.c.Widget".into(),
    ///     superclass: None,
    ///     kind: ClassKind::Regular,
    ///     flags: ClassFlags::default(),
    ///     loader: None,
    ///     platform_loader: false,
    ///     initialized: true,
    /// };
    /// assert_eq!(info.package_name(), "a.b.c");
    /// ```
    pub fn package_name(&self) -> &str {
        match self.name.rfind('.') {
            Some(dot) => &self.name[..dot],
            None => "",
        }
    }

    /// Returns true for arrays of object references.
    pub fn is_object_array(&self) -> bool {
        self.kind == ClassKind::ObjectArray
    }

    /// Returns true if the class was defined by the bootstrap or a platform loader.
    pub fn is_platform_class(&self) -> bool {
        self.loader.is_none() || self.platform_loader
    }
}

/// A declared field of a class.
///
/// `slot` addresses the field inside the declaring class; the host decides
/// how slots map onto object storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// Class that declares the field
    pub declaring_class: ClassId,
    /// Field name
    pub name: Arc<str>,
    /// Slot inside the declaring class
    pub slot: u32,
}
