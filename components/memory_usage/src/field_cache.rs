//! Per-class cache of reflectively enumerated fields.

use std::collections::HashMap;
use std::sync::Arc;

use heap_model::{ClassId, FieldRef, HeapHost};

/// Default number of cached classes before the cache is flushed.
pub const DEFAULT_MAX_FIELD_CACHE_ENTRIES: usize = 100_000;

/// Caches instance fields (own and inherited) and static fields per class.
#[derive(Debug)]
pub struct FieldCache {
    instance_fields: HashMap<ClassId, Arc<[FieldRef]>>,
    static_fields: HashMap<ClassId, Arc<[FieldRef]>>,
    max_entries: usize,
    peak_size: usize,
}

impl Default for FieldCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FIELD_CACHE_ENTRIES)
    }
}

impl FieldCache {
    /// Creates an empty cache that is flushed once it holds more than `max_entries` classes.
    pub fn new(max_entries: usize) -> Self {
        Self {
            instance_fields: HashMap::new(),
            static_fields: HashMap::new(),
            max_entries,
            peak_size: 0,
        }
    }

    /// Instance fields declared by `class` and all of its superclasses,
    /// most derived class first.
    pub fn instance_fields<H: HeapHost + ?Sized>(&mut self, host: &H, class: ClassId) -> Arc<[FieldRef]> {
        if let Some(fields) = self.instance_fields.get(&class) {
            return Arc::clone(fields);
        }
        let mut fields = Vec::new();
        let mut current = Some(class);
        while let Some(id) = current {
            fields.extend(host.declared_instance_fields(id));
            current = host.class_info(id).and_then(|info| info.superclass);
        }
        let fields: Arc<[FieldRef]> = fields.into();
        self.instance_fields.insert(class, Arc::clone(&fields));
        self.after_insert();
        fields
    }

    /// Static fields declared by `class`.
    pub fn static_fields<H: HeapHost + ?Sized>(&mut self, host: &H, class: ClassId) -> Arc<[FieldRef]> {
        if let Some(fields) = self.static_fields.get(&class) {
            return Arc::clone(fields);
        }
        let fields: Arc<[FieldRef]> = host.declared_static_fields(class).into();
        self.static_fields.insert(class, Arc::clone(&fields));
        self.after_insert();
        fields
    }

    fn after_insert(&mut self) {
        let size = self.size();
        self.peak_size = self.peak_size.max(size);
        if size > self.max_entries {
            tracing::debug!(size, "field cache limit reached, flushing");
            self.clear();
        }
    }

    /// Number of cached class entries.
    pub fn size(&self) -> usize {
        self.instance_fields.len() + self.static_fields.len()
    }

    /// Largest size the cache reached.
    pub fn peak_size(&self) -> usize {
        self.peak_size
    }

    /// Drops every entry. The peak size is kept.
    pub fn clear(&mut self) {
        self.instance_fields.clear();
        self.static_fields.clear();
    }
}
