//! Integration test suite for memory usage attribution
//!
//! This crate provides integration tests that verify the heap model and the
//! traversal engine work together correctly across component boundaries.

use std::sync::Arc;

use memory_usage::{ComponentRegistration, ComponentsSet};

/// Re-export components for test convenience
pub mod components {
    pub use heap_model;
    pub use memory_usage;
}

/// One `(label, package)` component per entry in a single `ide` category.
/// Component ids follow the slice order starting at 1.
pub fn components_by_package(entries: &[(&str, &str)]) -> Arc<ComponentsSet> {
    let mut set = ComponentsSet::new(u64::MAX, u64::MAX);
    let category = set
        .register_category("ide", u64::MAX, Vec::new())
        .expect("category registration");
    for (label, package) in entries {
        set.add_component_with_packages_and_class_names(category, ComponentRegistration::new(*label).package(*package))
            .expect("component registration");
    }
    Arc::new(set)
}
