//! Second pass: ownership propagation over the enumerated objects.
//!
//! Objects are visited by decreasing postorder id. Every edge to an object
//! with a lower id hands the parent's masks down to the child, so by the
//! time an object is processed all of its enumerated parents were merged
//! into its [`HeapTraverseNode`].

use std::collections::HashMap;

use heap_model::{HeapHost, ObjectRef};

use crate::child_processor::{ChildReference, HeapTraverseChildProcessor};
use crate::field_cache::FieldCache;
use crate::object_tag::{IterationId, ObjectTag};
use crate::traverse::CancellationToken;
use crate::traverse_node::{mask_bit, mask_bits, HeapTraverseNode, ParentContribution};
use crate::{HeapSnapshotStatistics, TraverseResult};

/// Runs the ownership pass and feeds `statistics`.
pub struct HeapStatisticsPass<'a, H: HeapHost + ?Sized> {
    host: &'a H,
    child_processor: &'a HeapTraverseChildProcessor,
    field_cache: &'a mut FieldCache,
    cancellation: &'a CancellationToken,
    iteration: IterationId,
    children: Vec<ChildReference>,
}

/// Ownership of one object, resolved from its node.
struct Ownership {
    owned_mask: u64,
    retained_mask: u64,
    retained_category_mask: u64,
    is_platform_object: bool,
    is_retained_by_platform: bool,
}

impl<'a, H: HeapHost + ?Sized> HeapStatisticsPass<'a, H> {
    /// Prepares the pass for session `iteration`.
    pub fn new(
        host: &'a H,
        child_processor: &'a HeapTraverseChildProcessor,
        field_cache: &'a mut FieldCache,
        cancellation: &'a CancellationToken,
        iteration: IterationId,
    ) -> Self {
        Self {
            host,
            child_processor,
            field_cache,
            cancellation,
            iteration,
            children: Vec::new(),
        }
    }

    /// Attributes objects `1..=last_object_id`.
    ///
    /// `nodes` holds the root nodes registered by the enumeration pass.
    pub fn run(
        &mut self,
        mut nodes: HashMap<u32, HeapTraverseNode>,
        last_object_id: u32,
        statistics: &mut HeapSnapshotStatistics,
    ) -> TraverseResult<()> {
        let objects = self.resolve_object_ids(last_object_id);
        for id in (1..=last_object_id).rev() {
            self.cancellation.check()?;
            let node = nodes.remove(&id);
            let Some(obj) = objects[id as usize].filter(|obj| self.host.is_alive(*obj)) else {
                statistics.increment_garbage_collected_objects_counter();
                continue;
            };
            let node = node.unwrap_or_else(HeapTraverseNode::root);
            let Some(ownership) = self.process_object(obj, &node, statistics) else {
                statistics.increment_garbage_collected_objects_counter();
                continue;
            };
            self.propagate_to_children(obj, id, &ownership, &mut nodes, statistics);
        }
        statistics.set_heap_object_count(u64::from(last_object_id));
        statistics.update_max_fields_cache_size(self.field_cache.peak_size());
        let garbage_collected = statistics.enumerated_garbage_collected_objects();
        if garbage_collected > 0 {
            tracing::warn!(garbage_collected, "objects were collected between enumeration and statistics passes");
        }
        Ok(())
    }

    /// Maps postorder ids back to objects through the host's tag table.
    /// Collected objects drop out of it, leaving their slot empty.
    fn resolve_object_ids(&self, last_object_id: u32) -> Vec<Option<ObjectRef>> {
        let mut objects = vec![None; last_object_id as usize + 1];
        for (obj, raw) in self.host.tagged_objects() {
            let id = ObjectTag::from_raw(raw).object_id(self.iteration);
            if id != 0 && id <= last_object_id {
                objects[id as usize] = Some(obj);
            }
        }
        objects
    }

    fn process_object(
        &mut self,
        obj: ObjectRef,
        node: &HeapTraverseNode,
        statistics: &mut HeapSnapshotStatistics,
    ) -> Option<Ownership> {
        let class = self.host.class_info_of(obj)?;
        let size = self.host.shallow_size(obj);
        let components = statistics.config().components.clone();
        let component = components.component_of_object(self.host, obj);
        let own_bit = component.map_or(0, |c| mask_bit(c.id()));
        let own_category_bit = component.map_or(0, |c| mask_bit(c.category_id()));
        let owned_mask = if own_bit != 0 { own_bit } else { node.inherited_owned_mask() };

        let is_platform_object = class.is_platform_class();
        let is_retained_by_platform = node.is_retained_by_platform();
        let is_disposed = class.flags.disposable && self.host.is_disposed(obj);
        let class_name: &str = &class.name;

        statistics.add_object_to_total(size, is_platform_object, is_retained_by_platform);

        match owned_mask.count_ones() {
            0 => {
                let is_root = node.is_root();
                statistics.add_owned_object_size_to_component(
                    0,
                    size,
                    class_name,
                    is_root,
                    is_platform_object,
                    is_retained_by_platform,
                    is_disposed,
                );
                statistics.add_owned_object_size_to_category_component(
                    0,
                    size,
                    class_name,
                    is_root,
                    is_platform_object,
                    is_retained_by_platform,
                    is_disposed,
                );
            }
            1 => {
                let id = owned_mask.trailing_zeros() as usize;
                let is_root = node.is_root() || (own_bit != 0 && node.has_parent_with_other_mask(own_bit));
                statistics.add_owned_object_size_to_component(
                    id,
                    size,
                    class_name,
                    is_root,
                    is_platform_object,
                    is_retained_by_platform,
                    is_disposed,
                );
                if let Some(category) = components.component(id).map(|c| c.category_id()) {
                    statistics.add_owned_object_size_to_category_component(
                        category,
                        size,
                        class_name,
                        is_root,
                        is_platform_object,
                        is_retained_by_platform,
                        is_disposed,
                    );
                }
            }
            _ => {
                let is_merge_point = node.is_merge_point(owned_mask);
                statistics.add_object_size_to_shared_component(
                    owned_mask,
                    size,
                    class_name,
                    is_merge_point,
                    is_platform_object,
                    is_retained_by_platform,
                    is_disposed,
                );
                let mut categories = mask_bits(owned_mask).filter_map(|id| components.component(id).map(|c| c.category_id()));
                if let Some(first) = categories.next() {
                    if categories.all(|category| category == first) {
                        statistics.add_owned_object_size_to_category_component(
                            first,
                            size,
                            class_name,
                            is_merge_point,
                            is_platform_object,
                            is_retained_by_platform,
                            is_disposed,
                        );
                    }
                }
            }
        }

        let retained_mask = node.inherited_retained_mask() | own_bit;
        for id in mask_bits(retained_mask) {
            statistics.add_retained_object_size_to_component(id, size, is_platform_object, is_retained_by_platform);
        }
        let retained_category_mask = node.inherited_retained_category_mask() | own_category_bit;
        for id in mask_bits(retained_category_mask) {
            statistics.add_retained_object_size_to_category_component(
                id,
                size,
                is_platform_object,
                is_retained_by_platform,
            );
        }

        if is_disposed {
            statistics.add_disposed_but_referenced_object(size, class_name);
        }

        if let Some(extended) = statistics.extended_report() {
            let cluster = extended.exceeded_cluster_of_mask(owned_mask);
            let tag = ObjectTag::from_raw(self.host.tag(obj))
                .with_visited_cleared()
                .with_exceeded_cluster(cluster);
            self.host.set_tag(obj, tag.raw());
        }

        Some(Ownership {
            owned_mask,
            retained_mask,
            retained_category_mask,
            is_platform_object,
            is_retained_by_platform,
        })
    }

    fn propagate_to_children(
        &mut self,
        obj: ObjectRef,
        id: u32,
        ownership: &Ownership,
        nodes: &mut HashMap<u32, HeapTraverseNode>,
        statistics: &mut HeapSnapshotStatistics,
    ) {
        let contribution = ParentContribution {
            owned_mask: ownership.owned_mask,
            retained_mask: ownership.retained_mask,
            retained_category_mask: ownership.retained_category_mask,
            retains_for_platform: ownership.is_platform_object || ownership.is_retained_by_platform,
        };
        let mut children = std::mem::take(&mut self.children);
        let failures = self
            .child_processor
            .process_child_objects(self.host, obj, self.field_cache, &mut children);
        statistics.add_unsuccessful_field_accesses(failures as u64);
        for child in children.drain(..) {
            if !self.host.is_alive(child.object) {
                continue;
            }
            let child_id = ObjectTag::from_raw(self.host.tag(child.object)).object_id(self.iteration);
            if child_id == 0 || child_id >= id {
                continue;
            }
            let node = nodes.entry(child_id).or_default();
            if !node.is_root() {
                node.merge_parent(&contribution);
            }
        }
        self.children = children;
    }
}
