//! First pass: postorder numbering of every reachable object.

use std::collections::HashMap;

use heap_model::{HeapHost, ObjectRef};

use crate::object_tag::{IterationId, ObjectTag, MAX_OBJECT_ID};
use crate::traverse::{StackNode, TraverseStrategy};
use crate::traverse_node::HeapTraverseNode;
use crate::{HeapSnapshotTraverseError, TraverseResult};

/// Assigns ids `1..=n` to objects in postorder and registers a node for
/// every root.
///
/// A parent always receives a larger id than the children it was first to
/// reach, so walking ids downwards visits parents before children.
#[derive(Debug)]
pub struct ObjectsEnumerationTraverse {
    iteration: IterationId,
    max_objects: u32,
    last_object_id: u32,
    nodes: HashMap<u32, HeapTraverseNode>,
}

impl ObjectsEnumerationTraverse {
    /// Creates the strategy for session `iteration`, failing after `max_objects` ids.
    /// The limit never exceeds the largest id a tag can hold.
    pub fn new(iteration: IterationId, max_objects: u32) -> Self {
        Self {
            iteration,
            max_objects: max_objects.min(MAX_OBJECT_ID),
            last_object_id: 0,
            nodes: HashMap::new(),
        }
    }

    /// Largest id assigned so far.
    pub fn last_object_id(&self) -> u32 {
        self.last_object_id
    }

    /// Hands out the root nodes, keyed by object id.
    pub fn into_nodes(self) -> HashMap<u32, HeapTraverseNode> {
        self.nodes
    }
}

impl<H: HeapHost + ?Sized> TraverseStrategy<H> for ObjectsEnumerationTraverse {
    fn handle_processed_node(&mut self, host: &H, node: &StackNode, root: ObjectRef) -> TraverseResult<()> {
        if !host.is_alive(node.object) {
            return Ok(());
        }
        if self.last_object_id >= self.max_objects {
            return Err(HeapSnapshotTraverseError::objects_map_is_too_big());
        }
        self.last_object_id += 1;
        let tag = ObjectTag::from_raw(host.tag(node.object));
        debug_assert!(tag.belongs_to(self.iteration));
        host.set_tag(node.object, tag.with_object_id(self.last_object_id).raw());
        if node.object == root {
            self.nodes.insert(self.last_object_id, HeapTraverseNode::root());
        }
        Ok(())
    }
}
