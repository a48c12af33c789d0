//! Diagnostic pass of the extended report.
//!
//! Walks only edges that lie on a shortest path from a root, keeps the
//! current path in a stack and folds the paths of interesting objects into
//! the [`RootPathTree`](crate::root_path_tree::RootPathTree). Tags are
//! cleared on the postorder visit.

use std::sync::Arc;

use heap_model::{HeapHost, ObjectRef};

use crate::extended_report::ExtendedReportStatistics;
use crate::object_tag::{IterationId, ObjectTag, INVALID_OBJECT_DEPTH};
use crate::root_path_tree::{ExtendedStackNode, RootPathElement};
use crate::traverse::{StackNode, TraverseStrategy};
use crate::{ComponentsSet, TraverseResult};

/// Strategy of the extended pass.
pub struct ExtendedReportCollectionTraverse<'a> {
    extended: &'a mut ExtendedReportStatistics,
    components: &'a ComponentsSet,
    iteration: IterationId,
    pending_nodes: Vec<ExtendedStackNode>,
    path_to_root: Vec<RootPathElement>,
}

impl<'a> ExtendedReportCollectionTraverse<'a> {
    /// Creates the strategy. Nominated classes must already be computed.
    pub fn new(
        extended: &'a mut ExtendedReportStatistics,
        components: &'a ComponentsSet,
        iteration: IterationId,
    ) -> Self {
        Self {
            extended,
            components,
            iteration,
            pending_nodes: Vec::new(),
            path_to_root: Vec::new(),
        }
    }

    /// Length of the current root path.
    pub fn path_len(&self) -> usize {
        self.path_to_root.len()
    }

    /// Records a reference from `parent` into an object defined by a class
    /// loader of an exceeded component.
    fn check_reference_is_holding_class_loader<H: HeapHost + ?Sized>(
        &mut self,
        host: &H,
        parent: ObjectRef,
        child: ObjectRef,
        label: &str,
    ) {
        let (Some(parent_class), Some(child_class)) = (host.class_info_of(parent), host.class_info_of(child)) else {
            return;
        };
        let Some(child_loader) = child_class.loader else {
            return;
        };
        if parent_class.loader == Some(child_loader) {
            return;
        }
        let Some(child_loader_class) = host.class_info_of(child_loader) else {
            return;
        };
        let components = self.components;
        let Some(cluster) = self.extended.exceeded_components().find_map(|(id, index)| {
            components
                .component(id)
                .is_some_and(|c| c.is_class_loader_owned(&child_loader_class.name))
                .then_some(index)
        }) else {
            return;
        };
        if let Some(parent_loader_class) = parent_class.loader.and_then(|loader| host.class_info_of(loader)) {
            if parent_loader_class.name == child_loader_class.name {
                return;
            }
        }
        self.path_to_root.push(RootPathElement::new(
            ExtendedStackNode::new(class_name_label(host, child), label),
            host.shallow_size(child),
        ));
        self.extended
            .root_path_tree
            .add_class_loader_path(&mut self.path_to_root, cluster);
        self.path_to_root.pop();
    }
}

/// Class name shown in root paths; class objects show the class they mirror.
fn class_name_label<H: HeapHost + ?Sized>(host: &H, obj: ObjectRef) -> Arc<str> {
    let Some(class) = host.class_info_of(obj) else {
        return Arc::from("<unknown>");
    };
    match host.mirrored_class(obj).and_then(|mirrored| host.class_info(mirrored)) {
        Some(mirrored) => Arc::from(format!("{}({})", class.name, mirrored.name)),
        None => Arc::clone(&class.name),
    }
}

impl<H: HeapHost + ?Sized> TraverseStrategy<H> for ExtendedReportCollectionTraverse<'_> {
    fn on_push(&mut self, host: &H, node: &StackNode) {
        self.pending_nodes.push(ExtendedStackNode::new(
            class_name_label(host, node.object),
            Arc::clone(&node.label),
        ));
    }

    fn handle_node(&mut self, host: &H, node: &StackNode) -> TraverseResult<()> {
        let Some(pending) = self.pending_nodes.pop() else {
            return Ok(());
        };
        let alive = host.is_alive(node.object);
        let size = if alive { host.shallow_size(node.object) } else { 0 };
        self.path_to_root.push(RootPathElement::new(pending, size));
        if !alive {
            return Ok(());
        }
        let Some(cluster) = node.tag.exceeded_cluster_index() else {
            return Ok(());
        };
        let Some(class) = host.class_info_of(node.object) else {
            return Ok(());
        };
        let nominated_type = self
            .extended
            .exceeded_cluster(cluster)
            .and_then(|statistics| statistics.nominated_type(&class.name));
        if let Some(node_type) = nominated_type {
            self.extended
                .root_path_tree
                .add_object_with_path_to_root(&mut self.path_to_root, cluster, node_type);
        }
        if class.flags.disposable && host.is_disposed(node.object) {
            self.extended
                .root_path_tree
                .add_disposed_referenced_object_with_path_to_root(&mut self.path_to_root, cluster);
        }
        Ok(())
    }

    fn handle_processed_node(&mut self, host: &H, node: &StackNode, _root: ObjectRef) -> TraverseResult<()> {
        self.path_to_root.pop();
        if host.is_alive(node.object) {
            host.set_tag(node.object, ObjectTag::EMPTY.raw());
        }
        Ok(())
    }

    fn should_add_object_to_stack(
        &mut self,
        host: &H,
        parent: &StackNode,
        child_tag: ObjectTag,
        child: ObjectRef,
        label: &str,
    ) -> bool {
        self.check_reference_is_holding_class_loader(host, parent.object, child, label);
        let depth = child_tag.depth(self.iteration);
        depth != INVALID_OBJECT_DEPTH && parent.depth + 1 == depth
    }

    fn cleanup(&mut self) {
        self.pending_nodes.clear();
        self.path_to_root.clear();
    }
}
