//! Trie of reference chains from heap roots to nominated objects.
//!
//! Every insertion walks one root path. Path elements remember the trie
//! node they were mapped to, per exceeded cluster and nominated type, so a
//! later path that shares a prefix of the same DFS stack only extends the
//! trie below the deepest shared element.
//!
//! Nodes live in an arena and both insertion and printing are iterative;
//! paths of the exempt types can be as deep as the traversal depth cap.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::presentation::{objects_stats_presentation, pad_start, to_short_string_as_count, to_short_string_as_size};
use crate::{ObjectsStatistics, PresentationStyle};

/// Nominated classes per section of an exceeded cluster.
pub const NOMINATED_CLASSES_NUMBER_IN_SECTION: usize = 3;
/// Nominated type of disposed objects that are still referenced.
pub const DISPOSED_BUT_REFERENCED_NOMINATED_NODE_TYPE: usize = 9;
/// Nominated type of objects referencing an object of a nominated class loader.
pub const OBJECT_REFERRING_LOADER_NOMINATED_NODE_TYPE: usize = 10;
/// Number of nominated types: three class sections plus the two above.
pub const MAX_NUMBER_OF_NOMINATED_NODE_TYPES: usize = NOMINATED_CLASSES_NUMBER_IN_SECTION * 3 + 2;
/// Longer paths are dropped unless their type is exempt.
pub const ROOT_PATH_TREE_MAX_OBJECT_DEPTH: usize = 400;

const NODE_SUBTREE_SIZE_PERCENTAGE_REQUIREMENT: u64 = 2;
const NODE_SUBTREE_OBJECTS_SIZE_REQUIREMENT_BYTES: u64 = 100_000;

/// Types that are never pruned, neither by path length nor when printing.
pub fn is_exempt_nominated_type(node_type: usize) -> bool {
    node_type == DISPOSED_BUT_REFERENCED_NOMINATED_NODE_TYPE || node_type == OBJECT_REFERRING_LOADER_NOMINATED_NODE_TYPE
}

/// Label and class name of one step of a root path. Trie children are keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtendedStackNode {
    /// Class name of the object, `java.lang.Class(<name>)` for class objects
    pub class_name: Arc<str>,
    /// Label of the reference the object was reached through
    pub label: Arc<str>,
}

impl ExtendedStackNode {
    /// Creates a step.
    pub fn new(class_name: impl Into<Arc<str>>, label: impl Into<Arc<str>>) -> Self {
        Self {
            class_name: class_name.into(),
            label: label.into(),
        }
    }
}

type Slot = (usize, usize);
type NodeId = usize;

/// One object on a root path.
#[derive(Debug, Clone)]
pub struct RootPathElement {
    node: ExtendedStackNode,
    size: u64,
    tree_nodes: HashMap<Slot, NodeId>,
}

impl RootPathElement {
    /// Creates an element for an object of `size` bytes.
    pub fn new(node: ExtendedStackNode, size: u64) -> Self {
        Self {
            node,
            size,
            tree_nodes: HashMap::new(),
        }
    }

    /// Label of the reference.
    pub fn label(&self) -> &str {
        &self.node.label
    }

    /// Class name of the object.
    pub fn class_name(&self) -> &str {
        &self.node.class_name
    }

    /// Shallow size of the object.
    pub fn size(&self) -> u64 {
        self.size
    }
}

#[derive(Debug)]
struct RootPathTreeNode {
    label: Arc<str>,
    class_name: Arc<str>,
    children: HashMap<ExtendedStackNode, NodeId>,
    is_repeated: bool,
    instances: HashMap<Slot, ObjectsStatistics>,
    nominated: HashSet<Slot>,
}

impl RootPathTreeNode {
    fn new(node: &ExtendedStackNode) -> Self {
        Self {
            label: Arc::clone(&node.label),
            class_name: Arc::clone(&node.class_name),
            children: HashMap::new(),
            is_repeated: false,
            instances: HashMap::new(),
            nominated: HashSet::new(),
        }
    }

    fn instances_in(&self, slot: Slot) -> ObjectsStatistics {
        self.instances.get(&slot).copied().unwrap_or_default()
    }

    fn has_instances_in(&self, slot: Slot) -> bool {
        !self.instances_in(slot).is_empty()
    }

    fn matches(&self, node: &ExtendedStackNode) -> bool {
        self.label == node.label && self.class_name == node.class_name
    }
}

/// The root path trie of one extended report.
#[derive(Debug, Default)]
pub struct RootPathTree {
    nodes: Vec<RootPathTreeNode>,
    roots: Vec<NodeId>,
    /// Paths starting at the same (label, class) root share one root node,
    /// so the printed tree shows their sizes summed under a single root.
    root_index: HashMap<ExtendedStackNode, NodeId>,
    total_nominated_loaders_referring_objects: ObjectsStatistics,
}

struct PrintFrame {
    node: NodeId,
    prefix: String,
    is_only_child: bool,
    is_last_child: bool,
}

impl RootPathTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of trie nodes created so far.
    pub fn number_of_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Objects referencing nominated loaders, over all clusters.
    pub fn total_nominated_loaders_referring_objects(&self) -> &ObjectsStatistics {
        &self.total_nominated_loaders_referring_objects
    }

    /// Adds the path of a disposed object that is still referenced.
    pub fn add_disposed_referenced_object_with_path_to_root(&mut self, path: &mut [RootPathElement], cluster: usize) {
        self.add_object_with_path_to_root(path, cluster, DISPOSED_BUT_REFERENCED_NOMINATED_NODE_TYPE);
    }

    /// Adds the path of an object that references a nominated class loader.
    pub fn add_class_loader_path(&mut self, path: &mut [RootPathElement], cluster: usize) {
        self.add_object_with_path_to_root(path, cluster, OBJECT_REFERRING_LOADER_NOMINATED_NODE_TYPE);
        if let Some(last) = path.last() {
            self.total_nominated_loaders_referring_objects.add_object(last.size);
        }
    }

    /// Folds `path` (root first) into the trie and marks its last node nominated.
    pub fn add_object_with_path_to_root(&mut self, path: &mut [RootPathElement], cluster: usize, node_type: usize) {
        if path.is_empty() {
            return;
        }
        if path.len() > ROOT_PATH_TREE_MAX_OBJECT_DEPTH && !is_exempt_nominated_type(node_type) {
            return;
        }
        let slot = (cluster, node_type);

        let deepest_mapped = path
            .iter()
            .enumerate()
            .rev()
            .find_map(|(index, element)| element.tree_nodes.get(&slot).map(|node| (index + 1, *node)));
        let (next, mut current) = match deepest_mapped {
            Some(found) => found,
            None => {
                let first = &mut path[0];
                let root = self.root_for(&first.node);
                self.increment(root, slot, first.size);
                first.tree_nodes.insert(slot, root);
                (1, root)
            }
        };

        for element in path[next..].iter_mut() {
            if self.nodes[current].matches(&element.node) {
                self.nodes[current].is_repeated = true;
                element.tree_nodes.insert(slot, current);
                continue;
            }
            let child = self.child_for(current, &element.node);
            self.increment(child, slot, element.size);
            element.tree_nodes.insert(slot, child);
            current = child;
        }
        self.nodes[current].nominated.insert(slot);
    }

    fn create_node(&mut self, node: &ExtendedStackNode) -> NodeId {
        self.nodes.push(RootPathTreeNode::new(node));
        self.nodes.len() - 1
    }

    fn root_for(&mut self, node: &ExtendedStackNode) -> NodeId {
        if let Some(&root) = self.root_index.get(node) {
            return root;
        }
        let root = self.create_node(node);
        self.roots.push(root);
        self.root_index.insert(node.clone(), root);
        root
    }

    fn child_for(&mut self, parent: NodeId, node: &ExtendedStackNode) -> NodeId {
        if let Some(&child) = self.nodes[parent].children.get(node) {
            return child;
        }
        let child = self.create_node(node);
        self.nodes[parent].children.insert(node.clone(), child);
        child
    }

    fn increment(&mut self, node: NodeId, slot: Slot, size: u64) {
        self.nodes[node].instances.entry(slot).or_default().add_object(size);
    }

    /// Prints the disposed-but-referenced section of `cluster`.
    pub fn print_path_tree_for_disposed_referenced_objects<W: fmt::Write>(
        &self,
        writer: &mut W,
        cluster: usize,
        total: &ObjectsStatistics,
    ) -> fmt::Result {
        if total.is_empty() {
            return Ok(());
        }
        writeln!(writer, "================= DISPOSED OBJECTS ================")?;
        self.print_path_tree_for_cluster_and_type(writer, cluster, DISPOSED_BUT_REFERENCED_NOMINATED_NODE_TYPE, total)
    }

    /// Prints the objects of `cluster` referencing one of `custom_class_loaders`.
    pub fn print_path_tree_for_objects_referring_nominated_loaders<W: fmt::Write>(
        &self,
        writer: &mut W,
        cluster: usize,
        custom_class_loaders: &[String],
    ) -> fmt::Result {
        if custom_class_loaders.is_empty() || self.total_nominated_loaders_referring_objects.is_empty() {
            return Ok(());
        }
        writeln!(writer, "================= OBJECTS RETAINING NOMINATED LOADERS ================")?;
        writeln!(writer, "Nominated ClassLoaders:")?;
        for loader in custom_class_loaders {
            writeln!(writer, " --> {loader}")?;
        }
        self.print_path_tree_for_cluster_and_type(
            writer,
            cluster,
            OBJECT_REFERRING_LOADER_NOMINATED_NODE_TYPE,
            &self.total_nominated_loaders_referring_objects,
        )
    }

    /// Prints every root whose subtree holds enough nominated objects of
    /// `node_type` for `cluster`, largest first.
    pub fn print_path_tree_for_cluster_and_type<W: fmt::Write>(
        &self,
        writer: &mut W,
        cluster: usize,
        node_type: usize,
        total: &ObjectsStatistics,
    ) -> fmt::Result {
        if total.is_empty() {
            return Ok(());
        }
        let slot = (cluster, node_type);
        let subtree_stats = self.nominated_objects_in_subtrees(slot);

        let mut roots: Vec<(NodeId, ObjectsStatistics)> = self
            .roots
            .iter()
            .filter_map(|root| subtree_stats.get(root).map(|stats| (*root, *stats)))
            .filter(|(_, stats)| !should_skip_printing_node_subtree(total, stats, node_type))
            .collect();
        roots.sort_by(|a, b| b.1.objects_count.cmp(&a.1.objects_count));

        for (index, (root, _)) in roots.into_iter().enumerate() {
            writeln!(writer, "Root {}:", index + 1)?;
            self.print_root_path(writer, root, slot, total, &subtree_stats)?;
        }
        Ok(())
    }

    fn print_root_path<W: fmt::Write>(
        &self,
        writer: &mut W,
        root: NodeId,
        slot: Slot,
        total: &ObjectsStatistics,
        subtree_stats: &HashMap<NodeId, ObjectsStatistics>,
    ) -> fmt::Result {
        let mut stack = vec![PrintFrame {
            node: root,
            prefix: " ".to_string(),
            is_only_child: true,
            is_last_child: false,
        }];
        while let Some(frame) = stack.pop() {
            let Some(stats) = subtree_stats.get(&frame.node) else {
                continue;
            };
            if should_skip_printing_node_subtree(total, stats, slot.1) {
                continue;
            }
            writeln!(writer, "{}", self.root_path_line(&frame, slot, total, stats))?;

            let mut children: Vec<(NodeId, u64)> = self.nodes[frame.node]
                .children
                .values()
                .filter(|child| self.nodes[**child].has_instances_in(slot))
                .filter_map(|child| subtree_stats.get(child).map(|stats| (*child, stats.objects_count)))
                .collect();
            children.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

            let count = children.len();
            if count == 1 {
                stack.push(PrintFrame {
                    node: children[0].0,
                    prefix: frame.prefix,
                    is_only_child: true,
                    is_last_child: false,
                });
                continue;
            }
            for (index, (child, _)) in children.into_iter().enumerate().rev() {
                let is_last_child = index == count - 1;
                let branch = if is_last_child { "  " } else { " |" };
                stack.push(PrintFrame {
                    node: child,
                    prefix: format!("{}{}", frame.prefix, branch),
                    is_only_child: false,
                    is_last_child,
                });
            }
        }
        Ok(())
    }

    fn root_path_line(&self, frame: &PrintFrame, slot: Slot, total: &ObjectsStatistics, subtree: &ObjectsStatistics) -> String {
        let node = &self.nodes[frame.node];
        let percent = (100.0 * subtree.objects_count as f64 / total.objects_count as f64) as u64;
        format!(
            "[{}/{}/{}]{} {} {}{}{}: {}",
            pad_start(&to_short_string_as_count(subtree.objects_count), 5),
            pad_start(&format!("{percent}%"), 4),
            pad_start(&to_short_string_as_size(subtree.total_size_bytes), 6),
            pad_start(
                &objects_stats_presentation(&node.instances_in(slot), PresentationStyle::OptimalUnits),
                20
            ),
            if node.nominated.contains(&slot) { '*' } else { ' ' },
            if node.is_repeated { "(rep)" } else { "     " },
            transform_prefix(&frame.prefix, frame.is_only_child, frame.is_last_child),
            node.label,
            node.class_name,
        )
    }

    /// Nominated objects in the subtree of every node that has instances in `slot`.
    fn nominated_objects_in_subtrees(&self, slot: Slot) -> HashMap<NodeId, ObjectsStatistics> {
        let mut result = HashMap::new();
        let mut stack: Vec<(NodeId, bool)> = self.roots.iter().map(|root| (*root, false)).collect();
        while let Some((id, children_done)) = stack.pop() {
            let node = &self.nodes[id];
            if !node.has_instances_in(slot) {
                continue;
            }
            if !children_done {
                stack.push((id, true));
                stack.extend(node.children.values().map(|child| (*child, false)));
                continue;
            }
            let mut stats = ObjectsStatistics::default();
            if node.nominated.contains(&slot) {
                stats.add_stats(&node.instances_in(slot));
            }
            for child in node.children.values() {
                if let Some(child_stats) = result.get(child) {
                    stats.add_stats(child_stats);
                }
            }
            if !stats.is_empty() {
                result.insert(id, stats);
            }
        }
        result
    }
}

fn should_skip_printing_node_subtree(total: &ObjectsStatistics, subtree: &ObjectsStatistics, node_type: usize) -> bool {
    100 * subtree.objects_count < total.objects_count * NODE_SUBTREE_SIZE_PERCENTAGE_REQUIREMENT
        && subtree.total_size_bytes < NODE_SUBTREE_OBJECTS_SIZE_REQUIREMENT_BYTES
        && !is_exempt_nominated_type(node_type)
}

fn transform_prefix(prefix: &str, is_only_child: bool, is_last_child: bool) -> String {
    if is_only_child {
        return format!("{prefix} ");
    }
    let trimmed = &prefix[..prefix.len().saturating_sub(1)];
    if is_last_child {
        format!("{trimmed}\\-")
    } else {
        format!("{trimmed}+-")
    }
}
