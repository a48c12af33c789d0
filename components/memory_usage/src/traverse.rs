//! Explicit-stack depth first traversal of the object graph.
//!
//! The walk is shared by every pass; what happens on push, on the preorder
//! and postorder visits, and which children are accepted is decided by a
//! [`TraverseStrategy`].
//!
//! Per-object state machine within one pass:
//!
//! ```text
//! unvisited --push--> visited (on stack) --preorder--> expanded --postorder--> processed
//! ```

use std::sync::Arc;

use crossbeam::atomic::AtomicCell;
use heap_model::{HeapHost, ObjectRef};

use crate::child_processor::{ChildReference, HeapTraverseChildProcessor};
use crate::field_cache::FieldCache;
use crate::object_tag::{IterationId, ObjectTag, MAX_ENCODABLE_DEPTH, ROOT_DEPTH};
use crate::{HeapSnapshotTraverseError, TraverseResult};

/// Label of the bottom element of every root path.
pub const ROOT_LABEL: &str = "(root)";

/// Cooperative cancellation flag shared between the traversal and its owner.
///
/// # Examples
///
/// ```
/// use memory_usage::CancellationToken;
///
/// let token = CancellationToken::new();
/// let handle = token.clone();
/// handle.cancel();
/// assert!(token.is_cancelled());
/// assert!(token.check().is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicCell<bool>>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Safe to call from any thread.
    pub fn cancel(&self) {
        self.cancelled.store(true);
    }

    /// Clears a previous cancellation request.
    pub fn reset(&self) {
        self.cancelled.store(false);
    }

    /// Returns true once [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load()
    }

    /// Fails with [`StatusCode::TraversalAborted`](crate::StatusCode::TraversalAborted) if cancelled.
    pub fn check(&self) -> TraverseResult<()> {
        if self.is_cancelled() {
            Err(HeapSnapshotTraverseError::aborted())
        } else {
            Ok(())
        }
    }
}

/// Entry of the DFS stack.
///
/// Holding a node does not keep its object alive; strategies must expect
/// [`HeapHost::is_alive`] to turn false at any point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackNode {
    /// The object
    pub object: ObjectRef,
    /// Distance from the root, roots are at [`ROOT_DEPTH`]
    pub depth: u32,
    /// Tag written when the node was pushed
    pub tag: ObjectTag,
    /// Label of the reference the object was reached through
    pub label: Arc<str>,
    /// Children were already pushed; the next visit is the postorder one
    pub references_processed: bool,
}

/// Pass-specific behavior plugged into [`DepthFirstSearchTraverse`].
pub trait TraverseStrategy<H: HeapHost + ?Sized> {
    /// Called right after `node` is pushed.
    fn on_push(&mut self, _host: &H, _node: &StackNode) {}

    /// Preorder visit, before the children of `node` are pushed.
    fn handle_node(&mut self, _host: &H, _node: &StackNode) -> TraverseResult<()> {
        Ok(())
    }

    /// Postorder visit, after the whole subtree of `node` was processed.
    fn handle_processed_node(&mut self, host: &H, node: &StackNode, root: ObjectRef) -> TraverseResult<()>;

    /// Decides whether an unvisited child is pushed. Primitive wrappers,
    /// threads, class objects and class loaders were already filtered out.
    fn should_add_object_to_stack(
        &mut self,
        _host: &H,
        _parent: &StackNode,
        _child_tag: ObjectTag,
        _child: ObjectRef,
        _label: &str,
    ) -> bool {
        true
    }

    /// Releases pass state. Runs exactly once per [`DepthFirstSearchTraverse::start`].
    fn cleanup(&mut self) {}
}

/// Limits of one walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraverseLimits {
    /// Nodes at this depth are leaves. Capped at the largest depth a tag
    /// can hold.
    pub max_depth: u32,
    /// Largest allowed stack length
    pub max_stack_size: usize,
}

/// Counters collected while walking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraverseCounters {
    /// Largest stack length observed
    pub peak_stack_size: usize,
    /// Field reads that failed
    pub unsuccessful_field_accesses: usize,
}

/// The generic walk.
pub struct DepthFirstSearchTraverse<'a, H: HeapHost + ?Sized> {
    host: &'a H,
    child_processor: &'a HeapTraverseChildProcessor,
    field_cache: &'a mut FieldCache,
    cancellation: &'a CancellationToken,
    iteration: IterationId,
    limits: TraverseLimits,
    stack: Vec<StackNode>,
    children: Vec<ChildReference>,
    counters: TraverseCounters,
}

impl<'a, H: HeapHost + ?Sized> DepthFirstSearchTraverse<'a, H> {
    /// Prepares a walk over `host` for session `iteration`.
    ///
    /// A `max_depth` beyond [`MAX_ENCODABLE_DEPTH`] is lowered to it, so
    /// every visited object keeps its exact depth in the tag.
    pub fn new(
        host: &'a H,
        child_processor: &'a HeapTraverseChildProcessor,
        field_cache: &'a mut FieldCache,
        cancellation: &'a CancellationToken,
        iteration: IterationId,
        limits: TraverseLimits,
    ) -> Self {
        if limits.max_depth > MAX_ENCODABLE_DEPTH {
            tracing::warn!(
                requested = limits.max_depth,
                max = MAX_ENCODABLE_DEPTH,
                "max depth lowered to the largest encodable depth"
            );
        }
        let limits = TraverseLimits {
            max_depth: limits.max_depth.min(MAX_ENCODABLE_DEPTH),
            ..limits
        };
        Self {
            host,
            child_processor,
            field_cache,
            cancellation,
            iteration,
            limits,
            stack: Vec::new(),
            children: Vec::new(),
            counters: TraverseCounters::default(),
        }
    }

    /// Walks the subgraphs of `roots` in order.
    ///
    /// The stack and the strategy are cleaned up exactly once, whether the
    /// walk succeeds or fails.
    pub fn start<S: TraverseStrategy<H>>(&mut self, roots: &[ObjectRef], strategy: &mut S) -> TraverseResult<()> {
        let result = roots
            .iter()
            .try_for_each(|root| self.traverse_from_root(*root, strategy));
        self.cleanup(strategy);
        result
    }

    fn cleanup<S: TraverseStrategy<H>>(&mut self, strategy: &mut S) {
        self.stack.clear();
        self.children.clear();
        strategy.cleanup();
    }

    /// Counters of the walk so far.
    pub fn counters(&self) -> TraverseCounters {
        self.counters
    }

    /// Current stack length.
    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    fn traverse_from_root<S: TraverseStrategy<H>>(&mut self, root: ObjectRef, strategy: &mut S) -> TraverseResult<()> {
        if !self.host.is_alive(root) {
            return Ok(());
        }
        let tag = ObjectTag::from_raw(self.host.tag(root));
        if tag.was_visited(self.iteration) {
            return Ok(());
        }
        let tag = tag.mark_visited(self.iteration, ROOT_DEPTH);
        self.host.set_tag(root, tag.raw());
        self.push(
            StackNode {
                object: root,
                depth: ROOT_DEPTH,
                tag,
                label: ROOT_LABEL.into(),
                references_processed: false,
            },
            strategy,
        );

        loop {
            self.cancellation.check()?;
            let stack_size = self.stack.len();
            if stack_size == 0 {
                break;
            }
            if stack_size > self.limits.max_stack_size {
                return Err(HeapSnapshotTraverseError::objects_map_is_too_big());
            }
            let Some(top) = self.stack.last_mut() else {
                break;
            };
            if top.references_processed {
                if let Some(node) = self.stack.pop() {
                    strategy.handle_processed_node(self.host, &node, root)?;
                }
                continue;
            }
            top.references_processed = true;
            let node = top.clone();
            strategy.handle_node(self.host, &node)?;
            self.add_strongly_referenced_children(&node, strategy);
        }
        Ok(())
    }

    fn add_strongly_referenced_children<S: TraverseStrategy<H>>(&mut self, parent: &StackNode, strategy: &mut S) {
        if parent.depth >= self.limits.max_depth || !self.host.is_alive(parent.object) {
            return;
        }
        let mut children = std::mem::take(&mut self.children);
        self.counters.unsuccessful_field_accesses +=
            self.child_processor
                .process_child_objects(self.host, parent.object, self.field_cache, &mut children);
        for child in children.drain(..) {
            self.add_to_stack(parent, child, strategy);
        }
        self.children = children;
    }

    fn add_to_stack<S: TraverseStrategy<H>>(&mut self, parent: &StackNode, child: ChildReference, strategy: &mut S) {
        let depth = parent.depth + 1;
        if depth > self.limits.max_depth {
            return;
        }
        if !self.is_traversable(child.object) {
            return;
        }
        let tag = ObjectTag::from_raw(self.host.tag(child.object));
        if tag.was_visited(self.iteration) {
            return;
        }
        if !strategy.should_add_object_to_stack(self.host, parent, tag, child.object, &child.label) {
            return;
        }
        let tag = tag.mark_visited(self.iteration, depth);
        self.host.set_tag(child.object, tag.raw());
        self.push(
            StackNode {
                object: child.object,
                depth,
                tag,
                label: child.label,
                references_processed: false,
            },
            strategy,
        );
    }

    /// Primitive wrappers, threads, class objects and class loaders are
    /// never entered from another object.
    fn is_traversable(&self, obj: ObjectRef) -> bool {
        if self.host.mirrored_class(obj).is_some() {
            return false;
        }
        match self.host.class_info_of(obj) {
            Some(info) => !(info.flags.primitive_wrapper || info.flags.thread || info.flags.class_loader),
            None => false,
        }
    }

    fn push<S: TraverseStrategy<H>>(&mut self, node: StackNode, strategy: &mut S) {
        strategy.on_push(self.host, &node);
        self.stack.push(node);
        self.counters.peak_stack_size = self.counters.peak_stack_size.max(self.stack.len());
    }
}
