//! Bit layout of the 64-bit per-object tag.
//!
//! ```text
//!  63                               33 32     27 26 25             9 8       1 0
//! +-----------------------------------+---------+--+----------------+---------+-+
//! |        postorder object id        | cluster |E |     depth      |iteration|V|
//! +-----------------------------------+---------+--+----------------+---------+-+
//! ```
//!
//! - `V`: visited in the current pass
//! - `iteration`: session that wrote the tag, 0 means never tagged
//! - `depth`: distance from the root the object was first reached from, 0 is invalid
//! - `E`: the object is owned by a cluster that exceeded its threshold
//! - `cluster`: index of that exceeded cluster
//! - `object id`: postorder number assigned by the enumeration pass, 0 is unassigned
//!
//! Every query takes the current iteration id and answers as if the tag were
//! empty when it was written by a different session. That way tags never need
//! a full sweep between sessions.

use std::fmt;

const VISITED_MASK: u64 = 1;

const ITERATION_SHIFT: u32 = 1;
const ITERATION_BITS: u32 = 8;

const DEPTH_SHIFT: u32 = ITERATION_SHIFT + ITERATION_BITS;
const DEPTH_BITS: u32 = 17;

const EXCEEDED_FLAG_SHIFT: u32 = DEPTH_SHIFT + DEPTH_BITS;

const EXCEEDED_CLUSTER_SHIFT: u32 = EXCEEDED_FLAG_SHIFT + 1;
const EXCEEDED_CLUSTER_BITS: u32 = 6;

const OBJECT_ID_SHIFT: u32 = EXCEEDED_CLUSTER_SHIFT + EXCEEDED_CLUSTER_BITS;
const OBJECT_ID_BITS: u32 = 64 - OBJECT_ID_SHIFT;

const fn field_mask(shift: u32, bits: u32) -> u64 {
    ((1u64 << bits) - 1) << shift
}

const ITERATION_MASK: u64 = field_mask(ITERATION_SHIFT, ITERATION_BITS);
const DEPTH_MASK: u64 = field_mask(DEPTH_SHIFT, DEPTH_BITS);
const EXCEEDED_FLAG_MASK: u64 = 1 << EXCEEDED_FLAG_SHIFT;
const EXCEEDED_CLUSTER_MASK: u64 = field_mask(EXCEEDED_CLUSTER_SHIFT, EXCEEDED_CLUSTER_BITS);
const OBJECT_ID_MASK: u64 = field_mask(OBJECT_ID_SHIFT, OBJECT_ID_BITS);

/// Largest depth the tag can hold.
pub const MAX_ENCODABLE_DEPTH: u32 = (1 << DEPTH_BITS) - 1;
/// Default traversal depth cap.
pub const MAX_DEPTH: u32 = 100_000;
/// Depth value meaning "not reached in this session".
pub const INVALID_OBJECT_DEPTH: u32 = 0;
/// Depth assigned to roots.
pub const ROOT_DEPTH: u32 = 1;
/// Largest postorder id the tag can hold.
pub const MAX_OBJECT_ID: u32 = ((1u64 << OBJECT_ID_BITS) - 1) as u32;
/// Number of distinct exceeded cluster indices.
pub const MAX_EXCEEDED_CLUSTERS: usize = 1 << EXCEEDED_CLUSTER_BITS;

/// Identifier of a traversal session. Never 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IterationId(u8);

impl IterationId {
    /// The first session id.
    pub const FIRST: IterationId = IterationId(1);

    /// Creates an id, mapping 0 to [`IterationId::FIRST`].
    pub fn new(raw: u8) -> Self {
        if raw == 0 {
            Self::FIRST
        } else {
            Self(raw)
        }
    }

    /// Raw 8-bit value.
    pub fn get(self) -> u8 {
        self.0
    }

    /// The id of the following session, wrapping around and skipping 0.
    ///
    /// # Examples
    ///
    /// ```
    /// use memory_usage::IterationId;
    ///
    /// assert_eq!(IterationId::new(7).next().get(), 8);
    /// assert_eq!(IterationId::new(255).next().get(), 1);
    /// ```
    pub fn next(self) -> Self {
        Self::new(self.0.wrapping_add(1))
    }
}

impl Default for IterationId {
    fn default() -> Self {
        Self::FIRST
    }
}

impl fmt::Display for IterationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Packed per-object tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ObjectTag(u64);

impl ObjectTag {
    /// The empty tag.
    pub const EMPTY: ObjectTag = ObjectTag(0);

    /// Wraps a raw tag read from the host.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value to store in the host.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Session id stored in the tag, 0 if never tagged.
    pub fn iteration(self) -> u8 {
        ((self.0 & ITERATION_MASK) >> ITERATION_SHIFT) as u8
    }

    /// Returns true if the tag was written during `iteration`.
    pub fn belongs_to(self, iteration: IterationId) -> bool {
        self.iteration() == iteration.get()
    }

    /// Returns true if the object was visited in the current pass of `iteration`.
    pub fn was_visited(self, iteration: IterationId) -> bool {
        self.belongs_to(iteration) && self.0 & VISITED_MASK != 0
    }

    /// Marks the tag visited.
    ///
    /// A tag from an older session is replaced by a fresh one carrying `depth`.
    /// A tag from the current session keeps its fields; its depth is only
    /// filled in if it was still invalid.
    ///
    /// # Examples
    ///
    /// ```
    /// use memory_usage::{IterationId, ObjectTag};
    ///
    /// let iteration = IterationId::new(3);
    /// let tag = ObjectTag::EMPTY.mark_visited(iteration, 5);
    /// assert!(tag.was_visited(iteration));
    /// assert_eq!(tag.depth(iteration), 5);
    /// assert!(!tag.was_visited(iteration.next()));
    /// ```
    pub fn mark_visited(self, iteration: IterationId, depth: u32) -> Self {
        let depth = u64::from(depth.min(MAX_ENCODABLE_DEPTH)) << DEPTH_SHIFT;
        if !self.belongs_to(iteration) {
            return Self(VISITED_MASK | (u64::from(iteration.get()) << ITERATION_SHIFT) | depth);
        }
        let mut raw = self.0 | VISITED_MASK;
        if raw & DEPTH_MASK == 0 {
            raw |= depth;
        }
        Self(raw)
    }

    /// Clears the visited bit, keeping every other field.
    pub fn with_visited_cleared(self) -> Self {
        Self(self.0 & !VISITED_MASK)
    }

    /// Depth recorded during `iteration`, or [`INVALID_OBJECT_DEPTH`].
    pub fn depth(self, iteration: IterationId) -> u32 {
        if !self.belongs_to(iteration) {
            return INVALID_OBJECT_DEPTH;
        }
        ((self.0 & DEPTH_MASK) >> DEPTH_SHIFT) as u32
    }

    /// Postorder id assigned during `iteration`, 0 if none.
    pub fn object_id(self, iteration: IterationId) -> u32 {
        if !self.belongs_to(iteration) {
            return 0;
        }
        ((self.0 & OBJECT_ID_MASK) >> OBJECT_ID_SHIFT) as u32
    }

    /// Stores a postorder id. Ids above [`MAX_OBJECT_ID`] are truncated; the
    /// enumeration pass refuses to assign them.
    pub fn with_object_id(self, id: u32) -> Self {
        let id = u64::from(id.min(MAX_OBJECT_ID)) << OBJECT_ID_SHIFT;
        Self((self.0 & !OBJECT_ID_MASK) | id)
    }

    /// Records (or clears) ownership by an exceeded cluster.
    pub fn with_exceeded_cluster(self, index: Option<usize>) -> Self {
        let raw = self.0 & !(EXCEEDED_FLAG_MASK | EXCEEDED_CLUSTER_MASK);
        match index {
            Some(index) if index < MAX_EXCEEDED_CLUSTERS => {
                Self(raw | EXCEEDED_FLAG_MASK | ((index as u64) << EXCEEDED_CLUSTER_SHIFT))
            }
            _ => Self(raw),
        }
    }

    /// Returns true if the object is owned by an exceeded cluster.
    pub fn is_owned_by_exceeded_cluster(self) -> bool {
        self.0 & EXCEEDED_FLAG_MASK != 0
    }

    /// Index of the owning exceeded cluster, if any.
    pub fn exceeded_cluster_index(self) -> Option<usize> {
        self.is_owned_by_exceeded_cluster()
            .then(|| ((self.0 & EXCEEDED_CLUSTER_MASK) >> EXCEEDED_CLUSTER_SHIFT) as usize)
    }
}
