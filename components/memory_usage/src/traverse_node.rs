//! Per-object ownership state of the statistics pass.

/// Iterates over the indices of the set bits of `mask`, lowest first.
///
/// # Examples
///
/// ```
/// use memory_usage::mask_bits;
///
/// assert_eq!(mask_bits(0b10110).collect::<Vec<_>>(), vec![1, 2, 4]);
/// assert_eq!(mask_bits(0).count(), 0);
/// ```
pub fn mask_bits(mask: u64) -> impl Iterator<Item = usize> {
    let mut rest = mask;
    std::iter::from_fn(move || {
        if rest == 0 {
            return None;
        }
        let index = rest.trailing_zeros() as usize;
        rest &= rest - 1;
        Some(index)
    })
}

/// Bit of entry `index` in a component or category mask.
pub fn mask_bit(index: usize) -> u64 {
    if index < 64 {
        1 << index
    } else {
        0
    }
}

/// What a processed object hands down to each child it references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentContribution {
    /// Owned component mask of the parent
    pub owned_mask: u64,
    /// Components that exclusively retain the parent, including its own component
    pub retained_mask: u64,
    /// Categories that exclusively retain the parent, including its own category
    pub retained_category_mask: u64,
    /// The parent is a platform object or is only retained by platform objects
    pub retains_for_platform: bool,
}

/// Accumulated ownership of one object, merged from every processed parent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeapTraverseNode {
    owned_mask: u64,
    retained_mask: Option<u64>,
    retained_category_mask: Option<u64>,
    first_parent_mask: Option<u64>,
    parents_differ: bool,
    retained_by_platform: Option<bool>,
    is_root: bool,
}

impl HeapTraverseNode {
    /// Node of a heap root. Roots own nothing they did not resolve themselves.
    pub fn root() -> Self {
        Self {
            is_root: true,
            ..Self::default()
        }
    }

    /// Returns true for heap roots.
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Merges the contribution of one parent.
    pub fn merge_parent(&mut self, parent: &ParentContribution) {
        self.owned_mask |= parent.owned_mask;
        self.retained_mask = Some(
            self.retained_mask
                .map_or(parent.retained_mask, |mask| mask & parent.retained_mask),
        );
        self.retained_category_mask = Some(
            self.retained_category_mask
                .map_or(parent.retained_category_mask, |mask| mask & parent.retained_category_mask),
        );
        match self.first_parent_mask {
            None => self.first_parent_mask = Some(parent.owned_mask),
            Some(first) if first != parent.owned_mask => self.parents_differ = true,
            Some(_) => {}
        }
        self.retained_by_platform =
            Some(self.retained_by_platform.unwrap_or(true) && parent.retains_for_platform);
    }

    /// Union of the parents' owned masks.
    pub fn inherited_owned_mask(&self) -> u64 {
        self.owned_mask
    }

    /// Intersection of the parents' retained masks, 0 without parents.
    pub fn inherited_retained_mask(&self) -> u64 {
        self.retained_mask.unwrap_or(0)
    }

    /// Intersection of the parents' retained category masks, 0 without parents.
    pub fn inherited_retained_category_mask(&self) -> u64 {
        self.retained_category_mask.unwrap_or(0)
    }

    /// Every parent is a platform object or retained by one. False for roots
    /// and objects without parents.
    pub fn is_retained_by_platform(&self) -> bool {
        !self.is_root && self.retained_by_platform.unwrap_or(false)
    }

    /// Returns true if some parent's owned mask differs from `mask`.
    pub fn has_parent_with_other_mask(&self, mask: u64) -> bool {
        self.parents_differ || self.first_parent_mask.is_some_and(|first| first != mask)
    }

    /// Shared ownership starts here: several owners whose parents disagreed.
    pub fn is_merge_point(&self, owned_mask: u64) -> bool {
        owned_mask.count_ones() > 1 && self.has_parent_with_other_mask(owned_mask)
    }
}
