#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Position of a node inside the running instance stack.
///
/// `instance_index` selects the pushed tree instance (0 = root tree) and
/// `execution_index` is the depth-first ordinal assigned when the tree
/// definition was built. Comparing two indices gives the priority order used
/// by every search: a lower instance always wins, and inside one instance the
/// lower execution index wins.
///
/// The derived `Ord` compares `instance_index` first, so `a < b` is exactly
/// [`NodeIndex::takes_priority_over`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NodeIndex {
    pub instance_index: u16,
    pub execution_index: u16,
}

impl NodeIndex {
    pub const fn new(instance_index: u16, execution_index: u16) -> Self {
        Self {
            instance_index,
            execution_index,
        }
    }

    /// Root node of the root instance, the highest priority position.
    pub const ROOT: NodeIndex = NodeIndex::new(0, 0);

    #[inline]
    pub fn takes_priority_over(self, other: NodeIndex) -> bool {
        if self.instance_index != other.instance_index {
            return self.instance_index < other.instance_index;
        }
        self.execution_index < other.execution_index
    }

    /// Same node one step earlier in execution order, or `None` at index 0.
    pub fn previous(self) -> Option<NodeIndex> {
        let execution_index = self.execution_index.checked_sub(1)?;
        Some(NodeIndex::new(self.instance_index, execution_index))
    }
}

impl core::fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.instance_index, self.execution_index)
    }
}
