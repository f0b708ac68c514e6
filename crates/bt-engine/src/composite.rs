//! Traversal policies of composite nodes.

use crate::node::CompositePolicy;
use crate::NodeResult;

/// Answer of a traversal policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStep {
    Child(usize),
    ReturnToParent,
}

impl CompositePolicy {
    /// Pick the child to try after `last_child` finished with `last_result`.
    ///
    /// `last_child == None` means the composite was just entered.
    pub fn next_child(
        self,
        last_child: Option<usize>,
        last_result: NodeResult,
        child_count: usize,
    ) -> ChildStep {
        let next = match last_child {
            None => 0,
            Some(last) => {
                let advance = match self {
                    CompositePolicy::Sequence => last_result == NodeResult::Succeeded,
                    CompositePolicy::Selector => last_result == NodeResult::Failed,
                };
                if !advance {
                    return ChildStep::ReturnToParent;
                }
                last + 1
            }
        };

        if next < child_count {
            ChildStep::Child(next)
        } else {
            ChildStep::ReturnToParent
        }
    }
}
