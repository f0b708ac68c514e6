#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// Outcome of a task, of a composite branch or of a whole tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum NodeResult {
    Succeeded,
    Failed,
    /// Finished because something else took over. A request continuing with
    /// this result means "switch to a higher priority branch".
    Aborted,
    InProgress,
}

impl NodeResult {
    pub fn is_finished(self) -> bool {
        !matches!(self, NodeResult::InProgress)
    }

    pub(crate) fn trace_code(self) -> u64 {
        match self {
            NodeResult::Succeeded => 0,
            NodeResult::Failed => 1,
            NodeResult::Aborted => 2,
            NodeResult::InProgress => 3,
        }
    }
}

impl core::fmt::Display for NodeResult {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            NodeResult::Succeeded => "succeeded",
            NodeResult::Failed => "failed",
            NodeResult::Aborted => "aborted",
            NodeResult::InProgress => "in_progress",
        };
        f.write_str(name)
    }
}
