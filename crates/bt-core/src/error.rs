use thiserror::Error;

use crate::blackboard::{KeyId, ValueType};

/// Failures reported by blackboard definitions and components.
///
/// None of these panic: a type mismatch or an unknown key is returned to the
/// caller, which decides whether to treat it as a failed condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlackboardError {
    #[error("blackboard key id {0} is not defined")]
    UnknownKey(KeyId),

    #[error("blackboard key '{0}' is not defined")]
    UnknownName(String),

    #[error("blackboard key {key} holds {actual:?}, requested {expected:?}")]
    TypeMismatch {
        key: KeyId,
        expected: ValueType,
        actual: ValueType,
    },

    #[error("blackboard key '{0}' is declared twice")]
    DuplicateKey(String),

    #[error("blackboard definition exceeds {max} keys")]
    TooManyKeys { max: usize },
}
