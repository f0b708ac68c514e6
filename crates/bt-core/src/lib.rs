//! Deterministic primitives shared by the behavior-tree engine.
//!
//! Everything here is engine-agnostic: priority ordering of tree nodes, the
//! per-tick context handed to nodes, a small deterministic RNG, the host world
//! traits and the typed blackboard.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod blackboard;
pub mod error;
pub mod index;
pub mod rng;
pub mod tick;
pub mod world;

pub use blackboard::{
    BbKey, Blackboard, BlackboardDef, BlackboardDefBuilder, BlackboardValue, EntityId, KeyDef,
    KeyId, ObserverHandle, ObserverResult, Value, ValueType,
};
pub use error::BlackboardError;
pub use index::NodeIndex;
pub use rng::{DeterministicRng, SplitMix64};
pub use tick::TickContext;
pub use world::{AgentId, WorldMut, WorldView};
