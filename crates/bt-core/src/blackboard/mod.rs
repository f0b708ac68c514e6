//! Typed key/value store shared between tree nodes and the owning entity.
//!
//! A [`BlackboardDef`] is the read-only asset: an ordered list of
//! `(name, type)` pairs, optionally extending a parent definition. A
//! [`Blackboard`] is the per-entity component holding the current values and
//! the change observers. Keys are resolved from names once, at setup time,
//! and addressed by their small integer [`KeyId`] afterwards.

mod component;
mod def;
mod value;

pub use component::{Blackboard, ObserverHandle, ObserverResult};
pub use def::{BbKey, BlackboardDef, BlackboardDefBuilder, KeyDef, KeyId};
pub use value::{BlackboardValue, EntityId, Value, ValueType};
