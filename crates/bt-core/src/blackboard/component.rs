use std::collections::BTreeMap;
use std::sync::Arc;

use super::def::{BbKey, BlackboardDef, KeyId};
use super::value::{BlackboardValue, Value};
use crate::BlackboardError;

/// Returned by an observer to stay registered or drop itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverResult {
    Keep,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverHandle(u32);

type ObserverFn = Box<dyn FnMut(KeyId, &Value) -> ObserverResult>;

struct Observer {
    handle: ObserverHandle,
    callback: ObserverFn,
}

/// Per-entity blackboard values plus change observers.
///
/// Writes are synchronous. Observers of a key run inline, inside the `set`
/// call, and only when the stored value actually changed.
pub struct Blackboard {
    def: Arc<BlackboardDef>,
    values: Vec<Value>,
    observers: BTreeMap<KeyId, Vec<Observer>>,
    next_handle: u32,
}

impl Blackboard {
    pub fn new(def: Arc<BlackboardDef>) -> Self {
        let values = def
            .keys()
            .map(|(_, key)| Value::default_for(key.value_type))
            .collect();
        Self {
            def,
            values,
            observers: BTreeMap::new(),
            next_handle: 0,
        }
    }

    /// Blackboard without keys, for trees that never touch one.
    pub fn empty() -> Self {
        Self::new(BlackboardDef::empty("empty"))
    }

    pub fn def(&self) -> &Arc<BlackboardDef> {
        &self.def
    }

    pub fn is_compatible_with(&self, other: &BlackboardDef) -> bool {
        self.def.is_compatible_with(other)
    }

    pub fn value(&self, id: KeyId) -> Result<&Value, BlackboardError> {
        self.values
            .get(id.index())
            .ok_or(BlackboardError::UnknownKey(id))
    }

    pub fn get<T: BlackboardValue>(&self, key: BbKey<T>) -> Result<T, BlackboardError> {
        let value = self.value(key.id())?;
        T::from_value(value).ok_or(BlackboardError::TypeMismatch {
            key: key.id(),
            expected: T::VALUE_TYPE,
            actual: value.value_type(),
        })
    }

    /// Typed write. Returns whether the stored value changed.
    pub fn set<T: BlackboardValue>(
        &mut self,
        key: BbKey<T>,
        value: T,
    ) -> Result<bool, BlackboardError> {
        self.set_value(key.id(), value.into_value())
    }

    /// Untyped write, checked against the key's declared type.
    pub fn set_value(&mut self, id: KeyId, value: Value) -> Result<bool, BlackboardError> {
        let declared = self
            .def
            .key_def(id)
            .ok_or(BlackboardError::UnknownKey(id))?
            .value_type;
        if value.value_type() != declared {
            return Err(BlackboardError::TypeMismatch {
                key: id,
                expected: declared,
                actual: value.value_type(),
            });
        }

        let slot = &mut self.values[id.index()];
        if *slot == value {
            return Ok(false);
        }
        *slot = value;

        tracing::trace!(key = %id, "blackboard value changed");
        self.notify(id);
        Ok(true)
    }

    /// Reset a key to its type's default value.
    pub fn clear(&mut self, id: KeyId) -> Result<bool, BlackboardError> {
        let declared = self
            .def
            .key_def(id)
            .ok_or(BlackboardError::UnknownKey(id))?
            .value_type;
        self.set_value(id, Value::default_for(declared))
    }

    pub fn observe(
        &mut self,
        id: KeyId,
        callback: impl FnMut(KeyId, &Value) -> ObserverResult + 'static,
    ) -> Result<ObserverHandle, BlackboardError> {
        if self.def.key_def(id).is_none() {
            return Err(BlackboardError::UnknownKey(id));
        }
        let handle = ObserverHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.observers.entry(id).or_default().push(Observer {
            handle,
            callback: Box::new(callback),
        });
        Ok(handle)
    }

    pub fn remove_observer(&mut self, handle: ObserverHandle) -> bool {
        let mut removed = false;
        for list in self.observers.values_mut() {
            let before = list.len();
            list.retain(|o| o.handle != handle);
            removed |= list.len() != before;
        }
        self.observers.retain(|_, list| !list.is_empty());
        removed
    }

    pub fn observer_count(&self, id: KeyId) -> usize {
        self.observers.get(&id).map(Vec::len).unwrap_or(0)
    }

    fn notify(&mut self, id: KeyId) {
        let Some(mut list) = self.observers.remove(&id) else {
            return;
        };
        let value = &self.values[id.index()];
        list.retain_mut(|observer| (observer.callback)(id, value) == ObserverResult::Keep);
        if !list.is_empty() {
            self.observers.insert(id, list);
        }
    }
}

impl core::fmt::Debug for Blackboard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Blackboard")
            .field("def", &self.def.name())
            .field("values", &self.values)
            .field("observed_keys", &self.observers.keys().collect::<Vec<_>>())
            .finish()
    }
}
