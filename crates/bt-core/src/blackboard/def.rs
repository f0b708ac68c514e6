use std::marker::PhantomData;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::value::{BlackboardValue, ValueType};
use crate::BlackboardError;

/// Runtime handle of a blackboard key: its position in the flattened key list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KeyId(pub u8);

impl KeyId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl core::fmt::Display for KeyId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Key id carrying the Rust type it was resolved for.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BbKey<T: 'static> {
    id: KeyId,
    _phantom: PhantomData<fn() -> T>,
}

impl<T: 'static> Copy for BbKey<T> {}

impl<T: 'static> Clone for BbKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: 'static> BbKey<T> {
    pub const fn new(id: KeyId) -> Self {
        Self {
            id,
            _phantom: PhantomData,
        }
    }

    pub fn id(self) -> KeyId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KeyDef {
    pub name: String,
    pub value_type: ValueType,
}

/// Read-only blackboard asset.
///
/// Keys inherited from the parent definition come first, so a child
/// definition is always prefix-compatible with its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlackboardDef {
    name: String,
    parent: Option<Arc<BlackboardDef>>,
    keys: Vec<KeyDef>,
}

impl BlackboardDef {
    /// Key ids are a `u8`.
    pub const MAX_KEYS: usize = u8::MAX as usize + 1;

    pub fn builder(name: impl Into<String>) -> BlackboardDefBuilder {
        BlackboardDefBuilder {
            name: name.into(),
            parent: None,
            keys: Vec::new(),
        }
    }

    /// Definition with no keys.
    pub fn empty(name: impl Into<String>) -> Arc<BlackboardDef> {
        Arc::new(BlackboardDef {
            name: name.into(),
            parent: None,
            keys: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Arc<BlackboardDef>> {
        self.parent.as_ref()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn key_def(&self, id: KeyId) -> Option<&KeyDef> {
        self.keys.get(id.index())
    }

    pub fn keys(&self) -> impl Iterator<Item = (KeyId, &KeyDef)> {
        self.keys
            .iter()
            .enumerate()
            .map(|(i, def)| (KeyId(i as u8), def))
    }

    pub fn find_key(&self, name: &str) -> Option<KeyId> {
        self.keys
            .iter()
            .position(|k| k.name == name)
            .map(|i| KeyId(i as u8))
    }

    /// Resolve a name to a typed key, checking the declared type.
    pub fn key<T: BlackboardValue>(&self, name: &str) -> Result<BbKey<T>, BlackboardError> {
        let id = self
            .find_key(name)
            .ok_or_else(|| BlackboardError::UnknownName(name.to_string()))?;
        let declared = self.keys[id.index()].value_type;
        if declared != T::VALUE_TYPE {
            return Err(BlackboardError::TypeMismatch {
                key: id,
                expected: T::VALUE_TYPE,
                actual: declared,
            });
        }
        Ok(BbKey::new(id))
    }

    /// Two definitions are compatible when their key sequences agree (same
    /// names, same types, same order) up to the length of the shorter one.
    pub fn is_compatible_with(&self, other: &BlackboardDef) -> bool {
        self.keys.iter().zip(other.keys.iter()).all(|(a, b)| a == b)
    }
}

pub struct BlackboardDefBuilder {
    name: String,
    parent: Option<Arc<BlackboardDef>>,
    keys: Vec<KeyDef>,
}

impl BlackboardDefBuilder {
    pub fn parent(mut self, parent: Arc<BlackboardDef>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn key(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.keys.push(KeyDef {
            name: name.into(),
            value_type,
        });
        self
    }

    pub fn build(self) -> Result<Arc<BlackboardDef>, BlackboardError> {
        let mut keys = self
            .parent
            .as_ref()
            .map(|p| p.keys.clone())
            .unwrap_or_default();

        for key in self.keys {
            if keys.iter().any(|k| k.name == key.name) {
                return Err(BlackboardError::DuplicateKey(key.name));
            }
            keys.push(key);
        }

        if keys.len() > BlackboardDef::MAX_KEYS {
            return Err(BlackboardError::TooManyKeys {
                max: BlackboardDef::MAX_KEYS,
            });
        }

        Ok(Arc::new(BlackboardDef {
            name: self.name,
            parent: self.parent,
            keys,
        }))
    }
}
