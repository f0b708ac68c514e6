#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Declared type of a blackboard key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Text,
    Vector,
    Entity,
}

/// Reference to a host entity stored on the blackboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EntityId(pub u64);

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Value {
    Bool(bool),
    Int(i32),
    Float(f32),
    Text(String),
    Vector([f32; 3]),
    Entity(Option<EntityId>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::Text(_) => ValueType::Text,
            Value::Vector(_) => ValueType::Vector,
            Value::Entity(_) => ValueType::Entity,
        }
    }

    /// Value a freshly created component holds for a key of this type.
    pub fn default_for(value_type: ValueType) -> Value {
        match value_type {
            ValueType::Bool => Value::Bool(false),
            ValueType::Int => Value::Int(0),
            ValueType::Float => Value::Float(0.0),
            ValueType::Text => Value::Text(String::new()),
            ValueType::Vector => Value::Vector([0.0; 3]),
            ValueType::Entity => Value::Entity(None),
        }
    }

    /// "Is set" in the blackboard sense: differs from the type's default.
    pub fn is_set(&self) -> bool {
        *self != Value::default_for(self.value_type())
    }
}

/// Rust types that map one-to-one onto a [`ValueType`].
pub trait BlackboardValue: Clone + PartialEq + 'static {
    const VALUE_TYPE: ValueType;

    fn into_value(self) -> Value;

    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! blackboard_value {
    ($ty:ty, $variant:ident) => {
        impl BlackboardValue for $ty {
            const VALUE_TYPE: ValueType = ValueType::$variant;

            fn into_value(self) -> Value {
                Value::$variant(self)
            }

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(inner) => Some(inner.clone()),
                    _ => None,
                }
            }
        }
    };
}

blackboard_value!(bool, Bool);
blackboard_value!(i32, Int);
blackboard_value!(f32, Float);
blackboard_value!(String, Text);
blackboard_value!([f32; 3], Vector);
blackboard_value!(Option<EntityId>, Entity);
