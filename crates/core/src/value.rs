//! Document value model on concurrent containers
//!
//! A document is a tree of `Value` nodes. Map nodes are sharded concurrent
//! maps and list nodes sit behind a read-writer lock, so readers resolve
//! paths without taking the document's mutation lock. Mutation goes through
//! the path machinery in [`crate::path`], serialized by the owning document.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::error::{Result, StoreError};

/// Largest integer stored as an integer: 15 decimal digits, the safe JSON
/// range. Wider integers are stored as floats.
pub const MAX_SAFE_INTEGER: i64 = 999_999_999_999_999;

/// A single node of the document tree.
///
/// `Null` doubles as the delete sentinel when used as a command value.
/// Container variants share structure on clone; use [`Value::deep_clone`]
/// when a value crosses the document boundary.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Arc<RwLock<Vec<Value>>>),
    Map(Arc<DashMap<String, Value>>),
}

impl Value {
    /// Create an integer value, demoting to float outside the safe range.
    pub fn int(v: i64) -> Self {
        if v > MAX_SAFE_INTEGER || v < -MAX_SAFE_INTEGER {
            Value::Float(v as f64)
        } else {
            Value::Int(v)
        }
    }

    /// Create an empty map node.
    pub fn new_map() -> Self {
        Value::Map(Arc::new(DashMap::new()))
    }

    /// Create an empty list node.
    pub fn new_list() -> Self {
        Value::List(Arc::new(RwLock::new(Vec::new())))
    }

    /// Short kind name for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }

    /// True for `Int` and `Float` (the operands the add operation accepts).
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The map container, if this is a map node.
    pub fn as_map(&self) -> Option<&Arc<DashMap<String, Value>>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// The list container, if this is a list node.
    pub fn as_list(&self) -> Option<&Arc<RwLock<Vec<Value>>>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Clone of the child at `key`, if this is a map node holding it.
    pub fn map_get(&self, key: &str) -> Option<Value> {
        self.as_map()?.get(key).map(|entry| entry.value().clone())
    }

    /// Clone of the child at `index`, if this is a list node holding it.
    pub fn list_get(&self, index: usize) -> Option<Value> {
        self.as_list()?.read().get(index).cloned()
    }

    /// Number of children (map entries or list elements); 0 for scalars.
    pub fn len(&self) -> usize {
        match self {
            Value::Map(m) => m.len(),
            Value::List(l) => l.read().len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Structurally independent copy: container nodes are rebuilt, scalars
    /// are copied. The result shares no `Arc` with `self`.
    pub fn deep_clone(&self) -> Value {
        match self {
            Value::List(list) => {
                let elems: Vec<Value> = list.read().iter().map(Value::deep_clone).collect();
                Value::List(Arc::new(RwLock::new(elems)))
            }
            Value::Map(map) => {
                let copy = DashMap::new();
                for entry in map.iter() {
                    copy.insert(entry.key().clone(), entry.value().deep_clone());
                }
                Value::Map(Arc::new(copy))
            }
            scalar => scalar.clone(),
        }
    }

    /// Build a value tree from parsed JSON. Total: every JSON value has a
    /// document representation. Integers outside the safe range demote to
    /// float, matching [`Value::int`].
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::int(i)
                } else {
                    // u64 beyond i64::MAX, or a float
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(elems) => {
                let list: Vec<Value> = elems.iter().map(Value::from_json).collect();
                Value::List(Arc::new(RwLock::new(list)))
            }
            serde_json::Value::Object(fields) => {
                let map = DashMap::new();
                for (k, v) in fields {
                    map.insert(k.clone(), Value::from_json(v));
                }
                Value::Map(Arc::new(map))
            }
        }
    }

    /// Convert to JSON. Fails on non-finite floats, which JSON cannot
    /// represent.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| {
                    StoreError::fatal(format!("non-finite float {f} is not serializable"))
                })?,
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::List(list) => {
                let elems = list.read().clone();
                let mut out = Vec::with_capacity(elems.len());
                for v in &elems {
                    out.push(v.to_json()?);
                }
                serde_json::Value::Array(out)
            }
            Value::Map(map) => {
                let mut out = serde_json::Map::new();
                for entry in map.iter() {
                    out.insert(entry.key().clone(), entry.value().to_json()?);
                }
                serde_json::Value::Object(out)
            }
        })
    }
}

impl PartialEq for Value {
    /// Structural equality. Int and Float never compare equal, preserving
    /// the integer/float distinction end to end.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.read().clone();
                let b = b.read().clone();
                a == b
            }
            (Value::Map(a), Value::Map(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                if a.len() != b.len() {
                    return false;
                }
                a.iter().all(|entry| {
                    b.get(entry.key())
                        .map(|other| *entry.value() == *other.value())
                        .unwrap_or(false)
                })
            }
            _ => false,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(&json)
    }
}

impl From<&serde_json::Value> for Value {
    fn from(json: &serde_json::Value) -> Self {
        Value::from_json(json)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
