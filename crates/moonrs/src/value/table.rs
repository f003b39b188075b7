use ahash::RandomState;
use std::collections::HashMap;

use crate::gc::{ClosureId, GcId, StringId, TableId};
use crate::value::Value;

/// Hashable key form of a [`Value`]. Numbers hash by bit pattern; nil is
/// not a valid key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TableKey {
    Bool(bool),
    Number(u64),
    String(StringId),
    Table(TableId),
    Closure(ClosureId),
}

impl TableKey {
    fn from_value(value: Value) -> Option<TableKey> {
        match value {
            Value::Nil => None,
            Value::Bool(b) => Some(TableKey::Bool(b)),
            Value::Number(n) => Some(TableKey::Number(n.to_bits())),
            Value::String(id) => Some(TableKey::String(id)),
            Value::Table(id) => Some(TableKey::Table(id)),
            Value::Closure(id) => Some(TableKey::Closure(id)),
        }
    }

    fn to_value(self) -> Value {
        match self {
            TableKey::Bool(b) => Value::Bool(b),
            TableKey::Number(bits) => Value::Number(f64::from_bits(bits)),
            TableKey::String(id) => Value::String(id),
            TableKey::Table(id) => Value::Table(id),
            TableKey::Closure(id) => Value::Closure(id),
        }
    }
}

/// Associative container with an array part for dense 1-based integer keys
/// and a hash part for everything else.
pub struct Table {
    array: Vec<Value>,
    hash: HashMap<TableKey, Value, RandomState>,
}

impl Table {
    pub fn new() -> Self {
        Table {
            array: Vec::new(),
            hash: HashMap::with_hasher(RandomState::new()),
        }
    }

    /// Index of `key` in the array part, if it is a usable integer key.
    fn array_index(&self, key: &Value) -> Option<usize> {
        let n = key.as_number()?;
        if n.fract() != 0.0 || n < 1.0 {
            return None;
        }
        let i = n as usize;
        // Only keys inside or directly extending the array part.
        if i <= self.array.len() + 1 {
            Some(i - 1)
        } else {
            None
        }
    }

    pub fn get(&self, key: &Value) -> Value {
        if let Some(i) = self.array_index(key) {
            return self.array.get(i).copied().unwrap_or(Value::Nil);
        }
        match TableKey::from_value(*key) {
            Some(k) => self.hash.get(&k).copied().unwrap_or(Value::Nil),
            None => Value::Nil,
        }
    }

    /// Raw store. Callers outside the GC must go through the barriered
    /// setter on the collector instead.
    pub fn set(&mut self, key: Value, value: Value) {
        if let Some(i) = self.array_index(&key) {
            if i < self.array.len() {
                self.array[i] = value;
            } else {
                self.array.push(value);
            }
            return;
        }
        if let Some(k) = TableKey::from_value(key) {
            if value.is_nil() {
                self.hash.remove(&k);
            } else {
                self.hash.insert(k, value);
            }
        }
    }

    /// Number of entries in the array part.
    pub fn array_len(&self) -> usize {
        self.array.len()
    }

    /// Every GC reference held by this table, for the mark phase.
    pub fn referenced_ids(&self) -> Vec<GcId> {
        let mut ids = Vec::new();
        for v in &self.array {
            if let Some(id) = v.as_gc_id() {
                ids.push(id);
            }
        }
        for (k, v) in &self.hash {
            if let Some(id) = k.to_value().as_gc_id() {
                ids.push(id);
            }
            if let Some(id) = v.as_gc_id() {
                ids.push(id);
            }
        }
        ids
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}
