//! Raw payload decoded from a spec file.
//!
//! This is the only place that knows about the on-disk format. Everything downstream works on
//! [`RawValue`], so the resolution code never sees `toml` types.

use toml::{map::Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    Str(String),
    List(Vec<RawValue>),
    /// Keys keep their declaration order.
    Map(Vec<(String, RawValue)>),
}

impl RawValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RawValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[RawValue]> {
        match self {
            RawValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&RawValue> {
        match self {
            RawValue::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn is_map(&self) -> bool {
        matches!(self, RawValue::Map(_))
    }

    /// Replaces the value under `key`, appending it when missing. No-op on non-map values.
    pub fn set(&mut self, key: &str, value: RawValue) {
        if let RawValue::Map(entries) = self {
            match entries.iter_mut().find(|(k, _)| k == key) {
                Some((_, existing)) => *existing = value,
                None => entries.push((key.to_string(), value)),
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<RawValue> {
        match self {
            RawValue::Map(entries) => entries
                .iter()
                .position(|(k, _)| k == key)
                .map(|index| entries.remove(index).1),
            _ => None,
        }
    }
}

impl From<Value> for RawValue {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => RawValue::Str(s),
            Value::Integer(i) => RawValue::Str(i.to_string()),
            Value::Float(f) => RawValue::Str(f.to_string()),
            Value::Boolean(b) => RawValue::Str(b.to_string()),
            Value::Datetime(d) => RawValue::Str(d.to_string()),
            Value::Array(items) => RawValue::List(items.into_iter().map(RawValue::from).collect()),
            Value::Table(table) => RawValue::Map(
                table
                    .into_iter()
                    .map(|(k, v)| (k, RawValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<RawValue> for Value {
    fn from(value: RawValue) -> Self {
        match value {
            RawValue::Str(s) => Value::String(s),
            RawValue::List(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            RawValue::Map(entries) => {
                let mut table = Map::new();
                for (k, v) in entries {
                    table.insert(k, Value::from(v));
                }
                Value::Table(table)
            }
        }
    }
}
