//! # Service properties.
//!
//! [`Properties`] is an insertion-ordered map with case-insensitive keys, holding
//! [`Value`]s. Registrations, filters and service events all read them.
//!
//! ## Rules
//! - Keys are compared ASCII case-insensitively; inserting `Service.Ranking` after
//!   `service.ranking` replaces the entry (and adopts the new spelling).
//! - Iteration order is insertion order.
//! - The registry owns the keys in [`constants`] marked as reserved.

use std::fmt;

/// Well-known property keys.
pub mod constants {
    /// Interface names a service is registered under (reserved).
    pub const OBJECTCLASS: &str = "objectClass";
    /// Registration id (reserved).
    pub const SERVICE_ID: &str = "service.id";
    /// Ranking used to order services; an `Int` in `i32` range, default 0.
    pub const SERVICE_RANKING: &str = "service.ranking";
    /// Persistent identifier of the service.
    pub const SERVICE_PID: &str = "service.pid";
    pub const SERVICE_VENDOR: &str = "service.vendor";
    pub const SERVICE_DESCRIPTION: &str = "service.description";
}

/// A property value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<Value>),
}

impl Value {
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

/// Insertion-ordered, case-insensitive property map.
///
/// # Example
/// ```
/// use bundlevisor::{Properties, Value};
///
/// let props = Properties::new()
///     .with("service.ranking", 5)
///     .with("Vendor", "acme");
///
/// assert_eq!(props.get("SERVICE.RANKING"), Some(&Value::Int(5)));
/// assert_eq!(props.keys().collect::<Vec<_>>(), vec!["service.ranking", "Vendor"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    entries: Vec<(String, Value)>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts or replaces a value; returns the previous value for that key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.position(&key) {
            Some(i) => {
                let slot = &mut self.entries[i];
                slot.0 = key;
                Some(std::mem::replace(&mut slot.1, value))
            }
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.position(key).map(|i| &self.entries[i].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.position(key).map(|i| self.entries.remove(i).1)
    }

    /// Keys in insertion order, with their stored spelling.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(key))
    }
}

impl<K, V> FromIterator<(K, V)> for Properties
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut props = Properties::new();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_case_insensitive_and_replace_in_place() {
        let mut props = Properties::new().with("a", 1).with("Color", "red").with("z", true);
        let old = props.insert("COLOR", "blue");

        assert_eq!(old, Some(Value::from("red")));
        assert_eq!(props.len(), 3);
        assert_eq!(props.keys().collect::<Vec<_>>(), vec!["a", "COLOR", "z"]);
        assert_eq!(props.get("color").and_then(Value::as_str), Some("blue"));
    }

    #[test]
    fn remove_and_contains() {
        let mut props: Properties = [("x", 1), ("y", 2)].into_iter().collect();
        assert!(props.contains_key("X"));
        assert_eq!(props.remove("x"), Some(Value::Int(1)));
        assert!(!props.contains_key("x"));
        assert!(props.remove("x").is_none());
    }

    #[test]
    fn list_display() {
        let v = Value::List(vec![Value::from("Echo"), Value::from("Log")]);
        assert_eq!(v.to_string(), "[Echo, Log]");
    }
}
