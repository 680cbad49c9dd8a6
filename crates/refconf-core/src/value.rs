//! Document value types
//!
//! Represents a parsed JSON-like document. Values can be scalars (string,
//! int, float, bool, null), sequences (arrays), or mappings (objects).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Key marking a reference node
pub const REF_KEY: &str = "$ref";
/// Key holding the fallback of a reference node
pub const DEFAULT_KEY: &str = "$default";

/// A document value, possibly containing `$ref` nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
#[derive(Default)]
pub enum Value {
    /// Null value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Sequence of values
    Sequence(Vec<Value>),
    /// Mapping of string keys to values
    Mapping(IndexMap<String, Value>),
}

impl Value {
    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is a mapping
    pub fn is_mapping(&self) -> bool {
        matches!(self, Value::Mapping(_))
    }

    /// Check if this mapping carries a `$ref` key
    pub fn is_reference(&self) -> bool {
        matches!(self, Value::Mapping(m) if m.contains_key(REF_KEY))
    }

    /// Get as boolean if this is a Bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64 if this is an Integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64 if this is a Float or Integer
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Get as str if this is a String
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as mapping if this is a Mapping
    pub fn as_mapping(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Mapping(m) => Some(m),
            _ => None,
        }
    }

    /// Empty mapping, sequence or string, or null
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Sequence(s) => s.is_empty(),
            Value::Mapping(m) => m.is_empty(),
            _ => false,
        }
    }

    /// Get a value by path (e.g., "database.host", "servers[0].name" or "servers.0.name")
    pub fn get_path(&self, path: &str) -> Result<&Value> {
        self.lookup(path)?
            .ok_or_else(|| Error::ref_not_found(path))
    }

    /// Like `get_path`, but a missing path is `Ok(None)` and only a malformed
    /// path is an error
    pub fn lookup(&self, path: &str) -> Result<Option<&Value>> {
        let segments = parse_path(path)?;
        let mut current = self;
        for segment in &segments {
            match current.child(segment) {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Mutable access to the value at `path`, `None` when missing or malformed
    pub fn get_path_mut(&mut self, path: &str) -> Option<&mut Value> {
        let segments = parse_path(path).ok()?;
        let mut current = self;
        for segment in &segments {
            current = match (segment, current) {
                (PathSegment::Key(key), Value::Mapping(map)) => map.get_mut(key.as_str())?,
                (PathSegment::Key(key), Value::Sequence(seq)) => {
                    seq.get_mut(key.parse::<usize>().ok()?)?
                }
                (PathSegment::Index(idx), Value::Sequence(seq)) => seq.get_mut(*idx)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub(crate) fn child(&self, segment: &PathSegment) -> Option<&Value> {
        match (segment, self) {
            (PathSegment::Key(key), Value::Mapping(map)) => map.get(key.as_str()),
            (PathSegment::Key(key), Value::Sequence(seq)) => {
                key.parse::<usize>().ok().and_then(|i| seq.get(i))
            }
            (PathSegment::Index(idx), Value::Sequence(seq)) => seq.get(*idx),
            _ => None,
        }
    }

    /// Set a value at a path, creating intermediate mappings as needed
    pub fn set_path(&mut self, path: &str, value: Value) -> Result<()> {
        let segments = parse_path(path)?;
        let Some((last, parents)) = segments.split_last() else {
            *self = value;
            return Ok(());
        };

        let mut current = self;
        for segment in parents {
            current = match segment {
                PathSegment::Key(key) => {
                    if !current.is_mapping() {
                        *current = Value::Mapping(IndexMap::new());
                    }
                    match current {
                        Value::Mapping(map) => map
                            .entry(key.clone())
                            .or_insert_with(|| Value::Mapping(IndexMap::new())),
                        _ => return Err(Error::internal("mapping expected after conversion")),
                    }
                }
                PathSegment::Index(idx) => match current {
                    Value::Sequence(seq) if *idx < seq.len() => &mut seq[*idx],
                    _ => return Err(Error::ref_not_found(path)),
                },
            };
        }

        match (last, current) {
            (PathSegment::Key(key), Value::Mapping(map)) => {
                map.insert(key.clone(), value);
                Ok(())
            }
            (PathSegment::Key(key), current) => {
                let mut map = IndexMap::new();
                map.insert(key.clone(), value);
                *current = Value::Mapping(map);
                Ok(())
            }
            (PathSegment::Index(idx), Value::Sequence(seq)) if *idx < seq.len() => {
                seq[*idx] = value;
                Ok(())
            }
            _ => Err(Error::ref_not_found(path)),
        }
    }

    /// Returns the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Sequence(_) => "sequence",
            Value::Mapping(_) => "mapping",
        }
    }

    /// Merge another value into this one, `other` winning on conflicts
    ///
    /// - Mappings: deep merge recursively
    /// - Scalars and sequences: `other` replaces
    /// - Null in `other` removes the key
    pub fn merge(&mut self, other: Value) {
        match (self, other) {
            (Value::Mapping(base), Value::Mapping(overlay)) => {
                for (key, overlay_value) in overlay {
                    if overlay_value.is_null() {
                        base.shift_remove(&key);
                    } else if let Some(base_value) = base.get_mut(&key) {
                        base_value.merge(overlay_value);
                    } else {
                        base.insert(key, overlay_value);
                    }
                }
            }
            (this, other) => {
                *this = other;
            }
        }
    }

    /// Fill gaps in this value from `other`, keeping what is already set
    ///
    /// Only mappings are combined: keys missing here are copied from `other`,
    /// keys present in both are filled recursively. A non-mapping on either
    /// side leaves `self` untouched, unless `self` is null.
    pub fn set_default(&mut self, other: Value) {
        match (self, other) {
            (Value::Mapping(base), Value::Mapping(defaults)) => {
                for (key, default_value) in defaults {
                    match base.get_mut(&key) {
                        Some(existing) if !existing.is_null() => existing.set_default(default_value),
                        Some(existing) => *existing = default_value,
                        None => {
                            base.insert(key, default_value);
                        }
                    }
                }
            }
            (this @ Value::Null, other) => *this = other,
            _ => {}
        }
    }

    /// Compact JSON text of this value
    pub fn to_json(&self) -> String {
        // Value only holds JSON-representable data
        serde_json::to_string(self).unwrap_or_else(|_| "null".to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Sequence(seq) => {
                write!(f, "[")?;
                for (i, v) in seq.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Mapping(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Sequence(v.into_iter().map(Into::into).collect())
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(m: IndexMap<String, Value>) -> Self {
        Value::Mapping(m)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::Sequence(a.into_iter().map(Into::into).collect()),
            serde_json::Value::Object(o) => {
                Value::Mapping(o.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// A segment in a path expression
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PathSegment {
    /// A key in a mapping (e.g., "database" in "database.host")
    Key(String),
    /// An index in a sequence (e.g., 0 in "servers[0]")
    Index(usize),
}

/// Parse a path string into segments
/// Supports: "key", "key.subkey", "key[0]", "key[0].subkey"
pub(crate) fn parse_path(path: &str) -> Result<Vec<PathSegment>> {
    let mut segments = Vec::new();
    let mut current_key = String::new();
    let mut chars = path.chars();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !current_key.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut current_key)));
                }
            }
            '[' => {
                if !current_key.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut current_key)));
                }
                let index_str: String = chars.by_ref().take_while(|&c| c != ']').collect();
                let idx: usize = index_str.parse().map_err(|_| {
                    Error::parse(format!("Invalid array index in path: {}", index_str))
                })?;
                segments.push(PathSegment::Index(idx));
            }
            ']' => {
                return Err(Error::parse("Unexpected ']' in path"));
            }
            _ => {
                current_key.push(c);
            }
        }
    }

    if !current_key.is_empty() {
        segments.push(PathSegment::Key(current_key));
    }

    Ok(segments)
}
