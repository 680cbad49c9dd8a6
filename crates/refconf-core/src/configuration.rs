//! Case-insensitive dotted-path configuration store
//!
//! Keys are normalized into lowercase words before they are stored or looked
//! up, so `thisIsATest`, `this_is_a_test` and `THIS.IS.A.TEST` all name the
//! same entry `this.is.a.test`.

use indexmap::IndexMap;
use std::ops::{BitOr, BitOrAssign};

use crate::error::{Error, Result};
use crate::value::Value;

/// Configuration store over an expanded document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Configuration {
    root: IndexMap<String, Value>,
}

impl Configuration {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the leaves of `value`
    pub fn from_value(value: &Value) -> Self {
        let mut config = Self::new();
        config.merge(value);
        config
    }

    /// Merge leaves of `other` into the store; `other` wins on conflicts
    pub fn merge(&mut self, other: &Value) {
        for (path, value) in leaves(other) {
            self.set(&path, value);
        }
    }

    /// Merge leaves of `other` that are not already set
    pub fn prepend(&mut self, other: &Value) {
        for (path, value) in leaves(other) {
            if self.get(&path).is_none() {
                self.set(&path, value);
            }
        }
    }

    /// Merge string pairs, e.g. `std::env::vars()`
    pub fn merge_pairs<I, K, V>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (key, value) in pairs {
            self.set(key.as_ref(), value.into());
        }
    }

    /// Set a single entry
    pub fn set(&mut self, path: &str, value: Value) {
        let words = wordify(path);
        let Some((last, parents)) = words.split_last() else {
            return;
        };

        let mut current = &mut self.root;
        for word in parents {
            let slot = current
                .entry(word.clone())
                .or_insert_with(|| Value::Mapping(IndexMap::new()));
            if !slot.is_mapping() {
                *slot = Value::Mapping(IndexMap::new());
            }
            current = match slot {
                Value::Mapping(map) => map,
                _ => return,
            };
        }
        current.insert(last.clone(), value);
    }

    /// Get the value at a path, normalizing the path first
    pub fn get(&self, path: &str) -> Option<&Value> {
        let words = wordify(path);
        let Some((first, rest)) = words.split_first() else {
            return None;
        };
        let mut current = self.root.get(first)?;
        for word in rest {
            current = current.as_mapping()?.get(word)?;
        }
        Some(current)
    }

    /// Get a nested section as its own store
    pub fn get_section(&self, path: &str) -> Option<Configuration> {
        match self.get(path)? {
            Value::Mapping(map) => Some(Configuration { root: map.clone() }),
            _ => None,
        }
    }

    /// Get a string value, with scalar coercion
    pub fn get_string(&self, path: &str) -> Result<String> {
        match self.require(path)? {
            Value::String(s) => Ok(s.clone()),
            Value::Integer(i) => Ok(i.to_string()),
            Value::Float(f) => Ok(f.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(type_mismatch(path, "string", other)),
        }
    }

    /// Get an integer value, parsing strings
    pub fn get_i64(&self, path: &str) -> Result<i64> {
        match self.require(path)? {
            Value::Integer(i) => Ok(*i),
            Value::String(s) => s.trim().parse().map_err(|_| {
                Error::parse(format!("{} is not an integer: \"{}\"", path, s))
            }),
            other => Err(type_mismatch(path, "integer", other)),
        }
    }

    /// Get a boolean value; strings must be "true" or "false"
    pub fn get_bool(&self, path: &str) -> Result<bool> {
        match self.require(path)? {
            Value::Bool(b) => Ok(*b),
            Value::String(s) => match s.to_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(Error::parse(format!("{} is not a boolean: \"{}\"", path, s))),
            },
            other => Err(type_mismatch(path, "boolean", other)),
        }
    }

    fn require(&self, path: &str) -> Result<&Value> {
        self.get(path)
            .ok_or_else(|| Error::ref_not_found(wordify(path).join(".")))
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.root.clear();
    }

    /// True if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// The store as a nested mapping
    pub fn to_value(&self) -> Value {
        Value::Mapping(self.root.clone())
    }

    /// Every leaf as (normalized dotted path, value)
    pub fn leaves(&self) -> Vec<(String, Value)> {
        leaves(&self.to_value())
    }
}

fn type_mismatch(path: &str, expected: &str, found: &Value) -> Error {
    Error::parse(format!(
        "{} should be a {}, found {}",
        path,
        expected,
        found.type_name()
    ))
}

impl BitOrAssign<&Value> for Configuration {
    fn bitor_assign(&mut self, rhs: &Value) {
        self.merge(rhs);
    }
}

impl BitOrAssign<Value> for Configuration {
    fn bitor_assign(&mut self, rhs: Value) {
        self.merge(&rhs);
    }
}

impl BitOr<&Value> for Configuration {
    type Output = Configuration;

    fn bitor(mut self, rhs: &Value) -> Configuration {
        self.merge(rhs);
        self
    }
}

impl From<Value> for Configuration {
    fn from(value: Value) -> Self {
        Self::from_value(&value)
    }
}

/// Flatten a value into (dotted path, leaf) pairs
///
/// Non-empty mappings are descended; everything else is a leaf.
fn leaves(value: &Value) -> Vec<(String, Value)> {
    fn walk(prefix: &str, value: &Value, out: &mut Vec<(String, Value)>) {
        match value {
            Value::Mapping(map) if !map.is_empty() => {
                for (key, child) in map {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", prefix, key)
                    };
                    walk(&path, child, out);
                }
            }
            leaf if !prefix.is_empty() => out.push((prefix.to_string(), leaf.clone())),
            _ => {}
        }
    }

    let mut out = Vec::new();
    walk("", value, &mut out);
    out
}

/// Split a key into lowercase words
///
/// Separators are `.`, `-`, `_` and whitespace; camelCase and ALLCaps runs
/// are split at case changes, digits stay with the preceding word.
pub fn wordify(key: &str) -> Vec<String> {
    let mut words = Vec::new();
    for token in key.split(|c: char| c == '.' || c == '-' || c == '_' || c.is_whitespace()) {
        let chars: Vec<char> = token.chars().collect();
        let mut word = String::new();
        for (i, &c) in chars.iter().enumerate() {
            if c.is_uppercase() && !word.is_empty() {
                let prev = chars[i - 1];
                let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
                if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower) {
                    words.push(std::mem::take(&mut word));
                }
            }
            word.extend(c.to_lowercase());
        }
        if !word.is_empty() {
            words.push(word);
        }
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn json(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_wordify() {
        assert_eq!(wordify("thisIsATest"), vec!["this", "is", "a", "test"]);
        assert_eq!(wordify("also-a_test999"), vec!["also", "a", "test999"]);
        assert_eq!(wordify("BIG_WORDS"), vec!["big", "words"]);
        assert_eq!(wordify("another.test"), vec!["another", "test"]);
        assert_eq!(wordify("HTTPServer"), vec!["http", "server"]);
        assert!(wordify("").is_empty());
    }

    #[test]
    fn test_merge_normalizes_keys() {
        let mut config = Configuration::new();
        config |= json(
            r#"{"thisIsATest": "A", "another.test": "B", "also-a_test999": "C", "BIG_WORDS": "D"}"#,
        );

        assert_eq!(config.get("this_is.a.test"), Some(&Value::from("A")));
        assert_eq!(config.get("anotherTest"), Some(&Value::from("B")));
        assert_eq!(config.get("ALSO_A_TEST999"), Some(&Value::from("C")));
        assert_eq!(config.get("bigWords"), Some(&Value::from("D")));

        let leaves: Vec<String> = config.leaves().into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            leaves,
            vec!["this.is.a.test", "another.test", "also.a.test999", "big.words"]
        );
    }

    #[test]
    fn test_get_section_and_missing() {
        let config = Configuration::from_value(&json(r#"{"another": {"test": "B"}}"#));
        let section = config.get_section("another").unwrap();
        assert_eq!(section.get("test"), Some(&Value::from("B")));
        assert_eq!(section.get("not_exists"), None);
        assert!(config.get_section("another.test").is_none());
    }

    #[test]
    fn test_bitor_section() {
        let config = Configuration::from_value(&json(r#"{"this": {"other": 1}}"#));
        let added = config.get_section("this").unwrap() | &json(r#"{"is": {"not": {"a": {"test": 42}}}}"#);
        assert_eq!(added.get("isNot.a.test"), Some(&Value::Integer(42)));
        assert_eq!(added.get("other"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_prepend_keeps_existing() {
        let mut config = Configuration::new();
        config.prepend(&json(r#"{"thisIsATest": "A", "another.test": "B"}"#));
        config.prepend(&json(r#"{"thisIs_a_test": "B", "new_key": 1}"#));

        assert_eq!(config.get("this.is_a.test"), Some(&Value::from("A")));
        assert_eq!(config.get("newKey"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_merge_overwrites() {
        let mut config = Configuration::from_value(&json(r#"{"db": {"host": "a", "port": 1}}"#));
        config.merge(&json(r#"{"DB_HOST": "b"}"#));
        assert_eq!(config.to_value(), json(r#"{"db": {"host": "b", "port": 1}}"#));
    }

    #[test]
    fn test_merge_pairs_from_env() {
        std::env::set_var("REFCONF_CONFIGURATION_TEST_KEY", "value");
        let mut config = Configuration::new();
        config.merge_pairs(std::env::vars());

        assert_eq!(
            config.get("REFCONF_CONFIGURATION_TEST_KEY"),
            Some(&Value::from("value"))
        );
        std::env::remove_var("REFCONF_CONFIGURATION_TEST_KEY");
    }

    #[test]
    fn test_typed_getters() {
        let config = Configuration::from_value(&json(
            r#"{"port": 8080, "retries": "3", "debug": "TRUE", "name": "app", "nested": {"a": 1}}"#,
        ));
        assert_eq!(config.get_i64("port").unwrap(), 8080);
        assert_eq!(config.get_i64("RETRIES").unwrap(), 3);
        assert!(config.get_bool("debug").unwrap());
        assert_eq!(config.get_string("port").unwrap(), "8080");
        assert!(config.get_i64("name").is_err());
        assert!(config.get_string("nested").is_err());
        assert!(config.get_string("missing").is_err());
    }

    #[test]
    fn test_clear() {
        let mut config = Configuration::from_value(&json(r#"{"a": 1}"#));
        assert!(!config.is_empty());
        config.clear();
        assert!(config.is_empty());
        assert_eq!(config.to_value(), json("{}"));
    }
}
