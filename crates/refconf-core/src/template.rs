//! `{{name}}` placeholder substitution
//!
//! Placeholders take the forms:
//! - `{{name}}` - the parameter's text (compact JSON for non-strings)
//! - `{{db.host}}` - a dotted path into the parameters
//! - `{{name|quote}}` - the value as a JSON string literal
//!
//! Placeholders naming an unknown parameter are left in place.

use regex::{Captures, Regex};
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::value::Value;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_$.\[\]\-]+)\s*(?:\|\s*([A-Za-z_]+)\s*)?\}\}")
            .expect("placeholder pattern is valid")
    })
}

/// Substitute every placeholder in `text` from `params`
pub fn render(text: &str, params: &Value) -> Result<String> {
    if !text.contains("{{") {
        return Ok(text.to_string());
    }

    let mut failure = None;
    let rendered = placeholder_pattern().replace_all(text, |caps: &Captures<'_>| {
        let whole = caps.get(0).map_or("", |m| m.as_str());
        let name = caps.get(1).map_or("", |m| m.as_str());
        let filter = caps.get(2).map(|m| m.as_str());

        let Some(value) = lookup(params, name) else {
            log::warn!("No parameter '{}' for template placeholder {}", name, whole);
            return whole.to_string();
        };

        match apply_filter(value, filter) {
            Ok(text) => text,
            Err(e) => {
                failure.get_or_insert(e);
                whole.to_string()
            }
        }
    });

    match failure {
        Some(e) => Err(e),
        None => Ok(rendered.into_owned()),
    }
}

fn lookup<'a>(params: &'a Value, name: &str) -> Option<&'a Value> {
    if let Some(value) = params.as_mapping().and_then(|m| m.get(name)) {
        return Some(value);
    }
    params.lookup(name).ok().flatten()
}

fn apply_filter(value: &Value, filter: Option<&str>) -> Result<String> {
    match filter {
        None => Ok(match value {
            Value::String(s) => s.clone(),
            other => other.to_json(),
        }),
        Some("quote") => Ok(match value {
            Value::String(_) => value.to_json(),
            // Non-strings are quoted in their compact JSON form
            other => Value::String(other.to_json()).to_json(),
        }),
        Some(other) => Err(Error::parse(format!("Unknown template filter '{}'", other))
            .with_help("The only supported filter is 'quote'")),
    }
}
