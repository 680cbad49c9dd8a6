//! Document text readers
//!
//! Loaded documents are JSON with `//` and `/* */` comments, read up to the
//! end of the first value. Text that is not JSON is tried as INI.

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::value::Value;

/// Parse document text: JSON-with-comments first, INI as fallback
///
/// When both fail the JSON error is reported.
pub fn parse_document(text: &str) -> Result<Value> {
    match parse_json(text) {
        Ok(value) => Ok(value),
        Err(json_err) => match parse_ini(text) {
            Ok(value) => {
                log::trace!("Document is not JSON, read as INI");
                Ok(value)
            }
            Err(_) => Err(json_err),
        },
    }
}

/// Parse the first JSON value of `text`, ignoring comments and anything after
/// the value
pub fn parse_json(text: &str) -> Result<Value> {
    let stripped = strip_comments(text);
    let mut stream = serde_json::Deserializer::from_str(&stripped).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => Ok(value),
        Some(Err(e)) => Err(Error::parse(format!("Invalid JSON: {}", e))),
        None => Err(Error::parse("Document is empty")),
    }
}

/// Remove `//` line comments and `/* */` block comments outside of strings
///
/// Newlines inside block comments are kept so parser line numbers still match.
pub fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut previous = '\0';
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                    }
                    if previous == '*' && skipped == '/' {
                        break;
                    }
                    previous = skipped;
                }
            }
            _ => out.push(c),
        }
    }

    out
}

/// Parse INI text into nested mappings
///
/// `[a.b]` opens a nested section, entries are `key = value` or `key: value`,
/// lines starting with `;` or `#` are comments. Values are JSON-decoded when
/// possible.
pub fn parse_ini(text: &str) -> Result<Value> {
    let mut root = Value::Mapping(IndexMap::new());
    let mut section: Option<String> = None;

    for (number, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[') {
            let name = name
                .strip_suffix(']')
                .ok_or_else(|| Error::parse(format!("INI line {}: unclosed section", number + 1)))?
                .trim();
            if name.is_empty() {
                return Err(Error::parse(format!("INI line {}: empty section name", number + 1)));
            }
            if root.lookup(name)?.is_none() {
                root.set_path(name, Value::Mapping(IndexMap::new()))?;
            }
            section = Some(name.to_string());
            continue;
        }

        let split = line
            .find(['=', ':'])
            .ok_or_else(|| Error::parse(format!("INI line {}: expected 'key = value'", number + 1)))?;
        let key = line[..split].trim();
        if key.is_empty() || key.contains(['"', '{', '}', '[', ']']) {
            return Err(Error::parse(format!("INI line {}: invalid key '{}'", number + 1, key)));
        }
        let value = decode_scalar(line[split + 1..].trim());

        let target = match &section {
            Some(name) => root
                .get_path_mut(name)
                .ok_or_else(|| Error::internal(format!("INI section '{}' vanished", name)))?,
            None => &mut root,
        };
        match target {
            Value::Mapping(map) => {
                map.insert(key.to_string(), value);
            }
            _ => {
                return Err(Error::parse(format!(
                    "INI line {}: section is not a table",
                    number + 1
                )))
            }
        }
    }

    Ok(root)
}

fn decode_scalar(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::String(String::new());
    }
    serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn json(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_strip_line_and_block_comments() {
        let text = "{\n  // line\n  \"a\": 1, /* block\n spans */ \"b\": \"http://x/*y*/\"\n}";
        let stripped = strip_comments(text);
        assert!(!stripped.contains("line"));
        assert!(!stripped.contains("block"));
        assert!(stripped.contains("\"http://x/*y*/\""));
        assert_eq!(stripped.lines().count(), text.lines().count());
    }

    #[test]
    fn test_strip_keeps_escaped_quotes() {
        let text = r#"{"a": "say \"//hi\"" // trailing
}"#;
        assert_eq!(
            parse_json(text).unwrap(),
            json(r#"{"a": "say \"//hi\""}"#)
        );
    }

    #[test]
    fn test_first_value_trailing_ignored() {
        assert_eq!(parse_json(r#"{"a": 1} trailing garbage"#).unwrap(), json(r#"{"a": 1}"#));
    }

    #[test]
    fn test_empty_json_is_error() {
        assert!(parse_json("  // nothing\n").is_err());
    }

    #[test]
    fn test_parse_ini_sections() {
        let text = "\
; comment
name = app

[database]
host = db.local
port: 5432
enabled = true

[database.pool]
size = 4
";
        assert_eq!(
            parse_ini(text).unwrap(),
            json(
                r#"{"name": "app", "database": {"host": "db.local", "port": 5432, "enabled": true, "pool": {"size": 4}}}"#
            )
        );
    }

    #[test]
    fn test_parse_ini_rejects_garbage() {
        assert!(parse_ini("just some words").is_err());
        assert!(parse_ini("[unclosed\nkey=1").is_err());
    }

    #[test]
    fn test_parse_document_falls_back_to_ini() {
        let value = parse_document("[server]\nport = 80\n").unwrap();
        assert_eq!(value, json(r#"{"server": {"port": 80}}"#));
    }

    #[test]
    fn test_parse_document_reports_json_error() {
        let err = parse_document("{\"a\": }").unwrap_err();
        assert!(err.to_string().contains("Invalid JSON"));
    }
}
