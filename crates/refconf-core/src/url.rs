//! URL parsing with JSON-valued query parameters
//!
//! References are written as URL-like strings: `file://conf/app.json`,
//! `//host/b.json`, `env://HOME`, `#a.b`, `../common.json#db`. Standard
//! URL parsers reject or rewrite several of these forms, so the `file://` and
//! scheme-relative `//` forms are decomposed by hand and only texts carrying an
//! ordinary `scheme:` prefix go through the `url` crate.

use indexmap::IndexMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::value::Value;

/// A parsed reference or document location
#[derive(Debug, Clone, Default)]
pub struct Url {
    /// Scheme without `://` (`file`, `http`, `env`, ...); empty when absent
    pub scheme: String,
    /// Host, variable name or parameter name; empty when absent
    pub host: String,
    /// Explicit port
    pub port: Option<u16>,
    /// Path, relative or absolute
    pub path: String,
    /// Query parameters, values JSON-decoded
    pub query: IndexMap<String, Value>,
    /// Query text as written; displayed as-is while it still decodes to `query`
    pub raw_query: String,
    /// Fragment without the leading `#`
    pub fragment: String,
}

impl PartialEq for Url {
    fn eq(&self, other: &Self) -> bool {
        self.scheme == other.scheme
            && self.host == other.host
            && self.port == other.port
            && self.path == other.path
            && self.query == other.query
            && self.fragment == other.fragment
    }
}

impl Url {
    /// Parse a URL-like string
    pub fn parse(text: &str) -> Result<Self> {
        if text.starts_with("file://") || text.starts_with("//") {
            parse_slashed(text)
        } else if has_scheme(text) {
            parse_standard(text)
        } else {
            let (rest, fragment) = split_once_or_all(text, '#');
            let (path, query) = split_once_or_all(rest, '?');
            Ok(Self {
                path: path.to_string(),
                query: decode_query(query),
                raw_query: query.to_string(),
                fragment: fragment.to_string(),
                ..Self::default()
            })
        }
    }

    /// True when every part is empty
    pub fn is_empty(&self) -> bool {
        self.scheme.is_empty()
            && self.host.is_empty()
            && self.port.is_none()
            && self.path.is_empty()
            && self.query.is_empty()
            && self.fragment.is_empty()
    }

    /// A reference into the current document: nothing but a fragment (and
    /// possibly a query)
    pub fn is_local(&self) -> bool {
        self.scheme.is_empty() && self.host.is_empty() && self.path.is_empty()
    }

    /// Drop a single trailing `/` from the path
    pub fn strip_trailing_slash(&mut self) {
        if self.path.len() > 1 && self.path.ends_with('/') {
            self.path.pop();
        } else if self.path == "/" && !self.host.is_empty() {
            self.path.clear();
        }
    }

    /// Look up a query parameter: exact key first, then a dotted path
    pub fn query_param(&self, name: &str) -> Option<&Value> {
        if let Some(value) = self.query.get(name) {
            return Some(value);
        }
        let (head, rest) = name.split_once('.')?;
        self.query
            .get(head)
            .and_then(|value| value.lookup(rest).ok().flatten())
    }

    /// Query parameters as a mapping value
    pub fn query_value(&self) -> Value {
        Value::Mapping(self.query.clone())
    }

    /// Copy with another url's parameters laid over this one's query
    pub fn with_params(&self, params: &IndexMap<String, Value>) -> Self {
        let mut out = self.clone();
        for (key, value) in params {
            out.query.insert(key.clone(), value.clone());
        }
        out
    }
}

impl FromStr for Url {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.scheme.is_empty() {
            write!(f, "{}://", self.scheme)?;
        } else if !self.host.is_empty() {
            write!(f, "//")?;
        }
        write!(f, "{}", self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        if !self.path.is_empty() {
            if !self.host.is_empty() && !self.path.starts_with('/') {
                write!(f, "/")?;
            }
            write!(f, "{}", self.path)?;
        }
        if !self.query.is_empty() {
            if decode_query(&self.raw_query) == self.query {
                write!(f, "?{}", self.raw_query)?;
            } else {
                write!(f, "?{}", encode_query(&self.query))?;
            }
        }
        if !self.fragment.is_empty() {
            write!(f, "#{}", self.fragment)?;
        }
        Ok(())
    }
}

/// `file://...` and `//...` forms
fn parse_slashed(text: &str) -> Result<Url> {
    let Some(split) = text.find("//") else {
        return Err(Error::malformed_url(text, "expected '//'"));
    };
    let scheme = text[..split].trim_end_matches(':').to_string();
    let suffix = &text[split + 2..];

    // `?` then `#`, each consumed at most once
    let (path_part, query, fragment) = match suffix.find('?') {
        Some(q) => {
            let (query, fragment) = split_once_or_all(&suffix[q + 1..], '#');
            (&suffix[..q], query, fragment)
        }
        None => {
            let (path, fragment) = split_once_or_all(suffix, '#');
            (path, "", fragment)
        }
    };

    let mut url = Url {
        scheme,
        query: decode_query(query),
        raw_query: query.to_string(),
        fragment: fragment.to_string(),
        ..Url::default()
    };

    if url.scheme == "file" {
        url.path = path_part.to_string();
        return Ok(url);
    }

    let (authority, path) = match path_part.find('/') {
        Some(i) => (&path_part[..i], &path_part[i..]),
        None => (path_part, ""),
    };
    match authority.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() => {
            url.host = host.to_string();
            url.port = Some(
                port.parse()
                    .map_err(|_| Error::malformed_url(text, format!("invalid port '{}'", port)))?,
            );
        }
        _ => url.host = authority.trim_end_matches(':').to_string(),
    }
    url.path = path.to_string();
    Ok(url)
}

/// Texts with an ordinary `scheme:` prefix
fn parse_standard(text: &str) -> Result<Url> {
    // Fragment and query are split off by hand so they stay un-normalized
    let (rest, fragment) = split_once_or_all(text, '#');
    let (rest, query) = split_once_or_all(rest, '?');

    let parsed =
        url::Url::parse(rest).map_err(|e| Error::malformed_url(text, e.to_string()))?;

    Ok(Url {
        scheme: parsed.scheme().to_string(),
        host: parsed.host_str().unwrap_or_default().to_string(),
        port: parsed.port(),
        path: parsed.path().to_string(),
        query: decode_query(query),
        raw_query: query.to_string(),
        fragment: fragment.to_string(),
    })
}

fn has_scheme(text: &str) -> bool {
    let Some(colon) = text.find(':') else {
        return false;
    };
    let scheme = &text[..colon];
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn split_once_or_all(text: &str, delimiter: char) -> (&str, &str) {
    text.split_once(delimiter).unwrap_or((text, ""))
}

/// Decode a query string into JSON-valued parameters
///
/// A bare key is `true`, a repeated key collects its values into a list and a
/// value that is not valid JSON is kept as a string.
pub fn decode_query(query: &str) -> IndexMap<String, Value> {
    let mut collected: IndexMap<String, Vec<Value>> = IndexMap::new();
    for segment in query.split('&').filter(|s| !s.is_empty()) {
        let Some((key, raw)) = url::form_urlencoded::parse(segment.as_bytes()).next() else {
            continue;
        };
        let value = if segment.contains('=') {
            decode_value(&raw)
        } else {
            Value::Bool(true)
        };
        collected.entry(key.into_owned()).or_default().push(value);
    }

    collected
        .into_iter()
        .map(|(key, mut values)| {
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                Value::Sequence(values)
            };
            (key, value)
        })
        .collect()
}

fn decode_value(raw: &str) -> Value {
    serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Encode query parameters, percent-encoding the JSON text of each value
pub fn encode_query(query: &IndexMap<String, Value>) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in query {
        serializer.append_pair(key, &encode_value(value));
    }
    serializer.finish()
}

fn encode_value(value: &Value) -> String {
    match value {
        // Strings go out raw unless they would come back as another type
        Value::String(s) if matches!(decode_value(s), Value::String(ref d) if d == s) => {
            s.clone()
        }
        other => other.to_json(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_absolute_file() {
        let url = Url::parse("file:///etc/app.json#db.host").unwrap();
        assert_eq!(url.scheme, "file");
        assert_eq!(url.host, "");
        assert_eq!(url.path, "/etc/app.json");
        assert_eq!(url.fragment, "db.host");
    }

    #[test]
    fn test_parse_relative_file() {
        let url = Url::parse("file://conf/app.json?env=prod").unwrap();
        assert_eq!(url.scheme, "file");
        assert_eq!(url.path, "conf/app.json");
        assert_eq!(url.query.get("env"), Some(&Value::from("prod")));
        assert_eq!(url.to_string(), "file://conf/app.json?env=prod");
    }

    #[test]
    fn test_parse_scheme_relative() {
        let url = Url::parse("//example.com:8080/b.json#x").unwrap();
        assert_eq!(url.scheme, "");
        assert_eq!(url.host, "example.com");
        assert_eq!(url.port, Some(8080));
        assert_eq!(url.path, "/b.json");
        assert_eq!(url.fragment, "x");
        assert!(!url.is_local());
        assert_eq!(url.to_string(), "//example.com:8080/b.json#x");
    }

    #[test]
    fn test_parse_scheme_relative_bad_port() {
        let err = Url::parse("//example.com:http/b.json").unwrap_err();
        assert!(matches!(err.kind, crate::error::ErrorKind::MalformedUrl { .. }));
    }

    #[test]
    fn test_parse_http() {
        let url = Url::parse("https://example.com:8443/a/b.json?x=1#frag").unwrap();
        assert_eq!(url.scheme, "https");
        assert_eq!(url.host, "example.com");
        assert_eq!(url.port, Some(8443));
        assert_eq!(url.path, "/a/b.json");
        assert_eq!(url.query.get("x"), Some(&Value::Integer(1)));
        assert_eq!(url.fragment, "frag");
        assert_eq!(url.to_string(), "https://example.com:8443/a/b.json?x=1#frag");
    }

    #[test]
    fn test_parse_env_keeps_case() {
        let url = Url::parse("env://MY_VAR").unwrap();
        assert_eq!(url.scheme, "env");
        assert_eq!(url.host, "MY_VAR");
        assert_eq!(url.path, "");
        assert_eq!(url.to_string(), "env://MY_VAR");
    }

    #[test]
    fn test_parse_param_document_url() {
        let url = Url::parse("param://").unwrap();
        assert_eq!(url.scheme, "param");
        assert!(url.host.is_empty());
        assert!(url.path.is_empty());
    }

    #[test]
    fn test_parse_local_fragment() {
        let url = Url::parse("#..message").unwrap();
        assert!(url.is_local());
        assert_eq!(url.fragment, "..message");
        assert_eq!(url.to_string(), "#..message");
    }

    #[test]
    fn test_parse_relative_path() {
        let url = Url::parse("../common.json?x=1#db").unwrap();
        assert_eq!(url.scheme, "");
        assert_eq!(url.path, "../common.json");
        assert_eq!(url.query.get("x"), Some(&Value::Integer(1)));
        assert_eq!(url.fragment, "db");
        assert!(!url.is_local());
    }

    #[test]
    fn test_empty_url() {
        assert!(Url::parse("").unwrap().is_empty());
        assert!(!Url::parse("#a").unwrap().is_empty());
    }

    #[test]
    fn test_query_json_values() {
        let query = decode_query("n=1&f=2.5&b=false&s=hello&q=%22quoted%22&bare&l=%5B1%2C2%5D");
        assert_eq!(query.get("n"), Some(&Value::Integer(1)));
        assert_eq!(query.get("f"), Some(&Value::Float(2.5)));
        assert_eq!(query.get("b"), Some(&Value::Bool(false)));
        assert_eq!(query.get("s"), Some(&Value::from("hello")));
        assert_eq!(query.get("q"), Some(&Value::from("quoted")));
        assert_eq!(query.get("bare"), Some(&Value::Bool(true)));
        assert_eq!(
            query.get("l"),
            Some(&Value::Sequence(vec![Value::Integer(1), Value::Integer(2)]))
        );
    }

    #[test]
    fn test_display_keeps_query_text() {
        let url = Url::parse("https://example.com/a.json?v=1e3&flag&name=x#frag").unwrap();
        assert_eq!(url.query.get("v"), Some(&Value::Float(1000.0)));
        assert_eq!(url.to_string(), "https://example.com/a.json?v=1e3&flag&name=x#frag");

        let url = Url::parse("file://conf/a.json?v=1e3").unwrap();
        assert_eq!(url.to_string(), "file://conf/a.json?v=1e3");
    }

    #[test]
    fn test_display_reencodes_changed_query() {
        let url = Url::parse("https://example.com/a.json?v=1e3&flag").unwrap();
        let mut params = IndexMap::new();
        params.insert("extra".to_string(), Value::Integer(2));

        let merged = url.with_params(&params);
        assert_eq!(
            merged.to_string(),
            "https://example.com/a.json?v=1000.0&flag=true&extra=2"
        );
        assert_eq!(merged.query, decode_query("v=1e3&flag&extra=2"));
        assert_ne!(merged, url);
    }

    #[test]
    fn test_query_repeated_key() {
        let query = decode_query("a=1&a=two");
        assert_eq!(
            query.get("a"),
            Some(&Value::Sequence(vec![Value::Integer(1), Value::from("two")]))
        );
    }

    #[test]
    fn test_encode_keeps_types() {
        let mut query = IndexMap::new();
        query.insert("plain".to_string(), Value::from("hello world"));
        query.insert("numeric_text".to_string(), Value::from("1"));
        query.insert("n".to_string(), Value::Integer(1));

        let encoded = encode_query(&query);
        assert_eq!(encoded, "plain=hello+world&numeric_text=%221%22&n=1");
        assert_eq!(decode_query(&encoded), query);
    }

    #[test]
    fn test_query_param_dotted() {
        let url = Url::parse(r#"param://?db=%7B%22host%22%3A%22h%22%7D&a.b=1"#).unwrap();
        assert_eq!(url.query_param("a.b"), Some(&Value::Integer(1)));
        assert_eq!(url.query_param("db.host"), Some(&Value::from("h")));
        assert_eq!(url.query_param("db.port"), None);
    }

    #[test]
    fn test_strip_trailing_slash() {
        let mut url = Url::parse("file:///etc/conf/").unwrap();
        url.strip_trailing_slash();
        assert_eq!(url.path, "/etc/conf");

        let mut root = Url::parse("http://example.com").unwrap();
        root.strip_trailing_slash();
        assert_eq!(root.to_string(), "http://example.com");
    }
}
