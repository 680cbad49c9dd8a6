//! refconf-core: `$ref` expansion for JSON configuration documents
//!
//! Documents may point at other documents, or at parts of themselves, with
//! `{"$ref": "..."}` nodes. Foreign references (`file://`, `http(s)://`,
//! `env://`, `param://` and registered extension schemes) are loaded first;
//! fragment-only references (`#a.b`, `#..sibling`) are then resolved inside
//! the loaded document.
//!
//! # Example
//!
//! ```rust
//! use refconf_core::{expand, Value, DEFAULT_DOC_URL};
//!
//! let doc: Value = serde_json::from_str(
//!     r##"{"message": "Hello", "nested": {"repeat": {"$ref": "#..message"}}}"##,
//! ).unwrap();
//!
//! let expanded = expand(&doc, DEFAULT_DOC_URL, &Default::default()).unwrap();
//! assert_eq!(expanded.get_path("nested.repeat").unwrap().as_str(), Some("Hello"));
//! ```

pub mod configuration;
pub mod document;
pub mod error;
pub mod expander;
pub mod loaders;
pub mod scheme;
pub mod template;
pub mod url;
pub mod value;

use indexmap::IndexMap;

pub use configuration::Configuration;
pub use error::{Error, ErrorKind, LoadErrorKind, Result};
pub use expander::Expander;
pub use loaders::ExpandOptions;
pub use scheme::{
    global_registry, register_global, LoadContext, Scheme, SchemeLoader, SchemeRegistry,
};
pub use url::Url;
pub use value::{Value, DEFAULT_KEY, REF_KEY};

/// Document url used by `expand` when the document has no origin
pub const DEFAULT_DOC_URL: &str = "param://";

/// Load the document at `url` and expand every reference in it
///
/// The url must declare a scheme. A relative `file://` url is tried against
/// the directory of the calling source file when the compiler recorded it as
/// an absolute path, then the working directory. Loaders come from the global
/// registry.
#[track_caller]
pub fn get(url: &str) -> Result<Value> {
    Expander::new(scheme::global_snapshot()).get(url)
}

/// Expand an already loaded document as if it had been loaded from `doc_url`
///
/// `params` are laid over the query parameters of `doc_url`; both are
/// available to `param://` references and `{{name}}` placeholders.
pub fn expand(doc: &Value, doc_url: &str, params: &IndexMap<String, Value>) -> Result<Value> {
    Expander::new(scheme::global_snapshot()).expand(doc, doc_url, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn json(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_get_absolute_file_with_nested_refs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("main.json"),
            r##"{
                // shared settings live next door
                "database": {"$ref": "common.json#db", "name": "orders"},
                "replica": {"$ref": "#database", "host": "replica.local"}
            }"##,
        )
        .unwrap();
        fs::write(
            dir.path().join("common.json"),
            r#"{"db": {"host": "db.local", "port": 5432, "name": "default"}}"#,
        )
        .unwrap();

        let url = format!("file://{}/main.json", dir.path().display());
        let value = get(&url).unwrap();

        assert_eq!(
            value,
            json(
                r#"{
                    "database": {"name": "orders", "host": "db.local", "port": 5432},
                    "replica": {"host": "replica.local", "name": "orders", "port": 5432}
                }"#
            )
        );
    }

    #[test]
    fn test_get_fragment_of_document() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), r#"{"x": {"y": [10, 20]}}"#).unwrap();

        let url = format!("file://{}/a.json#x.y.1", dir.path().display());
        assert_eq!(get(&url).unwrap(), Value::Integer(20));
    }

    #[test]
    fn test_get_relative_to_working_directory() {
        // Tests run from the package directory, whose manifest reads as INI
        let value = get("file://Cargo.toml").unwrap();
        assert_eq!(
            value.get_path("package.name").unwrap().as_str(),
            Some("refconf-core")
        );
    }

    #[test]
    fn test_get_missing_file() {
        let err = get("file:///definitely/not/here.json").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnresolvedReference { .. }));
        assert!(err.root_cause().is_file_read());
    }

    #[test]
    fn test_get_requires_protocol() {
        let err = get("/etc/app.json").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::MissingProtocol { .. }));
    }

    #[test]
    fn test_expand_default_url() {
        let doc = json(r##"{"a": 1, "b": {"$ref": "#a"}}"##);
        let value = expand(&doc, DEFAULT_DOC_URL, &IndexMap::new()).unwrap();
        assert_eq!(value, json(r#"{"a": 1, "b": 1}"#));
    }

    #[test]
    fn test_expand_no_ref_survives() {
        std::env::set_var("REFCONF_LIB_TEST_LEVEL", "\"debug\"");
        let doc = json(
            r##"{
                "log": {"level": {"$ref": "env://REFCONF_LIB_TEST_LEVEL"}},
                "items": [{"$ref": "#log"}, {"$ref": ["#missing", "#log.level"]}],
                "fallback": {"$ref": "#nothing", "$default": {"$ref": "#log"}}
            }"##,
        );
        let value = expand(&doc, DEFAULT_DOC_URL, &IndexMap::new()).unwrap();
        std::env::remove_var("REFCONF_LIB_TEST_LEVEL");

        assert_eq!(
            value,
            json(
                r#"{
                    "log": {"level": "debug"},
                    "items": [{"level": "debug"}, "debug"],
                    "fallback": {"level": "debug"}
                }"#
            )
        );
        assert!(!value.to_json().contains("$ref"));
    }

    #[test]
    fn test_default_with_missing_local_path() {
        let doc = json(
            r##"{
                "host": "example.com",
                "port": 8080,
                "user_config": {"$ref": "#default_config", "$default": {"username": "default_user", "password": "default_pass"}}
            }"##,
        );
        let value = expand(&doc, DEFAULT_DOC_URL, &IndexMap::new()).unwrap();

        let config = Configuration::from_value(&value);
        assert_eq!(
            config.get("userConfig.username"),
            Some(&Value::from("default_user"))
        );
        assert_eq!(
            config.get("userConfig.password"),
            Some(&Value::from("default_pass"))
        );
    }

    #[test]
    fn test_file_ref_wins_over_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"username": "file_user", "password": "file_pass"}"#).unwrap();

        let doc = json(&format!(
            r#"{{"user_config": {{"$ref": "file://{}", "$default": {{"username": "default_user"}}}}}}"#,
            path.display()
        ));
        let value = expand(&doc, DEFAULT_DOC_URL, &IndexMap::new()).unwrap();
        assert_eq!(
            value,
            json(r#"{"user_config": {"username": "file_user", "password": "file_pass"}}"#)
        );
    }

    #[test]
    fn test_expand_params_feed_templates() {
        let doc = json(r#"{"greeting": {"$ref": "param://who"}, "{{who}}_seen": true}"#);
        let mut params = IndexMap::new();
        params.insert("who".to_string(), Value::from("world"));

        let value = expand(&doc, DEFAULT_DOC_URL, &params).unwrap();
        assert_eq!(value, json(r#"{"greeting": "world", "world_seen": true}"#));
    }
}

// HTTP expansion tests (require http feature and mockito)
#[cfg(all(test, feature = "http"))]
mod http_expand_tests {
    use super::*;
    use mockito::Server;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_scheme_relative_reference_keeps_http() {
        let mut server = Server::new();
        let authority = server.host_with_port();
        let a = server
            .mock("GET", "/a.json")
            .with_status(200)
            .with_body(format!(r#"{{"b": {{"$ref": "//{}/b.json"}}}}"#, authority))
            .create();
        let b = server
            .mock("GET", "/b.json")
            .with_status(200)
            .with_body(r#"{"value": 2}"#)
            .create();

        let value = get(&format!("{}/a.json", server.url())).unwrap();

        a.assert();
        b.assert();
        assert_eq!(value, serde_json::from_str::<Value>(r#"{"b": {"value": 2}}"#).unwrap());
    }

    #[test]
    fn test_http_document_local_refs() {
        let mut server = Server::new();
        let _mock = server
            .mock("GET", "/doc.json")
            .with_status(200)
            .with_body(r##"{"a": "x", "b": {"c": {"$ref": "#..a"}}}"##)
            .create();

        let value = get(&format!("{}/doc.json", server.url())).unwrap();
        assert_eq!(value.get_path("b.c").unwrap(), &Value::from("x"));
    }

    #[test]
    fn test_http_failure_falls_back_to_default() {
        let mut server = Server::new();
        let _mock = server.mock("GET", "/down.json").with_status(503).create();

        let doc: Value = serde_json::from_str(&format!(
            r#"{{"remote": {{"$ref": "{}/down.json", "$default": {{"offline": true}}}}}}"#,
            server.url()
        ))
        .unwrap();
        let value = expand(&doc, DEFAULT_DOC_URL, &IndexMap::new()).unwrap();
        assert_eq!(
            value.get_path("remote.offline").unwrap(),
            &Value::Bool(true)
        );
    }
}
