//! Built-in scheme loaders
//!
//! - `file://path` - JSON-with-comments or INI file, relative to the referencing document
//! - `http://...`, `https://...` - JSON document fetched with GET (requires `http` feature)
//! - `env://NAME` - environment variable, JSON-decoded when possible
//! - `param://name` - query parameter of the referencing document's url

use std::time::Duration;

use crate::document;
use crate::error::{Error, ErrorKind, Result};
use crate::scheme::{LoadContext, Scheme, SchemeLoader};
use crate::template;
use crate::url::Url;
use crate::value::Value;

/// Options for the network loaders
#[derive(Debug, Clone)]
pub struct ExpandOptions {
    /// Timeout of a whole HTTP request
    pub http_timeout: Duration,
    /// Extra headers sent with every HTTP request
    pub http_headers: Vec<(String, String)>,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(30),
            http_headers: Vec::new(),
        }
    }
}

impl ExpandOptions {
    /// Set the HTTP timeout
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Add a header sent with every HTTP request
    pub fn with_http_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.http_headers.push((name.into(), value.into()));
        self
    }
}

/// Loader for `file://` references
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLoader;

impl SchemeLoader for FileLoader {
    fn load(&self, reference: &Url, ctx: &LoadContext<'_>, base: &Url) -> Result<Value> {
        let mut location = reference.clone();
        location.path = resolve_file_path(&reference.path, &base.path)?;
        location.fragment.clear();
        let path = location.path.as_str();

        log::trace!("Reading file {}", path);
        let text = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e.to_string()))?;

        let text = template::render(&text, &reference.query_value())
            .map_err(|e| Error::file_parse(path, e.cause.clone().unwrap_or_default()))?;
        let doc = document::parse_document(&text)
            .map_err(|e| Error::file_parse(path, e.cause.clone().unwrap_or_default()))?;

        ctx.expand_foreign(&doc, &location)
    }

    fn scheme(&self) -> Scheme {
        Scheme::File
    }
}

/// Make a `file://` path absolute
///
/// `~` is the home directory. A relative path drops trailing segments of the
/// referencing document's path: one for a plain name, N for N leading dots.
pub fn resolve_file_path(path: &str, base_path: &str) -> Result<String> {
    if let Some(rest) = path.strip_prefix('~') {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::file_read(path, "Home directory is unknown"))?;
        let home = home.to_string_lossy();
        return Ok(format!("{}{}", home.trim_end_matches('/'), rest));
    }
    if path.starts_with('/') {
        return Ok(path.to_string());
    }

    let dots = path.chars().take_while(|c| *c == '.').count();
    let segments: Vec<&str> = base_path.trim_end_matches('/').split('/').collect();
    if dots > 0 {
        let keep = segments.len().saturating_sub(dots);
        Ok(format!("{}{}", segments[..keep].join("/"), &path[dots..]))
    } else {
        let keep = segments.len().saturating_sub(1);
        Ok(format!("{}/{}", segments[..keep].join("/"), path))
    }
}

/// Loader for `env://NAME` references
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvLoader;

impl SchemeLoader for EnvLoader {
    fn load(&self, reference: &Url, _ctx: &LoadContext<'_>, _base: &Url) -> Result<Value> {
        let name = if reference.host.is_empty() {
            reference.path.trim_matches('/')
        } else {
            reference.host.as_str()
        };

        let raw = std::env::var(name).map_err(|_| Error::missing_env_var(name))?;
        Ok(serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw)))
    }

    fn scheme(&self) -> Scheme {
        Scheme::Env
    }
}

/// Loader for `param://name` references
#[derive(Debug, Clone, Copy, Default)]
pub struct ParamLoader;

impl SchemeLoader for ParamLoader {
    fn load(&self, reference: &Url, _ctx: &LoadContext<'_>, base: &Url) -> Result<Value> {
        let name = reference.host.as_str();
        base.query_param(name)
            .cloned()
            .ok_or_else(|| Error::missing_param(name))
    }

    fn scheme(&self) -> Scheme {
        Scheme::Param
    }
}

/// Loader for `http://` and `https://` references
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpLoader {
    scheme: Scheme,
    options: ExpandOptions,
}

#[cfg(feature = "http")]
impl HttpLoader {
    /// Create a loader registered under `scheme`
    pub fn new(scheme: Scheme, options: ExpandOptions) -> Self {
        Self { scheme, options }
    }

    fn fetch(&self, url: &str) -> Result<String> {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(self.options.http_timeout))
            .build();
        let agent: ureq::Agent = config.into();

        let mut request = agent.get(url);
        for (name, value) in &self.options.http_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        log::trace!("GET {}", url);
        let response = request.call().map_err(|e| {
            let (status, message) = match &e {
                ureq::Error::StatusCode(code) => (Some(*code), format!("HTTP {}", code)),
                ureq::Error::Timeout(kind) => (None, format!("Request timeout: {:?}", kind)),
                ureq::Error::Io(io_err) => (None, format!("Connection error: {}", io_err)),
                _ => (None, format!("HTTP request failed: {}", e)),
            };
            Error::http_request_failed(url, status, message)
        })?;

        response
            .into_body()
            .read_to_string()
            .map_err(|e| Error::http_request_failed(url, None, e.to_string()))
    }
}

#[cfg(feature = "http")]
impl SchemeLoader for HttpLoader {
    fn load(&self, reference: &Url, ctx: &LoadContext<'_>, _base: &Url) -> Result<Value> {
        let mut location = reference.clone();
        location.fragment.clear();
        // Display keeps the query text as written
        let url = location.to_string();

        let body = self.fetch(&url)?;
        let body = template::render(&body, &reference.query_value())
            .map_err(|e| Error::http_request_failed(&url, None, e.to_string()))?;
        let doc = document::parse_json(&body).map_err(|e| {
            Error::http_request_failed(&url, None, e.cause.clone().unwrap_or_default())
                .with_help("The response body must be JSON (comments allowed)")
        })?;

        ctx.expand_foreign(&doc, &location)
    }

    fn scheme(&self) -> Scheme {
        self.scheme.clone()
    }
}

/// True if the error came from a file that could not be read, directly or as
/// the cause of an unresolved reference
pub(crate) fn is_missing_file(err: &Error) -> bool {
    err.is_file_read()
        || (matches!(err.kind, ErrorKind::UnresolvedReference { .. })
            && err.source.as_deref().is_some_and(is_missing_file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadErrorKind;
    use crate::scheme::SchemeRegistry;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn json(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    fn file_url(path: &std::path::Path) -> Url {
        Url::parse(&format!("file://{}", path.display())).unwrap()
    }

    #[test]
    fn test_resolve_plain_relative() {
        assert_eq!(
            resolve_file_path("common.json", "/etc/app/main.json").unwrap(),
            "/etc/app/common.json"
        );
        assert_eq!(
            resolve_file_path("conf/app.json", "/home/me/.").unwrap(),
            "/home/me/conf/app.json"
        );
    }

    #[test]
    fn test_resolve_dotted_relative() {
        assert_eq!(
            resolve_file_path("./common.json", "/etc/app/main.json").unwrap(),
            "/etc/app/common.json"
        );
        assert_eq!(
            resolve_file_path("../shared/db.json", "/etc/app/main.json").unwrap(),
            "/etc/shared/db.json"
        );
    }

    #[test]
    fn test_resolve_absolute_and_home() {
        assert_eq!(
            resolve_file_path("/abs/x.json", "/etc/app/main.json").unwrap(),
            "/abs/x.json"
        );
        if let Some(home) = dirs::home_dir() {
            let resolved = resolve_file_path("~/x.json", "/etc/main.json").unwrap();
            assert!(resolved.starts_with(home.to_string_lossy().trim_end_matches('/')));
            assert!(resolved.ends_with("/x.json"));
        }
    }

    #[test]
    fn test_file_loader_reads_json_with_comments() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("main.json");
        fs::write(dir.path().join("db.json"), "// database\n{\"host\": \"{{host}}\", \"port\": 5432}").unwrap();

        let registry = SchemeRegistry::with_builtins();
        let ctx = LoadContext::new(&registry);
        let reference = Url::parse("file://db.json?host=db.local").unwrap();

        let value = FileLoader.load(&reference, &ctx, &file_url(&main)).unwrap();
        assert_eq!(value, json(r#"{"host": "db.local", "port": 5432}"#));
    }

    #[test]
    fn test_file_loader_ini_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let ini = dir.path().join("settings.ini");
        fs::write(&ini, "[server]\nport = 8080\n").unwrap();

        let registry = SchemeRegistry::with_builtins();
        let value = FileLoader
            .load(&file_url(&ini), &LoadContext::new(&registry), &Url::default())
            .unwrap();
        assert_eq!(value, json(r#"{"server": {"port": 8080}}"#));
    }

    #[test]
    fn test_file_loader_expands_nested_relative_refs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(
            dir.path().join("sub/outer.json"),
            r#"{"inner": {"$ref": "inner.json"}}"#,
        )
        .unwrap();
        fs::write(dir.path().join("sub/inner.json"), r#"{"level": 2}"#).unwrap();

        let registry = SchemeRegistry::with_builtins();
        let value = FileLoader
            .load(
                &Url::parse("file://sub/outer.json").unwrap(),
                &LoadContext::new(&registry),
                &file_url(&dir.path().join(".")),
            )
            .unwrap();
        assert_eq!(value, json(r#"{"inner": {"level": 2}}"#));
    }

    #[test]
    fn test_file_loader_missing_file() {
        let registry = SchemeRegistry::with_builtins();
        let err = FileLoader
            .load(
                &Url::parse("file:///definitely/not/here.json").unwrap(),
                &LoadContext::new(&registry),
                &Url::default(),
            )
            .unwrap_err();
        assert!(err.is_file_read());
        assert!(is_missing_file(&err));
        assert!(err.to_string().contains("Can not read file /definitely/not/here.json"));
    }

    #[test]
    fn test_file_loader_unparseable() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{\"a\": ").unwrap();

        let registry = SchemeRegistry::with_builtins();
        let err = FileLoader
            .load(&file_url(&bad), &LoadContext::new(&registry), &Url::default())
            .unwrap_err();
        assert!(matches!(
            err.kind,
            ErrorKind::Load(LoadErrorKind::FileParse { .. })
        ));
        assert!(!is_missing_file(&err));
    }

    #[test]
    fn test_env_loader_json_and_raw() {
        std::env::set_var("REFCONF_LOADERS_TEST_JSON", r#"{"a": 1}"#);
        std::env::set_var("REFCONF_LOADERS_TEST_RAW", "plain text");

        let registry = SchemeRegistry::new();
        let ctx = LoadContext::new(&registry);
        let base = Url::default();

        let value = EnvLoader
            .load(&Url::parse("env://REFCONF_LOADERS_TEST_JSON").unwrap(), &ctx, &base)
            .unwrap();
        assert_eq!(value, json(r#"{"a": 1}"#));

        let value = EnvLoader
            .load(&Url::parse("env://REFCONF_LOADERS_TEST_RAW").unwrap(), &ctx, &base)
            .unwrap();
        assert_eq!(value, Value::from("plain text"));

        std::env::remove_var("REFCONF_LOADERS_TEST_JSON");
        std::env::remove_var("REFCONF_LOADERS_TEST_RAW");
    }

    #[test]
    fn test_env_loader_missing() {
        let registry = SchemeRegistry::new();
        let err = EnvLoader
            .load(
                &Url::parse("env://REFCONF_LOADERS_TEST_UNSET").unwrap(),
                &LoadContext::new(&registry),
                &Url::default(),
            )
            .unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::Load(LoadErrorKind::MissingEnvVar {
                name: "REFCONF_LOADERS_TEST_UNSET".into()
            })
        );
    }

    #[test]
    fn test_param_loader() {
        let registry = SchemeRegistry::new();
        let ctx = LoadContext::new(&registry);
        let base = Url::parse("param://?size=3&name=app").unwrap();

        let value = ParamLoader
            .load(&Url::parse("param://size").unwrap(), &ctx, &base)
            .unwrap();
        assert_eq!(value, Value::Integer(3));

        let err = ParamLoader
            .load(&Url::parse("param://missing").unwrap(), &ctx, &base)
            .unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::Load(LoadErrorKind::MissingParam {
                name: "missing".into()
            })
        );
    }
}

// HTTP loader tests (require http feature and mockito)
#[cfg(all(test, feature = "http"))]
mod http_loader_tests {
    use super::*;
    use crate::error::LoadErrorKind;
    use crate::scheme::SchemeRegistry;
    use mockito::{Matcher, Server};
    use pretty_assertions::assert_eq;

    fn json(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_http_loader_fetches_json() {
        let mut server = Server::new();
        let mock = server
            .mock("GET", "/config.json")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("{\"name\": \"{{name}}\" /* templated */}")
            .create();

        let registry = SchemeRegistry::with_builtins();
        let reference = Url::parse(&format!("{}/config.json?name=remote", server.url())).unwrap();
        let value = registry.load(&reference, &Url::default()).unwrap();

        assert_eq!(value, json(r#"{"name": "remote"}"#));
        mock.assert();
    }

    #[test]
    fn test_http_loader_sends_query_as_written() {
        let mut server = Server::new();
        let mock = server
            .mock("GET", "/config.json")
            .match_query(Matcher::Regex("^v=1e3&flag$".into()))
            .with_status(200)
            .with_body("{\"ok\": true}")
            .create();

        let registry = SchemeRegistry::with_builtins();
        let reference = Url::parse(&format!("{}/config.json?v=1e3&flag", server.url())).unwrap();
        let value = registry.load(&reference, &Url::default()).unwrap();

        assert_eq!(value, json(r#"{"ok": true}"#));
        mock.assert();
    }

    #[test]
    fn test_http_loader_status_error() {
        let mut server = Server::new();
        let _mock = server.mock("GET", "/missing.json").with_status(404).create();

        let registry = SchemeRegistry::with_builtins();
        let reference = Url::parse(&format!("{}/missing.json", server.url())).unwrap();
        let err = registry.load(&reference, &Url::default()).unwrap_err();

        assert!(matches!(
            err.kind,
            ErrorKind::Load(LoadErrorKind::Http {
                status: Some(404),
                ..
            })
        ));
    }

    #[test]
    fn test_http_loader_sends_headers() {
        let mut server = Server::new();
        let mock = server
            .mock("GET", "/secure.json")
            .match_header("authorization", "Bearer token")
            .with_status(200)
            .with_body("[1, 2]")
            .create();

        let options = ExpandOptions::default().with_http_header("Authorization", "Bearer token");
        let registry = SchemeRegistry::with_options(options);
        let reference = Url::parse(&format!("{}/secure.json", server.url())).unwrap();
        let value = registry.load(&reference, &Url::default()).unwrap();

        assert_eq!(value, json("[1, 2]"));
        mock.assert();
    }

    #[test]
    fn test_http_loader_rejects_non_json() {
        let mut server = Server::new();
        let _mock = server
            .mock("GET", "/page.html")
            .with_status(200)
            .with_body("<html></html>")
            .create();

        let registry = SchemeRegistry::with_builtins();
        let reference = Url::parse(&format!("{}/page.html", server.url())).unwrap();
        let err = registry.load(&reference, &Url::default()).unwrap_err();

        assert!(err.to_string().contains("must be JSON"));
    }
}
