//! S3 object loader
//!
//! Handles `s3://bucket/key` references.

use std::sync::Arc;

use aws_sdk_s3::primitives::ByteStream;
use once_cell::sync::OnceCell;
use refconf_core::document::parse_json;
use refconf_core::error::{Error, Result};
use refconf_core::loaders::resolve_file_path;
use refconf_core::template;
use refconf_core::{register_global, LoadContext, Scheme, SchemeLoader, Url, Value};
use tokio::runtime::Runtime;

use crate::{client_cache, reference_settings, resolve_s3_config};

/// S3 object loader.
///
/// ## Usage
///
/// ```json
/// {
///   "shared": {"$ref": "s3://my-bucket/configs/shared.json"},
///   "limits": {"$ref": "s3://my-bucket/configs/limits.yaml#api"},
///   "motd": {"$ref": "s3://my-bucket/motd.txt?parse=text"}
/// }
/// ```
///
/// A reference without a bucket (`{"$ref": "other.json"}` inside an object
/// loaded from S3) is resolved against the bucket and key of that object.
///
/// ## Parse modes
///
/// - `auto` (default): YAML for `.yaml`/`.yml` keys, JSON for `.json` keys or
///   a JSON content type, otherwise JSON if it parses and text if not
/// - `yaml`, `json`, `text`: forced
///
/// ## Query parameters
///
/// - `parse`: parse mode
/// - `region`, `profile`, `endpoint`: override configured connection settings
///
/// Any other query parameters fill `{{name}}` placeholders in the object.
pub struct S3Loader {
    runtime: OnceCell<Runtime>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ParseMode {
    Auto,
    Yaml,
    Json,
    Text,
}

impl S3Loader {
    /// Create a new S3 loader; the async runtime starts on first use.
    pub fn new() -> Self {
        Self {
            runtime: OnceCell::new(),
        }
    }

    fn runtime(&self) -> Result<&Runtime> {
        self.runtime.get_or_try_init(|| {
            Runtime::new()
                .map_err(|e| Error::loader_custom("s3", format!("Failed to start runtime: {}", e)))
        })
    }

    async fn fetch_object(
        &self,
        bucket: &str,
        key: &str,
        reference: &Url,
    ) -> Result<(Vec<u8>, Option<String>)> {
        let settings = reference_settings(reference, resolve_s3_config);
        let client: aws_sdk_s3::Client = client_cache::get_client(&settings).await;

        log::trace!("S3 GetObject s3://{}/{}", bucket, key);
        let response = client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                Error::loader_custom("s3", format!("S3 object '{}/{}': {}", bucket, key, e))
            })?;

        let content_type = response.content_type().map(|s| s.to_string());
        let body: ByteStream = response.body;
        let bytes = body.collect().await.map_err(|e| {
            Error::loader_custom("s3", format!("Failed to read S3 object body: {}", e))
        })?;

        Ok((bytes.into_bytes().to_vec(), content_type))
    }
}

impl Default for S3Loader {
    fn default() -> Self {
        Self::new()
    }
}

/// Bucket and key of a reference, relative ones resolved against `base`
fn object_location(reference: &Url, base: &Url) -> Result<(String, String)> {
    let (bucket, key) = if reference.host.is_empty() && base.scheme == "s3" {
        let key = resolve_file_path(&reference.path, &base.path)?;
        (base.host.clone(), key)
    } else {
        (reference.host.clone(), reference.path.clone())
    };

    let key = key.trim_start_matches('/');
    if bucket.is_empty() || key.is_empty() {
        return Err(Error::loader_custom(
            "s3",
            format!("S3 reference must be s3://bucket/key: {}", reference),
        ));
    }
    Ok((bucket, key.to_string()))
}

fn parse_mode(requested: Option<&str>, key: &str, content_type: Option<&str>) -> ParseMode {
    if let Some(mode) = requested {
        return match mode.to_lowercase().as_str() {
            "yaml" => ParseMode::Yaml,
            "json" => ParseMode::Json,
            "text" => ParseMode::Text,
            _ => ParseMode::Auto,
        };
    }

    match key.rsplit('.').next().map(|s| s.to_lowercase()).as_deref() {
        Some("yaml" | "yml") => return ParseMode::Yaml,
        Some("json") => return ParseMode::Json,
        _ => {}
    }

    match content_type.map(|ct| ct.to_lowercase()) {
        Some(ct) if ct.contains("yaml") => ParseMode::Yaml,
        Some(ct) if ct.contains("json") => ParseMode::Json,
        _ => ParseMode::Auto,
    }
}

fn parse_content(content: &str, mode: ParseMode) -> Result<Value> {
    match mode {
        ParseMode::Yaml => serde_yaml::from_str(content)
            .map_err(|e| Error::loader_custom("s3", format!("Failed to parse YAML: {}", e))),
        ParseMode::Json => parse_json(content).map_err(|e| {
            Error::loader_custom(
                "s3",
                format!("Failed to parse JSON: {}", e.cause.clone().unwrap_or_default()),
            )
        }),
        ParseMode::Text => Ok(Value::String(content.to_string())),
        ParseMode::Auto => Ok(parse_json(content).unwrap_or_else(|_| Value::String(content.to_string()))),
    }
}

impl SchemeLoader for S3Loader {
    fn load(&self, reference: &Url, ctx: &LoadContext<'_>, base: &Url) -> Result<Value> {
        let (bucket, key) = object_location(reference, base)?;

        let (bytes, content_type) = self
            .runtime()?
            .block_on(self.fetch_object(&bucket, &key, reference))?;
        let content = String::from_utf8(bytes).map_err(|e| {
            Error::loader_custom("s3", format!("S3 object is not valid UTF-8: {}", e))
        })?;

        let content = template::render(&content, &reference.query_value())?;
        let requested = reference.query_param("parse").and_then(|v| v.as_str());
        let doc = parse_content(&content, parse_mode(requested, &key, content_type.as_deref()))?;

        let location = Url {
            scheme: "s3".to_string(),
            host: bucket,
            path: format!("/{}", key),
            query: reference.query.clone(),
            ..Url::default()
        };
        ctx.expand_foreign(&doc, &location)
    }

    fn scheme(&self) -> Scheme {
        Scheme::from("s3")
    }
}

/// Register the S3 loader in the global registry.
pub fn register() {
    // Replacing is fine: register_all may run more than once
    let _ = register_global(Arc::new(S3Loader::new()), true);
}
