//! SSM Parameter Store loader
//!
//! Handles `ssm://` references.

use std::sync::Arc;

use aws_sdk_ssm::types::ParameterType;
use once_cell::sync::OnceCell;
use refconf_core::error::{Error, Result};
use refconf_core::{register_global, LoadContext, Scheme, SchemeLoader, Url, Value};
use tokio::runtime::Runtime;

use crate::{client_cache, reference_settings, resolve_ssm_config};

/// SSM Parameter Store loader.
///
/// ## Usage
///
/// ```json
/// {
///   "host": {"$ref": "ssm:///app/prod/db-host"},
///   "password": {"$ref": "ssm://app/prod/db-password?region=eu-west-1"}
/// }
/// ```
///
/// Host and path together form the parameter name; a leading `/` is added
/// when missing.
///
/// ## Parameter types
///
/// - **String** / **SecureString**: decoded as JSON when possible, otherwise the raw string
/// - **StringList**: a list of strings (split by comma)
///
/// ## Query parameters
///
/// - `region`, `profile`, `endpoint`: override configured connection settings
pub struct SsmLoader {
    runtime: OnceCell<Runtime>,
}

impl SsmLoader {
    /// Create a new SSM loader; the async runtime starts on first use.
    pub fn new() -> Self {
        Self {
            runtime: OnceCell::new(),
        }
    }

    fn runtime(&self) -> Result<&Runtime> {
        self.runtime.get_or_try_init(|| {
            Runtime::new()
                .map_err(|e| Error::loader_custom("ssm", format!("Failed to start runtime: {}", e)))
        })
    }

    async fn fetch_parameter(&self, name: &str, reference: &Url) -> Result<(String, ParameterType)> {
        let settings = reference_settings(reference, resolve_ssm_config);
        let client: aws_sdk_ssm::Client = client_cache::get_client(&settings).await;

        log::trace!("SSM GetParameter {}", name);
        let response = client
            .get_parameter()
            .name(name)
            .with_decryption(true)
            .send()
            .await
            .map_err(|e| Error::loader_custom("ssm", format!("SSM parameter '{}': {}", name, e)))?;

        let parameter = response
            .parameter()
            .ok_or_else(|| Error::loader_custom("ssm", format!("SSM parameter '{}' not found", name)))?;
        let value = parameter
            .value()
            .ok_or_else(|| {
                Error::loader_custom("ssm", format!("SSM parameter '{}' has no value", name))
            })?
            .to_string();
        let param_type = parameter.r#type().cloned().unwrap_or(ParameterType::String);

        Ok((value, param_type))
    }
}

impl Default for SsmLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Parameter name of an `ssm://` reference
fn parameter_name(reference: &Url) -> Result<String> {
    let name = format!("{}{}", reference.host, reference.path);
    let name = name.trim_end_matches('/');
    if name.trim_start_matches('/').is_empty() {
        return Err(Error::loader_custom(
            "ssm",
            format!("SSM reference needs a parameter name: {}", reference),
        ));
    }
    if name.starts_with('/') {
        Ok(name.to_string())
    } else {
        Ok(format!("/{}", name))
    }
}

/// Value of a parameter, by its type
fn parameter_value(raw: String, param_type: &ParameterType) -> Value {
    match param_type {
        ParameterType::StringList => Value::Sequence(
            raw.split(',')
                .map(|s| Value::String(s.to_string()))
                .collect(),
        ),
        _ => serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw)),
    }
}

impl SchemeLoader for SsmLoader {
    fn load(&self, reference: &Url, _ctx: &LoadContext<'_>, _base: &Url) -> Result<Value> {
        let name = parameter_name(reference)?;
        let (raw, param_type) = self
            .runtime()?
            .block_on(self.fetch_parameter(&name, reference))?;
        Ok(parameter_value(raw, &param_type))
    }

    fn scheme(&self) -> Scheme {
        Scheme::from("ssm")
    }
}

/// Register the SSM loader in the global registry.
pub fn register() {
    // Replacing is fine: register_all may run more than once
    let _ = register_global(Arc::new(SsmLoader::new()), true);
}
