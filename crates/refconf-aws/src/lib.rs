//! AWS scheme loaders for refconf
//!
//! Adds `ssm://` and `s3://` to the schemes a document can reference.
//!
//! ## SSM Parameter Store
//!
//! ```json
//! {"database": {"password": {"$ref": "ssm:///app/prod/db-password"}}}
//! ```
//!
//! ## S3 objects
//!
//! ```json
//! {"shared": {"$ref": "s3://my-bucket/configs/shared.json?region=eu-west-1"}}
//! ```
//!
//! Call [`register_all`] once at startup to make both schemes available to
//! `refconf_core::get` and `refconf_core::expand`.

use once_cell::sync::Lazy;
use std::sync::RwLock;

#[cfg(any(feature = "ssm", feature = "s3"))]
mod client_cache;

#[cfg(feature = "ssm")]
mod ssm;

#[cfg(feature = "s3")]
mod s3;

#[cfg(feature = "ssm")]
pub use ssm::SsmLoader;

#[cfg(feature = "s3")]
pub use s3::S3Loader;

// =============================================================================
// Configuration
// =============================================================================

/// Settings shared by every AWS service
#[derive(Clone, Default, Debug)]
struct GlobalConfig {
    region: Option<String>,
    profile: Option<String>,
}

/// Settings for one AWS service
#[derive(Clone, Default, Debug)]
pub(crate) struct ServiceConfig {
    pub(crate) endpoint: Option<String>,
    pub(crate) region: Option<String>,
    pub(crate) profile: Option<String>,
}

/// Connection settings after precedence is applied
#[derive(Clone, Default, Debug, PartialEq, Eq, Hash)]
pub(crate) struct Resolved {
    pub(crate) endpoint: Option<String>,
    pub(crate) region: Option<String>,
    pub(crate) profile: Option<String>,
}

static GLOBAL_CONFIG: Lazy<RwLock<GlobalConfig>> = Lazy::new(Default::default);
static S3_CONFIG: Lazy<RwLock<ServiceConfig>> = Lazy::new(Default::default);
static SSM_CONFIG: Lazy<RwLock<ServiceConfig>> = Lazy::new(Default::default);

/// Configure defaults for all AWS services.
///
/// Precedence (highest to lowest):
/// 1. Query parameters of the reference (`ssm:///app/key?region=us-east-1`)
/// 2. Service configuration (`configure_s3()`, `configure_ssm()`)
/// 3. Global configuration (`configure()`)
/// 4. AWS SDK defaults (environment variables, credentials file)
///
/// Passing `None` leaves a setting unchanged.
///
/// # Example
///
/// ```rust,ignore
/// refconf_aws::configure(Some("us-east-1".to_string()), Some("prod".to_string()));
/// ```
pub fn configure(region: Option<String>, profile: Option<String>) {
    let mut config = GLOBAL_CONFIG.write().expect("AWS config lock poisoned");
    if let Some(r) = region {
        config.region = Some(r);
    }
    if let Some(p) = profile {
        config.profile = Some(p);
    }
}

/// Configure the S3 loader; overrides `configure()`.
///
/// `endpoint` points at an S3-compatible service such as LocalStack
/// (e.g. "http://localhost:4566"). Passing `None` leaves a setting unchanged.
pub fn configure_s3(endpoint: Option<String>, region: Option<String>, profile: Option<String>) {
    update_service(&S3_CONFIG, endpoint, region, profile);
}

/// Configure the SSM loader; overrides `configure()`.
pub fn configure_ssm(endpoint: Option<String>, region: Option<String>, profile: Option<String>) {
    update_service(&SSM_CONFIG, endpoint, region, profile);
}

fn update_service(
    service: &RwLock<ServiceConfig>,
    endpoint: Option<String>,
    region: Option<String>,
    profile: Option<String>,
) {
    let mut config = service.write().expect("AWS config lock poisoned");
    if let Some(e) = endpoint {
        config.endpoint = Some(e);
    }
    if let Some(r) = region {
        config.region = Some(r);
    }
    if let Some(p) = profile {
        config.profile = Some(p);
    }
}

/// Reset all configuration and drop cached clients.
///
/// Useful for test isolation.
pub fn reset() {
    *GLOBAL_CONFIG.write().expect("AWS config lock poisoned") = Default::default();
    *S3_CONFIG.write().expect("AWS config lock poisoned") = Default::default();
    *SSM_CONFIG.write().expect("AWS config lock poisoned") = Default::default();
    #[cfg(any(feature = "ssm", feature = "s3"))]
    client_cache::clear();
}

/// Apply precedence: reference > service > global
fn resolve_with_precedence(
    service: &RwLock<ServiceConfig>,
    endpoint: Option<&str>,
    region: Option<&str>,
    profile: Option<&str>,
) -> Resolved {
    if endpoint.is_some() && region.is_some() && profile.is_some() {
        return Resolved {
            endpoint: endpoint.map(String::from),
            region: region.map(String::from),
            profile: profile.map(String::from),
        };
    }

    // Copy out and release both locks before combining
    let (service, global) = {
        let global = GLOBAL_CONFIG.read().expect("AWS config lock poisoned");
        let service = service.read().expect("AWS config lock poisoned");
        (service.clone(), global.clone())
    };

    Resolved {
        endpoint: endpoint.map(String::from).or(service.endpoint),
        region: region
            .map(String::from)
            .or(service.region)
            .or(global.region),
        profile: profile
            .map(String::from)
            .or(service.profile)
            .or(global.profile),
    }
}

#[cfg_attr(not(feature = "s3"), allow(dead_code))]
pub(crate) fn resolve_s3_config(
    endpoint: Option<&str>,
    region: Option<&str>,
    profile: Option<&str>,
) -> Resolved {
    resolve_with_precedence(&S3_CONFIG, endpoint, region, profile)
}

#[cfg_attr(not(feature = "ssm"), allow(dead_code))]
pub(crate) fn resolve_ssm_config(
    endpoint: Option<&str>,
    region: Option<&str>,
    profile: Option<&str>,
) -> Resolved {
    resolve_with_precedence(&SSM_CONFIG, endpoint, region, profile)
}

/// Connection settings for one reference, from its query parameters
#[cfg(any(feature = "ssm", feature = "s3"))]
pub(crate) fn reference_settings(
    reference: &refconf_core::Url,
    resolve: fn(Option<&str>, Option<&str>, Option<&str>) -> Resolved,
) -> Resolved {
    let param = |name: &str| reference.query_param(name).and_then(|v| v.as_str());
    resolve(param("endpoint"), param("region"), param("profile"))
}

// =============================================================================
// Registration
// =============================================================================

/// Register every AWS loader in the global scheme registry.
///
/// Existing `ssm`/`s3` loaders are replaced.
pub fn register_all() {
    #[cfg(feature = "ssm")]
    ssm::register();

    #[cfg(feature = "s3")]
    s3::register();
}
