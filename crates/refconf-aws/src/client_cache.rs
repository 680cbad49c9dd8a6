//! Shared AWS client cache for the loaders.
//!
//! Service clients are cached so their connection pools are reused. Each
//! (service, endpoint, region, profile) combination gets its own client.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::RwLock;

use aws_config::{BehaviorVersion, SdkConfig};
use once_cell::sync::Lazy;

use crate::Resolved;

type CacheKey = (TypeId, Resolved);

static CLIENT_CACHE: Lazy<RwLock<HashMap<CacheKey, Box<dyn Any + Send + Sync>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// An AWS service client that can be cached
pub trait AwsClient: Clone + Send + Sync + 'static {
    /// Create a client from a loaded SDK config
    fn from_sdk_config(config: &SdkConfig) -> Self;
}

#[cfg(feature = "ssm")]
impl AwsClient for aws_sdk_ssm::Client {
    fn from_sdk_config(config: &SdkConfig) -> Self {
        Self::new(config)
    }
}

#[cfg(feature = "s3")]
impl AwsClient for aws_sdk_s3::Client {
    fn from_sdk_config(config: &SdkConfig) -> Self {
        // S3-compatible endpoints (LocalStack, MinIO) want path-style buckets
        let conf = aws_sdk_s3::config::Builder::from(config)
            .force_path_style(config.endpoint_url().is_some())
            .build();
        Self::from_conf(conf)
    }
}

/// Get or create a client for the given settings.
///
/// The client type is inferred from the binding:
///
/// ```ignore
/// let client: aws_sdk_ssm::Client = get_client(&settings).await;
/// ```
pub async fn get_client<C: AwsClient>(settings: &Resolved) -> C {
    let key = (TypeId::of::<C>(), settings.clone());

    {
        let cache = CLIENT_CACHE.read().expect("Client cache lock poisoned");
        if let Some(client) = cache.get(&key).and_then(|b| b.downcast_ref::<C>()) {
            return client.clone();
        }
    }

    log::debug!(
        "Creating AWS client (endpoint={:?}, region={:?}, profile={:?})",
        settings.endpoint,
        settings.region,
        settings.profile
    );
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(endpoint) = &settings.endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    if let Some(region) = &settings.region {
        loader = loader.region(aws_config::Region::new(region.clone()));
    }
    if let Some(profile) = &settings.profile {
        loader = loader.profile_name(profile);
    }

    let client = C::from_sdk_config(&loader.load().await);

    // Another thread may have raced us here; keep the first client
    CLIENT_CACHE
        .write()
        .expect("Client cache lock poisoned")
        .entry(key)
        .or_insert_with(|| Box::new(client.clone()));

    client
}

/// Drop every cached client
pub fn clear() {
    CLIENT_CACHE
        .write()
        .expect("Client cache lock poisoned")
        .clear();
}
