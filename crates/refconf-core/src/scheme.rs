//! Scheme loader architecture
//!
//! A scheme loader turns a reference url (`file://...`, `env://VAR`, ...) into
//! a document value. Loaders are looked up by scheme in a [`SchemeRegistry`];
//! extension crates register theirs in the global registry at startup.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use crate::error::{Error, Result};
use crate::expander;
use crate::loaders::{EnvLoader, ExpandOptions, FileLoader, ParamLoader};
use crate::url::Url;
use crate::value::Value;

/// Scheme tag a loader is registered under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scheme {
    File,
    Http,
    Https,
    Env,
    Param,
    /// Extension scheme (`ssm`, `s3`, ...), stored lowercase
    Other(String),
}

impl Scheme {
    /// The scheme as written in urls
    pub fn as_str(&self) -> &str {
        match self {
            Scheme::File => "file",
            Scheme::Http => "http",
            Scheme::Https => "https",
            Scheme::Env => "env",
            Scheme::Param => "param",
            Scheme::Other(s) => s,
        }
    }
}

impl From<&str> for Scheme {
    fn from(s: &str) -> Self {
        let lower = s.to_ascii_lowercase();
        match lower.as_str() {
            "file" => Scheme::File,
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            "env" => Scheme::Env,
            "param" => Scheme::Param,
            _ => Scheme::Other(lower),
        }
    }
}

impl From<String> for Scheme {
    fn from(s: String) -> Self {
        Scheme::from(s.as_str())
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context handed to loaders
#[derive(Clone, Copy)]
pub struct LoadContext<'a> {
    /// Registry the current expansion dispatches through
    pub registry: &'a SchemeRegistry,
}

impl<'a> LoadContext<'a> {
    /// Create a context dispatching through `registry`
    pub fn new(registry: &'a SchemeRegistry) -> Self {
        Self { registry }
    }

    /// Expand the foreign references of a freshly loaded document
    ///
    /// Loaders call this with the url the document was loaded from, so nested
    /// relative references resolve against it.
    pub fn expand_foreign(&self, doc: &Value, base: &Url) -> Result<Value> {
        expander::expand_foreign(doc, base, self)
    }
}

/// Trait for scheme loader implementations
pub trait SchemeLoader: Send + Sync {
    /// Load the document a reference points at
    ///
    /// # Arguments
    /// * `reference` - The reference url, scheme already filled in
    /// * `ctx` - Load context, used to expand nested references
    /// * `base` - Url of the document holding the reference
    fn load(&self, reference: &Url, ctx: &LoadContext<'_>, base: &Url) -> Result<Value>;

    /// The scheme this loader handles
    fn scheme(&self) -> Scheme;
}

/// A simple function-based loader
pub struct FnLoader<F>
where
    F: Fn(&Url, &LoadContext<'_>, &Url) -> Result<Value> + Send + Sync,
{
    scheme: Scheme,
    func: F,
}

impl<F> FnLoader<F>
where
    F: Fn(&Url, &LoadContext<'_>, &Url) -> Result<Value> + Send + Sync,
{
    /// Create a new function-based loader
    pub fn new(scheme: impl Into<Scheme>, func: F) -> Self {
        Self {
            scheme: scheme.into(),
            func,
        }
    }
}

impl<F> SchemeLoader for FnLoader<F>
where
    F: Fn(&Url, &LoadContext<'_>, &Url) -> Result<Value> + Send + Sync,
{
    fn load(&self, reference: &Url, ctx: &LoadContext<'_>, base: &Url) -> Result<Value> {
        (self.func)(reference, ctx, base)
    }

    fn scheme(&self) -> Scheme {
        self.scheme.clone()
    }
}

/// Registry of available scheme loaders
#[derive(Clone)]
pub struct SchemeRegistry {
    loaders: HashMap<Scheme, Arc<dyn SchemeLoader>>,
}

impl Default for SchemeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SchemeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<&str> = self.loaders.keys().map(Scheme::as_str).collect();
        schemes.sort_unstable();
        f.debug_struct("SchemeRegistry")
            .field("schemes", &schemes)
            .finish()
    }
}

impl SchemeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            loaders: HashMap::new(),
        }
    }

    /// Create a registry with the built-in loaders (file, env, param, and
    /// http/https when the `http` feature is enabled)
    pub fn with_builtins() -> Self {
        Self::with_options(ExpandOptions::default())
    }

    /// Like `with_builtins`, with explicit options for the network loaders
    pub fn with_options(options: ExpandOptions) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(FileLoader));
        registry.register(Arc::new(EnvLoader));
        registry.register(Arc::new(ParamLoader));

        #[cfg(feature = "http")]
        {
            use crate::loaders::HttpLoader;
            registry.register(Arc::new(HttpLoader::new(Scheme::Http, options.clone())));
            registry.register(Arc::new(HttpLoader::new(Scheme::Https, options)));
        }
        #[cfg(not(feature = "http"))]
        let _ = options;

        registry
    }

    /// Register a loader, replacing any loader for the same scheme
    pub fn register(&mut self, loader: Arc<dyn SchemeLoader>) {
        self.loaders.insert(loader.scheme(), loader);
    }

    /// Register a loader with optional force overwrite.
    ///
    /// # Returns
    /// * `Ok(())` on success
    /// * `Err(Error)` if force=false and a loader for the scheme exists
    pub fn register_with_force(&mut self, loader: Arc<dyn SchemeLoader>, force: bool) -> Result<()> {
        let scheme = loader.scheme();
        if !force && self.loaders.contains_key(&scheme) {
            return Err(Error::already_registered(scheme.as_str()));
        }
        self.loaders.insert(scheme, loader);
        Ok(())
    }

    /// Register a function as a loader
    pub fn register_fn<F>(&mut self, scheme: impl Into<Scheme>, func: F)
    where
        F: Fn(&Url, &LoadContext<'_>, &Url) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnLoader::new(scheme, func)));
    }

    /// Get the loader for a scheme
    pub fn get(&self, scheme: &Scheme) -> Option<&Arc<dyn SchemeLoader>> {
        self.loaders.get(scheme)
    }

    /// Check if a scheme has a loader
    pub fn contains(&self, scheme: &str) -> bool {
        self.loaders.contains_key(&Scheme::from(scheme))
    }

    /// Registered schemes, sorted
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.loaders.keys().map(|s| s.to_string()).collect();
        schemes.sort_unstable();
        schemes
    }

    /// Load a reference through the loader registered for its scheme
    pub fn load(&self, reference: &Url, base: &Url) -> Result<Value> {
        let scheme = Scheme::from(reference.scheme.as_str());
        let loader = self
            .get(&scheme)
            .ok_or_else(|| Error::unknown_scheme(scheme.as_str()))?;
        loader.load(reference, &LoadContext::new(self), base)
    }
}

// Global loader registry for extension crates
static GLOBAL_REGISTRY: OnceLock<RwLock<SchemeRegistry>> = OnceLock::new();

/// Get the global scheme registry.
///
/// This registry is lazily initialized with the built-in loaders.
/// Extension crates can register additional loaders here.
pub fn global_registry() -> &'static RwLock<SchemeRegistry> {
    GLOBAL_REGISTRY.get_or_init(|| RwLock::new(SchemeRegistry::with_builtins()))
}

/// Register a loader in the global registry.
///
/// # Arguments
/// * `loader` - The loader to register
/// * `force` - If true, overwrite any existing loader for the same scheme.
///   If false, return an error if the scheme is already registered.
pub fn register_global(loader: Arc<dyn SchemeLoader>, force: bool) -> Result<()> {
    let mut registry = global_registry()
        .write()
        .expect("Global registry lock poisoned");
    registry.register_with_force(loader, force)
}

/// Snapshot of the global registry
pub fn global_snapshot() -> SchemeRegistry {
    global_registry()
        .read()
        .expect("Global registry lock poisoned")
        .clone()
}
