//! Two-phase `$ref` expansion
//!
//! Phase 1 replaces every foreign reference (anything with a scheme or a
//! path) by the document its loader returns. References that only carry a
//! fragment are kept for phase 2, which resolves them against the fully
//! loaded document: absolute fragments walk from the root, fragments with
//! leading dots climb the ancestry of the referencing node first.

use indexmap::IndexMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::loaders::is_missing_file;
use crate::scheme::{LoadContext, Scheme, SchemeRegistry};
use crate::template;
use crate::url::Url;
use crate::value::{parse_path, PathSegment, Value, DEFAULT_KEY, REF_KEY};

/// Chain of enclosing containers, innermost first
#[derive(Debug, Clone, Copy)]
pub struct Ancestry<'a> {
    node: &'a Value,
    path: &'a str,
    parent: Option<&'a Ancestry<'a>>,
}

impl<'a> Ancestry<'a> {
    /// Start a chain at `node`, found at dotted `path` in the document
    pub fn new(node: &'a Value, path: &'a str, parent: Option<&'a Ancestry<'a>>) -> Self {
        Self { node, path, parent }
    }

    /// The container at this link
    pub fn node(&self) -> &'a Value {
        self.node
    }

    /// Dotted path of the container; empty for the root
    pub fn path(&self) -> &'a str {
        self.path
    }

    /// Number of containers in the chain
    pub fn depth(&self) -> usize {
        1 + self.parent.map_or(0, Ancestry::depth)
    }

    /// The link `steps` levels up (0 is this link)
    pub fn up(&self, steps: usize) -> Option<&Ancestry<'a>> {
        let mut current = self;
        for _ in 0..steps {
            current = current.parent?;
        }
        Some(current)
    }
}

// =============================================================================
// Phase 1: foreign references
// =============================================================================

/// Replace foreign references in `doc`, loading them through `ctx`
///
/// `base` is the url `doc` was loaded from; its query supplies the template
/// parameters and it anchors relative references.
pub fn expand_foreign(doc: &Value, base: &Url, ctx: &LoadContext<'_>) -> Result<Value> {
    let mut base = base.clone();
    base.strip_trailing_slash();
    let params = base.query_value();
    Phase1 {
        base: &base,
        params: &params,
        ctx,
    }
    .expand(doc, "")
}

struct Phase1<'a> {
    base: &'a Url,
    params: &'a Value,
    ctx: &'a LoadContext<'a>,
}

impl Phase1<'_> {
    fn expand(&self, node: &Value, path: &str) -> Result<Value> {
        match node {
            Value::Mapping(map) if map.contains_key(REF_KEY) => self
                .replace_reference(map, path)
                .map_err(|e| at_path(e, path)),
            Value::Mapping(map) => {
                let mut out = IndexMap::with_capacity(map.len());
                for (key, value) in map {
                    let key = template::render(key, self.params).map_err(|e| at_path(e, path))?;
                    let value = self.expand(value, &key_path(path, &key))?;
                    out.insert(key, value);
                }
                Ok(Value::Mapping(out))
            }
            Value::Sequence(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| self.expand(item, &index_path(path, i)))
                .collect::<Result<Vec<_>>>()
                .map(Value::Sequence),
            scalar => Ok(scalar.clone()),
        }
    }

    fn replace_reference(&self, map: &IndexMap<String, Value>, path: &str) -> Result<Value> {
        let mut overrides = IndexMap::new();
        for (key, value) in map {
            if key != REF_KEY && key != DEFAULT_KEY {
                let key = template::render(key, self.params)?;
                let value = self.expand(value, &key_path(path, &key))?;
                overrides.insert(key, value);
            }
        }
        let default = map
            .get(DEFAULT_KEY)
            .map(|d| self.expand(d, path))
            .transpose()?;

        let candidates = self.candidates(&map[REF_KEY])?;
        if candidates.is_empty() {
            let value = default.unwrap_or_else(|| Value::Mapping(IndexMap::new()));
            return Ok(apply_overrides(value, overrides));
        }

        let mut loaded: Option<Value> = None;
        let mut deferred = Vec::new();
        let mut failures = Vec::new();

        for text in &candidates {
            let mut reference = Url::parse(text)?;
            if reference.is_local() {
                deferred.push(text.clone());
                continue;
            }
            if reference.scheme.is_empty() {
                reference.scheme = self.base.scheme.clone();
            }

            let scheme = Scheme::from(reference.scheme.as_str());
            let loader = self
                .ctx
                .registry
                .get(&scheme)
                .ok_or_else(|| Error::unknown_scheme(scheme.as_str()))?;

            let result = loader
                .load(&reference, self.ctx, self.base)
                .and_then(|value| select_fragment(value, &reference.fragment));
            match result {
                Ok(value) => {
                    log::debug!("Replaced reference {}", text);
                    match loaded.as_mut() {
                        Some(existing) => existing.set_default(value),
                        None => loaded = Some(value),
                    }
                }
                Err(e) => {
                    log::debug!("Reference candidate {} failed: {}", text, e);
                    failures.push(e);
                }
            }
        }

        if !deferred.is_empty() {
            let value = apply_overrides(
                loaded.unwrap_or_else(|| Value::Mapping(IndexMap::new())),
                overrides,
            );
            return Ok(match value {
                Value::Mapping(mut out) => {
                    let reference = if deferred.len() == 1 {
                        Value::String(deferred.remove(0))
                    } else {
                        Value::Sequence(deferred.into_iter().map(Value::String).collect())
                    };
                    out.insert(REF_KEY.to_string(), reference);
                    if let Some(default) = default {
                        out.insert(DEFAULT_KEY.to_string(), default);
                    }
                    Value::Mapping(out)
                }
                // A loaded scalar already satisfies the reference
                other => other,
            });
        }

        match (loaded, default) {
            (Some(value), _) => Ok(apply_overrides(value, overrides)),
            (None, Some(default)) => {
                log::debug!("Using $default for {}", candidates.join(", "));
                Ok(apply_overrides(default, overrides))
            }
            (None, None) => Err(Error::unresolved(
                candidates.join(", "),
                preferred_failure(failures),
            )),
        }
    }

    fn candidates(&self, reference: &Value) -> Result<Vec<String>> {
        let raw: Vec<&str> = match reference {
            Value::Null => Vec::new(),
            Value::String(s) => vec![s.as_str()],
            Value::Sequence(items) => items
                .iter()
                .map(|item| {
                    item.as_str().ok_or_else(|| {
                        Error::parse(format!(
                            "\"$ref\" entries must be strings, found {}",
                            item.type_name()
                        ))
                    })
                })
                .collect::<Result<_>>()?,
            other => {
                return Err(Error::parse(format!(
                    "\"$ref\" must be a string or a list of strings, found {}",
                    other.type_name()
                )))
            }
        };

        let mut out = Vec::with_capacity(raw.len());
        for text in raw {
            let rendered = template::render(text, self.params)?;
            let trimmed = rendered.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
        }
        Ok(out)
    }
}

fn select_fragment(value: Value, fragment: &str) -> Result<Value> {
    if fragment.is_empty() {
        return Ok(value);
    }
    value
        .lookup(fragment)?
        .cloned()
        .ok_or_else(|| Error::fragment_not_found(fragment))
}

fn key_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

fn index_path(parent: &str, index: usize) -> String {
    format!("{}[{}]", parent, index)
}

/// Tag an error with the node it came from, unless a deeper node already did
fn at_path(err: Error, path: &str) -> Error {
    if err.path.is_some() || path.is_empty() {
        err
    } else {
        err.with_path(path)
    }
}

/// Lay override properties over a resolved value; overrides win
fn apply_overrides(value: Value, overrides: IndexMap<String, Value>) -> Value {
    if overrides.is_empty() {
        return value;
    }
    let mut out = Value::Mapping(overrides);
    out.set_default(value);
    out
}

/// The failure worth reporting: the latest one not caused by a missing file,
/// otherwise the latest
pub(crate) fn preferred_failure(failures: Vec<Error>) -> Option<Error> {
    let position = failures
        .iter()
        .rposition(|e| !is_missing_file(e))
        .or_else(|| failures.len().checked_sub(1))?;
    failures.into_iter().nth(position)
}

// =============================================================================
// Phase 2: local references
// =============================================================================

/// Resolve the fragment-only references left by phase 1
pub fn expand_locals(doc: &Value) -> Result<Value> {
    Phase2 {
        root: doc,
        stack: Vec::new(),
    }
    .expand(doc, "", None)
}

struct Phase2<'r> {
    root: &'r Value,
    /// Targets being expanded, with the fragment that reached them
    stack: Vec<(*const Value, String)>,
}

impl Phase2<'_> {
    fn expand(&mut self, node: &Value, path: &str, chain: Option<&Ancestry<'_>>) -> Result<Value> {
        match node {
            Value::Mapping(map) => {
                let here = Ancestry::new(node, path, chain);
                let mut out = IndexMap::with_capacity(map.len());
                let mut reference = None;
                let mut default = None;
                let is_reference = map.contains_key(REF_KEY);

                for (key, value) in map {
                    match key.as_str() {
                        REF_KEY => reference = Some(value),
                        DEFAULT_KEY if is_reference => default = Some(value),
                        _ if value.is_null() => {}
                        _ => {
                            let value = self.expand(value, &key_path(path, key), Some(&here))?;
                            out.insert(key.clone(), value);
                        }
                    }
                }

                let Some(reference) = reference else {
                    return Ok(Value::Mapping(out));
                };
                let target = self
                    .resolve(reference, default, path, chain)
                    .map_err(|e| at_path(e, path))?;
                Ok(apply_overrides(target, out))
            }
            Value::Sequence(items) => {
                let here = Ancestry::new(node, path, chain);
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.expand(item, &index_path(path, i), Some(&here)))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Sequence)
            }
            scalar => Ok(scalar.clone()),
        }
    }

    /// Resolve deferred candidates in order; the first existing path wins
    fn resolve(
        &mut self,
        reference: &Value,
        default: Option<&Value>,
        path: &str,
        chain: Option<&Ancestry<'_>>,
    ) -> Result<Value> {
        let candidates: Vec<&str> = match reference {
            Value::String(s) => vec![s.as_str()],
            Value::Sequence(items) => items.iter().filter_map(Value::as_str).collect(),
            other => {
                return Err(Error::parse(format!(
                    "\"$ref\" must be a string or a list of strings, found {}",
                    other.type_name()
                )))
            }
        };

        for text in &candidates {
            let url = Url::parse(text)?;
            if !url.is_local() {
                return Err(Error::unresolved(*text, None)
                    .with_help("Foreign references are resolved before local ones; expand the document first"));
            }
            if let Some(value) = self.lookup(&url.fragment, chain)? {
                return Ok(value);
            }
        }

        match default {
            Some(default) => self.expand(default, path, chain),
            None => Err(Error::ref_not_found(candidates.join(", "))),
        }
    }

    /// Find and expand the target of one fragment; `Ok(None)` if the path is missing
    fn lookup(&mut self, fragment: &str, chain: Option<&Ancestry<'_>>) -> Result<Option<Value>> {
        let dots = fragment.chars().take_while(|c| *c == '.').count();
        let segments = parse_path(&fragment[dots..])?;

        if dots == 0 {
            let root = self.root;
            return self.descend(root, String::new(), None, &segments, fragment);
        }

        let depth = chain.map_or(0, Ancestry::depth);
        if dots > depth {
            return Err(Error::out_of_bounds(fragment));
        }
        match chain.and_then(|c| c.up(dots - 1)) {
            Some(link) => {
                self.descend(link.node, link.path.to_string(), link.parent, &segments, fragment)
            }
            None => Err(Error::out_of_bounds(fragment)),
        }
    }

    /// Walk `segments` from `current`, extending the ancestry on the way, then
    /// expand the target in its own ancestry
    fn descend(
        &mut self,
        current: &Value,
        path: String,
        chain: Option<&Ancestry<'_>>,
        segments: &[PathSegment],
        fragment: &str,
    ) -> Result<Option<Value>> {
        let Some((first, rest)) = segments.split_first() else {
            return self.expand_target(current, &path, chain, fragment).map(Some);
        };
        let Some(next) = current.child(first) else {
            return Ok(None);
        };
        let next_path = match first {
            PathSegment::Key(key) => key_path(&path, key),
            PathSegment::Index(i) => index_path(&path, *i),
        };
        let link = Ancestry::new(current, &path, chain);
        self.descend(next, next_path, Some(&link), rest, fragment)
    }

    fn expand_target(
        &mut self,
        target: &Value,
        path: &str,
        chain: Option<&Ancestry<'_>>,
        fragment: &str,
    ) -> Result<Value> {
        if self.stack.iter().any(|(p, _)| std::ptr::eq(*p, target)) {
            let mut names: Vec<String> = self.stack.iter().map(|(_, f)| format!("#{}", f)).collect();
            names.push(format!("#{}", fragment));
            return Err(Error::circular_reference(names));
        }

        self.stack.push((target as *const Value, fragment.to_string()));
        let result = self.expand(target, path, chain);
        self.stack.pop();
        result
    }
}

// =============================================================================
// Front door
// =============================================================================

/// Loads and expands documents through an explicit scheme registry
#[derive(Debug, Clone)]
pub struct Expander {
    registry: SchemeRegistry,
}

impl Default for Expander {
    fn default() -> Self {
        Self::new(SchemeRegistry::with_builtins())
    }
}

impl Expander {
    /// Create an expander dispatching through `registry`
    pub fn new(registry: SchemeRegistry) -> Self {
        Self { registry }
    }

    /// The registry loaders are looked up in
    pub fn registry(&self) -> &SchemeRegistry {
        &self.registry
    }

    /// Mutable access to the registry, to add loaders
    pub fn registry_mut(&mut self) -> &mut SchemeRegistry {
        &mut self.registry
    }

    /// Load the document at `url` and expand it
    ///
    /// A relative `file://` url is tried against the directory of the calling
    /// source file, then against the working directory. The caller's directory
    /// is only used when the compiler recorded an absolute source path.
    #[track_caller]
    pub fn get(&self, url: &str) -> Result<Value> {
        let caller = std::panic::Location::caller().file();
        self.get_with_bases(url, &candidate_bases(url, Path::new(caller)))
    }

    /// Load the document at `url`, trying each base url in turn
    pub fn get_with_bases(&self, url: &str, bases: &[Url]) -> Result<Value> {
        if !url.contains("://") {
            return Err(Error::missing_protocol(url));
        }

        let mut wrapper = IndexMap::new();
        wrapper.insert(REF_KEY.to_string(), Value::from(url));
        let doc = Value::Mapping(wrapper);
        let ctx = LoadContext::new(&self.registry);

        let mut failures = Vec::new();
        for base in bases {
            match expand_foreign(&doc, base, &ctx) {
                Ok(phase1) => return expand_locals(&phase1),
                Err(e) => {
                    log::debug!("Loading {} relative to {} failed: {}", url, base, e);
                    failures.push(e);
                }
            }
        }

        Err(preferred_failure(failures)
            .unwrap_or_else(|| Error::internal(format!("No base url to load {} from", url))))
    }

    /// Expand an already loaded document as if it came from `doc_url`
    ///
    /// `params` are laid over the query parameters of `doc_url`.
    pub fn expand(
        &self,
        doc: &Value,
        doc_url: &str,
        params: &IndexMap<String, Value>,
    ) -> Result<Value> {
        if !doc_url.contains("://") {
            return Err(Error::missing_protocol(doc_url));
        }
        let base = Url::parse(doc_url)?.with_params(params);
        let phase1 = expand_foreign(doc, &base, &LoadContext::new(&self.registry))?;
        expand_locals(&phase1)
    }
}

/// Base urls a document url is loaded relative to
///
/// Only relative `file://` urls depend on the base: they get the directory of
/// `caller_file` and the working directory, in that order. A relative
/// `caller_file` is skipped, since the compiler reports it against a crate or
/// workspace root that need not be the working directory.
pub fn candidate_bases(url: &str, caller_file: &Path) -> Vec<Url> {
    let relative_file = url
        .strip_prefix("file://")
        .is_some_and(|rest| !rest.starts_with('/') && !rest.starts_with('~'));
    if !relative_file {
        return vec![Url::default()];
    }

    let mut directories: Vec<PathBuf> = Vec::new();
    if let Some(parent) = caller_file.parent().filter(|p| p.is_absolute()) {
        directories.push(parent.to_path_buf());
    }
    directories.extend(std::env::current_dir().ok());
    directories.dedup();

    directories
        .iter()
        .map(|dir| Url {
            scheme: "file".to_string(),
            path: format!("{}/.", dir.to_string_lossy().trim_end_matches('/')),
            ..Url::default()
        })
        .collect()
}
