//! Error types for refconf
//!
//! Errors are structured: a kind, the document path or reference where the
//! failure happened, an optional help message, and the wrapped cause so the
//! original failure stays reachable through `source()`.

use std::fmt;

/// Result type alias for refconf operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for refconf operations
#[derive(Debug, Clone)]
pub struct Error {
    /// The kind of error that occurred
    pub kind: ErrorKind,
    /// Reference or document path the error relates to
    pub path: Option<String>,
    /// Actionable help message
    pub help: Option<String>,
    /// Human-readable detail (parser message, I/O error text)
    pub cause: Option<String>,
    /// Wrapped error this one was raised from
    pub source: Option<Box<Error>>,
}

/// Categories of errors that can occur
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// `get` was called with a url that has no `://`
    MissingProtocol { url: String },
    /// A `$ref` or document url could not be decomposed
    MalformedUrl { url: String },
    /// No loader is registered for the scheme
    UnknownScheme { scheme: String },
    /// A scheme loader failed
    Load(LoadErrorKind),
    /// A relative fragment climbs above the document root
    ReferenceOutOfBounds { fragment: String },
    /// No candidate of a reference could be loaded and no `$default` was given
    UnresolvedReference { reference: String },
    /// A local reference points at a path that does not exist
    RefNotFound { fragment: String },
    /// A local reference chain loops back on itself
    CircularReference,
    /// A loader is already registered for the scheme
    AlreadyRegistered { scheme: String },
    /// Malformed document or template text
    Parse,
    /// Internal error (bug in refconf)
    Internal,
}

/// Specific scheme loader failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadErrorKind {
    /// File could not be opened or read
    FileRead { path: String },
    /// File content is neither JSON nor INI
    FileParse { path: String },
    /// Environment variable is not set
    MissingEnvVar { name: String },
    /// Parameter is absent from the referencing url
    MissingParam { name: String },
    /// HTTP request failed
    Http { url: String, status: Option<u16> },
    /// Fragment of a loaded document does not exist
    FragmentNotFound { fragment: String },
    /// Failure reported by an extension loader
    Custom { scheme: String, message: String },
}

impl Error {
    fn with_kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            path: None,
            help: None,
            cause: None,
            source: None,
        }
    }

    /// Create a parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            cause: Some(message.into()),
            ..Self::with_kind(ErrorKind::Parse)
        }
    }

    /// Create a missing protocol error
    pub fn missing_protocol(url: impl Into<String>) -> Self {
        Self {
            help: Some("Declare a protocol, e.g. file://config.json or https://host/config.json".into()),
            ..Self::with_kind(ErrorKind::MissingProtocol { url: url.into() })
        }
    }

    /// Create a malformed url error
    pub fn malformed_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            cause: Some(message.into()),
            ..Self::with_kind(ErrorKind::MalformedUrl { url: url.into() })
        }
    }

    /// Create an unknown scheme error
    pub fn unknown_scheme(scheme: impl Into<String>) -> Self {
        let s = scheme.into();
        Self {
            help: Some(format!("Register a loader for '{}' or check for typos", s)),
            ..Self::with_kind(ErrorKind::UnknownScheme { scheme: s })
        }
    }

    /// Create a file read error
    pub fn file_read(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            help: Some("Check that the file exists relative to the referencing document".into()),
            cause: Some(message.into()),
            ..Self::with_kind(ErrorKind::Load(LoadErrorKind::FileRead { path: path.into() }))
        }
    }

    /// Create a file parse error
    pub fn file_parse(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            help: Some("The file must contain JSON (comments allowed) or INI".into()),
            cause: Some(message.into()),
            ..Self::with_kind(ErrorKind::Load(LoadErrorKind::FileParse { path: path.into() }))
        }
    }

    /// Create a missing environment variable error
    pub fn missing_env_var(name: impl Into<String>) -> Self {
        let n = name.into();
        Self {
            help: Some(format!(
                "Set the {} environment variable or provide a \"$default\"",
                n
            )),
            ..Self::with_kind(ErrorKind::Load(LoadErrorKind::MissingEnvVar { name: n }))
        }
    }

    /// Create a missing parameter error
    pub fn missing_param(name: impl Into<String>) -> Self {
        let n = name.into();
        Self {
            help: Some(format!(
                "Pass '{}' as a query parameter of the referencing url",
                n
            )),
            ..Self::with_kind(ErrorKind::Load(LoadErrorKind::MissingParam { name: n }))
        }
    }

    /// Create an HTTP request failed error
    pub fn http_request_failed(
        url: impl Into<String>,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        let url_str = url.into();
        Self {
            help: Some(format!(
                "Check that the URL '{}' is accessible and returns valid content",
                url_str
            )),
            cause: Some(message.into()),
            ..Self::with_kind(ErrorKind::Load(LoadErrorKind::Http {
                url: url_str,
                status,
            }))
        }
    }

    /// Create a fragment not found error for a loaded document
    pub fn fragment_not_found(fragment: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Load(LoadErrorKind::FragmentNotFound {
            fragment: fragment.into(),
        }))
    }

    /// Create a custom loader error
    pub fn loader_custom(scheme: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Load(LoadErrorKind::Custom {
            scheme: scheme.into(),
            message: message.into(),
        }))
    }

    /// Create a reference out of bounds error
    pub fn out_of_bounds(fragment: impl Into<String>) -> Self {
        Self {
            help: Some("Use fewer leading dots in the relative reference".into()),
            ..Self::with_kind(ErrorKind::ReferenceOutOfBounds {
                fragment: fragment.into(),
            })
        }
    }

    /// Create an unresolved reference error wrapping the most relevant cause
    pub fn unresolved(reference: impl Into<String>, cause: Option<Error>) -> Self {
        Self {
            help: Some("Fix the reference or provide a \"$default\"".into()),
            source: cause.map(Box::new),
            ..Self::with_kind(ErrorKind::UnresolvedReference {
                reference: reference.into(),
            })
        }
    }

    /// Create a local reference not found error
    pub fn ref_not_found(fragment: impl Into<String>) -> Self {
        let f = fragment.into();
        Self {
            help: Some(format!("Check that '{}' exists in the document", f)),
            ..Self::with_kind(ErrorKind::RefNotFound { fragment: f })
        }
    }

    /// Create a circular reference error
    pub fn circular_reference(chain: Vec<String>) -> Self {
        Self {
            help: Some("Break the circular dependency by removing one of the references".into()),
            cause: Some(format!("Chain: {}", chain.join(" → "))),
            ..Self::with_kind(ErrorKind::CircularReference)
        }
    }

    /// Create a loader already registered error
    pub fn already_registered(scheme: impl Into<String>) -> Self {
        let s = scheme.into();
        Self {
            help: Some(format!(
                "Use register_with_force(..., true) to override the '{}' loader",
                s
            )),
            ..Self::with_kind(ErrorKind::AlreadyRegistered { scheme: s })
        }
    }

    /// Create an internal error (bug in refconf)
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            help: Some("This is likely a bug in refconf. Please report it.".into()),
            cause: Some(message.into()),
            ..Self::with_kind(ErrorKind::Internal)
        }
    }

    /// Add path context to the error
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Add help message to the error
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// True for failures caused by a file that could not be read.
    ///
    /// These are reported last when several candidates of one reference fail.
    pub fn is_file_read(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Load(LoadErrorKind::FileRead { .. })
        )
    }

    /// Walk the wrapped causes down to the innermost error
    pub fn root_cause(&self) -> &Error {
        let mut current = self;
        while let Some(next) = current.source.as_deref() {
            current = next;
        }
        current
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::MissingProtocol { url } => {
                write!(f, "{} must have a protocol (eg https://) declared", url)?
            }
            ErrorKind::MalformedUrl { url } => write!(f, "Problem parsing {} to URL", url)?,
            ErrorKind::UnknownScheme { scheme } => write!(f, "Unknown protocol {}", scheme)?,
            ErrorKind::Load(l) => match l {
                LoadErrorKind::FileRead { path } => write!(f, "Can not read file {}", path)?,
                LoadErrorKind::FileParse { path } => write!(f, "Can not parse file {}", path)?,
                LoadErrorKind::MissingEnvVar { name } => {
                    write!(f, "Environment variable not found: {}", name)?
                }
                LoadErrorKind::MissingParam { name } => {
                    write!(f, "Parameter not found: {}", name)?
                }
                LoadErrorKind::Http { url, status } => {
                    write!(f, "HTTP request failed: {}", url)?;
                    if let Some(s) = status {
                        write!(f, " (status {})", s)?;
                    }
                }
                LoadErrorKind::FragmentNotFound { fragment } => {
                    write!(f, "Fragment not found in loaded document: {}", fragment)?
                }
                LoadErrorKind::Custom { scheme, message } => {
                    write!(f, "Loader '{}' error: {}", scheme, message)?
                }
            },
            ErrorKind::ReferenceOutOfBounds { fragment } => {
                write!(f, "\"{}\" reaches up past the root document", fragment)?
            }
            ErrorKind::UnresolvedReference { reference } => {
                write!(f, "Problem replacing ref {}", reference)?
            }
            ErrorKind::RefNotFound { fragment } => {
                write!(f, "Referenced path not found: {}", fragment)?
            }
            ErrorKind::CircularReference => write!(f, "Circular reference detected")?,
            ErrorKind::AlreadyRegistered { scheme } => {
                write!(f, "Loader for '{}' is already registered", scheme)?
            }
            ErrorKind::Parse => write!(f, "Parse error")?,
            ErrorKind::Internal => write!(f, "Internal error")?,
        }

        if let Some(path) = &self.path {
            write!(f, "\n  Path: {}", path)?;
        }

        if let Some(cause) = &self.cause {
            write!(f, "\n  {}", cause)?;
        }

        if let Some(source) = &self.source {
            write!(f, "\n  Caused by: {}", source.to_string().replace('\n', "\n  "))?;
        }

        if let Some(help) = &self.help {
            write!(f, "\n  Help: {}", help)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}
