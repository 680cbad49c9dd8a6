//! refconf CLI - expand `$ref` configuration documents from the command line
//!
//! Usage:
//!   refconf get file://config.json --param env=prod
//!   refconf expand config.json --url https://example.com/config.json
//!   refconf check config.json other.json

use clap::{Parser, Subcommand};
use colored::Colorize;
use indexmap::IndexMap;
use refconf_core::document::parse_document;
use refconf_core::expander::candidate_bases;
use refconf_core::{Error, Expander, Url, Value};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// refconf - JSON configuration with $ref references
#[derive(Parser)]
#[command(name = "refconf")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a document by url and expand every reference
    Get {
        /// Document url (file://, http://, https://, env://, param://)
        url: String,

        /// Parameter available to param:// references and {{name}} placeholders
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Output format: json, yaml
        #[arg(short, long, default_value = "json")]
        format: String,

        /// Only output the value at this dotted path
        #[arg(long)]
        path: Option<String>,

        /// Write to file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Expand a local document as if it was loaded from a url
    Expand {
        /// Document to expand
        file: PathBuf,

        /// Url the document is treated as coming from (default: its file:// url)
        #[arg(short, long)]
        url: Option<String>,

        /// Parameter available to param:// references and {{name}} placeholders
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Output format: json, yaml
        #[arg(short, long, default_value = "json")]
        format: String,
    },

    /// Check that documents parse, without expanding them
    Check {
        /// Document(s) to check
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

/// Run the CLI with the process arguments
pub fn run() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Get {
            url,
            params,
            format,
            path,
            output,
        } => cmd_get(&url, &params, &format, path.as_deref(), output),

        Commands::Expand {
            file,
            url,
            params,
            format,
        } => cmd_expand(&file, url, &params, &format),

        Commands::Check { files } => cmd_check(files),
    }
}

/// Parse `key=value` pairs; values are JSON when they decode, strings otherwise
fn parse_params(pairs: &[String]) -> Result<IndexMap<String, Value>, String> {
    let mut params = IndexMap::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| format!("Invalid parameter '{}', expected KEY=VALUE", pair))?;
        if key.is_empty() {
            return Err(format!("Invalid parameter '{}', empty key", pair));
        }
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::from(raw));
        params.insert(key.to_string(), value);
    }
    Ok(params)
}

fn render(value: &Value, format: &str) -> Result<String, String> {
    match format {
        "json" => serde_json::to_string_pretty(value)
            .map(|s| s + "\n")
            .map_err(|e| format!("Failed to render JSON: {}", e)),
        "yaml" | "yml" => {
            serde_yaml::to_string(value).map_err(|e| format!("Failed to render YAML: {}", e))
        }
        other => Err(format!("Unsupported format: {}. Use json or yaml.", other)),
    }
}

fn report(err: &Error) -> ExitCode {
    eprintln!("{} {}", "✗".red(), err);
    ExitCode::from(1)
}

fn emit(content: &str, output: Option<PathBuf>) -> ExitCode {
    if let Some(output_path) = output {
        if let Err(e) = std::fs::write(&output_path, content) {
            eprintln!("{}: {}", "Error writing file".red(), e);
            return ExitCode::from(2);
        }
        eprintln!("{} Wrote to {}", "✓".green(), output_path.display());
    } else {
        print!("{}", content);
    }
    ExitCode::SUCCESS
}

fn cmd_get(
    url: &str,
    params: &[String],
    format: &str,
    path: Option<&str>,
    output: Option<PathBuf>,
) -> ExitCode {
    let params = match parse_params(params) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{}", e.red());
            return ExitCode::from(2);
        }
    };

    let url = if params.is_empty() {
        url.to_string()
    } else {
        match Url::parse(url) {
            Ok(parsed) => parsed.with_params(&params).to_string(),
            Err(e) => return report(&e),
        }
    };

    // Relative file urls are resolved from the working directory only
    let bases = candidate_bases(&url, Path::new(""));
    let value = match Expander::default().get_with_bases(&url, &bases) {
        Ok(v) => v,
        Err(e) => return report(&e),
    };

    let value = match path {
        Some(path) => match value.get_path(path) {
            Ok(v) => v.clone(),
            Err(_) => {
                eprintln!("{}: Path '{}' not found", "Error".red(), path);
                return ExitCode::from(1);
            }
        },
        None => value,
    };

    match render(&value, format) {
        Ok(content) => emit(&content, output),
        Err(e) => {
            eprintln!("{}", e.red());
            ExitCode::from(2)
        }
    }
}

enum Failure {
    /// Bad arguments or unreadable input
    Usage(String),
    /// The document did not expand
    Resolve(Error),
}

impl Failure {
    fn exit(self) -> ExitCode {
        match self {
            Failure::Usage(msg) => {
                eprintln!("{}", msg.red());
                ExitCode::from(2)
            }
            Failure::Resolve(e) => report(&e),
        }
    }
}

fn cmd_expand(file: &Path, url: Option<String>, params: &[String], format: &str) -> ExitCode {
    let rendered = expand_file(file, url, params)
        .and_then(|value| render(&value, format).map_err(Failure::Usage));
    match rendered {
        Ok(content) => emit(&content, None),
        Err(failure) => failure.exit(),
    }
}

fn expand_file(file: &Path, url: Option<String>, params: &[String]) -> Result<Value, Failure> {
    let params = parse_params(params).map_err(Failure::Usage)?;
    let unreadable = |e: &dyn std::fmt::Display| {
        Failure::Usage(format!("{} {}: {}", "✗", file.display(), e))
    };

    let content = std::fs::read_to_string(file).map_err(|e| unreadable(&e))?;
    let doc = parse_document(&content).map_err(|e| unreadable(&e))?;

    let url = match url {
        Some(url) => url,
        None => {
            let abs = std::path::absolute(file).map_err(|e| unreadable(&e))?;
            format!("file://{}", abs.display())
        }
    };

    Expander::default()
        .expand(&doc, &url, &params)
        .map_err(Failure::Resolve)
}

fn cmd_check(files: Vec<PathBuf>) -> ExitCode {
    if check_files(&files) {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

/// Parse every file, reporting each; true if all parsed
fn check_files(files: &[PathBuf]) -> bool {
    let mut all_valid = true;

    for file in files {
        let content = match std::fs::read_to_string(file) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{} {}: {}", "✗".red(), file.display(), e);
                all_valid = false;
                continue;
            }
        };

        match parse_document(&content) {
            Ok(doc) => {
                let refs = count_references(&doc);
                println!(
                    "{} {}: valid ({} reference{})",
                    "✓".green(),
                    file.display(),
                    refs,
                    if refs == 1 { "" } else { "s" }
                );
            }
            Err(e) => {
                eprintln!("{} {}: {}", "✗".red(), file.display(), e);
                all_valid = false;
            }
        }
    }

    all_valid
}

fn count_references(value: &Value) -> usize {
    match value {
        Value::Mapping(map) => {
            let own = usize::from(value.is_reference());
            own + map.values().map(count_references).sum::<usize>()
        }
        Value::Sequence(items) => items.iter().map(count_references).sum(),
        _ => 0,
    }
}
