//! Error types for ProjectFlow

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using FlowError
pub type Result<T> = std::result::Result<T, FlowError>;

/// Main error type for ProjectFlow operations
#[derive(Debug, Error)]
pub enum FlowError {
    /// Configuration and registration errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Path resolution errors
    #[error(transparent)]
    Path(#[from] PathError),
}

/// Configuration-related errors.
///
/// Registration problems are reported through this type as well, and are
/// always raised by the registration call itself, never deferred to execution.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// A registration call was given something that cannot be invoked
    #[error("Cannot register {descriptor}: value is not callable")]
    NotCallable { descriptor: String },

    /// Parent handle does not belong to this orchestrator's tree
    #[error("Invalid parent reference {parent} (tree has {len} nodes)")]
    InvalidParent { parent: usize, len: usize },

    /// A node with this name is already registered
    #[error("Task '{0}' is already registered")]
    DuplicateName(String),

    /// Replacement sequences of one iterator differ in length
    #[error("Iterator '{iterator}' has replacement sequences of unequal length: {lengths}")]
    ReplacementLengthMismatch { iterator: String, lengths: String },

    /// Iterator declared without any placeholder
    #[error("Iterator '{0}' has an empty replacement set")]
    EmptyReplacementSet(String),

    /// Placeholder name is not a valid identifier
    #[error("Invalid placeholder '{placeholder}' on '{task}': must match [A-Za-z_][A-Za-z0-9_]*")]
    InvalidPlaceholder { task: String, placeholder: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Path resolution errors
#[derive(Debug, Error)]
pub enum PathError {
    /// Logical name could not be found in any search directory
    #[error("Could not resolve '{name}' in: {searched}")]
    NotFound { name: String, searched: String },

    /// Directory could not be created
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Output pattern is not a valid glob
    #[error("Invalid output pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

const DESCRIPTOR_MAX: usize = 48;

/// Describe an arbitrary value for an error message.
///
/// Works for every JSON variant and never reads fields the value may not
/// have, so building the message cannot fail.
pub fn describe_value(value: &serde_json::Value) -> String {
    use serde_json::Value;

    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean `{}`", b),
        Value::Number(n) => format!("number `{}`", n),
        Value::String(s) => format!("string \"{}\"", truncate(s)),
        Value::Array(items) => format!("array of {} element(s)", items.len()),
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().take(4).map(String::as_str).collect();
            if keys.is_empty() {
                "empty object".to_string()
            } else {
                format!("object with keys [{}]", truncate(&keys.join(", ")))
            }
        }
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() <= DESCRIPTOR_MAX {
        s.to_string()
    } else {
        let head: String = s.chars().take(DESCRIPTOR_MAX).collect();
        format!("{}...", head)
    }
}
