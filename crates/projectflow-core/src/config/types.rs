//! Configuration types

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::paths::FallbackPolicy;

/// Main configuration for a ProjectFlow project
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Project name
    pub name: Option<String>,

    /// Directory roots
    pub directories: DirectoryConfig,

    /// Inheritable defaults applied to nodes that leave them unset
    pub defaults: DefaultsConfig,

    /// Execution engine settings
    pub execution: ExecutionConfig,

    /// Path resolution settings
    pub paths: PathsConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// Input / intermediate / output roots, relative to the project root
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub input: String,
    pub intermediate: String,
    pub output: String,
    /// Create the roots when the orchestrator is constructed
    pub create: bool,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            input: "input".to_string(),
            intermediate: "intermediate".to_string(),
            output: "output".to_string(),
            create: true,
        }
    }
}

/// Orchestrator-level values for inheritable node attributes.
///
/// Both fields are optional: an unset value here falls through to the hard
/// fallback constants in [`super::defaults`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub log_level: Option<LogLevel>,
    pub report_elapsed: Option<bool>,
}

/// Execution engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Worker pool size for parallel iterators (None = available cores)
    pub max_workers: Option<usize>,

    /// What to do with not-yet-dispatched expansions after one fails
    pub failure_policy: BatchFailurePolicy,
}

impl ExecutionConfig {
    /// Effective worker pool size
    pub fn worker_count(&self) -> usize {
        self.max_workers.unwrap_or_else(available_cores).max(1)
    }
}

fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Dispatch policy for a fan-out batch once an expansion has failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchFailurePolicy {
    /// Keep dispatching the remaining expansions
    #[default]
    DispatchAll,
    /// Do not start expansions that have not been dispatched yet
    StopDispatch,
}

/// Path resolution configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Behaviour when a logical name cannot be found
    pub fallback: FallbackPolicy,

    /// Extra search directories, relative to the project root
    pub search: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Console level when RUST_LOG is not set
    pub level: Option<LogLevel>,

    /// Directory for JSON log files
    pub dir: Option<PathBuf>,
}

/// Log level for nodes and the console subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Get the level name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
