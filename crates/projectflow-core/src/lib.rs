//! ProjectFlow Core - Shared foundations for the task orchestration engine
//!
//! This crate provides the error taxonomy, project configuration, logging
//! setup and the path-resolution collaborator used by `projectflow-tasks`.

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use config::{
    BatchFailurePolicy, DefaultsConfig, DirectoryConfig, ExecutionConfig, FlowConfig, LogLevel,
    LoggingConfig, PathsConfig,
};
pub use error::{describe_value, ConfigError, FlowError, PathError, Result};
pub use paths::{ensure_dir, FallbackPolicy, FsPathResolver, PathResolver, ProjectDirs, Resolved};
