//! Execution errors

use thiserror::Error;

use projectflow_core::{ConfigError, PathError};

use crate::context::{expansion_label, ExpansionStep};
use crate::report::{ExpansionFailure, ExpansionOutput};

/// Failure reported by `Orchestrator::execute`
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A task body returned an error or panicked
    #[error("Task '{name}' at {position}{} failed: {message}", instance_suffix(.expansion))]
    Task {
        name: String,
        position: String,
        expansion: Vec<ExpansionStep>,
        message: String,
    },

    /// One or more expansions of an iterator failed
    #[error(
        "Iterator '{name}' at {position}: {} of {total} expansion(s) failed (indices {})",
        .failures.len(),
        format_indices(.failures)
    )]
    Expansion {
        name: String,
        position: String,
        total: usize,
        failures: Vec<ExpansionFailure>,
        /// Outputs of the expansions that succeeded
        outputs: Vec<ExpansionOutput>,
    },

    /// The skip check could not query the output path
    #[error("Skip check for '{name}' at {position}{} failed: {source}", instance_suffix(.expansion))]
    Path {
        name: String,
        position: String,
        expansion: Vec<ExpansionStep>,
        #[source]
        source: PathError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ExecutionError {
    /// Name of the node the failure is attributed to
    pub fn node_name(&self) -> Option<&str> {
        match self {
            Self::Task { name, .. } | Self::Expansion { name, .. } | Self::Path { name, .. } => {
                Some(name)
            }
            Self::Config(_) => None,
        }
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        match self {
            Self::Expansion { failures, .. } => failures.iter().map(|f| f.index).collect(),
            _ => Vec::new(),
        }
    }
}

fn instance_suffix(expansion: &[ExpansionStep]) -> String {
    if expansion.is_empty() {
        String::new()
    } else {
        format!(" ({})", expansion_label(expansion))
    }
}

fn format_indices(failures: &[ExpansionFailure]) -> String {
    failures
        .iter()
        .map(|f| f.index.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
