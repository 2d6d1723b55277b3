//! Execution context handed to every task body
//!
//! A [`TaskContext`] is the only channel a task body has to shared state. The
//! project snapshot inside it is read-only; the attribute bag is local to the
//! context, so a worker's writes never leak into its siblings or back into
//! the orchestrator.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use projectflow_core::config::{FlowConfig, LogLevel};
use projectflow_core::{FallbackPolicy, PathError, PathResolver, ProjectDirs, Resolved};

use crate::node::Effective;
use crate::replacement::{substitute, Substitutions};

/// Read-only project state captured when execution starts
pub struct ProjectSnapshot {
    pub config: FlowConfig,
    pub dirs: ProjectDirs,
    pub resolver: Arc<dyn PathResolver>,
}

impl fmt::Debug for ProjectSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectSnapshot")
            .field("config", &self.config)
            .field("dirs", &self.dirs)
            .finish_non_exhaustive()
    }
}

/// One level of iterator expansion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionStep {
    pub iterator: String,
    pub index: usize,
}

impl fmt::Display for ExpansionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.iterator, self.index)
    }
}

/// Render an expansion path as `regions[1]/tiles[3]`
pub fn expansion_label(steps: &[ExpansionStep]) -> String {
    steps
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Debug, Clone)]
pub struct TaskContext {
    project: Arc<ProjectSnapshot>,
    substitutions: Substitutions,
    expansion: Vec<ExpansionStep>,
    task: String,
    effective: Option<Effective>,
    attrs: Map<String, Value>,
}

impl TaskContext {
    pub fn new(project: Arc<ProjectSnapshot>) -> Self {
        Self {
            project,
            substitutions: Substitutions::new(),
            expansion: Vec::new(),
            task: String::new(),
            effective: None,
            attrs: Map::new(),
        }
    }

    /// Child context for one iterator expansion
    pub(crate) fn expand(&self, iterator: &str, index: usize, substitutions: Substitutions) -> Self {
        let mut ctx = self.clone();
        ctx.substitutions = substitutions;
        ctx.expansion.push(ExpansionStep {
            iterator: iterator.to_string(),
            index,
        });
        ctx
    }

    pub(crate) fn enter(&mut self, task: &str, effective: Effective) {
        self.task = task.to_string();
        self.effective = Some(effective);
    }

    /// Name of the node currently executing
    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn config(&self) -> &FlowConfig {
        &self.project.config
    }

    pub fn dirs(&self) -> &ProjectDirs {
        &self.project.dirs
    }

    pub fn input_dir(&self) -> &Path {
        &self.project.dirs.input
    }

    pub fn intermediate_dir(&self) -> &Path {
        &self.project.dirs.intermediate
    }

    pub fn output_dir(&self) -> &Path {
        &self.project.dirs.output
    }

    /// Effective log level of the current node
    pub fn log_level(&self) -> LogLevel {
        self.effective
            .map(|e| e.log_level)
            .unwrap_or(projectflow_core::config::FALLBACK_LOG_LEVEL)
    }

    pub fn report_elapsed(&self) -> bool {
        self.effective
            .map(|e| e.report_elapsed)
            .unwrap_or(projectflow_core::config::FALLBACK_REPORT_ELAPSED)
    }

    /// Expansion path from the outermost iterator inward
    pub fn expansion(&self) -> &[ExpansionStep] {
        &self.expansion
    }

    /// Index of the innermost enclosing expansion
    pub fn index(&self) -> Option<usize> {
        self.expansion.last().map(|s| s.index)
    }

    pub fn substitutions(&self) -> &Substitutions {
        &self.substitutions
    }

    /// Current value of a placeholder
    pub fn value(&self, placeholder: &str) -> Option<&str> {
        self.substitutions.get(placeholder).map(String::as_str)
    }

    /// Apply this context's substitutions to a template
    pub fn substitute(&self, template: &str) -> String {
        substitute(template, &self.substitutions)
    }

    /// Substituted template as a path; relative paths are taken from the project root
    pub fn path(&self, template: &str) -> PathBuf {
        let substituted = PathBuf::from(self.substitute(template));
        if substituted.is_absolute() {
            substituted
        } else {
            self.project.dirs.root.join(substituted)
        }
    }

    /// Resolve a logical name with the configured fallback policy
    pub fn resolve(&self, logical_name: &str) -> Result<Resolved, PathError> {
        self.resolve_with(logical_name, self.project.config.paths.fallback)
    }

    pub fn resolve_with(&self, logical_name: &str, fallback: FallbackPolicy) -> Result<Resolved, PathError> {
        let name = self.substitute(logical_name);
        self.project
            .resolver
            .resolve(&name, &self.project.dirs.search_dirs(), fallback)
    }

    /// Whether the substituted template exists below the project root
    pub fn exists(&self, template: &str) -> Result<bool, PathError> {
        self.project
            .resolver
            .exists(&self.project.dirs.root, &self.substitute(template))
    }

    /// Local attribute; never shared with other workers
    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key)
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: Value) {
        self.attrs.insert(key.into(), value);
    }
}
