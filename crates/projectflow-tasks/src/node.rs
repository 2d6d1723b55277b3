//! Task node types: callables, run modes and per-node options

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use projectflow_core::config::{DefaultsConfig, LogLevel, FALLBACK_LOG_LEVEL, FALLBACK_REPORT_ELAPSED};
use projectflow_core::{describe_value, ConfigError};

use crate::context::TaskContext;
use crate::replacement::ReplacementSet;

/// Handle to a node in the orchestrator's tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Node variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Task,
    Iterator,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task => f.write_str("task"),
            Self::Iterator => f.write_str("iterator"),
        }
    }
}

/// Tri-state run flag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Never invoke the callable
    Never,
    /// Invoke unless `skip_existing` is set and the output exists
    #[default]
    Always,
    /// Invoke only when the declared output is missing
    IfMissing,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => f.write_str("never"),
            Self::Always => f.write_str("always"),
            Self::IfMissing => f.write_str("if_missing"),
        }
    }
}

/// Signature every task body implements
pub type TaskFn = dyn Fn(&mut TaskContext) -> anyhow::Result<Value> + Send + Sync;

/// A named, shareable task body
#[derive(Clone)]
pub struct Callable {
    name: String,
    func: Arc<TaskFn>,
}

impl Callable {
    /// Wrap a body under an explicit name
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut TaskContext) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Wrap a function item, deriving the name from its path.
    ///
    /// `from_fn(reproject_tiles)` is named `reproject_tiles`. Closures have no
    /// path of their own and come out as `<enclosing fn>::{{closure}}`; give
    /// them a name with [`Callable::new`].
    pub fn from_fn<F>(func: F) -> Self
    where
        F: Fn(&mut TaskContext) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::new(derive_name(std::any::type_name::<F>()), func)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, ctx: &mut TaskContext) -> anyhow::Result<Value> {
        (self.func)(ctx)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable").field("name", &self.name).finish()
    }
}

fn derive_name(type_path: &str) -> String {
    let base = type_path.split('<').next().unwrap_or(type_path);
    let mut segments: Vec<&str> = base.split("::").collect();
    match segments.pop() {
        Some("{{closure}}") => match segments.pop() {
            Some(parent) => format!("{}::{{{{closure}}}}", parent),
            None => "{{closure}}".to_string(),
        },
        Some(last) => last.to_string(),
        None => type_path.to_string(),
    }
}

/// What a registration call was handed.
///
/// Registration only accepts [`CallableRef::Callable`]; the other variants
/// exist so declarative sources (pipeline files, optional lookups) surface as
/// configuration errors instead of panics.
#[derive(Debug, Clone)]
pub enum CallableRef {
    Callable(Callable),
    /// No body at all
    Missing,
    /// A value that is not a body
    Value(Value),
}

impl CallableRef {
    /// Failure-safe description used in error messages
    pub fn descriptor(&self) -> String {
        match self {
            Self::Callable(c) => format!("callable `{}`", c.name()),
            Self::Missing => "null".to_string(),
            Self::Value(v) => describe_value(v),
        }
    }

    pub(crate) fn into_callable(self) -> Result<Callable, ConfigError> {
        match self {
            Self::Callable(c) => Ok(c),
            other => Err(ConfigError::NotCallable {
                descriptor: other.descriptor(),
            }),
        }
    }
}

impl From<Callable> for CallableRef {
    fn from(c: Callable) -> Self {
        Self::Callable(c)
    }
}

impl From<Option<Callable>> for CallableRef {
    fn from(c: Option<Callable>) -> Self {
        c.map_or(Self::Missing, Self::Callable)
    }
}

impl From<Value> for CallableRef {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => Self::Missing,
            other => Self::Value(other),
        }
    }
}

/// Node attributes that fall back to orchestrator defaults.
///
/// Resolution order, evaluated when the node is about to run:
/// 1. the value set on the node
/// 2. the orchestrator's value at execution time (`[defaults]`)
/// 3. [`FALLBACK_LOG_LEVEL`] / [`FALLBACK_REPORT_ELAPSED`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inherited {
    pub log_level: Option<LogLevel>,
    pub report_elapsed: Option<bool>,
}

impl Inherited {
    pub fn resolve(&self, defaults: &DefaultsConfig) -> Effective {
        Effective {
            log_level: self
                .log_level
                .or(defaults.log_level)
                .unwrap_or(FALLBACK_LOG_LEVEL),
            report_elapsed: self
                .report_elapsed
                .or(defaults.report_elapsed)
                .unwrap_or(FALLBACK_REPORT_ELAPSED),
        }
    }
}

/// Fully resolved inheritable attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Effective {
    pub log_level: LogLevel,
    pub report_elapsed: bool,
}

/// Iterator-only configuration
#[derive(Debug, Clone)]
pub struct Iteration {
    pub replacements: ReplacementSet,
    pub run_in_parallel: bool,
    /// Overrides `[execution] max_workers` for this fan-out
    pub max_workers: Option<usize>,
}

/// A node in the orchestration tree
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    /// `None` only for the synthetic root
    pub(crate) callable: Option<Callable>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) kind: NodeKind,
    pub(crate) run: RunMode,
    pub(crate) skip_existing: bool,
    pub(crate) output: Option<String>,
    pub(crate) dirs: Vec<String>,
    pub(crate) inherited: Inherited,
    pub(crate) iteration: Option<Iteration>,
    pub(crate) note: Option<String>,
    pub(crate) doc: Option<String>,
}

impl TaskNode {
    pub(crate) fn root() -> Self {
        Self {
            id: NodeId(0),
            name: "root".to_string(),
            callable: None,
            parent: None,
            children: Vec::new(),
            kind: NodeKind::Task,
            run: RunMode::Never,
            skip_existing: false,
            output: None,
            dirs: Vec::new(),
            inherited: Inherited::default(),
            iteration: None,
            note: None,
            doc: None,
        }
    }

    pub(crate) fn declared(
        name: String,
        callable: Callable,
        options: TaskOptions,
        iteration: Option<Iteration>,
    ) -> Self {
        let kind = if iteration.is_some() {
            NodeKind::Iterator
        } else {
            NodeKind::Task
        };
        Self {
            id: NodeId(0),
            name,
            callable: Some(callable),
            parent: None,
            children: Vec::new(),
            kind,
            run: options.run,
            skip_existing: options.skip_existing,
            output: options.output,
            dirs: options.dirs,
            inherited: options.inherited,
            iteration,
            note: options.note,
            doc: options.doc,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn callable(&self) -> Option<&Callable> {
        self.callable.as_ref()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn run_mode(&self) -> RunMode {
        self.run
    }

    pub fn skip_existing(&self) -> bool {
        self.skip_existing
    }

    /// Expected output template, relative to the project root
    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    /// Directory templates created at registration
    pub fn dirs(&self) -> &[String] {
        &self.dirs
    }

    pub fn inherited(&self) -> &Inherited {
        &self.inherited
    }

    pub fn iteration(&self) -> Option<&Iteration> {
        self.iteration.as_ref()
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }
}

/// Per-node options accepted by both registration calls
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// Overrides the name derived from the callable
    pub name: Option<String>,
    /// Defaults to the tree root
    pub parent: Option<NodeId>,
    pub run: RunMode,
    pub skip_existing: bool,
    pub output: Option<String>,
    /// Directory templates created at registration
    pub dirs: Vec<String>,
    pub inherited: Inherited,
    pub note: Option<String>,
    pub doc: Option<String>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn under(mut self, parent: NodeId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn run(mut self, run: RunMode) -> Self {
        self.run = run;
        self
    }

    pub fn skip_existing(mut self, skip: bool) -> Self {
        self.skip_existing = skip;
        self
    }

    pub fn output(mut self, template: impl Into<String>) -> Self {
        self.output = Some(template.into());
        self
    }

    pub fn with_dir(mut self, template: impl Into<String>) -> Self {
        self.dirs.push(template.into());
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.inherited.log_level = Some(level);
        self
    }

    pub fn report_elapsed(mut self, report: bool) -> Self {
        self.inherited.report_elapsed = Some(report);
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }
}

/// Options for `add_iterator`
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    pub task: TaskOptions,
    pub run_in_parallel: bool,
    pub max_workers: Option<usize>,
}

impl IteratorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.run_in_parallel = parallel;
        self
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.task = self.task.named(name);
        self
    }

    pub fn under(mut self, parent: NodeId) -> Self {
        self.task = self.task.under(parent);
        self
    }
}

impl From<TaskOptions> for IteratorOptions {
    fn from(task: TaskOptions) -> Self {
        Self {
            task,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn build_dem(_ctx: &mut TaskContext) -> anyhow::Result<Value> {
        Ok(Value::Null)
    }

    #[test]
    fn test_from_fn_derives_name() {
        let callable = Callable::from_fn(build_dem);
        assert_eq!(callable.name(), "build_dem");
    }

    #[test]
    fn test_derive_name_closure() {
        assert_eq!(
            derive_name("my_crate::pipeline::setup::{{closure}}"),
            "setup::{{closure}}"
        );
        assert_eq!(derive_name("my_crate::tiles::warp<f32>"), "warp");
    }

    #[test]
    fn test_callable_ref_descriptors() {
        assert_eq!(CallableRef::Missing.descriptor(), "null");
        assert_eq!(CallableRef::from(json!(3)).descriptor(), "number `3`");
        assert!(matches!(CallableRef::from(json!(null)), CallableRef::Missing));
        assert!(matches!(
            CallableRef::from(None::<Callable>),
            CallableRef::Missing
        ));
    }

    #[test]
    fn test_into_callable_rejects_values() {
        let err = CallableRef::from(json!({"fn": "x"})).into_callable().unwrap_err();
        assert!(matches!(err, ConfigError::NotCallable { .. }));
        assert!(err.to_string().contains("object with keys [fn]"));
    }

    #[test]
    fn test_inherited_resolution_order() {
        let defaults = DefaultsConfig {
            log_level: Some(LogLevel::Debug),
            report_elapsed: None,
        };

        let unset = Inherited::default().resolve(&defaults);
        assert_eq!(unset.log_level, LogLevel::Debug);
        assert_eq!(unset.report_elapsed, FALLBACK_REPORT_ELAPSED);

        let explicit = Inherited {
            log_level: Some(LogLevel::Error),
            report_elapsed: Some(false),
        }
        .resolve(&defaults);
        assert_eq!(explicit.log_level, LogLevel::Error);
        assert!(!explicit.report_elapsed);

        let bare = Inherited::default().resolve(&DefaultsConfig::default());
        assert_eq!(bare.log_level, FALLBACK_LOG_LEVEL);
    }

    #[test]
    fn test_options_builder() {
        let opts = TaskOptions::new()
            .named("mosaic")
            .run(RunMode::IfMissing)
            .output("output/mosaic.tif")
            .with_dir("intermediate/mosaic")
            .log_level(LogLevel::Warn)
            .note("merges tiles");

        assert_eq!(opts.name.as_deref(), Some("mosaic"));
        assert_eq!(opts.run, RunMode::IfMissing);
        assert_eq!(opts.dirs, vec!["intermediate/mosaic"]);
        assert_eq!(opts.inherited.log_level, Some(LogLevel::Warn));
        assert!(opts.inherited.report_elapsed.is_none());
    }
}
