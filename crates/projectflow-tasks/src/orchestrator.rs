//! The orchestrator: directory roots, inheritable defaults, the name registry
//! and the task tree, plus the registration and execution entry points.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, instrument};

use projectflow_core::config::{load_config_or_default, validate_config, FlowConfig, LogLevel};
use projectflow_core::{ensure_dir, ConfigError, FsPathResolver, PathResolver, ProjectDirs, Result};

use crate::context::{ProjectSnapshot, TaskContext};
use crate::error::ExecutionError;
use crate::node::{CallableRef, IteratorOptions, Iteration, NodeId, NodeKind, TaskNode, TaskOptions};
use crate::replacement::{substitute, ReplacementSet, Substitutions};
use crate::report::{ExecutionReport, NodeState, RunLog};
use crate::reporter::{TaskEvent, TaskReporter, TaskReporterRegistry};
use crate::scheduler::TreeScheduler;
use crate::tree::TaskTree;

pub struct Orchestrator {
    config: FlowConfig,
    dirs: ProjectDirs,
    resolver: Arc<dyn PathResolver>,
    reporters: TaskReporterRegistry,
    tree: Arc<TaskTree>,
    task_names_defined: BTreeSet<String>,
    handles: HashMap<String, NodeId>,
    last_report: Option<ExecutionReport>,
}

impl Orchestrator {
    /// Create an orchestrator for `root`, loading `projectflow.toml` (or
    /// `.yaml`) from it or its parents when present
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let (config, path) = load_config_or_default(root)?;
        if let Some(path) = path {
            debug!(path = %path.display(), "using project config");
        }
        Self::with_config(root, config)
    }

    /// Create an orchestrator with an explicit configuration
    pub fn with_config(root: impl Into<PathBuf>, config: FlowConfig) -> Result<Self> {
        validate_config(&config)?;
        let dirs = ProjectDirs::new(root, &config.directories, &config.paths);
        if config.directories.create {
            dirs.ensure()?;
        }
        info!(root = %dirs.root.display(), "orchestrator created");

        Ok(Self {
            config,
            dirs,
            resolver: Arc::new(FsPathResolver),
            reporters: TaskReporterRegistry::new(),
            tree: Arc::new(TaskTree::new()),
            task_names_defined: BTreeSet::new(),
            handles: HashMap::new(),
            last_report: None,
        })
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn PathResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Add a reporter next to the default tracing one
    pub fn with_reporter(mut self, reporter: Arc<dyn TaskReporter>) -> Self {
        self.reporters.register(reporter);
        self
    }

    /// Replace every reporter, the tracing one included
    pub fn with_reporters(mut self, reporters: TaskReporterRegistry) -> Self {
        self.reporters = reporters;
        self
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn dirs(&self) -> &ProjectDirs {
        &self.dirs
    }

    /// Orchestrator-level default for nodes that leave `log_level` unset
    pub fn set_log_level(&mut self, level: Option<LogLevel>) {
        self.config.defaults.log_level = level;
    }

    /// Orchestrator-level default for nodes that leave `report_elapsed` unset
    pub fn set_report_elapsed(&mut self, report: Option<bool>) {
        self.config.defaults.report_elapsed = report;
    }

    pub fn set_max_workers(&mut self, workers: Option<usize>) {
        self.config.execution.max_workers = workers;
    }

    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    pub fn tree(&self) -> &TaskTree {
        &self.tree
    }

    pub fn get(&self, id: NodeId) -> Option<&TaskNode> {
        self.tree.get(id)
    }

    /// Handle of a registered node by name
    pub fn node(&self, name: &str) -> Option<NodeId> {
        self.handles.get(name).copied()
    }

    /// Names of every registered node
    pub fn task_names_defined(&self) -> &BTreeSet<String> {
        &self.task_names_defined
    }

    /// Register a plain task
    pub fn add_task(&mut self, callable: impl Into<CallableRef>, options: TaskOptions) -> Result<NodeId> {
        self.register(callable.into(), options, None)
    }

    /// Register an iterator; its subtree runs once per replacement index
    pub fn add_iterator(
        &mut self,
        callable: impl Into<CallableRef>,
        replacements: ReplacementSet,
        options: IteratorOptions,
    ) -> Result<NodeId> {
        let iteration = Iteration {
            replacements,
            run_in_parallel: options.run_in_parallel,
            max_workers: options.max_workers,
        };
        self.register(callable.into(), options.task, Some(iteration))
    }

    /// Shared registration path for both node kinds.
    ///
    /// Every check runs before the tree is touched; a failed registration
    /// leaves the tree and registry unchanged.
    fn register(
        &mut self,
        callable: CallableRef,
        mut options: TaskOptions,
        iteration: Option<Iteration>,
    ) -> Result<NodeId> {
        let callable = callable.into_callable()?;
        let name = options
            .name
            .take()
            .unwrap_or_else(|| callable.name().to_string());
        let parent = options.parent.unwrap_or_else(|| self.tree.root());

        if !self.tree.contains(parent) {
            return Err(ConfigError::InvalidParent {
                parent: parent.index(),
                len: self.tree.len(),
            }
            .into());
        }
        if let Some(it) = &iteration {
            let expansions = it.replacements.validate(&name)?;
            debug!(iterator = %name, expansions, parallel = it.run_in_parallel, "replacement set validated");
        }
        if self.task_names_defined.contains(&name) {
            return Err(ConfigError::DuplicateName(name).into());
        }

        self.create_dirs(parent, &options.dirs, iteration.as_ref())?;

        let node = TaskNode::declared(name.clone(), callable, options, iteration);
        let kind = node.kind();
        let id = Arc::make_mut(&mut self.tree).insert(parent, node)?;
        self.task_names_defined.insert(name.clone());
        self.handles.insert(name.clone(), id);

        debug!(task = %name, %kind, %id, parent = %parent, "registered");
        Ok(id)
    }

    /// Create requested directories, once per combination of enclosing
    /// replacement values
    fn create_dirs(&self, parent: NodeId, templates: &[String], own: Option<&Iteration>) -> Result<()> {
        if templates.is_empty() {
            return Ok(());
        }

        let mut sets: Vec<&ReplacementSet> = self.tree.replacement_chain(parent);
        if let Some(it) = own {
            sets.push(&it.replacements);
        }

        let mut combos = vec![Substitutions::new()];
        for set in sets {
            combos = combos
                .iter()
                .flat_map(|outer| set.contexts(outer))
                .collect();
        }

        for template in templates {
            let mut created = BTreeSet::new();
            for subs in &combos {
                let path = self.dirs.root.join(substitute(template, subs));
                if created.insert(path.clone()) {
                    ensure_dir(&path)?;
                }
            }
        }
        Ok(())
    }

    /// Text outline of the tree
    pub fn plan(&self) -> String {
        let mut plan = String::new();
        for id in self.tree.walk() {
            let node = self.tree.node(id);
            let indent = "  ".repeat(self.tree.depth(id).saturating_sub(1));
            let mut line = format!("{}{} [{}, run={}", indent, node.name(), node.kind(), node.run_mode());
            if node.skip_existing() {
                line.push_str(", skip_existing");
            }
            if let Some(it) = node.iteration() {
                line.push_str(&format!(
                    ", {} expansion(s){}",
                    it.replacements.len(),
                    if it.run_in_parallel { ", parallel" } else { "" }
                ));
            }
            if !node.dirs().is_empty() {
                line.push_str(&format!(", dirs={}", node.dirs().join(",")));
            }
            line.push(']');
            if let Some(note) = node.note() {
                line.push_str(&format!(" - {}", note));
            }
            plan.push_str(&line);
            plan.push('\n');
        }
        plan
    }

    /// Execute the whole tree.
    ///
    /// The report of the last run is kept on the orchestrator either way, so
    /// the states of a partially completed run stay inspectable through
    /// [`Orchestrator::last_report`].
    #[instrument(skip_all, fields(nodes = self.tree.len() - 1))]
    pub async fn execute(&mut self) -> std::result::Result<ExecutionReport, ExecutionError> {
        let started_at = Utc::now();
        let start = Instant::now();

        let snapshot = Arc::new(ProjectSnapshot {
            config: self.config.clone(),
            dirs: self.dirs.clone(),
            resolver: self.resolver.clone(),
        });
        let reporter: Arc<dyn TaskReporter> = Arc::new(self.reporters.clone());
        let scheduler = TreeScheduler::new(self.tree.clone(), reporter.clone(), &self.config.execution);

        let mut ctx = TaskContext::new(snapshot);
        let mut log = RunLog::default();
        let result = scheduler.run(&mut ctx, &mut log).await;

        let report = ExecutionReport::new(started_at, start.elapsed(), log);
        reporter.report(&TaskEvent::AllCompleted {
            total: report.runs.len(),
            completed: report.completed(),
            skipped: report.skipped(),
            failed: report.failed(),
            duration: report.duration,
        });
        self.last_report = Some(report.clone());

        result.map(|()| report)
    }

    pub fn last_report(&self) -> Option<&ExecutionReport> {
        self.last_report.as_ref()
    }

    /// State of a node outside expansions after the last run
    pub fn state(&self, id: NodeId) -> NodeState {
        self.last_report
            .as_ref()
            .map_or(NodeState::Declared, |r| r.state_of(id))
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.tree.get(id).map(TaskNode::kind)
    }
}
