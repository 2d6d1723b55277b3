//! Tree scheduler: depth-first traversal with bounded iterator fan-out
//!
//! A single controlling task walks the tree in declared order. Task bodies run
//! on tokio's blocking pool one at a time, except below a parallel iterator,
//! where each expansion's subtree is spawned onto its own worker behind a
//! per-batch semaphore. The traversal waits for every spawned expansion before
//! moving past the iterator.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use projectflow_core::config::{BatchFailurePolicy, ExecutionConfig};
use projectflow_core::PathError;

use crate::context::{expansion_label, TaskContext};
use crate::error::ExecutionError;
use crate::node::{NodeId, NodeKind, RunMode, TaskNode};
use crate::replacement::Substitutions;
use crate::report::{
    BatchRecord, ExpansionFailure, ExpansionOutput, NodeRun, NodeState, RunLog, TaskOutput,
};
use crate::reporter::{TaskEvent, TaskReporter};
use crate::tree::TaskTree;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Whether a node instance invokes its body
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RunDecision {
    Run,
    Skip(String),
}

/// Result of one expansion's subtree
struct ExpansionRun {
    index: usize,
    substitutions: Substitutions,
    log: RunLog,
    error: Option<String>,
}

/// Executes a tree snapshot; cheap to clone into workers
#[derive(Clone)]
pub(crate) struct TreeScheduler {
    tree: Arc<TaskTree>,
    reporter: Arc<dyn TaskReporter>,
    workers: usize,
    policy: BatchFailurePolicy,
}

impl TreeScheduler {
    pub fn new(tree: Arc<TaskTree>, reporter: Arc<dyn TaskReporter>, execution: &ExecutionConfig) -> Self {
        Self {
            tree,
            reporter,
            workers: execution.worker_count(),
            policy: execution.failure_policy,
        }
    }

    /// Run the whole tree below the root
    #[instrument(skip_all, fields(nodes = self.tree.len() - 1, workers = self.workers))]
    pub async fn run(&self, ctx: &mut TaskContext, log: &mut RunLog) -> Result<(), ExecutionError> {
        let root = self.tree.root();
        self.run_children(root, ctx, log).await
    }

    /// Children of `parent` in declared order; the first failure aborts the rest
    fn run_children<'a>(
        &'a self,
        parent: NodeId,
        ctx: &'a mut TaskContext,
        log: &'a mut RunLog,
    ) -> BoxFuture<'a, Result<(), ExecutionError>> {
        Box::pin(async move {
            for &child in self.tree.children(parent) {
                self.run_node(child, ctx, log).await?;
            }
            Ok(())
        })
    }

    async fn run_node(
        &self,
        id: NodeId,
        ctx: &mut TaskContext,
        log: &mut RunLog,
    ) -> Result<(), ExecutionError> {
        match self.tree.node(id).kind() {
            NodeKind::Task => {
                // A skipped node still descends into its children
                self.run_instance(id, ctx, log).await?;
                self.run_children(id, ctx, log).await
            }
            NodeKind::Iterator => self.fan_out(id, ctx, log).await,
        }
    }

    /// Resolve the tri-state run flag and `skip_existing` for one instance
    pub(crate) fn decide(node: &TaskNode, ctx: &TaskContext) -> Result<RunDecision, PathError> {
        let consult_output = match node.run_mode() {
            RunMode::Never => return Ok(RunDecision::Skip("run = never".to_string())),
            RunMode::Always => node.skip_existing(),
            RunMode::IfMissing => true,
        };
        if !consult_output {
            return Ok(RunDecision::Run);
        }

        let Some(template) = node.output() else {
            debug!(task = node.name(), "no output declared, nothing to skip on");
            return Ok(RunDecision::Run);
        };

        if ctx.exists(template)? {
            Ok(RunDecision::Skip(format!(
                "output exists: {}",
                ctx.path(template).display()
            )))
        } else {
            Ok(RunDecision::Run)
        }
    }

    /// One pass of a node's state machine in the given context
    async fn run_instance(
        &self,
        id: NodeId,
        ctx: &mut TaskContext,
        log: &mut RunLog,
    ) -> Result<(), ExecutionError> {
        let node = self.tree.node(id);
        let effective = node.inherited().resolve(&ctx.config().defaults);
        ctx.enter(node.name(), effective);
        let instance = expansion_label(ctx.expansion());

        let mut record = NodeRun {
            node: id,
            name: node.name().to_string(),
            expansion: ctx.expansion().to_vec(),
            state: NodeState::Declared,
            elapsed: None,
            output: None,
            skip_reason: None,
            error: None,
        };

        let decision = match Self::decide(node, ctx) {
            Ok(decision) => decision,
            Err(source) => {
                let message = source.to_string();
                self.reporter.report(&TaskEvent::Failed {
                    task: record.name.clone(),
                    instance,
                    duration: Duration::ZERO,
                    error: message.clone(),
                });
                record.state = NodeState::Failed;
                record.error = Some(message);
                log.runs.push(record);
                return Err(ExecutionError::Path {
                    name: node.name().to_string(),
                    position: self.tree.position(id),
                    expansion: ctx.expansion().to_vec(),
                    source,
                });
            }
        };

        if let RunDecision::Skip(reason) = decision {
            self.reporter.report(&TaskEvent::Skipped {
                task: record.name.clone(),
                instance,
                level: effective.log_level,
                reason: reason.clone(),
            });
            record.state = NodeState::Skipped;
            record.skip_reason = Some(reason);
            log.runs.push(record);
            return Ok(());
        }

        let Some(callable) = node.callable().cloned() else {
            record.state = NodeState::Skipped;
            record.skip_reason = Some("no body".to_string());
            log.runs.push(record);
            return Ok(());
        };

        record.state = NodeState::Running;
        self.reporter.report(&TaskEvent::Started {
            task: record.name.clone(),
            instance: instance.clone(),
            level: effective.log_level,
        });

        let start = Instant::now();
        let mut owned = ctx.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let result = callable.call(&mut owned);
            (owned, result)
        })
        .await;
        let duration = start.elapsed();

        let failure = match joined {
            Ok((returned, Ok(value))) => {
                *ctx = returned;
                let elapsed = effective.report_elapsed.then_some(duration);
                self.reporter.report(&TaskEvent::Completed {
                    task: record.name.clone(),
                    instance,
                    level: effective.log_level,
                    duration: elapsed,
                });
                record.state = NodeState::Completed;
                record.elapsed = elapsed;
                record.output = Some(value);
                log.runs.push(record);
                return Ok(());
            }
            Ok((returned, Err(e))) => {
                *ctx = returned;
                format!("{:#}", e)
            }
            Err(join_error) => format!("task panicked: {}", join_error),
        };

        self.reporter.report(&TaskEvent::Failed {
            task: record.name.clone(),
            instance,
            duration,
            error: failure.clone(),
        });
        record.state = NodeState::Failed;
        record.elapsed = effective.report_elapsed.then_some(duration);
        record.error = Some(failure.clone());
        log.runs.push(record);

        Err(ExecutionError::Task {
            name: node.name().to_string(),
            position: self.tree.position(id),
            expansion: ctx.expansion().to_vec(),
            message: failure,
        })
    }

    /// The iterator's own instance followed by its subtree, in one expansion
    async fn run_expansion(&self, id: NodeId, index: usize, mut ctx: TaskContext) -> ExpansionRun {
        let mut log = RunLog::default();
        let mut result = self.run_instance(id, &mut ctx, &mut log).await;
        if result.is_ok() {
            result = self.run_children(id, &mut ctx, &mut log).await;
        }
        ExpansionRun {
            index,
            substitutions: ctx.substitutions().clone(),
            log,
            error: result.err().map(|e| e.to_string()),
        }
    }

    async fn fan_out(
        &self,
        id: NodeId,
        ctx: &mut TaskContext,
        log: &mut RunLog,
    ) -> Result<(), ExecutionError> {
        let node = self.tree.node(id);
        let Some(iteration) = node.iteration() else {
            return self.run_instance(id, ctx, log).await;
        };

        let contexts: Vec<TaskContext> = iteration
            .replacements
            .contexts(ctx.substitutions())
            .into_iter()
            .enumerate()
            .map(|(i, subs)| ctx.expand(node.name(), i, subs))
            .collect();
        let total = contexts.len();
        if total == 0 {
            warn!(iterator = node.name(), "replacement set is empty, no expansions");
        }

        let workers = iteration.max_workers.unwrap_or(self.workers).max(1);
        self.reporter.report(&TaskEvent::FanOut {
            iterator: node.name().to_string(),
            expansions: total,
            parallel: iteration.run_in_parallel,
            workers: if iteration.run_in_parallel { workers } else { 1 },
        });

        let (runs, not_dispatched) = if iteration.run_in_parallel {
            self.dispatch_parallel(id, contexts, workers).await
        } else {
            self.dispatch_sequential(id, contexts).await
        };

        let mut batch = BatchRecord {
            iterator: id,
            name: node.name().to_string(),
            expansion: ctx.expansion().to_vec(),
            parallel: iteration.run_in_parallel,
            total,
            outputs: Vec::new(),
            failures: Vec::new(),
            not_dispatched,
        };
        let mut nested = RunLog::default();

        for run in runs {
            match run.error {
                Some(message) => batch.failures.push(ExpansionFailure {
                    index: run.index,
                    message,
                }),
                None => batch.outputs.push(ExpansionOutput {
                    index: run.index,
                    substitutions: run.substitutions,
                    outputs: collect_outputs(&run.log),
                }),
            }
            nested.absorb(run.log);
        }

        self.reporter.report(&TaskEvent::Joined {
            iterator: batch.name.clone(),
            succeeded: batch.outputs.len(),
            failed: batch.failures.len(),
            not_dispatched: batch.not_dispatched.len(),
        });

        let failed = !batch.failures.is_empty();
        let error = failed.then(|| ExecutionError::Expansion {
            name: batch.name.clone(),
            position: self.tree.position(id),
            total,
            failures: batch.failures.clone(),
            outputs: batch.outputs.clone(),
        });

        log.absorb(nested);
        log.batches.push(batch);

        match error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Run expansions in index order, stopping at the first failure
    async fn dispatch_sequential(
        &self,
        id: NodeId,
        contexts: Vec<TaskContext>,
    ) -> (Vec<ExpansionRun>, Vec<usize>) {
        let total = contexts.len();
        let mut runs = Vec::with_capacity(total);

        for (index, ctx) in contexts.into_iter().enumerate() {
            let run = self.run_expansion(id, index, ctx).await;
            let failed = run.error.is_some();
            runs.push(run);
            if failed {
                return (runs, (index + 1..total).collect());
            }
        }

        (runs, Vec::new())
    }

    /// Spawn every expansion behind a semaphore and wait for all of them
    async fn dispatch_parallel(
        &self,
        id: NodeId,
        contexts: Vec<TaskContext>,
        workers: usize,
    ) -> (Vec<ExpansionRun>, Vec<usize>) {
        let semaphore = Arc::new(Semaphore::new(workers));
        let failed = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(contexts.len());
        let mut not_dispatched = Vec::new();

        for (index, ctx) in contexts.into_iter().enumerate() {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    not_dispatched.push(index);
                    continue;
                }
            };

            if self.policy == BatchFailurePolicy::StopDispatch && failed.load(Ordering::SeqCst) {
                debug!(index, "earlier expansion failed, not dispatching");
                not_dispatched.push(index);
                continue;
            }

            let scheduler = self.clone();
            let failed = failed.clone();
            let handle = tokio::spawn(async move {
                let run = scheduler.run_expansion(id, index, ctx).await;
                if run.error.is_some() {
                    failed.store(true, Ordering::SeqCst);
                }
                drop(permit);
                run
            });
            handles.push((index, handle));
        }

        // Join barrier
        let mut runs = Vec::with_capacity(handles.len());
        for (index, handle) in handles {
            match handle.await {
                Ok(run) => runs.push(run),
                Err(e) => {
                    warn!(index, error = %e, "expansion worker did not finish");
                    runs.push(ExpansionRun {
                        index,
                        substitutions: Substitutions::new(),
                        log: RunLog::default(),
                        error: Some(format!("worker panicked: {}", e)),
                    });
                }
            }
        }

        (runs, not_dispatched)
    }
}

/// Outputs of completed, non-null task instances in one expansion
fn collect_outputs(log: &RunLog) -> Vec<TaskOutput> {
    log.runs
        .iter()
        .filter(|r| r.state == NodeState::Completed)
        .filter_map(|r| match &r.output {
            Some(Value::Null) | None => None,
            Some(value) => Some(TaskOutput {
                task: r.name.clone(),
                value: value.clone(),
            }),
        })
        .collect()
}
