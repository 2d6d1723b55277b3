//! Task execution reporting

use std::sync::Arc;
use std::time::Duration;

use projectflow_core::config::LogLevel;

/// Events emitted during execution.
///
/// `instance` is the expansion label (`tiles[2]`), empty outside iterators.
/// Lifecycle events carry the node's effective log level.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// A node instance is about to invoke its body
    Started {
        task: String,
        instance: String,
        level: LogLevel,
    },
    /// A node instance returned normally
    Completed {
        task: String,
        instance: String,
        level: LogLevel,
        /// `None` when elapsed reporting is disabled for the node
        duration: Option<Duration>,
    },
    /// A node instance failed
    Failed {
        task: String,
        instance: String,
        duration: Duration,
        error: String,
    },
    /// A node instance was not invoked
    Skipped {
        task: String,
        instance: String,
        level: LogLevel,
        reason: String,
    },
    /// An iterator is dispatching its expansions
    FanOut {
        iterator: String,
        expansions: usize,
        parallel: bool,
        workers: usize,
    },
    /// An iterator's join barrier was reached
    Joined {
        iterator: String,
        succeeded: usize,
        failed: usize,
        not_dispatched: usize,
    },
    /// Execution finished
    AllCompleted {
        total: usize,
        completed: usize,
        skipped: usize,
        failed: usize,
        duration: Duration,
    },
}

/// Trait for reporting execution progress
pub trait TaskReporter: Send + Sync {
    fn report(&self, event: &TaskEvent);
}

macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            LogLevel::Trace => tracing::trace!($($arg)+),
            LogLevel::Debug => tracing::debug!($($arg)+),
            LogLevel::Info => tracing::info!($($arg)+),
            LogLevel::Warn => tracing::warn!($($arg)+),
            LogLevel::Error => tracing::error!($($arg)+),
        }
    };
}

fn label(task: &str, instance: &str) -> String {
    if instance.is_empty() {
        task.to_string()
    } else {
        format!("{} {}", task, instance)
    }
}

/// Reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TaskReporter for TracingReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Started {
                task,
                instance,
                level,
            } => {
                log_at!(level, "Starting {}", label(task, instance));
            }
            TaskEvent::Completed {
                task,
                instance,
                level,
                duration,
            } => match duration {
                Some(d) => log_at!(
                    level,
                    "{} completed in {:.1}s",
                    label(task, instance),
                    d.as_secs_f64()
                ),
                None => log_at!(level, "{} completed", label(task, instance)),
            },
            TaskEvent::Failed {
                task,
                instance,
                duration,
                error,
            } => {
                tracing::error!(
                    "{} failed after {:.1}s: {}",
                    label(task, instance),
                    duration.as_secs_f64(),
                    error
                );
            }
            TaskEvent::Skipped {
                task,
                instance,
                level,
                reason,
            } => {
                log_at!(level, "{} skipped: {}", label(task, instance), reason);
            }
            TaskEvent::FanOut {
                iterator,
                expansions,
                parallel,
                workers,
            } => {
                if *parallel {
                    tracing::info!(
                        "Dispatching {} expansion(s) of {} to {} worker(s)",
                        expansions,
                        iterator,
                        workers
                    );
                } else {
                    tracing::info!("Running {} expansion(s) of {} in order", expansions, iterator);
                }
            }
            TaskEvent::Joined {
                iterator,
                succeeded,
                failed,
                not_dispatched,
            } => {
                tracing::info!(
                    "{} joined: {} succeeded, {} failed, {} not dispatched",
                    iterator,
                    succeeded,
                    failed,
                    not_dispatched
                );
            }
            TaskEvent::AllCompleted {
                total,
                completed,
                skipped,
                failed,
                duration,
            } => {
                tracing::info!(
                    "All tasks complete: {}/{} completed, {} skipped, {} failed ({:.1}s)",
                    completed,
                    total,
                    skipped,
                    failed,
                    duration.as_secs_f64()
                );
            }
        }
    }
}

/// Reporter that collects events for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: std::sync::Mutex<Vec<TaskEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Names of tasks in the order they started
    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TaskEvent::Started { task, .. } => Some(task),
                _ => None,
            })
            .collect()
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: &TaskEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Fans events out to several reporters
#[derive(Clone)]
pub struct TaskReporterRegistry {
    reporters: Vec<Arc<dyn TaskReporter>>,
}

impl TaskReporterRegistry {
    pub fn new() -> Self {
        Self {
            reporters: vec![Arc::new(TracingReporter)],
        }
    }

    pub fn empty() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn register(&mut self, reporter: Arc<dyn TaskReporter>) {
        self.reporters.push(reporter);
    }

    pub fn all(&self) -> &[Arc<dyn TaskReporter>] {
        &self.reporters
    }
}

impl Default for TaskReporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskReporter for TaskReporterRegistry {
    fn report(&self, event: &TaskEvent) {
        for reporter in &self.reporters {
            reporter.report(event);
        }
    }
}
