//! ProjectFlow Tasks - Hierarchical task orchestration engine
//!
//! This crate provides the task tree, replacement-driven iterators with
//! bounded parallel fan-out, skip rules over declared outputs, and the
//! declarative pipeline loader.

pub mod context;
pub mod error;
pub mod node;
pub mod orchestrator;
pub mod pipeline;
pub mod replacement;
pub mod report;
pub mod reporter;
mod scheduler;
pub mod tree;

pub use context::{ExpansionStep, ProjectSnapshot, TaskContext};
pub use error::ExecutionError;
pub use node::{
    Callable, CallableRef, Effective, Inherited, IteratorOptions, NodeId, NodeKind, RunMode,
    TaskNode, TaskOptions,
};
pub use orchestrator::Orchestrator;
pub use pipeline::{Pipeline, PipelineEntry, TaskCatalog};
pub use replacement::{substitute, ReplacementSet, Substitutions};
pub use report::{BatchRecord, ExecutionReport, ExpansionOutput, NodeRun, NodeState};
pub use reporter::{CollectingReporter, TaskEvent, TaskReporter, TaskReporterRegistry, TracingReporter};
pub use tree::TaskTree;
