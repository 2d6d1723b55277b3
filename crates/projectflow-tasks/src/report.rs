//! Execution results: per-instance node states and fan-out batches

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::context::{expansion_label, ExpansionStep};
use crate::node::NodeId;

/// Node state machine: `Declared -> Skipped | Running -> Completed | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    Declared,
    Skipped,
    Running,
    Completed,
    Failed,
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Skipped | Self::Completed | Self::Failed)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Declared => "declared",
            Self::Skipped => "skipped",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Terminal record of one node instance
#[derive(Debug, Clone)]
pub struct NodeRun {
    pub node: NodeId,
    pub name: String,
    /// Empty outside iterators
    pub expansion: Vec<ExpansionStep>,
    pub state: NodeState,
    /// Recorded only when elapsed reporting is enabled for the node
    pub elapsed: Option<Duration>,
    pub output: Option<Value>,
    pub skip_reason: Option<String>,
    pub error: Option<String>,
}

impl NodeRun {
    pub fn instance(&self) -> String {
        expansion_label(&self.expansion)
    }
}

/// Value a completed task returned
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutput {
    pub task: String,
    pub value: Value,
}

/// Outputs collected from one successful expansion
#[derive(Debug, Clone, PartialEq)]
pub struct ExpansionOutput {
    pub index: usize,
    pub substitutions: BTreeMap<String, String>,
    pub outputs: Vec<TaskOutput>,
}

impl ExpansionOutput {
    /// Output of a named task in this expansion
    pub fn get(&self, task: &str) -> Option<&Value> {
        self.outputs.iter().find(|o| o.task == task).map(|o| &o.value)
    }
}

/// One failed expansion of a fan-out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionFailure {
    pub index: usize,
    pub message: String,
}

/// Everything gathered at one iterator's join barrier
#[derive(Debug, Clone)]
pub struct BatchRecord {
    pub iterator: NodeId,
    pub name: String,
    /// Expansion path of the iterator instance itself (nested fan-outs)
    pub expansion: Vec<ExpansionStep>,
    pub parallel: bool,
    pub total: usize,
    /// Successful expansions, ordered by index
    pub outputs: Vec<ExpansionOutput>,
    pub failures: Vec<ExpansionFailure>,
    /// Expansions never started because of the failure policy
    pub not_dispatched: Vec<usize>,
}

impl BatchRecord {
    pub fn succeeded(&self) -> usize {
        self.outputs.len()
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.index).collect()
    }
}

/// Accumulator the scheduler writes into
#[derive(Debug, Default)]
pub(crate) struct RunLog {
    pub runs: Vec<NodeRun>,
    pub batches: Vec<BatchRecord>,
}

impl RunLog {
    pub fn absorb(&mut self, other: RunLog) {
        self.runs.extend(other.runs);
        self.batches.extend(other.batches);
    }
}

/// Result of one `execute()` call
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// Node instances in completion order within each expansion
    pub runs: Vec<NodeRun>,
    pub batches: Vec<BatchRecord>,
}

impl ExecutionReport {
    pub(crate) fn new(started_at: DateTime<Utc>, duration: Duration, log: RunLog) -> Self {
        Self {
            started_at,
            duration,
            runs: log.runs,
            batches: log.batches,
        }
    }

    /// All instances of one node
    pub fn runs_of(&self, node: NodeId) -> impl Iterator<Item = &NodeRun> {
        self.runs.iter().filter(move |r| r.node == node)
    }

    /// State of a node outside any expansion, or `Declared` if it never ran
    pub fn state_of(&self, node: NodeId) -> NodeState {
        self.runs_of(node)
            .next()
            .map_or(NodeState::Declared, |r| r.state)
    }

    /// States of every instance of a node
    pub fn states_of(&self, node: NodeId) -> Vec<NodeState> {
        self.runs_of(node).map(|r| r.state).collect()
    }

    /// Outputs of every completed instance of a node
    pub fn outputs_of(&self, node: NodeId) -> Vec<&Value> {
        self.runs_of(node)
            .filter_map(|r| r.output.as_ref())
            .collect()
    }

    /// Join-barrier record of an iterator (first instance)
    pub fn batch(&self, iterator: NodeId) -> Option<&BatchRecord> {
        self.batches.iter().find(|b| b.iterator == iterator)
    }

    pub fn count(&self, state: NodeState) -> usize {
        self.runs.iter().filter(|r| r.state == state).count()
    }

    pub fn completed(&self) -> usize {
        self.count(NodeState::Completed)
    }

    pub fn skipped(&self) -> usize {
        self.count(NodeState::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(NodeState::Failed)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} instance(s): {} completed, {} skipped, {} failed ({:.1}s)",
            self.runs.len(),
            self.completed(),
            self.skipped(),
            self.failed(),
            self.duration.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(node: usize, state: NodeState, output: Option<Value>) -> NodeRun {
        NodeRun {
            node: NodeId(node),
            name: format!("n{}", node),
            expansion: Vec::new(),
            state,
            elapsed: None,
            output,
            skip_reason: None,
            error: None,
        }
    }

    #[test]
    fn test_report_counts_and_lookup() {
        let log = RunLog {
            runs: vec![
                run(1, NodeState::Completed, Some(Value::from(1))),
                run(2, NodeState::Skipped, None),
                run(3, NodeState::Failed, None),
                run(1, NodeState::Completed, Some(Value::from(2))),
            ],
            batches: Vec::new(),
        };
        let report = ExecutionReport::new(Utc::now(), Duration::from_millis(1500), log);

        assert_eq!(report.completed(), 2);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.state_of(NodeId(2)), NodeState::Skipped);
        assert_eq!(report.state_of(NodeId(9)), NodeState::Declared);
        assert_eq!(report.outputs_of(NodeId(1)).len(), 2);
        assert!(report.summary().starts_with("4 instance(s): 2 completed"));
    }

    #[test]
    fn test_expansion_output_lookup() {
        let out = ExpansionOutput {
            index: 0,
            substitutions: BTreeMap::new(),
            outputs: vec![TaskOutput {
                task: "warp".to_string(),
                value: Value::from("ok"),
            }],
        };
        assert_eq!(out.get("warp"), Some(&Value::from("ok")));
        assert!(out.get("other").is_none());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!NodeState::Declared.is_terminal());
        assert!(!NodeState::Running.is_terminal());
        assert!(NodeState::Skipped.is_terminal());
        assert_eq!(NodeState::Completed.to_string(), "completed");
    }
}
