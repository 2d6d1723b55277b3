//! Declarative pipelines
//!
//! A pipeline file describes a task tree in TOML or YAML. Bodies are looked
//! up by name in a [`TaskCatalog`]; everything else maps onto the
//! registration options.
//!
//! ```toml
//! [[tasks]]
//! fn = "prepare"
//! output = "intermediate/clipped.tif"
//! run = "if_missing"
//!
//! [[tasks]]
//! name = "tiles"
//! fn = "split"
//! parallel = true
//! replacements = { tile = [0, 1, 2, 3] }
//!
//! [[tasks.children]]
//! fn = "warp"
//! output = "output/{tile}.tif"
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use projectflow_core::config::LogLevel;
use projectflow_core::{ConfigError, Result};

use crate::node::{Callable, CallableRef, Inherited, IteratorOptions, NodeId, RunMode, TaskOptions};
use crate::orchestrator::Orchestrator;
use crate::replacement::ReplacementSet;

/// Task bodies available to pipeline files, keyed by name
#[derive(Debug, Clone, Default)]
pub struct TaskCatalog {
    entries: HashMap<String, Callable>,
}

impl TaskCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a body under its own name
    pub fn register(&mut self, callable: Callable) {
        self.entries.insert(callable.name().to_string(), callable);
    }

    pub fn with(mut self, callable: Callable) -> Self {
        self.register(callable);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Callable> {
        self.entries.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Map an entry's `fn` value to something registrable.
    ///
    /// Only a string naming a catalog entry yields a body; anything else is
    /// handed on as a plain value so registration rejects it.
    pub fn lookup(&self, func: Option<&Value>) -> CallableRef {
        match func {
            None | Some(Value::Null) => CallableRef::Missing,
            Some(Value::String(name)) => match self.get(name) {
                Some(callable) => CallableRef::Callable(callable.clone()),
                None => {
                    debug!(name = %name, "no catalog entry");
                    CallableRef::Value(Value::String(name.clone()))
                }
            },
            Some(other) => CallableRef::Value(other.clone()),
        }
    }
}

/// Pipeline file root
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Pipeline {
    pub tasks: Vec<PipelineEntry>,
}

/// One task or iterator; an entry with `replacements` is an iterator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineEntry {
    /// Registered name; defaults to the body's name
    pub name: Option<String>,

    /// Catalog entry holding the body
    #[serde(rename = "fn")]
    pub func: Option<Value>,

    pub run: RunMode,
    pub skip_existing: bool,
    pub output: Option<String>,

    /// Directory templates created at registration
    pub dirs: Vec<String>,

    pub log_level: Option<LogLevel>,
    pub report_elapsed: Option<bool>,
    pub note: Option<String>,
    pub doc: Option<String>,

    /// Placeholder sequences; values are stringified
    pub replacements: Option<BTreeMap<String, Vec<Value>>>,
    pub parallel: bool,
    pub max_workers: Option<usize>,

    pub children: Vec<PipelineEntry>,
}

impl Pipeline {
    /// Load a pipeline file, TOML or YAML by extension
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()).into());
        }
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        let pipeline = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content)?,
            _ => Self::from_toml(&content)?,
        };
        info!(path = %path.display(), entries = pipeline.len(), "loaded pipeline");
        Ok(pipeline)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content).map_err(ConfigError::TomlError)?)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content).map_err(ConfigError::YamlError)?)
    }

    /// Total number of entries, nested ones included
    pub fn len(&self) -> usize {
        fn count(entries: &[PipelineEntry]) -> usize {
            entries.iter().map(|e| 1 + count(&e.children)).sum()
        }
        count(&self.tasks)
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Register every entry under `parent` (the root when `None`).
    /// Stops at the first registration error.
    pub fn apply(
        &self,
        orchestrator: &mut Orchestrator,
        catalog: &TaskCatalog,
        parent: Option<NodeId>,
    ) -> Result<Vec<NodeId>> {
        let mut ids = Vec::with_capacity(self.len());
        let parent = parent.unwrap_or_else(|| orchestrator.root());
        for entry in &self.tasks {
            entry.apply(orchestrator, catalog, parent, &mut ids)?;
        }
        Ok(ids)
    }
}

impl PipelineEntry {
    fn options(&self, parent: NodeId) -> TaskOptions {
        TaskOptions {
            name: self.name.clone(),
            parent: Some(parent),
            run: self.run,
            skip_existing: self.skip_existing,
            output: self.output.clone(),
            dirs: self.dirs.clone(),
            inherited: Inherited {
                log_level: self.log_level,
                report_elapsed: self.report_elapsed,
            },
            note: self.note.clone(),
            doc: self.doc.clone(),
        }
    }

    fn replacement_set(sequences: &BTreeMap<String, Vec<Value>>) -> ReplacementSet {
        let mut set = ReplacementSet::new();
        for (placeholder, values) in sequences {
            set.insert(placeholder.clone(), values.iter().map(stringify));
        }
        set
    }

    fn apply(
        &self,
        orchestrator: &mut Orchestrator,
        catalog: &TaskCatalog,
        parent: NodeId,
        ids: &mut Vec<NodeId>,
    ) -> Result<()> {
        let callable = catalog.lookup(self.func.as_ref());
        let options = self.options(parent);

        let id = match &self.replacements {
            Some(sequences) => orchestrator.add_iterator(
                callable,
                Self::replacement_set(sequences),
                IteratorOptions {
                    task: options,
                    run_in_parallel: self.parallel,
                    max_workers: self.max_workers,
                },
            )?,
            None => orchestrator.add_task(callable, options)?,
        };
        ids.push(id);

        for child in &self.children {
            child.apply(orchestrator, catalog, id, ids)?;
        }
        Ok(())
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;
    use crate::report::NodeState;
    use projectflow_core::config::FlowConfig;
    use projectflow_core::FlowError;
    use serde_json::json;
    use tempfile::TempDir;

    fn catalog() -> TaskCatalog {
        TaskCatalog::new()
            .with(Callable::new("prepare", |_| Ok(json!("prepared"))))
            .with(Callable::new("split", |_| Ok(Value::Null)))
            .with(Callable::new("warp", |ctx| Ok(json!(ctx.substitute("{tile}")))))
    }

    const PIPELINE_TOML: &str = r#"
[[tasks]]
fn = "prepare"
note = "clip inputs"

[[tasks]]
name = "tiles"
fn = "split"
parallel = true
max_workers = 2
replacements = { tile = [0, 1, 2] }

[[tasks.children]]
fn = "warp"
output = "output/{tile}.tif"
run = "if_missing"
"#;

    #[test]
    fn test_parse_toml() {
        let pipeline = Pipeline::from_toml(PIPELINE_TOML).unwrap();
        assert_eq!(pipeline.tasks.len(), 2);
        assert_eq!(pipeline.len(), 3);

        let tiles = &pipeline.tasks[1];
        assert!(tiles.parallel);
        assert_eq!(tiles.max_workers, Some(2));
        assert_eq!(tiles.children[0].run, RunMode::IfMissing);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
tasks:
  - fn: prepare
    log_level: debug
  - name: zones
    fn: split
    replacements:
      zone: [north, south]
    children:
      - fn: warp
"#;
        let pipeline = Pipeline::from_yaml(yaml).unwrap();
        assert_eq!(pipeline.len(), 3);
        assert_eq!(pipeline.tasks[0].log_level, Some(LogLevel::Debug));
    }

    #[test]
    fn test_lookup() {
        let catalog = catalog();
        assert!(matches!(catalog.lookup(Some(&json!("warp"))), CallableRef::Callable(_)));
        assert!(matches!(catalog.lookup(None), CallableRef::Missing));
        assert!(matches!(catalog.lookup(Some(&json!("nope"))), CallableRef::Value(_)));
        assert!(matches!(catalog.lookup(Some(&json!(3))), CallableRef::Value(_)));
        assert_eq!(catalog.names(), vec!["prepare", "split", "warp"]);
    }

    #[test]
    fn test_replacement_values_stringified() {
        let mut sequences = BTreeMap::new();
        sequences.insert("tile".to_string(), vec![json!(0), json!("a"), json!(1.5)]);
        let set = PipelineEntry::replacement_set(&sequences);
        assert_eq!(
            set.values("tile").unwrap(),
            &["0".to_string(), "a".to_string(), "1.5".to_string()]
        );
    }

    #[test]
    fn test_apply_builds_tree() {
        let temp = TempDir::new().unwrap();
        let mut orch = Orchestrator::with_config(temp.path(), FlowConfig::default()).unwrap();
        let pipeline = Pipeline::from_toml(PIPELINE_TOML).unwrap();

        let ids = pipeline.apply(&mut orch, &catalog(), None).unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(orch.node("prepare"), Some(ids[0]));
        assert_eq!(orch.kind(ids[1]), Some(NodeKind::Iterator));
        assert_eq!(orch.get(ids[2]).and_then(|n| n.parent()), Some(ids[1]));
        assert_eq!(orch.get(ids[0]).and_then(|n| n.note()), Some("clip inputs"));
    }

    #[test]
    fn test_apply_rejects_unknown_fn() {
        let temp = TempDir::new().unwrap();
        let mut orch = Orchestrator::with_config(temp.path(), FlowConfig::default()).unwrap();
        let pipeline = Pipeline::from_toml("[[tasks]]\nname = \"ghost\"\nfn = \"missing\"\n").unwrap();

        let err = pipeline.apply(&mut orch, &catalog(), None).unwrap_err();
        match err {
            FlowError::Config(ConfigError::NotCallable { descriptor }) => {
                assert!(descriptor.contains("missing"));
            }
            other => panic!("expected NotCallable, got {other}"),
        }
        assert!(orch.task_names_defined().is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("pipeline.toml");
        std::fs::write(&path, PIPELINE_TOML).unwrap();
        assert_eq!(Pipeline::load(&path).unwrap().len(), 3);

        let missing = Pipeline::load(&temp.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(missing, FlowError::Config(ConfigError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_pipeline_executes() {
        let temp = TempDir::new().unwrap();
        let mut orch = Orchestrator::with_config(temp.path(), FlowConfig::default()).unwrap();
        let ids = Pipeline::from_toml(PIPELINE_TOML)
            .unwrap()
            .apply(&mut orch, &catalog(), None)
            .unwrap();

        let report = orch.execute().await.unwrap();
        assert_eq!(report.state_of(ids[0]), NodeState::Completed);
        let batch = report.batch(ids[1]).unwrap();
        assert_eq!(batch.outputs.len(), 3);
        assert_eq!(batch.outputs[0].get("warp"), Some(&json!("0")));
    }
}
