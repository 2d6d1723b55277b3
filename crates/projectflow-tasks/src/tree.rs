//! Arena-backed task tree
//!
//! Nodes live in a `Vec` indexed by [`NodeId`]; parent and child links are
//! indices. Nodes are only ever appended, so the tree is acyclic and every
//! non-root node keeps the parent it was inserted under.

use projectflow_core::ConfigError;

use crate::node::{NodeId, NodeKind, TaskNode};
use crate::replacement::ReplacementSet;

#[derive(Debug, Clone)]
pub struct TaskTree {
    nodes: Vec<TaskNode>,
}

impl TaskTree {
    /// Create a tree holding only the synthetic root
    pub fn new() -> Self {
        Self {
            nodes: vec![TaskNode::root()],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.0 < self.nodes.len()
    }

    pub fn get(&self, id: NodeId) -> Option<&TaskNode> {
        self.nodes.get(id.0)
    }

    /// Node by handle; handles are only minted by this tree
    pub(crate) fn node(&self, id: NodeId) -> &TaskNode {
        &self.nodes[id.0]
    }

    /// Append `node` as the last child of `parent`
    pub(crate) fn insert(&mut self, parent: NodeId, mut node: TaskNode) -> Result<NodeId, ConfigError> {
        if !self.contains(parent) {
            return Err(ConfigError::InvalidParent {
                parent: parent.0,
                len: self.nodes.len(),
            });
        }

        let id = NodeId(self.nodes.len());
        node.id = id;
        node.parent = Some(parent);
        self.nodes.push(node);
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map_or(&[], |n| n.children.as_slice())
    }

    /// Ancestors from the parent up to the root
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = self.get(id).and_then(|n| n.parent);
        while let Some(p) = current {
            chain.push(p);
            current = self.node(p).parent;
        }
        chain
    }

    pub fn depth(&self, id: NodeId) -> usize {
        self.ancestors(id).len()
    }

    /// Slash-separated name path from the root, e.g. `root/tiles/warp`
    pub fn position(&self, id: NodeId) -> String {
        let mut names: Vec<&str> = self
            .ancestors(id)
            .into_iter()
            .rev()
            .map(|a| self.node(a).name())
            .collect();
        if let Some(node) = self.get(id) {
            names.push(node.name());
        }
        names.join("/")
    }

    /// Replacement sets of `id` and its iterator ancestors, outermost first
    pub fn replacement_chain(&self, id: NodeId) -> Vec<&ReplacementSet> {
        let mut chain: Vec<NodeId> = self.ancestors(id);
        chain.reverse();
        chain.push(id);
        chain
            .into_iter()
            .filter_map(|n| self.get(n))
            .filter(|n| n.kind == NodeKind::Iterator)
            .filter_map(|n| n.iteration.as_ref().map(|it| &it.replacements))
            .collect()
    }

    /// Number of nodes, including the root
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Pre-order walk in declared sibling order, root excluded
    pub fn walk(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.node(self.root()).children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.node(id).children.iter().rev().copied());
        }
        order
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskNode> {
        self.nodes.iter().skip(1)
    }
}

impl Default for TaskTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Callable, Iteration, TaskOptions};
    use serde_json::Value;

    fn task(name: &str) -> TaskNode {
        TaskNode::declared(
            name.to_string(),
            Callable::new(name, |_| Ok(Value::Null)),
            TaskOptions::default(),
            None,
        )
    }

    fn iterator(name: &str, set: ReplacementSet) -> TaskNode {
        TaskNode::declared(
            name.to_string(),
            Callable::new(name, |_| Ok(Value::Null)),
            TaskOptions::default(),
            Some(Iteration {
                replacements: set,
                run_in_parallel: false,
                max_workers: None,
            }),
        )
    }

    #[test]
    fn test_insert_links_parent_and_children() {
        let mut tree = TaskTree::new();
        let root = tree.root();
        let a = tree.insert(root, task("a")).unwrap();
        let b = tree.insert(a, task("b")).unwrap();

        assert_eq!(tree.children(root), &[a]);
        assert_eq!(tree.children(a), &[b]);
        assert_eq!(tree.node(b).parent(), Some(a));
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn test_insert_invalid_parent() {
        let mut tree = TaskTree::new();
        let err = tree.insert(NodeId(9), task("a")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidParent { parent: 9, len: 1 }));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_position_and_depth() {
        let mut tree = TaskTree::new();
        let a = tree.insert(tree.root(), task("prepare")).unwrap();
        let b = tree.insert(a, task("warp")).unwrap();

        assert_eq!(tree.position(b), "root/prepare/warp");
        assert_eq!(tree.depth(b), 2);
        assert_eq!(tree.ancestors(b), vec![a, tree.root()]);
    }

    #[test]
    fn test_walk_is_preorder_in_declared_order() {
        let mut tree = TaskTree::new();
        let root = tree.root();
        let a = tree.insert(root, task("a")).unwrap();
        let a1 = tree.insert(a, task("a1")).unwrap();
        let b = tree.insert(root, task("b")).unwrap();
        let a2 = tree.insert(a, task("a2")).unwrap();

        assert_eq!(tree.walk(), vec![a, a1, a2, b]);
    }

    #[test]
    fn test_replacement_chain_outermost_first() {
        let mut tree = TaskTree::new();
        let outer = ReplacementSet::new().with("region", ["n", "s"]);
        let inner = ReplacementSet::new().with("tile", [0, 1]);
        let g1 = tree.insert(tree.root(), iterator("regions", outer.clone())).unwrap();
        let plain = tree.insert(g1, task("plain")).unwrap();
        let g2 = tree.insert(plain, iterator("tiles", inner.clone())).unwrap();
        let leaf = tree.insert(g2, task("leaf")).unwrap();

        assert_eq!(tree.replacement_chain(leaf), vec![&outer, &inner]);
        assert_eq!(tree.replacement_chain(plain), vec![&outer]);
    }
}
