use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{RecordError, TreeError};
use crate::node::{Level, Node};
use crate::personnel::{Personnel, Role};

/// A replaceable field of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Name(String),
    Personnel(Personnel),
}

/// The epics of an estimate and everything below them.
///
/// Nodes are addressed by index paths: `[]` is the root sentinel whose
/// children are the epics, `[0]` the first epic, `[0, 2]` its third story,
/// and so on. Every operation resolves and validates its arguments before
/// touching the tree, so a failed call leaves the tree unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EstimateTree {
    epics: Vec<Node>,
}

impl EstimateTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from existing epics, rejecting duplicate ids.
    pub fn from_epics(epics: Vec<Node>) -> Result<Self, RecordError> {
        let tree = Self { epics };
        tree.check_unique_ids()?;
        Ok(tree)
    }

    pub fn epics(&self) -> &[Node] {
        &self.epics
    }

    pub fn is_empty(&self) -> bool {
        self.epics.is_empty()
    }

    pub fn node_count(&self) -> usize {
        let mut count = 0;
        for epic in &self.epics {
            epic.walk(&mut |_| count += 1);
        }
        count
    }

    // ============================================================
    // Lookup
    // ============================================================

    pub fn node(&self, path: &[usize]) -> Result<&Node, TreeError> {
        let (last, parent) = path.split_last().ok_or_else(|| not_found(path))?;
        self.children_at(parent)
            .and_then(|children| children.get(*last))
            .ok_or_else(|| not_found(path))
    }

    pub fn node_mut(&mut self, path: &[usize]) -> Result<&mut Node, TreeError> {
        let (last, parent) = path.split_last().ok_or_else(|| not_found(path))?;
        self.children_at_mut(parent)
            .and_then(|children| children.get_mut(*last))
            .ok_or_else(|| not_found(path))
    }

    /// The child collection of the node at `path`; the epics for `[]`.
    fn children_at(&self, path: &[usize]) -> Option<&Vec<Node>> {
        let mut children = &self.epics;
        for &index in path {
            children = &children.get(index)?.children;
        }
        Some(children)
    }

    fn children_at_mut(&mut self, path: &[usize]) -> Option<&mut Vec<Node>> {
        let mut children = &mut self.epics;
        for &index in path {
            children = &mut children.get_mut(index)?.children;
        }
        Some(children)
    }

    pub fn find(&self, id: &str) -> Option<&Node> {
        self.path_of(id).and_then(|path| self.node(&path).ok())
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Node> {
        let path = self.path_of(id)?;
        self.node_mut(&path).ok()
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.path_of(id).is_some()
    }

    /// Index path of the node with `id`, if present.
    pub fn path_of(&self, id: &str) -> Option<Vec<usize>> {
        fn search(nodes: &[Node], id: &str, path: &mut Vec<usize>) -> bool {
            for (i, node) in nodes.iter().enumerate() {
                path.push(i);
                if node.id == id || search(&node.children, id, path) {
                    return true;
                }
                path.pop();
            }
            false
        }

        let mut path = Vec::new();
        search(&self.epics, id, &mut path).then_some(path)
    }

    /// Id of the parent of the node at `path`, `None` for epics.
    pub fn parent_id(&self, path: &[usize]) -> Option<&str> {
        match path.split_last() {
            Some((_, parent)) if !parent.is_empty() => {
                self.node(parent).ok().map(|n| n.id.as_str())
            }
            _ => None,
        }
    }

    /// All nodes without children, in display order.
    pub fn leaves(&self) -> Vec<&Node> {
        let mut leaves = Vec::new();
        for epic in &self.epics {
            epic.walk(&mut |node| {
                if node.is_leaf() {
                    leaves.push(node);
                }
            });
        }
        leaves
    }

    // ============================================================
    // Mutation
    // ============================================================

    /// Append a fresh node of `level` under the node at `path`.
    ///
    /// `level` must be the one implied by the path depth: epics under `[]`,
    /// stories under an epic, and so on. Returns the new node's id.
    pub fn add_child(&mut self, path: &[usize], level: Level) -> Result<String, TreeError> {
        let depth = path.len() + 1;
        let children = self.children_at_mut(path).ok_or_else(|| not_found(path))?;
        if Level::from_depth(depth) != Some(level) {
            return Err(TreeError::DepthExceeded {
                requested: level,
                depth,
            });
        }

        let node = Node::new(level);
        let id = node.id.clone();
        children.push(node);
        tracing::debug!(?path, %level, %id, "added node");
        Ok(id)
    }

    pub fn update_field(&mut self, path: &[usize], field: Field) -> Result<(), TreeError> {
        let node = self.node_mut(path)?;
        match field {
            Field::Name(name) => node.name = name,
            Field::Personnel(personnel) => node.personnel = personnel,
        }
        tracing::debug!(?path, id = %node.id, "updated node field");
        Ok(())
    }

    /// Set the hours of one role. `hours` is clamped to a non-negative number.
    pub fn update_personnel(
        &mut self,
        path: &[usize],
        role: &str,
        hours: f64,
    ) -> Result<(), TreeError> {
        let role = Role::parse(role)?;
        let node = self.node_mut(path)?;
        node.personnel.set(role, hours);
        tracing::debug!(?path, %role, hours = node.personnel.get(role), "updated personnel");
        Ok(())
    }

    /// Remove the node at `path` together with its subtree and return it.
    pub fn delete_node(&mut self, path: &[usize]) -> Result<Node, TreeError> {
        let (last, parent) = path.split_last().ok_or_else(|| not_found(path))?;
        let children = self
            .children_at_mut(parent)
            .filter(|children| *last < children.len())
            .ok_or_else(|| not_found(path))?;

        let removed = children.remove(*last);
        tracing::debug!(?path, id = %removed.id, "deleted node");
        Ok(removed)
    }

    /// Swap the node with `id` for `replacement`, keeping its position.
    /// Returns false when no such node exists.
    pub fn replace(&mut self, id: &str, replacement: Node) -> bool {
        match self.find_mut(id) {
            Some(node) => {
                *node = replacement;
                true
            }
            None => false,
        }
    }

    pub(crate) fn epics_mut(&mut self) -> &mut Vec<Node> {
        &mut self.epics
    }

    // ============================================================
    // Aggregation
    // ============================================================

    pub fn grand_total(&self) -> f64 {
        grand_total(&self.epics)
    }

    /// Hours per role summed over the leaves, i.e. the split of
    /// [`grand_total`].
    pub fn role_totals(&self) -> Personnel {
        let mut totals = Personnel::zero();
        for leaf in self.leaves() {
            totals.accumulate(&leaf.personnel);
        }
        totals
    }

    pub fn check_unique_ids(&self) -> Result<(), RecordError> {
        let mut seen = HashSet::new();
        let mut duplicate = None;
        for epic in &self.epics {
            epic.walk(&mut |node| {
                if duplicate.is_none() && !seen.insert(node.id.as_str()) {
                    duplicate = Some(node.id.clone());
                }
            });
        }
        match duplicate {
            Some(id) => Err(RecordError::DuplicateId(id)),
            None => Ok(()),
        }
    }
}

fn not_found(path: &[usize]) -> TreeError {
    TreeError::PathNotFound {
        path: path.to_vec(),
    }
}

/// Sum of a node's own hours if it has no children, otherwise 0.
pub fn total_for(node: &Node) -> f64 {
    if node.is_leaf() {
        node.personnel.total()
    } else {
        0.0
    }
}

/// Sum of personnel hours over every leaf below `nodes`.
///
/// A node with children contributes nothing itself; the walk descends into
/// its children instead.
pub fn grand_total(nodes: &[Node]) -> f64 {
    nodes
        .iter()
        .map(|node| {
            if node.is_leaf() {
                node.personnel.total()
            } else {
                grand_total(&node.children)
            }
        })
        .sum()
}

/// Number of table rows a node spans when laid out one leaf per row.
pub fn row_span(node: &Node) -> usize {
    if node.is_leaf() {
        1
    } else {
        node.children.iter().map(row_span).sum()
    }
}
