use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::personnel::Personnel;

/// The fixed levels of an estimate tree, from the root down.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Epic,
    Story,
    Task,
    Subtask,
}

impl Level {
    pub const ALL: [Level; 4] = [Level::Epic, Level::Story, Level::Task, Level::Subtask];
    pub const MAX_DEPTH: usize = Self::ALL.len();

    /// 1-based depth: epics sit at depth 1.
    pub fn depth(self) -> usize {
        match self {
            Self::Epic => 1,
            Self::Story => 2,
            Self::Task => 3,
            Self::Subtask => 4,
        }
    }

    pub fn from_depth(depth: usize) -> Option<Self> {
        depth
            .checked_sub(1)
            .and_then(|i| Self::ALL.get(i))
            .copied()
    }

    /// The level of this level's children, `None` for sub-tasks.
    pub fn child(self) -> Option<Self> {
        Self::from_depth(self.depth() + 1)
    }

    /// Human-readable label used in tables and rendered trees.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Epic => "Epic",
            Self::Story => "Story",
            Self::Task => "Task",
            Self::Subtask => "Sub-task",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single row of an estimate: an epic, story, task or sub-task.
///
/// Every node carries its own personnel allocation, but only childless
/// nodes contribute it to totals. `children` always hold nodes of
/// `level.child()`; sub-tasks never have children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub level: Level,
    pub name: String,
    pub personnel: Personnel,
    #[serde(default)]
    pub children: Vec<Node>,
}

impl Node {
    /// A fresh node with a generated id, empty name and zero hours.
    pub fn new(level: Level) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), level)
    }

    pub fn with_id(id: impl Into<String>, level: Level) -> Self {
        Self {
            id: id.into(),
            level,
            name: String::new(),
            personnel: Personnel::zero(),
            children: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Visit this node and all of its descendants, parents before children.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Node)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}
