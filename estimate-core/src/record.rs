//! snake_case records exchanged with the API and the store.
//!
//! Inside the model a node has a generic `children` list; at the boundary
//! each level uses its own key (`stories`, `tasks`, `sub_tasks`). Fields are
//! optional so the same record can carry partial updates, and the client's
//! camelCase spellings are accepted as aliases.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RecordError;
use crate::estimate::Estimate;
use crate::node::{Level, Node};
use crate::personnel::Personnel;
use crate::tree::EstimateTree;

/// A node as it crosses the boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Only meaningful in live `add` messages for non-epic nodes.
    #[serde(default, alias = "parentId", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personnel: Option<Personnel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stories: Option<Vec<NodeRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<NodeRecord>>,
    #[serde(default, alias = "subTasks", skip_serializing_if = "Option::is_none")]
    pub sub_tasks: Option<Vec<NodeRecord>>,
}

impl NodeRecord {
    pub fn from_node(node: &Node) -> Self {
        let mut record = Self {
            id: Some(node.id.clone()),
            name: Some(node.name.clone()),
            personnel: Some(node.personnel),
            ..Self::default()
        };
        if let Some(slot) = record.children_slot(node.level) {
            *slot = Some(node.children.iter().map(Self::from_node).collect());
        }
        record
    }

    /// The child key used by `level`, `None` for sub-tasks.
    fn children_slot(&mut self, level: Level) -> Option<&mut Option<Vec<NodeRecord>>> {
        match level {
            Level::Epic => Some(&mut self.stories),
            Level::Story => Some(&mut self.tasks),
            Level::Task => Some(&mut self.sub_tasks),
            Level::Subtask => None,
        }
    }

    /// Take the children under the key belonging to `level`, if present.
    pub fn take_children(&mut self, level: Level) -> Option<Vec<NodeRecord>> {
        self.children_slot(level).and_then(Option::take)
    }

    /// Build a node of `level`, trusting the record's ids and generating the
    /// missing ones. Child keys that don't belong to `level` are ignored.
    pub fn into_node(mut self, level: Level) -> Node {
        let children = match (level.child(), self.take_children(level)) {
            (Some(child_level), Some(children)) => children
                .into_iter()
                .map(|child| child.into_node(child_level))
                .collect(),
            _ => Vec::new(),
        };

        Node {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            level,
            name: self.name.unwrap_or_default(),
            personnel: self.personnel.unwrap_or_default(),
            children,
        }
    }
}

/// Merge incoming records into existing nodes of the same level.
///
/// Nodes are matched by id. Matched nodes keep their identity and take only
/// the fields present in the record; unmatched records become new nodes and
/// existing nodes missing from `incoming` are dropped. The result follows the
/// order of `incoming`.
pub fn reconcile(existing: Vec<Node>, incoming: Vec<NodeRecord>, level: Level) -> Vec<Node> {
    let mut by_id: HashMap<String, Node> =
        existing.into_iter().map(|n| (n.id.clone(), n)).collect();

    incoming
        .into_iter()
        .map(|mut record| {
            let matched = record.id.as_deref().and_then(|id| by_id.remove(id));
            match matched {
                Some(mut node) => {
                    if let Some(name) = record.name.take() {
                        node.name = name;
                    }
                    if let Some(personnel) = record.personnel.take() {
                        node.personnel = personnel;
                    }
                    if let (Some(child_level), Some(children)) =
                        (level.child(), record.take_children(level))
                    {
                        let current = std::mem::take(&mut node.children);
                        node.children = reconcile(current, children, child_level);
                    }
                    node
                }
                None => record.into_node(level),
            }
        })
        .collect()
}

impl EstimateTree {
    pub fn from_records(records: Vec<NodeRecord>) -> Result<Self, RecordError> {
        Self::from_epics(
            records
                .into_iter()
                .map(|r| r.into_node(Level::Epic))
                .collect(),
        )
    }

    pub fn to_records(&self) -> Vec<NodeRecord> {
        self.epics().iter().map(NodeRecord::from_node).collect()
    }

    /// Apply a full list of epic records, see [`reconcile`]. The tree is left
    /// untouched when the result would contain duplicate ids.
    pub fn reconcile(&mut self, records: Vec<NodeRecord>) -> Result<(), RecordError> {
        let merged = reconcile(self.epics().to_vec(), records, Level::Epic);
        *self = Self::from_epics(merged)?;
        Ok(())
    }
}

/// An estimate as it crosses the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default, alias = "projectName")]
    pub project_name: String,
    #[serde(default = "today", alias = "startDate", with = "lenient::date")]
    pub start_date: NaiveDate,
    #[serde(default = "Utc::now", alias = "createdAt", with = "lenient::datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_true", alias = "isDraft")]
    pub is_draft: bool,
    #[serde(default)]
    pub epics: Vec<NodeRecord>,
    /// Clients currently connected to the estimate's live channel.
    #[serde(default, alias = "activeEditors")]
    pub active_editors: Vec<String>,
}

impl From<&Estimate> for EstimateRecord {
    fn from(estimate: &Estimate) -> Self {
        Self {
            id: estimate.id.clone(),
            project_name: estimate.project_name.clone(),
            start_date: estimate.start_date,
            created_at: estimate.created_at,
            is_draft: estimate.is_draft,
            epics: estimate.epics.to_records(),
            active_editors: Vec::new(),
        }
    }
}

impl TryFrom<EstimateRecord> for Estimate {
    type Error = RecordError;

    fn try_from(record: EstimateRecord) -> Result<Self, Self::Error> {
        let id = if record.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            record.id
        };

        Ok(Estimate {
            id,
            project_name: record.project_name,
            start_date: record.start_date,
            created_at: record.created_at,
            is_draft: record.is_draft,
            epics: EstimateTree::from_records(record.epics)?,
        })
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn default_true() -> bool {
    true
}

/// Date parsing that tolerates the shapes clients actually send.
pub mod lenient {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

    /// `YYYY-MM-DD`, or any ISO datetime whose date part is used.
    pub fn parse_date(s: &str) -> Option<NaiveDate> {
        let s = s.trim();
        NaiveDate::parse_from_str(s.get(..10).unwrap_or(s), "%Y-%m-%d").ok()
    }

    /// RFC 3339, or a naive ISO datetime taken as UTC.
    pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        let s = s.trim();
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }

    pub mod date {
        use chrono::NaiveDate;
        use serde::{de, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(date: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
            s.collect_str(&date.format("%Y-%m-%d"))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDate, D::Error> {
            let raw = String::deserialize(d)?;
            super::parse_date(&raw)
                .ok_or_else(|| de::Error::custom(format!("invalid date: {raw}")))
        }
    }

    pub mod opt_date {
        use chrono::NaiveDate;
        use serde::{de, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(date: &Option<NaiveDate>, s: S) -> Result<S::Ok, S::Error> {
            match date {
                Some(date) => s.collect_str(&date.format("%Y-%m-%d")),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDate>, D::Error> {
            match Option::<String>::deserialize(d)? {
                Some(raw) => super::parse_date(&raw)
                    .map(Some)
                    .ok_or_else(|| de::Error::custom(format!("invalid date: {raw}"))),
                None => Ok(None),
            }
        }
    }

    pub mod datetime {
        use chrono::{DateTime, Utc};
        use serde::{de, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_str(&dt.to_rfc3339())
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
            let raw = String::deserialize(d)?;
            super::parse_datetime(&raw)
                .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {raw}")))
        }
    }
}
