//! Merging updates relayed from other editors.
//!
//! Updates carry whole nodes and are applied by wholesale replacement of the
//! affected subtree. There is no conflict detection: the last update applied
//! wins, and updates aimed at nodes that no longer exist are ignored.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::LiveError;
use crate::estimate::Estimate;
use crate::node::{Level, Node};
use crate::personnel::Personnel;
use crate::record::{lenient, NodeRecord};

/// What a live update is about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Epic,
    Story,
    Task,
    Subtask,
    Personnel,
    ProjectName,
    StartDate,
    Estimate,
}

impl EntityKind {
    pub fn for_level(level: Level) -> Self {
        match level {
            Level::Epic => Self::Epic,
            Level::Story => Self::Story,
            Level::Task => Self::Task,
            Level::Subtask => Self::Subtask,
        }
    }

    pub fn level(self) -> Option<Level> {
        match self {
            Self::Epic => Some(Level::Epic),
            Self::Story => Some(Level::Story),
            Self::Task => Some(Level::Task),
            Self::Subtask => Some(Level::Subtask),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Epic => "epic",
            Self::Story => "story",
            Self::Task => "task",
            Self::Subtask => "subtask",
            Self::Personnel => "personnel",
            Self::ProjectName => "project_name",
            Self::StartDate => "start_date",
            Self::Estimate => "estimate",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpdateAction {
    Add,
    Update,
    Delete,
    LoadDraft,
}

impl UpdateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::LoadDraft => "load_draft",
        }
    }
}

impl fmt::Display for UpdateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{ "type": ..., "action": ..., "data": ... }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveUpdate {
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub action: UpdateAction,
    pub data: Value,
}

impl LiveUpdate {
    pub fn new(kind: EntityKind, action: UpdateAction, data: Value) -> Self {
        Self { kind, action, data }
    }

    /// A node was added under `parent_id` (`None` for epics).
    pub fn node_added(node: &Node, parent_id: Option<&str>) -> Self {
        let mut record = NodeRecord::from_node(node);
        record.parent_id = parent_id.map(str::to_string);
        Self::new(
            EntityKind::for_level(node.level),
            UpdateAction::Add,
            json!(record),
        )
    }

    pub fn node_updated(node: &Node) -> Self {
        Self::new(
            EntityKind::for_level(node.level),
            UpdateAction::Update,
            json!(NodeRecord::from_node(node)),
        )
    }

    pub fn node_deleted(node: &Node) -> Self {
        Self::new(
            EntityKind::for_level(node.level),
            UpdateAction::Delete,
            json!({ "id": node.id }),
        )
    }
}

/// Result of merging one update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied,
    /// The target is gone; nothing to do.
    Ignored,
    /// Another editor replaced the whole estimate with a draft.
    DraftLoaded { draft_id: String },
}

#[derive(Deserialize)]
struct IdPayload {
    id: Option<String>,
}

#[derive(Deserialize)]
struct ValuePayload {
    value: Option<String>,
}

#[derive(Deserialize)]
struct PersonnelPayload {
    id: Option<String>,
    personnel: Option<Personnel>,
}

/// Merge a live update into `estimate`.
///
/// The estimate is only modified when the update applies cleanly; an error
/// or [`MergeOutcome::Ignored`] leaves it as it was.
pub fn apply_update(
    estimate: &mut Estimate,
    update: &LiveUpdate,
) -> Result<MergeOutcome, LiveError> {
    let kind = update.kind;
    let action = update.action;

    if let Some(level) = kind.level() {
        return match action {
            UpdateAction::Add => add_node(estimate, update, level),
            UpdateAction::Update => replace_node(estimate, update, level),
            UpdateAction::Delete => delete_node(estimate, update, level),
            UpdateAction::LoadDraft => Err(LiveError::Unsupported { kind, action }),
        };
    }

    match (kind, action) {
        (EntityKind::Personnel, UpdateAction::Update) => {
            let payload: PersonnelPayload = parse(update)?;
            let id = payload.id.ok_or_else(|| missing(update, "id"))?;
            let personnel = payload.personnel.ok_or_else(|| missing(update, "personnel"))?;
            Ok(match estimate.epics.find_mut(&id) {
                Some(node) => {
                    node.personnel = personnel;
                    MergeOutcome::Applied
                }
                None => MergeOutcome::Ignored,
            })
        }
        (EntityKind::ProjectName, UpdateAction::Update) => {
            let payload: ValuePayload = parse(update)?;
            estimate.project_name = payload.value.ok_or_else(|| missing(update, "value"))?;
            Ok(MergeOutcome::Applied)
        }
        (EntityKind::StartDate, UpdateAction::Update) => {
            let payload: ValuePayload = parse(update)?;
            let raw = payload.value.ok_or_else(|| missing(update, "value"))?;
            match lenient::parse_date(&raw) {
                Some(date) => {
                    estimate.start_date = date;
                    Ok(MergeOutcome::Applied)
                }
                None => Err(missing(update, "value")),
            }
        }
        (EntityKind::Estimate, UpdateAction::LoadDraft) => {
            let payload: IdPayload = parse(update)?;
            let draft_id = payload.id.ok_or_else(|| missing(update, "id"))?;
            Ok(MergeOutcome::DraftLoaded { draft_id })
        }
        _ => Err(LiveError::Unsupported { kind, action }),
    }
}

fn add_node(
    estimate: &mut Estimate,
    update: &LiveUpdate,
    level: Level,
) -> Result<MergeOutcome, LiveError> {
    let mut record: NodeRecord = parse(update)?;
    let parent_id = record.parent_id.take();
    let node = record.into_node(level);

    // A repeated add is a replace, but only of a node on the same level.
    if let Some(existing) = estimate.epics.find(&node.id) {
        if existing.level != level {
            return Ok(MergeOutcome::Ignored);
        }
        let id = node.id.clone();
        return commit(estimate, |tree| tree.replace(&id, node));
    }

    commit(estimate, |tree| match level {
        Level::Epic => {
            tree.epics_mut().push(node);
            true
        }
        _ => {
            let Some(parent_id) = parent_id.as_deref() else {
                return false;
            };
            match tree.find_mut(parent_id) {
                Some(parent) if parent.level.child() == Some(level) => {
                    parent.children.push(node);
                    true
                }
                _ => false,
            }
        }
    })
}

fn replace_node(
    estimate: &mut Estimate,
    update: &LiveUpdate,
    level: Level,
) -> Result<MergeOutcome, LiveError> {
    let record: NodeRecord = parse(update)?;
    let id = record.id.clone().ok_or_else(|| missing(update, "id"))?;
    let node = record.into_node(level);

    match estimate.epics.find(&id) {
        Some(existing) if existing.level == level => {
            commit(estimate, |tree| tree.replace(&id, node))
        }
        _ => Ok(MergeOutcome::Ignored),
    }
}

fn delete_node(
    estimate: &mut Estimate,
    update: &LiveUpdate,
    level: Level,
) -> Result<MergeOutcome, LiveError> {
    let payload: IdPayload = parse(update)?;
    let id = payload.id.ok_or_else(|| missing(update, "id"))?;

    let Some(path) = estimate.epics.path_of(&id) else {
        return Ok(MergeOutcome::Ignored);
    };
    match estimate.epics.node(&path) {
        Ok(node) if node.level == level => {}
        _ => return Ok(MergeOutcome::Ignored),
    }
    Ok(match estimate.epics.delete_node(&path) {
        Ok(_) => MergeOutcome::Applied,
        Err(_) => MergeOutcome::Ignored,
    })
}

/// Run `change` on a copy of the tree and swap it in only if it applied and
/// ids are still unique.
fn commit(
    estimate: &mut Estimate,
    change: impl FnOnce(&mut crate::tree::EstimateTree) -> bool,
) -> Result<MergeOutcome, LiveError> {
    let mut tree = estimate.epics.clone();
    if !change(&mut tree) {
        return Ok(MergeOutcome::Ignored);
    }
    tree.check_unique_ids()?;
    estimate.epics = tree;
    Ok(MergeOutcome::Applied)
}

fn parse<T: serde::de::DeserializeOwned>(update: &LiveUpdate) -> Result<T, LiveError> {
    serde_json::from_value(update.data.clone()).map_err(|source| LiveError::Payload {
        kind: update.kind,
        source,
    })
}

fn missing(update: &LiveUpdate, field: &'static str) -> LiveError {
    LiveError::MissingField {
        kind: update.kind,
        action: update.action,
        field,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecordError;
    use crate::personnel::Role;
    use chrono::NaiveDate;

    fn estimate() -> Estimate {
        let mut estimate = Estimate::new("Live", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        estimate
            .epics
            .epics_mut()
            .push(Node::with_id("e1", Level::Epic).named("First"));
        estimate
    }

    fn update(kind: EntityKind, action: UpdateAction, data: Value) -> LiveUpdate {
        LiveUpdate::new(kind, action, data)
    }

    #[test]
    fn epic_add_appends_trusting_ids() {
        let mut est = estimate();
        let outcome = apply_update(
            &mut est,
            &update(
                EntityKind::Epic,
                UpdateAction::Add,
                json!({"id": "e2", "name": "Second", "stories": []}),
            ),
        )
        .unwrap();

        assert_eq!(outcome, MergeOutcome::Applied);
        assert_eq!(est.epics.epics()[1].id, "e2");
    }

    #[test]
    fn story_add_needs_a_matching_parent() {
        let mut est = estimate();
        let add = update(
            EntityKind::Story,
            UpdateAction::Add,
            json!({"id": "s1", "parent_id": "e1", "name": "Story"}),
        );
        assert_eq!(apply_update(&mut est, &add).unwrap(), MergeOutcome::Applied);
        assert_eq!(est.epics.node(&[0, 0]).unwrap().id, "s1");

        let orphan = update(
            EntityKind::Story,
            UpdateAction::Add,
            json!({"id": "s2", "parent_id": "gone"}),
        );
        assert_eq!(apply_update(&mut est, &orphan).unwrap(), MergeOutcome::Ignored);
    }

    #[test]
    fn epic_update_replaces_the_whole_subtree() {
        let mut est = estimate();
        est.epics.add_child(&[0], Level::Story).unwrap();

        let replace = update(
            EntityKind::Epic,
            UpdateAction::Update,
            json!({
                "id": "e1",
                "name": "Replaced",
                "personnel": [{"type": "DEV", "value": 4}],
                "stories": []
            }),
        );
        assert_eq!(apply_update(&mut est, &replace).unwrap(), MergeOutcome::Applied);

        let epic = &est.epics.epics()[0];
        assert_eq!(epic.name, "Replaced");
        assert!(epic.is_leaf());
        assert_eq!(est.grand_total(), 4.0);
    }

    #[test]
    fn update_for_missing_node_is_ignored() {
        let mut est = estimate();
        let before = est.clone();
        let outcome = apply_update(
            &mut est,
            &update(EntityKind::Epic, UpdateAction::Update, json!({"id": "nope"})),
        )
        .unwrap();
        assert_eq!(outcome, MergeOutcome::Ignored);
        assert_eq!(est, before);
    }

    #[test]
    fn delete_removes_by_id_and_level() {
        let mut est = estimate();
        let wrong_level = update(EntityKind::Story, UpdateAction::Delete, json!({"id": "e1"}));
        assert_eq!(apply_update(&mut est, &wrong_level).unwrap(), MergeOutcome::Ignored);

        let delete = update(EntityKind::Epic, UpdateAction::Delete, json!({"id": "e1"}));
        assert_eq!(apply_update(&mut est, &delete).unwrap(), MergeOutcome::Applied);
        assert!(est.epics.is_empty());
    }

    #[test]
    fn add_colliding_with_existing_ids_is_rejected() {
        let mut est = estimate();
        est.epics.add_child(&[0], Level::Story).unwrap();
        let story_id = est.epics.node(&[0, 0]).unwrap().id.clone();
        let before = est.clone();

        let add = update(
            EntityKind::Epic,
            UpdateAction::Add,
            json!({"id": "e2", "stories": [{"id": story_id}]}),
        );
        let err = apply_update(&mut est, &add).unwrap_err();
        assert!(matches!(err, LiveError::Record(RecordError::DuplicateId(_))));
        assert_eq!(est, before);
    }

    #[test]
    fn add_reusing_an_id_from_another_level_is_ignored() {
        let mut est = estimate();
        est.epics.add_child(&[0], Level::Story).unwrap();
        let before = est.clone();

        let add = update(
            EntityKind::Subtask,
            UpdateAction::Add,
            json!({"id": "e1", "parent_id": "nowhere"}),
        );
        assert_eq!(apply_update(&mut est, &add).unwrap(), MergeOutcome::Ignored);
        assert_eq!(est, before);
        assert_eq!(est.epics.epics()[0].level, Level::Epic);
        assert_eq!(est.epics.epics()[0].children.len(), 1);
    }

    #[test]
    fn personnel_and_metadata_updates() {
        let mut est = estimate();
        apply_update(
            &mut est,
            &update(
                EntityKind::Personnel,
                UpdateAction::Update,
                json!({"id": "e1", "personnel": [{"type": "BA", "value": "6"}]}),
            ),
        )
        .unwrap();
        assert_eq!(est.epics.epics()[0].personnel.get(Role::Ba), 6.0);

        apply_update(
            &mut est,
            &update(EntityKind::ProjectName, UpdateAction::Update, json!({"value": "Renamed"})),
        )
        .unwrap();
        assert_eq!(est.project_name, "Renamed");

        apply_update(
            &mut est,
            &update(EntityKind::StartDate, UpdateAction::Update, json!({"value": "2025-02-03"})),
        )
        .unwrap();
        assert_eq!(est.start_date, NaiveDate::from_ymd_opt(2025, 2, 3).unwrap());
    }

    #[test]
    fn load_draft_is_a_notification() {
        let mut est = estimate();
        let before = est.clone();
        let outcome = apply_update(
            &mut est,
            &update(EntityKind::Estimate, UpdateAction::LoadDraft, json!({"id": "d1"})),
        )
        .unwrap();
        assert_eq!(
            outcome,
            MergeOutcome::DraftLoaded {
                draft_id: "d1".to_string()
            }
        );
        assert_eq!(est, before);
    }

    #[test]
    fn malformed_and_unsupported_updates_error() {
        let mut est = estimate();
        let malformed = update(EntityKind::Epic, UpdateAction::Add, json!("not an object"));
        assert!(matches!(
            apply_update(&mut est, &malformed),
            Err(LiveError::Payload { .. })
        ));

        let unsupported = update(EntityKind::ProjectName, UpdateAction::Delete, json!({}));
        assert!(matches!(
            apply_update(&mut est, &unsupported),
            Err(LiveError::Unsupported { .. })
        ));
    }

    #[test]
    fn helpers_round_out_the_wire_shape() {
        let node = Node::with_id("t9", Level::Task);
        let value = serde_json::to_value(LiveUpdate::node_added(&node, Some("s1"))).unwrap();
        assert_eq!(value["type"], "task");
        assert_eq!(value["action"], "add");
        assert_eq!(value["data"]["parent_id"], "s1");
        assert_eq!(value["data"]["sub_tasks"], json!([]));

        let value = serde_json::to_value(LiveUpdate::node_deleted(&node)).unwrap();
        assert_eq!(value["data"], json!({"id": "t9"}));
    }
}
