use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::StoreError;
use crate::live::LiveHub;
use crate::models::*;
use crate::tracker::TrackerError;

use super::AppState;

// ============================================================
// Error Handling
// ============================================================

/// Map a store or model error to a response.
///
/// Domain errors (bad paths, unknown roles, duplicate ids) are the client's
/// fault and are returned as-is with BAD_REQUEST. Anything else is logged
/// in full and the client gets a generic message.
pub(super) fn internal_error(e: anyhow::Error) -> (StatusCode, String) {
    if let Some(err) = e.downcast_ref::<TreeError>() {
        tracing::warn!("Validation error: {}", err);
        return (StatusCode::BAD_REQUEST, err.to_string());
    }
    if let Some(err) = e.downcast_ref::<RecordError>() {
        tracing::warn!("Validation error: {}", err);
        return (StatusCode::BAD_REQUEST, err.to_string());
    }
    if let Some(err) = e.downcast_ref::<StoreError>() {
        tracing::warn!("Conflict: {}", err);
        return (StatusCode::CONFLICT, err.to_string());
    }

    tracing::error!("Internal error: {:#}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
    )
}

pub(super) fn not_found(what: &str) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("{} not found", what))
}

/// The wire form of an estimate, with the editors currently connected.
fn to_record(hub: &LiveHub, estimate: &Estimate) -> EstimateRecord {
    let mut record = EstimateRecord::from(estimate);
    record.active_editors = hub.active_editors(&estimate.id);
    record
}

// ============================================================
// Health
// ============================================================

pub async fn index() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Welcome to the Estimate Management API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Estimates
// ============================================================

pub async fn list_estimates(
    State(state): State<AppState>,
) -> Result<Json<Vec<EstimateRecord>>, (StatusCode, String)> {
    let estimates = state.db.get_all_estimates().map_err(internal_error)?;
    Ok(Json(
        estimates
            .iter()
            .map(|estimate| to_record(&state.hub, estimate))
            .collect(),
    ))
}

pub async fn get_estimate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EstimateRecord>, (StatusCode, String)> {
    state
        .db
        .get_estimate(&id)
        .map_err(internal_error)?
        .map(|estimate| Json(to_record(&state.hub, &estimate)))
        .ok_or_else(|| not_found("Estimate"))
}

pub async fn create_estimate(
    State(state): State<AppState>,
    Json(input): Json<CreateEstimateInput>,
) -> Result<(StatusCode, Json<EstimateRecord>), (StatusCode, String)> {
    state
        .db
        .create_estimate(input)
        .map(|estimate| (StatusCode::CREATED, Json(to_record(&state.hub, &estimate))))
        .map_err(internal_error)
}

pub async fn update_estimate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdateEstimateInput>,
) -> Result<Json<EstimateRecord>, (StatusCode, String)> {
    state
        .db
        .update_estimate(&id, input)
        .map_err(internal_error)?
        .map(|estimate| Json(to_record(&state.hub, &estimate)))
        .ok_or_else(|| not_found("Estimate"))
}

pub async fn delete_estimate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    if state.db.delete_estimate(&id).map_err(internal_error)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("Estimate"))
    }
}

pub async fn get_totals(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EstimateTotals>, (StatusCode, String)> {
    state
        .db
        .get_estimate(&id)
        .map_err(internal_error)?
        .map(|estimate| Json(estimate.totals()))
        .ok_or_else(|| not_found("Estimate"))
}

// ============================================================
// Tree edits
// ============================================================
//
// Each edit is saved and then relayed to the estimate's live room so open
// editors pick it up.

pub async fn add_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<AddNodeInput>,
) -> Result<(StatusCode, Json<NodeCreated>), (StatusCode, String)> {
    let result = state
        .db
        .with_estimate(&id, |estimate| {
            let node_id = estimate.epics.add_child(&input.path, input.level)?;
            let path = estimate
                .epics
                .path_of(&node_id)
                .context("added node is not in the tree")?;
            let node = estimate.epics.node(&path)?;
            let update = LiveUpdate::node_added(node, estimate.epics.parent_id(&path));
            Ok((NodeCreated { id: node_id, path }, update))
        })
        .map_err(internal_error)?;

    let (_, (created, update)) = result.ok_or_else(|| not_found("Estimate"))?;
    state.hub.publish_update(&id, update);
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdateNodeInput>,
) -> Result<Json<NodeRecord>, (StatusCode, String)> {
    let result = state
        .db
        .with_estimate(&id, |estimate| {
            let tree = &mut estimate.epics;
            // Resolve first so an empty edit still reports a bad path.
            tree.node(&input.path)?;

            if let Some(name) = input.name {
                tree.update_field(&input.path, Field::Name(name))?;
            }
            if let Some(personnel) = input.personnel {
                tree.update_field(&input.path, Field::Personnel(personnel))?;
            }
            if let Some(role) = input.role {
                let hours = input.hours.as_ref().map(coerce_hours).unwrap_or(0.0);
                tree.update_personnel(&input.path, &role, hours)?;
            }

            let node = tree.node(&input.path)?;
            Ok((NodeRecord::from_node(node), LiveUpdate::node_updated(node)))
        })
        .map_err(internal_error)?;

    let (_, (record, update)) = result.ok_or_else(|| not_found("Estimate"))?;
    state.hub.publish_update(&id, update);
    Ok(Json(record))
}

pub async fn delete_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<NodePathQuery>,
) -> Result<StatusCode, (StatusCode, String)> {
    let path = parse_path(&query.path).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            format!("invalid node path: {}", query.path),
        )
    })?;

    let result = state
        .db
        .with_estimate(&id, |estimate| {
            let removed = estimate.epics.delete_node(&path)?;
            Ok(LiveUpdate::node_deleted(&removed))
        })
        .map_err(internal_error)?;

    let (_, update) = result.ok_or_else(|| not_found("Estimate"))?;
    state.hub.publish_update(&id, update);
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================
// Drafts
// ============================================================

pub async fn list_drafts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Draft>>, (StatusCode, String)> {
    state.db.get_drafts(&id).map(Json).map_err(internal_error)
}

pub async fn create_draft(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<CreateDraftInput>,
) -> Result<(StatusCode, Json<Draft>), (StatusCode, String)> {
    state
        .db
        .create_draft(&id, input)
        .map_err(internal_error)?
        .map(|draft| (StatusCode::CREATED, Json(draft)))
        .ok_or_else(|| not_found("Estimate"))
}

pub async fn get_draft(
    State(state): State<AppState>,
    Path((id, draft_id)): Path<(String, String)>,
) -> Result<Json<Draft>, (StatusCode, String)> {
    state
        .db
        .get_draft(&id, &draft_id)
        .map_err(internal_error)?
        .map(Json)
        .ok_or_else(|| not_found("Draft"))
}

pub async fn delete_draft(
    State(state): State<AppState>,
    Path((id, draft_id)): Path<(String, String)>,
) -> Result<StatusCode, (StatusCode, String)> {
    if state.db.delete_draft(&id, &draft_id).map_err(internal_error)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("Draft"))
    }
}

// ============================================================
// Issue tracker
// ============================================================

/// Headers accepted for the caller's tracker key, preferred first.
const TRACKER_KEY_HEADERS: [&str; 2] = ["X-Tracker-API-Key", "X-Redmine-API-Key"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerIssueInput {
    pub estimate_id: String,
    /// Ignored; kept so clients can send their preview along.
    #[serde(default, skip_serializing)]
    pub issue: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerIssueCreated {
    pub issue_id: u64,
}

pub async fn create_tracker_issue(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<TrackerIssueInput>,
) -> Result<Json<TrackerIssueCreated>, (StatusCode, String)> {
    let api_key = TRACKER_KEY_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|key| !key.is_empty())
        .ok_or((
            StatusCode::BAD_REQUEST,
            "Tracker API key is required".to_string(),
        ))?;

    let estimate = state
        .db
        .get_estimate(&input.estimate_id)
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Estimate"))?;

    match state.tracker.create_issue(api_key, &estimate).await {
        Ok(issue_id) => Ok(Json(TrackerIssueCreated { issue_id })),
        Err(TrackerError::Unauthorized) => Err((
            StatusCode::UNAUTHORIZED,
            TrackerError::Unauthorized.to_string(),
        )),
        Err(e) => {
            tracing::error!(estimate_id = %estimate.id, "Tracker error: {}", e);
            Err((
                StatusCode::BAD_GATEWAY,
                "Failed to create tracker issue".to_string(),
            ))
        }
    }
}
