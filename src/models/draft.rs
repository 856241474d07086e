use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use estimate_core::EstimateRecord;

/// A named snapshot of an estimate.
///
/// The snapshot is stored as a normalized [`EstimateRecord`]; loading a
/// draft hands that record back to the client, which replaces its working
/// copy with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub estimate_id: String,
    pub estimate: EstimateRecord,
}

/// Input for saving a draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDraftInput {
    /// Defaults to `Draft <timestamp>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(alias = "estimateData")]
    pub estimate_data: EstimateRecord,
}

pub fn default_draft_name(timestamp: DateTime<Utc>) -> String {
    format!("Draft {}", timestamp.format("%Y-%m-%dT%H:%M:%S"))
}
