use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use estimate_core::record::lenient;
use estimate_core::NodeRecord;

/// Project name used when a create request leaves it out.
pub const DEFAULT_PROJECT_NAME: &str = "New Project";

/// Input for creating an estimate.
///
/// Everything is optional: the client may supply its own id (estimates are
/// often created client-side first), and missing fields fall back to
/// `New Project`, today and `is_draft = true`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateEstimateInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, alias = "projectName", skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(
        default,
        alias = "startDate",
        with = "lenient::opt_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_date: Option<NaiveDate>,
    #[serde(default, alias = "isDraft", skip_serializing_if = "Option::is_none")]
    pub is_draft: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epics: Option<Vec<NodeRecord>>,
}

/// Input for updating an estimate. All fields are optional for partial updates.
///
/// When `epics` is present it is reconciled against the stored tree by id
/// rather than replacing it outright.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateEstimateInput {
    #[serde(default, alias = "projectName", skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(
        default,
        alias = "startDate",
        with = "lenient::opt_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_date: Option<NaiveDate>,
    #[serde(default, alias = "isDraft", skip_serializing_if = "Option::is_none")]
    pub is_draft: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epics: Option<Vec<NodeRecord>>,
}
