use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::personnel::Personnel;
use crate::tree::{grand_total, EstimateTree};

/// A project estimate: metadata plus the epic tree.
///
/// This is the unit exchanged with the store and the API; see
/// [`EstimateRecord`](crate::record::EstimateRecord) for the snake_case
/// boundary shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Estimate {
    pub id: String,
    pub project_name: String,
    pub start_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub is_draft: bool,
    pub epics: EstimateTree,
}

impl Estimate {
    /// A new, empty draft estimate with a generated id.
    pub fn new(project_name: impl Into<String>, start_date: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_name: project_name.into(),
            start_date,
            created_at: Utc::now(),
            is_draft: true,
            epics: EstimateTree::new(),
        }
    }

    pub fn grand_total(&self) -> f64 {
        self.epics.grand_total()
    }

    pub fn totals(&self) -> EstimateTotals {
        EstimateTotals {
            estimate_id: self.id.clone(),
            grand_total: self.grand_total(),
            by_role: self.epics.role_totals(),
            epics: self
                .epics
                .epics()
                .iter()
                .map(|epic| EpicTotal {
                    id: epic.id.clone(),
                    name: epic.name.clone(),
                    total: grand_total(std::slice::from_ref(epic)),
                })
                .collect(),
        }
    }
}

/// Rolled-up hours for an estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateTotals {
    pub estimate_id: String,
    pub grand_total: f64,
    /// Leaf hours split per role; sums to `grand_total`.
    pub by_role: Personnel,
    pub epics: Vec<EpicTotal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpicTotal {
    pub id: String,
    pub name: String,
    pub total: f64,
}
