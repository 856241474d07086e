//! Filing estimates as issues in a Redmine-style tracker.
//!
//! The tracker is configured from the environment:
//! - `ESTIMATE_TRACKER_URL` - Base URL (default: `http://localhost:3000`)
//! - `ESTIMATE_TRACKER_PROJECT_ID` - Target project (default: 1)
//! - `ESTIMATE_TRACKER_ID` - Issue tracker/type (default: 2)
//!
//! The API key is not configured here: each caller supplies its own.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Estimate, EstimateRecord};

const DEFAULT_URL: &str = "http://localhost:3000";
const DEFAULT_PROJECT_ID: u64 = 1;
const DEFAULT_TRACKER_ID: u64 = 2;

/// Header carrying the tracker API key.
pub const API_KEY_HEADER: &str = "X-Redmine-API-Key";

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tracker rejected the API key")]
    Unauthorized,

    #[error("tracker returned {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("failed to encode estimate: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    pub base_url: String,
    pub project_id: u64,
    pub tracker_id: u64,
}

impl TrackerConfig {
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("ESTIMATE_TRACKER_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        let project_id = std::env::var("ESTIMATE_TRACKER_PROJECT_ID")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PROJECT_ID);
        let tracker_id = std::env::var("ESTIMATE_TRACKER_ID")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TRACKER_ID);

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id,
            tracker_id,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_URL.to_string(),
            project_id: DEFAULT_PROJECT_ID,
            tracker_id: DEFAULT_TRACKER_ID,
        }
    }
}

/// `{"issue": {...}}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IssuePayload {
    pub issue: NewIssue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewIssue {
    pub project_id: u64,
    pub subject: String,
    pub description: String,
    pub tracker_id: u64,
}

#[derive(Debug, Deserialize)]
struct CreatedIssue {
    issue: IssueRef,
}

#[derive(Debug, Deserialize)]
struct IssueRef {
    id: u64,
}

/// Build the issue for an estimate: a summary header followed by the
/// pretty-printed epics.
pub fn build_issue(
    config: &TrackerConfig,
    estimate: &Estimate,
) -> Result<IssuePayload, TrackerError> {
    let epics = serde_json::to_string_pretty(&EstimateRecord::from(estimate).epics)?;
    let description = format!(
        "Project: {}\nStart date: {}\nTotal hours: {}\n\nEpics:\n{}",
        estimate.project_name,
        estimate.start_date,
        estimate.grand_total(),
        epics,
    );

    Ok(IssuePayload {
        issue: NewIssue {
            project_id: config.project_id,
            subject: format!("Estimate: {}", estimate.project_name),
            description,
            tracker_id: config.tracker_id,
        },
    })
}

#[derive(Debug, Clone)]
pub struct TrackerClient {
    config: TrackerConfig,
    client: Client,
}

impl TrackerClient {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    /// File `estimate` as a new issue and return the issue id.
    pub async fn create_issue(
        &self,
        api_key: &str,
        estimate: &Estimate,
    ) -> Result<u64, TrackerError> {
        let payload = build_issue(&self.config, estimate)?;
        let url = format!("{}/issues.json", self.config.base_url);

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TrackerError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TrackerError::Rejected { status, body });
        }

        let created: CreatedIssue = response.json().await?;
        tracing::info!(
            estimate_id = %estimate.id,
            issue_id = created.issue.id,
            "filed estimate as tracker issue"
        );
        Ok(created.issue.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Level, Role};
    use chrono::NaiveDate;

    #[test]
    fn issue_carries_name_total_and_epics() {
        let mut estimate = Estimate::new("Billing", NaiveDate::from_ymd_opt(2024, 6, 3).unwrap());
        estimate.epics.add_child(&[], Level::Epic).unwrap();
        estimate
            .epics
            .update_personnel(&[0], Role::Dev.as_str(), 12.0)
            .unwrap();

        let config = TrackerConfig {
            project_id: 7,
            ..TrackerConfig::default()
        };
        let payload = build_issue(&config, &estimate).unwrap();

        assert_eq!(payload.issue.subject, "Estimate: Billing");
        assert_eq!(payload.issue.project_id, 7);
        assert_eq!(payload.issue.tracker_id, 2);
        assert!(payload.issue.description.contains("Start date: 2024-06-03"));
        assert!(payload.issue.description.contains("Total hours: 12"));
        assert!(payload.issue.description.contains("\"DEV\""));

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["issue"]["subject"], "Estimate: Billing");
    }
}
