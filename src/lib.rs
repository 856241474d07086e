//! Estimate manager: a collaborative server for hierarchical project
//! estimates.
//!
//! - [`models`]: the estimate tree (from `estimate-core`) plus API inputs.
//! - [`db`]: SQLite persistence for estimates and drafts.
//! - [`api`]: the axum HTTP API and the WebSocket live channel.
//! - [`live`]: per-estimate rooms relaying updates between editors.
//! - [`tracker`]: filing estimates as issue-tracker issues.
//! - [`client`] and [`render`]: what the CLI uses to show estimates.

pub mod api;
pub mod client;
pub mod db;
pub mod live;
pub mod models;
pub mod render;
pub mod tracker;
