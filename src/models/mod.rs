//! Domain models for the estimate manager.
//!
//! The tree model, personnel and boundary records live in `estimate-core`
//! and are re-exported here. This module adds the request and response
//! shapes used by the store and the HTTP API.
//!
//! - [`Estimate`] / [`EstimateRecord`]: the persisted estimate and its
//!   snake_case wire form (with `active_editors` filled in by the server).
//! - [`Draft`]: a named snapshot of an estimate, stored as a record.
//! - Node inputs ([`AddNodeInput`], [`UpdateNodeInput`]): path-addressed
//!   tree edits.

mod draft;
mod estimate;
mod node;

pub use draft::*;
pub use estimate::*;
pub use node::*;

pub use estimate_core::record::lenient;
pub use estimate_core::*;
