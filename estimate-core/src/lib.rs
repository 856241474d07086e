//! Core model for hierarchical project estimates.
//!
//! # Core Concepts
//!
//! - [`EstimateTree`]: an ordered tree of four fixed levels
//!   (Epic → Story → Task → Sub-task) addressed by index paths.
//! - [`Personnel`]: hours per role for one node, always one entry per [`Role`].
//! - [`Estimate`]: the tree plus project metadata; the unit that gets persisted.
//!
//! Only nodes without children contribute their own hours to
//! [`grand_total`]. Once a node gains children its personnel is kept for
//! display but the rollup moves down to the children.
//!
//! # Boundary
//!
//! [`record`] holds the snake_case records exchanged with the API and the
//! store, and [`live`] merges updates relayed from other editors.

mod error;
mod estimate;
pub mod live;
mod node;
mod personnel;
pub mod record;
mod tree;

pub use error::*;
pub use estimate::*;
pub use live::{apply_update, EntityKind, LiveUpdate, MergeOutcome, UpdateAction};
pub use node::*;
pub use personnel::*;
pub use record::{EstimateRecord, NodeRecord};
pub use tree::*;
