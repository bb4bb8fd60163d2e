//! Curation Diff - Structural comparison of annotation graphs
//!
//! Compares the graphs of several annotators (and optionally the curator)
//! over the same document:
//! - Configurations and configuration sets keyed by layer, feature and position
//! - The diff engine ([`CasDiff`])
//! - Agreement states of curation units

pub mod configuration;
pub mod diff;
pub mod result;
pub mod state;

pub use configuration::{Configuration, ConfigurationSet, DiffValue, GroupKey};
pub use diff::{compute_diff, compute_full_diff, CasDiff};
pub use result::DiffResult;
pub use state::{evaluate_sets, evaluate_units, units_from_layer, CurationUnit, CurationUnitState};
