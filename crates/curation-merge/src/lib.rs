//! Curation Merge - Copying annotator decisions into the curation graph
//!
//! - [`CasMerge`]: span, relation, slot and chain merge with all-or-nothing
//!   semantics
//! - Merge strategies deciding per configuration set
//! - Bulk merge of a whole diff with a [`MergeReport`]

pub mod bulk;
pub mod cas_merge;
pub mod strategy;

pub use bulk::{merge_cas, MergeFailure, MergeReport};
pub use cas_merge::{CasMerge, MergeOutcome};
pub use strategy::{
    strategy_from_config, CompleteAgreementStrategy, ManualMergeStrategy, MergeContext,
    MergeDecision, MergeIncompleteStrategy, MergeStrategy, ThresholdBasedStrategy,
};
