//! Merge strategies
//!
//! A strategy looks at one configuration set and decides whether bulk merge
//! may adopt one of its configurations or whether the set is left to the
//! curator.

use std::collections::BTreeSet;

use curation_core::{MergeConfig, MergeStrategyKind};
use curation_diff::{Configuration, ConfigurationSet, DiffResult};

/// Outcome of a strategy for one configuration set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeDecision {
    /// Merge this configuration into the target
    Adopt(Configuration),
    /// Nothing to do (e.g. the curator already decided)
    Skip,
    /// Leave the set for manual curation
    Manual,
}

/// What a strategy may know beyond the set itself
#[derive(Debug, Clone, Default)]
pub struct MergeContext<'a> {
    /// Annotator groups expected to contribute, without the curator
    pub expected_groups: BTreeSet<&'a str>,

    /// Group holding the curator's own annotations, if it was diffed
    pub curator_group: Option<&'a str>,
}

impl<'a> MergeContext<'a> {
    pub fn from_diff(diff: &'a DiffResult, curator_group: Option<&'a str>) -> Self {
        Self {
            expected_groups: diff
                .cas_group_ids()
                .filter(|g| Some(*g) != curator_group)
                .collect(),
            curator_group,
        }
    }

    fn is_curated(&self, set: &ConfigurationSet) -> bool {
        self.curator_group
            .map_or(false, |curator| set.contains_group(curator))
    }
}

/// Policy deciding per configuration set
pub trait MergeStrategy: Send + Sync + std::fmt::Debug {
    /// Strategy name for logging and reports
    fn name(&self) -> &str;

    /// Decide what to do with one set
    fn decide(&self, set: &ConfigurationSet, context: &MergeContext<'_>) -> MergeDecision;
}

/// Build the strategy selected in the configuration
pub fn strategy_from_config(config: &MergeConfig) -> Box<dyn MergeStrategy> {
    match config.strategy {
        MergeStrategyKind::Manual => Box::new(ManualMergeStrategy),
        MergeStrategyKind::CompleteAgreement => Box::new(CompleteAgreementStrategy),
        MergeStrategyKind::MergeIncomplete => Box::new(MergeIncompleteStrategy),
        MergeStrategyKind::Threshold => Box::new(ThresholdBasedStrategy {
            user_threshold: config.user_threshold,
            confidence_threshold: config.confidence_threshold,
        }),
    }
}

/// Never merges anything automatically
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualMergeStrategy;

impl MergeStrategy for ManualMergeStrategy {
    fn name(&self) -> &str {
        "manual"
    }

    fn decide(&self, _set: &ConfigurationSet, _context: &MergeContext<'_>) -> MergeDecision {
        MergeDecision::Manual
    }
}

/// Adopts a set only when every expected annotator contributed and all agree
#[derive(Debug, Clone, Copy, Default)]
pub struct CompleteAgreementStrategy;

impl MergeStrategy for CompleteAgreementStrategy {
    fn name(&self) -> &str {
        "complete_agreement"
    }

    fn decide(&self, set: &ConfigurationSet, context: &MergeContext<'_>) -> MergeDecision {
        if context.is_curated(set) {
            return MergeDecision::Skip;
        }
        if set.is_incomplete(context.expected_groups.iter().copied()) {
            return MergeDecision::Manual;
        }
        adopt_if_unanimous(set)
    }
}

/// Adopts a set when all contributing annotators agree, even if some
/// annotators did not annotate the position at all
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeIncompleteStrategy;

impl MergeStrategy for MergeIncompleteStrategy {
    fn name(&self) -> &str {
        "merge_incomplete"
    }

    fn decide(&self, set: &ConfigurationSet, context: &MergeContext<'_>) -> MergeDecision {
        if context.is_curated(set) {
            return MergeDecision::Skip;
        }
        adopt_if_unanimous(set)
    }
}

fn adopt_if_unanimous(set: &ConfigurationSet) -> MergeDecision {
    if set.is_differing() {
        return MergeDecision::Manual;
    }
    match set.all_configurations().next() {
        Some(configuration) => MergeDecision::Adopt(configuration.clone()),
        None => MergeDecision::Manual,
    }
}

/// Majority vote
///
/// Each non-curator group votes for its value; groups that stacked several
/// annotations at the position abstain. The most voted value is adopted when
/// it has at least `user_threshold` votes and at least `confidence_threshold`
/// of all votes cast. Ties are left to the curator.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdBasedStrategy {
    pub user_threshold: usize,
    pub confidence_threshold: f64,
}

impl Default for ThresholdBasedStrategy {
    fn default() -> Self {
        Self {
            user_threshold: 1,
            confidence_threshold: 0.0,
        }
    }
}

impl MergeStrategy for ThresholdBasedStrategy {
    fn name(&self) -> &str {
        "threshold"
    }

    fn decide(&self, set: &ConfigurationSet, context: &MergeContext<'_>) -> MergeDecision {
        if context.is_curated(set) {
            return MergeDecision::Skip;
        }

        let voters: Vec<&Configuration> = set
            .cas_group_ids()
            .filter(|g| Some(*g) != context.curator_group)
            .filter_map(|g| match set.configurations(g) {
                [single] => Some(single),
                _ => None,
            })
            .collect();
        if voters.is_empty() {
            return MergeDecision::Manual;
        }

        // first configuration per value, with its vote count
        let mut tally: Vec<(&Configuration, usize)> = Vec::new();
        for voter in &voters {
            match tally.iter_mut().find(|(c, _)| c.value == voter.value) {
                Some((_, votes)) => *votes += 1,
                None => tally.push((voter, 1)),
            }
        }
        tally.sort_by(|a, b| b.1.cmp(&a.1));

        let (winner, votes) = tally[0];
        if tally.get(1).map_or(false, |(_, second)| *second == votes) {
            return MergeDecision::Manual;
        }

        let confidence = votes as f64 / voters.len() as f64;
        if votes >= self.user_threshold && confidence >= self.confidence_threshold {
            MergeDecision::Adopt(winner.clone())
        } else {
            MergeDecision::Manual
        }
    }
}
