//! Diff result

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use curation_core::Position;

use crate::configuration::{ConfigurationSet, GroupKey};

/// Configuration sets of a diff in group key order, together with the
/// groups that took part
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    cas_group_ids: BTreeSet<String>,
    configuration_sets: Vec<ConfigurationSet>,
}

impl DiffResult {
    /// Build a result from sets already sorted by key
    pub(crate) fn new(
        cas_group_ids: BTreeSet<String>,
        configuration_sets: Vec<ConfigurationSet>,
    ) -> Self {
        debug_assert!(configuration_sets
            .windows(2)
            .all(|w| w[0].key() < w[1].key()));
        Self {
            cas_group_ids,
            configuration_sets,
        }
    }

    /// Groups that were compared, whether or not they contributed anything
    pub fn cas_group_ids(&self) -> impl Iterator<Item = &str> {
        self.cas_group_ids.iter().map(String::as_str)
    }

    pub fn configuration_sets(&self) -> &[ConfigurationSet] {
        &self.configuration_sets
    }

    pub fn len(&self) -> usize {
        self.configuration_sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configuration_sets.is_empty()
    }

    pub fn get(&self, key: &GroupKey) -> Option<&ConfigurationSet> {
        self.configuration_sets
            .binary_search_by(|set| set.key().cmp(key))
            .ok()
            .map(|i| &self.configuration_sets[i])
    }

    /// Sets at a position, on any layer and feature
    pub fn sets_at<'a>(
        &'a self,
        position: &'a Position,
    ) -> impl Iterator<Item = &'a ConfigurationSet> + 'a {
        self.configuration_sets
            .iter()
            .filter(move |set| set.position() == position)
    }

    /// Sets whose position lies inside `[begin, end]`
    pub fn sets_in_range(
        &self,
        begin: usize,
        end: usize,
    ) -> impl Iterator<Item = &ConfigurationSet> {
        self.configuration_sets
            .iter()
            .filter(move |set| set.position().is_covered_by(begin, end))
    }

    /// Sets with more than one value or stacked contributions
    pub fn differing_configuration_sets(&self) -> impl Iterator<Item = &ConfigurationSet> {
        self.configuration_sets.iter().filter(|set| set.is_differing())
    }

    /// Sets that some compared group did not contribute to
    pub fn incomplete_configuration_sets(&self) -> impl Iterator<Item = &ConfigurationSet> {
        self.configuration_sets
            .iter()
            .filter(|set| self.is_incomplete(set))
    }

    pub fn is_incomplete(&self, set: &ConfigurationSet) -> bool {
        set.is_incomplete(self.cas_group_ids())
    }

    /// Every set is complete and free of differences
    pub fn is_agreement(&self) -> bool {
        self.configuration_sets
            .iter()
            .all(|set| !set.is_differing() && !self.is_incomplete(set))
    }
}
