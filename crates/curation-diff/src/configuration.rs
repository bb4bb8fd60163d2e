//! Configurations and configuration sets
//!
//! A [`Configuration`] is what one graph says about one feature of one
//! annotation at one position. A [`ConfigurationSet`] collects everything the
//! compared graphs say under the same [`GroupKey`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use curation_core::{Address, Position, PrimitiveValue};

// ============================================================================
// Keys and values
// ============================================================================

/// Grouping key of a configuration set
///
/// `feature` is `None` for position-only configurations: annotations of
/// layers without curatable features, and chain arcs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub layer: String,
    pub feature: Option<String>,
    pub position: Position,
}

impl GroupKey {
    pub fn new(layer: impl Into<String>, feature: Option<&str>, position: Position) -> Self {
        Self {
            layer: layer.into(),
            feature: feature.map(str::to_string),
            position,
        }
    }
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.feature {
            Some(feature) => write!(f, "{}.{}@{}", self.layer, feature, self.position),
            None => write!(f, "{}@{}", self.layer, self.position),
        }
    }
}

/// Comparable form of a feature value
///
/// Link features collapse to role labels or to role/filler-position pairs
/// depending on the comparison behavior, so values from different graphs can
/// be compared without looking at addresses.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DiffValue {
    /// Unset feature, empty slot list, or a position-only configuration
    Absent,
    Primitive(PrimitiveValue),
    /// Role labels of a slot list
    Roles(BTreeSet<String>),
    /// Role labels with the positions of their fillers
    Links(BTreeSet<(String, Position)>),
}

impl std::fmt::Display for DiffValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => write!(f, "<none>"),
            Self::Primitive(value) => write!(f, "{value}"),
            Self::Roles(roles) => {
                let roles: Vec<&str> = roles.iter().map(String::as_str).collect();
                write!(f, "[{}]", roles.join(", "))
            }
            Self::Links(links) => {
                let links: Vec<String> = links
                    .iter()
                    .map(|(role, position)| format!("{role}->{position}"))
                    .collect();
                write!(f, "[{}]", links.join(", "))
            }
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// One graph's observation under a group key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub layer: String,
    pub feature: Option<String>,
    pub position: Position,
    pub value: DiffValue,

    /// Graph the observation comes from; set when added to a set
    pub cas_group_id: String,

    /// Address of the observed annotation in its own graph
    pub address: Address,
}

impl Configuration {
    pub fn new(
        layer: impl Into<String>,
        feature: Option<&str>,
        position: Position,
        value: DiffValue,
        address: Address,
    ) -> Self {
        Self {
            layer: layer.into(),
            feature: feature.map(str::to_string),
            position,
            value,
            cas_group_id: String::new(),
            address,
        }
    }

    pub fn key(&self) -> GroupKey {
        GroupKey {
            layer: self.layer.clone(),
            feature: self.feature.clone(),
            position: self.position,
        }
    }

    fn matches(&self, key: &GroupKey) -> bool {
        self.layer == key.layer && self.feature == key.feature && self.position == key.position
    }
}

// ============================================================================
// ConfigurationSet
// ============================================================================

/// All configurations observed under one group key, by graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationSet {
    key: GroupKey,
    configurations: BTreeMap<String, Vec<Configuration>>,
}

impl ConfigurationSet {
    pub fn new(key: GroupKey) -> Self {
        Self {
            key,
            configurations: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn layer(&self) -> &str {
        &self.key.layer
    }

    pub fn feature(&self) -> Option<&str> {
        self.key.feature.as_deref()
    }

    pub fn position(&self) -> &Position {
        &self.key.position
    }

    /// Add a configuration contributed by `cas_group_id`. Configurations of
    /// one group keep their insertion order.
    ///
    /// # Panics
    ///
    /// If the configuration's layer, feature or position differs from the
    /// set's key.
    pub fn add_configuration(&mut self, cas_group_id: &str, mut configuration: Configuration) {
        assert!(
            configuration.matches(&self.key),
            "configuration {} does not belong to set {}",
            configuration.key(),
            self.key
        );
        configuration.cas_group_id = cas_group_id.to_string();
        self.configurations
            .entry(cas_group_id.to_string())
            .or_default()
            .push(configuration);
    }

    /// Configurations of one group, empty if the group did not contribute
    pub fn configurations(&self, cas_group_id: &str) -> &[Configuration] {
        self.configurations
            .get(cas_group_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All configurations, grouped by contributor in group order
    pub fn all_configurations(&self) -> impl Iterator<Item = &Configuration> {
        self.configurations.values().flatten()
    }

    /// Groups that contributed at least one configuration
    pub fn cas_group_ids(&self) -> impl Iterator<Item = &str> {
        self.configurations.keys().map(String::as_str)
    }

    pub fn contains_group(&self, cas_group_id: &str) -> bool {
        self.configurations.contains_key(cas_group_id)
    }

    /// Distinct values across all groups
    pub fn values(&self) -> BTreeSet<&DiffValue> {
        self.all_configurations().map(|c| &c.value).collect()
    }

    /// More than one distinct value was observed
    pub fn has_differences(&self) -> bool {
        self.values().len() > 1
    }

    /// Some group contributed more than one configuration
    pub fn is_stacked(&self) -> bool {
        self.configurations.values().any(|c| c.len() > 1)
    }

    /// Differing values or stacking disagreement
    pub fn is_differing(&self) -> bool {
        self.has_differences() || self.is_stacked()
    }

    /// Contributing groups are a strict subset of `expected`
    pub fn is_incomplete<'a>(&self, expected: impl IntoIterator<Item = &'a str>) -> bool {
        expected.into_iter().any(|group| !self.contains_group(group))
    }

    /// Groups voting for each value. Groups that contributed several
    /// configurations vote once per distinct value.
    pub fn votes(&self) -> BTreeMap<&DiffValue, BTreeSet<&str>> {
        let mut votes: BTreeMap<&DiffValue, BTreeSet<&str>> = BTreeMap::new();
        for configuration in self.all_configurations() {
            votes
                .entry(&configuration.value)
                .or_default()
                .insert(&configuration.cas_group_id);
        }
        votes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos_key() -> GroupKey {
        GroupKey::new("POS", Some("value"), Position::span(0, 4))
    }

    fn pos_config(value: &str, address: u32) -> Configuration {
        Configuration::new(
            "POS",
            Some("value"),
            Position::span(0, 4),
            DiffValue::Primitive(PrimitiveValue::String(value.to_string())),
            Address::new(address),
        )
    }

    #[test]
    fn test_group_order_and_lookup() {
        let mut set = ConfigurationSet::new(pos_key());
        set.add_configuration("bob", pos_config("NN", 3));
        set.add_configuration("alice", pos_config("NN", 0));

        let groups: Vec<_> = set.cas_group_ids().collect();
        assert_eq!(groups, vec!["alice", "bob"]);
        assert_eq!(set.configurations("bob")[0].cas_group_id, "bob");
        assert!(set.configurations("carol").is_empty());
        assert!(!set.has_differences());
        assert!(!set.is_stacked());
    }

    #[test]
    fn test_differences_and_stacking() {
        let mut set = ConfigurationSet::new(pos_key());
        set.add_configuration("alice", pos_config("NN", 0));
        set.add_configuration("bob", pos_config("NE", 0));
        assert!(set.has_differences());
        assert!(set.is_differing());

        let mut stacked = ConfigurationSet::new(pos_key());
        stacked.add_configuration("alice", pos_config("NN", 0));
        stacked.add_configuration("alice", pos_config("NN", 1));
        assert!(!stacked.has_differences());
        assert!(stacked.is_stacked());
        assert!(stacked.is_differing());
        assert_eq!(stacked.configurations("alice")[1].address, Address::new(1));
    }

    #[test]
    fn test_incomplete() {
        let mut set = ConfigurationSet::new(pos_key());
        set.add_configuration("alice", pos_config("NN", 0));
        assert!(set.is_incomplete(["alice", "bob"]));
        assert!(!set.is_incomplete(["alice"]));
    }

    #[test]
    fn test_votes() {
        let mut set = ConfigurationSet::new(pos_key());
        set.add_configuration("alice", pos_config("NN", 0));
        set.add_configuration("bob", pos_config("NN", 0));
        set.add_configuration("carol", pos_config("NE", 0));

        let votes = set.votes();
        let nn = DiffValue::Primitive(PrimitiveValue::String("NN".to_string()));
        assert_eq!(votes[&nn].len(), 2);
        assert_eq!(votes.len(), 2);
    }

    #[test]
    #[should_panic(expected = "does not belong")]
    fn test_mismatched_configuration_panics() {
        let mut set = ConfigurationSet::new(pos_key());
        let mut config = pos_config("NN", 0);
        config.position = Position::span(1, 4);
        set.add_configuration("alice", config);
    }
}
