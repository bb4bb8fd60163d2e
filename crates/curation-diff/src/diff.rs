//! Diff engine
//!
//! Walks the given layers of every compared graph, turns each annotation into
//! one configuration per curatable feature, and groups the configurations by
//! layer, feature and position. Graphs are only read.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use curation_core::{
    AnnotationGraph, AnnotationNode, Feature, FeatureKind, FeatureValue, Layer, LayerKind,
    LinkCompareBehavior, LinkWithRole, Position, TypeAdapter,
};

use crate::configuration::{Configuration, ConfigurationSet, DiffValue, GroupKey};
use crate::result::DiffResult;

/// Diff over a set of layers
#[derive(Debug, Clone)]
pub struct CasDiff<'a> {
    layers: &'a [Layer],
    range: Option<(usize, usize)>,
    link_compare: Option<LinkCompareBehavior>,
}

impl<'a> CasDiff<'a> {
    /// Diff the whole document over the given layers
    pub fn new(layers: &'a [Layer]) -> Self {
        Self {
            layers,
            range: None,
            link_compare: None,
        }
    }

    /// Only consider annotations inside `[begin, end]`. Relations are
    /// located at their target endpoint.
    pub fn with_range(mut self, begin: usize, end: usize) -> Self {
        self.range = Some((begin, end));
        self
    }

    /// Compare every link feature this way instead of the per-feature
    /// setting of the schema
    pub fn with_link_compare(mut self, behavior: Option<LinkCompareBehavior>) -> Self {
        self.link_compare = behavior;
        self
    }

    /// Compute the diff over graphs keyed by CAS group id
    pub fn compute(&self, graphs: &BTreeMap<String, AnnotationGraph>) -> DiffResult {
        let mut sets: BTreeMap<GroupKey, ConfigurationSet> = BTreeMap::new();

        for layer in self.layers {
            let before = sets.len();
            for (group, graph) in graphs {
                for configuration in self.extract(layer, graph) {
                    sets.entry(configuration.key())
                        .or_insert_with_key(|key| ConfigurationSet::new(key.clone()))
                        .add_configuration(group, configuration);
                }
            }
            debug!(
                layer = %layer.name,
                sets = sets.len() - before,
                "Diffed layer"
            );
        }

        let groups: BTreeSet<String> = graphs.keys().cloned().collect();
        DiffResult::new(groups, sets.into_values().collect())
    }

    fn in_range(&self, position: &Position) -> bool {
        match self.range {
            Some((begin, end)) => position.is_covered_by(begin, end),
            None => true,
        }
    }

    fn extract(&self, layer: &Layer, graph: &AnnotationGraph) -> Vec<Configuration> {
        let adapter = TypeAdapter::for_layer(layer);
        let features: Vec<&Feature> = layer.curatable_features().collect();
        let mut configurations = Vec::new();

        for (address, node) in graph.nodes_on(&layer.name) {
            let Some(position) = adapter.position(graph, address) else {
                warn!(layer = %layer.name, %address, "Skipping relation with dangling endpoint");
                continue;
            };

            if self.in_range(&position) {
                if features.is_empty() {
                    configurations.push(Configuration::new(
                        &layer.name,
                        None,
                        position,
                        DiffValue::Absent,
                        address,
                    ));
                }
                for feature in &features {
                    let value = adapter
                        .get_feature_value(&feature.name, node)
                        .ok()
                        .flatten();
                    configurations.push(Configuration::new(
                        &layer.name,
                        Some(&feature.name),
                        position,
                        self.diff_value(graph, feature, value),
                        address,
                    ));
                }
            }

            if layer.kind == LayerKind::Chain {
                if let Some(arc) = self.chain_arc(graph, layer, node, &position) {
                    if self.in_range(&arc) {
                        configurations.push(Configuration::new(
                            &layer.name,
                            None,
                            arc,
                            DiffValue::Absent,
                            address,
                        ));
                    }
                }
            }
        }

        configurations
    }

    /// Arc from a chain member to its successor, if it has one
    fn chain_arc(
        &self,
        graph: &AnnotationGraph,
        layer: &Layer,
        node: &AnnotationNode,
        position: &Position,
    ) -> Option<Position> {
        let next = node.next()?;
        match graph.position_of(next) {
            Some(successor) => Some(Position::relation(
                (position.begin(), position.end()),
                (successor.begin(), successor.end()),
            )),
            None => {
                warn!(layer = %layer.name, %next, "Skipping chain arc to missing member");
                None
            }
        }
    }

    fn diff_value(
        &self,
        graph: &AnnotationGraph,
        feature: &Feature,
        value: Option<&FeatureValue>,
    ) -> DiffValue {
        match value {
            None => DiffValue::Absent,
            Some(FeatureValue::Primitive(value)) => DiffValue::Primitive(value.clone()),
            Some(FeatureValue::Links(links)) if links.is_empty() => DiffValue::Absent,
            Some(FeatureValue::Links(links)) => {
                let declared = match &feature.kind {
                    FeatureKind::Link { compare, .. } => *compare,
                    FeatureKind::Primitive => LinkCompareBehavior::default(),
                };
                match self.link_compare.unwrap_or(declared) {
                    LinkCompareBehavior::RoleAsLabel => {
                        DiffValue::Roles(links.iter().map(|l| l.role.clone()).collect())
                    }
                    LinkCompareBehavior::RoleAndTarget => {
                        DiffValue::Links(resolve_links(graph, feature, links))
                    }
                }
            }
        }
    }
}

fn resolve_links(
    graph: &AnnotationGraph,
    feature: &Feature,
    links: &[LinkWithRole],
) -> BTreeSet<(String, Position)> {
    links
        .iter()
        .filter_map(|link| match graph.position_of(link.target) {
            Some(position) => Some((link.role.clone(), position)),
            None => {
                warn!(
                    feature = %feature.name,
                    target = %link.target,
                    "Skipping slot with dangling filler"
                );
                None
            }
        })
        .collect()
}

/// Diff the annotations inside `[begin, end]`
pub fn compute_diff(
    layers: &[Layer],
    graphs: &BTreeMap<String, AnnotationGraph>,
    begin: usize,
    end: usize,
) -> DiffResult {
    CasDiff::new(layers).with_range(begin, end).compute(graphs)
}

/// Diff the whole document
pub fn compute_full_diff(layers: &[Layer], graphs: &BTreeMap<String, AnnotationGraph>) -> DiffResult {
    CasDiff::new(layers).compute(graphs)
}
