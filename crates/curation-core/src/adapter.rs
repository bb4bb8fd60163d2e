//! Layer adapters
//!
//! The diff and merge engines never look at a layer's kind directly. They ask
//! a [`TypeAdapter`] for positions, feature access, equivalence and creation,
//! and the adapter dispatches to the span, relation or chain rules.

use crate::graph::{Address, Anchor, AnnotationGraph, AnnotationNode, Transaction};
use crate::layer::{FeatureKind, Layer, LayerKind};
use crate::position::Position;
use crate::value::FeatureValue;
use crate::AnnotationError;

/// Kind-specific adapter for a layer
#[derive(Debug, Clone, Copy)]
pub enum TypeAdapter<'a> {
    Span(SpanAdapter<'a>),
    Relation(RelationAdapter<'a>),
    Chain(ChainAdapter<'a>),
}

impl<'a> TypeAdapter<'a> {
    /// Select the adapter for a layer
    pub fn for_layer(layer: &'a Layer) -> Self {
        match &layer.kind {
            LayerKind::Span => Self::Span(SpanAdapter { layer }),
            LayerKind::Relation { endpoint_layer } => Self::Relation(RelationAdapter {
                layer,
                endpoint_layer,
            }),
            LayerKind::Chain => Self::Chain(ChainAdapter { layer }),
        }
    }

    pub fn layer(&self) -> &'a Layer {
        match self {
            Self::Span(a) => a.layer,
            Self::Relation(a) => a.layer,
            Self::Chain(a) => a.layer,
        }
    }

    /// Position of a node of this layer, with the layer's anchoring mode
    pub fn position(&self, graph: &AnnotationGraph, address: Address) -> Option<Position> {
        graph
            .position_of(address)
            .map(|p| p.with_anchoring(self.layer().anchoring_mode))
    }

    /// Nodes of this layer at exactly the given position
    pub fn select_at(&self, graph: &AnnotationGraph, position: &Position) -> Vec<Address> {
        graph
            .nodes_on(&self.layer().name)
            .filter(|(a, _)| self.position(graph, *a).as_ref() == Some(position))
            .map(|(a, _)| a)
            .collect()
    }

    /// Look up a node and check that it belongs to this layer
    pub fn node<'g>(
        &self,
        graph: &'g AnnotationGraph,
        address: Address,
    ) -> Result<&'g AnnotationNode, AnnotationError> {
        let node = graph
            .get(address)
            .ok_or(AnnotationError::UnknownAddress(address))?;
        if node.layer != self.layer().name {
            return Err(AnnotationError::LayerMismatch {
                address,
                expected: self.layer().name.clone(),
                actual: node.layer.clone(),
            });
        }
        Ok(node)
    }

    /// Value of a declared feature
    pub fn get_feature_value<'n>(
        &self,
        feature: &str,
        node: &'n AnnotationNode,
    ) -> Result<Option<&'n FeatureValue>, AnnotationError> {
        self.declared(feature)?;
        Ok(node.feature(feature))
    }

    /// Write a declared feature through a transaction. Link values are
    /// checked against the transaction's graph: every slot target must exist
    /// there and belong to the feature's target layer.
    pub fn set_feature_value(
        &self,
        txn: &mut Transaction<'_>,
        address: Address,
        feature: &str,
        value: Option<FeatureValue>,
    ) -> Result<(), AnnotationError> {
        let declared = self.declared(feature)?;
        match (&declared.kind, &value) {
            (FeatureKind::Primitive, Some(FeatureValue::Links(_))) => {
                return Err(AnnotationError::InvalidSlot(format!(
                    "feature [{feature}] is not a link feature"
                )));
            }
            (FeatureKind::Link { .. }, Some(FeatureValue::Primitive(_))) => {
                return Err(AnnotationError::InvalidSlot(format!(
                    "feature [{feature}] only accepts links"
                )));
            }
            (FeatureKind::Link { target_layer, .. }, Some(FeatureValue::Links(links))) => {
                for link in links {
                    let filler = txn
                        .graph()
                        .get(link.target)
                        .ok_or(AnnotationError::UnknownAddress(link.target))?;
                    if &filler.layer != target_layer {
                        return Err(AnnotationError::InvalidSlot(format!(
                            "slot [{}] points to layer [{}] instead of [{}]",
                            link.role, filler.layer, target_layer
                        )));
                    }
                }
            }
            _ => {}
        }
        txn.set_feature(address, feature, value)
    }

    /// Two nodes are equivalent when they are on this layer, sit at the same
    /// position and agree on every curatable primitive feature. Link features
    /// are not compared.
    pub fn is_equivalent(
        &self,
        graph_a: &AnnotationGraph,
        a: Address,
        graph_b: &AnnotationGraph,
        b: Address,
    ) -> bool {
        let (Ok(node_a), Ok(node_b)) = (self.node(graph_a, a), self.node(graph_b, b)) else {
            return false;
        };
        if self.position(graph_a, a) != self.position(graph_b, b) {
            return false;
        }
        self.layer()
            .primitive_features()
            .all(|f| node_a.feature(&f.name) == node_b.feature(&f.name))
    }

    /// Copy every curatable primitive feature from a source node onto a
    /// target node. Features absent on the source are cleared on the target;
    /// link features are left alone.
    pub fn copy_primitive_features(
        &self,
        txn: &mut Transaction<'_>,
        target: Address,
        source_graph: &AnnotationGraph,
        source: Address,
    ) -> Result<(), AnnotationError> {
        let source_node = self.node(source_graph, source)?;
        for feature in self.layer().primitive_features() {
            let value = source_node.feature(&feature.name).cloned();
            let current = txn.graph().get(target).and_then(|n| n.feature(&feature.name));
            if current != value.as_ref() {
                self.set_feature_value(txn, target, &feature.name, value)?;
            }
        }
        Ok(())
    }

    fn declared(&self, feature: &str) -> Result<&'a crate::layer::Feature, AnnotationError> {
        self.layer()
            .feature(feature)
            .ok_or_else(|| AnnotationError::FeatureNotFound {
                layer: self.layer().name.clone(),
                feature: feature.to_string(),
            })
    }
}

// ============================================================================
// Span
// ============================================================================

/// Adapter for span layers
#[derive(Debug, Clone, Copy)]
pub struct SpanAdapter<'a> {
    layer: &'a Layer,
}

impl<'a> SpanAdapter<'a> {
    /// Create a span, enforcing the layer's overlap policy
    pub fn create(
        &self,
        txn: &mut Transaction<'_>,
        begin: usize,
        end: usize,
    ) -> Result<Address, AnnotationError> {
        check_span_policy(self.layer, txn.graph(), &Position::span(begin, end))?;
        Ok(txn.add(AnnotationNode {
            layer: self.layer.name.clone(),
            anchor: Anchor::span(begin, end),
            features: Default::default(),
        }))
    }
}

// ============================================================================
// Relation
// ============================================================================

/// Adapter for relation layers
#[derive(Debug, Clone, Copy)]
pub struct RelationAdapter<'a> {
    layer: &'a Layer,
    endpoint_layer: &'a str,
}

impl<'a> RelationAdapter<'a> {
    pub fn endpoint_layer(&self) -> &'a str {
        self.endpoint_layer
    }

    /// Endpoints of a relation node
    pub fn endpoints(
        &self,
        graph: &AnnotationGraph,
        address: Address,
    ) -> Result<(Address, Address), AnnotationError> {
        let node = TypeAdapter::Relation(*self).node(graph, address)?;
        match node.anchor {
            Anchor::Relation { source, target } => Ok((source, target)),
            _ => Err(AnnotationError::WrongLayerKind {
                layer: self.layer.name.clone(),
                expected: "relation",
            }),
        }
    }

    /// Relations of this layer between exactly these endpoints
    pub fn select_between(
        &self,
        graph: &AnnotationGraph,
        source: Address,
        target: Address,
    ) -> Vec<Address> {
        graph
            .nodes_on(&self.layer.name)
            .filter(|(_, n)| n.anchor == Anchor::relation(source, target))
            .map(|(a, _)| a)
            .collect()
    }

    /// Create a relation, enforcing endpoint layer and overlap policy
    pub fn create(
        &self,
        txn: &mut Transaction<'_>,
        source: Address,
        target: Address,
    ) -> Result<Address, AnnotationError> {
        for endpoint in [source, target] {
            let node = txn
                .graph()
                .get(endpoint)
                .ok_or(AnnotationError::UnknownAddress(endpoint))?;
            if node.layer != self.endpoint_layer {
                return Err(AnnotationError::LayerMismatch {
                    address: endpoint,
                    expected: self.endpoint_layer.to_string(),
                    actual: node.layer.clone(),
                });
            }
        }

        let mode = self.layer.overlap_mode;
        for (_, existing) in txn.graph().nodes_on(&self.layer.name) {
            let Anchor::Relation {
                source: s,
                target: t,
            } = existing.anchor
            else {
                continue;
            };
            let stacked = s == source && t == target;
            let overlapping = !stacked && (s == source || t == target);
            if stacked && !mode.allows_stacking() {
                return Err(overlap_violation(
                    self.layer,
                    txn.graph().position_of(source),
                    "stacking is not enabled for this layer",
                ));
            }
            if overlapping && !mode.allows_overlap() {
                return Err(overlap_violation(
                    self.layer,
                    txn.graph().position_of(source),
                    "overlap is not enabled for this layer",
                ));
            }
        }

        Ok(txn.add(AnnotationNode {
            layer: self.layer.name.clone(),
            anchor: Anchor::relation(source, target),
            features: Default::default(),
        }))
    }
}

// ============================================================================
// Chain
// ============================================================================

/// Adapter for chain layers
#[derive(Debug, Clone, Copy)]
pub struct ChainAdapter<'a> {
    layer: &'a Layer,
}

impl<'a> ChainAdapter<'a> {
    /// Create a chain member without successor
    pub fn create_link(
        &self,
        txn: &mut Transaction<'_>,
        begin: usize,
        end: usize,
    ) -> Result<Address, AnnotationError> {
        check_span_policy(self.layer, txn.graph(), &Position::span(begin, end))?;
        Ok(txn.add(AnnotationNode {
            layer: self.layer.name.clone(),
            anchor: Anchor::chain_link(begin, end),
            features: Default::default(),
        }))
    }

    /// Connect `member` to `next`, keeping chains linear and acyclic
    pub fn link(
        &self,
        txn: &mut Transaction<'_>,
        member: Address,
        next: Address,
    ) -> Result<(), AnnotationError> {
        let graph = txn.graph();
        if member == next {
            return Err(AnnotationError::InvalidChain(
                "a chain member cannot follow itself".to_string(),
            ));
        }
        if let Some(existing) = graph.get(member).and_then(AnnotationNode::next) {
            if existing != next {
                return Err(AnnotationError::InvalidChain(format!(
                    "chain member {member} already has a successor"
                )));
            }
            return Ok(());
        }
        if let Some(predecessor) = graph.chain_predecessor(next) {
            if predecessor != member {
                return Err(AnnotationError::InvalidChain(format!(
                    "chain member {next} already has a predecessor"
                )));
            }
        }
        if graph.chain_from(next).contains(&member) {
            return Err(AnnotationError::InvalidChain(
                "linking these members would create a cycle".to_string(),
            ));
        }
        txn.set_next(member, Some(next))
    }
}

// ============================================================================
// Overlap policy
// ============================================================================

fn check_span_policy(
    layer: &Layer,
    graph: &AnnotationGraph,
    position: &Position,
) -> Result<(), AnnotationError> {
    let mode = layer.overlap_mode;
    for (address, _) in graph.nodes_on(&layer.name) {
        let Some(existing) = graph.position_of(address) else {
            continue;
        };
        if &existing == position && !mode.allows_stacking() {
            return Err(overlap_violation(
                layer,
                Some(*position),
                "stacking is not enabled for this layer",
            ));
        }
        if existing.overlaps(position) && !mode.allows_overlap() {
            return Err(overlap_violation(
                layer,
                Some(*position),
                "overlap is not enabled for this layer",
            ));
        }
    }
    Ok(())
}

fn overlap_violation(layer: &Layer, position: Option<Position>, reason: &str) -> AnnotationError {
    AnnotationError::OverlapViolation {
        layer: layer.name.clone(),
        position: position
            .map(|p| p.to_string())
            .unwrap_or_else(|| "?".to_string()),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{Feature, OverlapMode};
    use crate::value::LinkWithRole;

    fn pos_layer(mode: OverlapMode) -> Layer {
        Layer::span("POS")
            .with_feature(Feature::primitive("value"))
            .with_overlap_mode(mode)
    }

    #[test]
    fn test_span_stacking_rejected_without_policy() {
        let layer = pos_layer(OverlapMode::OverlapOnly);
        let mut graph = AnnotationGraph::new();
        graph.annotate("POS", Anchor::span(0, 4)).add();

        let TypeAdapter::Span(adapter) = TypeAdapter::for_layer(&layer) else {
            unreachable!()
        };
        let mut txn = graph.transaction();
        let result = adapter.create(&mut txn, 0, 4);
        assert!(matches!(
            result,
            Err(AnnotationError::OverlapViolation { .. })
        ));
        // Overlap is fine in this mode
        assert!(adapter.create(&mut txn, 2, 6).is_ok());
    }

    #[test]
    fn test_span_overlap_rejected_for_stacking_only() {
        let layer = pos_layer(OverlapMode::StackingOnly);
        let mut graph = AnnotationGraph::new();
        graph.annotate("POS", Anchor::span(0, 4)).add();

        let TypeAdapter::Span(adapter) = TypeAdapter::for_layer(&layer) else {
            unreachable!()
        };
        let mut txn = graph.transaction();
        assert!(adapter.create(&mut txn, 0, 4).is_ok());
        assert!(adapter.create(&mut txn, 2, 6).is_err());
    }

    #[test]
    fn test_equivalence_ignores_links() {
        let layer = Layer::span("Event")
            .with_feature(Feature::primitive("value"))
            .with_feature(Feature::link("args", "Event"));
        let adapter = TypeAdapter::for_layer(&layer);

        let mut a = AnnotationGraph::new();
        let filler = a.annotate("Event", Anchor::span(5, 6)).add();
        let host_a = a
            .annotate("Event", Anchor::span(0, 2))
            .with_feature("value", "x")
            .with_feature("args", vec![LinkWithRole::new("agent", filler)])
            .add();

        let mut b = AnnotationGraph::new();
        let host_b = b
            .annotate("Event", Anchor::span(0, 2))
            .with_feature("value", "x")
            .add();

        assert!(adapter.is_equivalent(&a, host_a, &b, host_b));
    }

    #[test]
    fn test_set_feature_value_checks_link_targets() {
        let layer = Layer::span("Event").with_feature(Feature::link("args", "Entity"));
        let adapter = TypeAdapter::for_layer(&layer);

        let mut graph = AnnotationGraph::new();
        let host = graph.annotate("Event", Anchor::span(0, 2)).add();
        let entity = graph.annotate("Entity", Anchor::span(4, 6)).add();

        let mut txn = graph.transaction();
        let dangling = vec![LinkWithRole::new("agent", Address::new(99))];
        assert!(matches!(
            adapter.set_feature_value(&mut txn, host, "args", Some(dangling.into())),
            Err(AnnotationError::UnknownAddress(_))
        ));

        let wrong_layer = vec![LinkWithRole::new("agent", host)];
        assert!(matches!(
            adapter.set_feature_value(&mut txn, host, "args", Some(wrong_layer.into())),
            Err(AnnotationError::InvalidSlot(_))
        ));

        let valid = vec![LinkWithRole::new("agent", entity)];
        adapter
            .set_feature_value(&mut txn, host, "args", Some(valid.into()))
            .unwrap();
        txn.commit();
        assert!(graph.get(host).unwrap().feature("args").is_some());
    }

    #[test]
    fn test_relation_overlap_policy() {
        let deps = Layer::relation("Dependency", "Token").with_overlap_mode(OverlapMode::NoOverlap);

        let mut graph = AnnotationGraph::new();
        let a = graph.annotate("Token", Anchor::span(0, 1)).add();
        let b = graph.annotate("Token", Anchor::span(2, 3)).add();
        let c = graph.annotate("Token", Anchor::span(4, 5)).add();
        graph.annotate("Dependency", Anchor::relation(a, b)).add();

        let TypeAdapter::Relation(adapter) = TypeAdapter::for_layer(&deps) else {
            unreachable!()
        };
        let mut txn = graph.transaction();
        assert!(adapter.create(&mut txn, a, b).is_err());
        assert!(adapter.create(&mut txn, a, c).is_err());
        assert!(adapter.create(&mut txn, c, a).is_ok());
    }

    #[test]
    fn test_chain_link_rules() {
        let layer = Layer::chain("Coref");
        let TypeAdapter::Chain(adapter) = TypeAdapter::for_layer(&layer) else {
            unreachable!()
        };

        let mut graph = AnnotationGraph::new();
        let a = graph.annotate("Coref", Anchor::chain_link(0, 1)).add();
        let b = graph.annotate("Coref", Anchor::chain_link(5, 6)).add();
        let c = graph.annotate("Coref", Anchor::chain_link(9, 10)).add();

        let mut txn = graph.transaction();
        adapter.link(&mut txn, a, b).unwrap();
        assert!(adapter.link(&mut txn, a, c).is_err(), "second successor");
        assert!(adapter.link(&mut txn, c, b).is_err(), "second predecessor");
        assert!(adapter.link(&mut txn, b, a).is_err(), "cycle");
        adapter.link(&mut txn, b, c).unwrap();
        txn.commit();

        assert_eq!(graph.chain_from(a), vec![a, b, c]);
    }
}
