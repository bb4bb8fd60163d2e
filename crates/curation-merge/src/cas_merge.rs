//! Merge engine
//!
//! Copies annotations from an annotator's graph into the curation graph. Each
//! public entry point runs inside one [`Transaction`]: it either applies all
//! of its changes or, on error, leaves the target exactly as it was.
//!
//! Addresses are never copied between graphs. Relation endpoints, slot
//! fillers and chain successors are located in the target by position and
//! features, and the target's own addresses are written.

use serde::{Deserialize, Serialize};
use tracing::debug;

use curation_core::{
    Address, AnnotationError, AnnotationGraph, FeatureKind, FeatureValue, Layer, LayerKind,
    LayerSchema, LinkWithRole, OverlapMode, Position, Transaction, TypeAdapter, CURATION_USER,
};

type MergeResult<T> = std::result::Result<T, AnnotationError>;

/// What a successful merge did to the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "address", rename_all = "snake_case")]
pub enum MergeOutcome {
    /// A new annotation was created
    Created(Address),
    /// An existing annotation was changed
    Updated(Address),
}

impl MergeOutcome {
    /// Address of the affected annotation in the target
    pub fn address(self) -> Address {
        match self {
            Self::Created(a) | Self::Updated(a) => a,
        }
    }

    pub fn is_created(self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Merge engine over a layer schema
#[derive(Debug, Clone)]
pub struct CasMerge<'s> {
    schema: &'s LayerSchema,
    target_user: String,
    allow_stacking: bool,
}

impl<'s> CasMerge<'s> {
    pub fn new(schema: &'s LayerSchema) -> Self {
        Self {
            schema,
            target_user: CURATION_USER.to_string(),
            allow_stacking: false,
        }
    }

    /// Name of the user owning the target graph, for logging
    pub fn with_target_user(mut self, user: impl Into<String>) -> Self {
        self.target_user = user.into();
        self
    }

    /// Stacking requested by bulk merge for span and relation annotations
    pub fn with_allow_stacking(mut self, allow_stacking: bool) -> Self {
        self.allow_stacking = allow_stacking;
        self
    }

    pub fn schema(&self) -> &'s LayerSchema {
        self.schema
    }

    pub fn allow_stacking(&self) -> bool {
        self.allow_stacking
    }

    /// Whether the target holds an annotation equivalent to `source`
    pub fn has_equivalent(
        &self,
        target: &AnnotationGraph,
        layer: &str,
        source_graph: &AnnotationGraph,
        source: Address,
    ) -> bool {
        let Ok(layer) = self.layer(layer) else {
            return false;
        };
        let adapter = TypeAdapter::for_layer(layer);
        match source_position(&adapter, source_graph, source) {
            Ok(position) => {
                !equivalents(&adapter, target, source_graph, source, &position).is_empty()
            }
            Err(_) => false,
        }
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Merge a span annotation with its primitive features. Link features
    /// are merged separately with [`CasMerge::merge_slot_feature`].
    pub fn merge_span_annotation(
        &self,
        target: &mut AnnotationGraph,
        layer: &str,
        source_graph: &AnnotationGraph,
        source: Address,
        allow_stacking: bool,
    ) -> MergeResult<MergeOutcome> {
        let layer = self.layer(layer)?;
        let mut txn = target.transaction();
        let outcome = self.merge_span(&mut txn, layer, source_graph, source, allow_stacking)?;
        txn.commit();
        debug!(
            user = %self.target_user,
            layer = %layer.name,
            ?outcome,
            "Merged span annotation"
        );
        Ok(outcome)
    }

    /// Merge a relation annotation. Both endpoints must already be present
    /// in the target.
    pub fn merge_relation_annotation(
        &self,
        target: &mut AnnotationGraph,
        layer: &str,
        source_graph: &AnnotationGraph,
        source: Address,
        allow_stacking: bool,
    ) -> MergeResult<MergeOutcome> {
        let layer = self.layer(layer)?;
        let mut txn = target.transaction();
        let outcome = self.merge_relation(&mut txn, layer, source_graph, source, allow_stacking)?;
        txn.commit();
        debug!(
            user = %self.target_user,
            layer = %layer.name,
            ?outcome,
            "Merged relation annotation"
        );
        Ok(outcome)
    }

    /// Merge one slot of a link feature onto the matching host in the
    /// target. A missing span filler is merged along with the slot.
    pub fn merge_slot_feature(
        &self,
        target: &mut AnnotationGraph,
        layer: &str,
        source_graph: &AnnotationGraph,
        source_host: Address,
        feature: &str,
        slot_index: usize,
    ) -> MergeResult<MergeOutcome> {
        let layer = self.layer(layer)?;
        let mut txn = target.transaction();
        let outcome = self.merge_slot(
            &mut txn,
            layer,
            source_graph,
            source_host,
            feature,
            slot_index,
        )?;
        txn.commit();
        debug!(
            user = %self.target_user,
            layer = %layer.name,
            feature,
            slot_index,
            ?outcome,
            "Merged slot"
        );
        Ok(outcome)
    }

    /// Merge a chain member and its link to the next member, creating
    /// either member in the target where missing
    pub fn merge_chain_link(
        &self,
        target: &mut AnnotationGraph,
        layer: &str,
        source_graph: &AnnotationGraph,
        source: Address,
    ) -> MergeResult<MergeOutcome> {
        let layer = self.layer(layer)?;
        let mut txn = target.transaction();
        let outcome = self.merge_chain(&mut txn, layer, source_graph, source)?;
        txn.commit();
        debug!(
            user = %self.target_user,
            layer = %layer.name,
            ?outcome,
            "Merged chain link"
        );
        Ok(outcome)
    }

    // ========================================================================
    // Spans
    // ========================================================================

    fn merge_span(
        &self,
        txn: &mut Transaction<'_>,
        layer: &Layer,
        source_graph: &AnnotationGraph,
        source: Address,
        allow_stacking: bool,
    ) -> MergeResult<MergeOutcome> {
        let TypeAdapter::Span(span) = TypeAdapter::for_layer(layer) else {
            return Err(wrong_kind(layer, "span"));
        };
        let adapter = TypeAdapter::Span(span);
        adapter.node(source_graph, source)?;
        let position = source_position(&adapter, source_graph, source)?;

        let existing = adapter.select_at(txn.graph(), &position);
        if existing
            .iter()
            .any(|a| adapter.is_equivalent(txn.graph(), *a, source_graph, source))
        {
            return Err(AnnotationError::AlreadyExists);
        }

        if !stacking_in_effect(layer, allow_stacking) {
            if let Some(&first) = existing.first() {
                adapter.copy_primitive_features(txn, first, source_graph, source)?;
                return Ok(MergeOutcome::Updated(first));
            }
        }

        let created = span.create(txn, position.begin(), position.end())?;
        adapter.copy_primitive_features(txn, created, source_graph, source)?;
        Ok(MergeOutcome::Created(created))
    }

    // ========================================================================
    // Relations
    // ========================================================================

    fn merge_relation(
        &self,
        txn: &mut Transaction<'_>,
        layer: &Layer,
        source_graph: &AnnotationGraph,
        source: Address,
        allow_stacking: bool,
    ) -> MergeResult<MergeOutcome> {
        let TypeAdapter::Relation(relation) = TypeAdapter::for_layer(layer) else {
            return Err(wrong_kind(layer, "relation"));
        };
        let adapter = TypeAdapter::Relation(relation);
        let (source_origin, source_target) = relation.endpoints(source_graph, source)?;

        let endpoint_layer = self.layer(relation.endpoint_layer())?;
        let origin = self.resolve_endpoint(txn.graph(), endpoint_layer, source_graph, source_origin)?;
        let target = self.resolve_endpoint(txn.graph(), endpoint_layer, source_graph, source_target)?;

        let existing = relation.select_between(txn.graph(), origin, target);
        if existing
            .iter()
            .any(|a| adapter.is_equivalent(txn.graph(), *a, source_graph, source))
        {
            return Err(AnnotationError::AlreadyExists);
        }

        if !stacking_in_effect(layer, allow_stacking) {
            if let Some(&first) = existing.first() {
                adapter.copy_primitive_features(txn, first, source_graph, source)?;
                return Ok(MergeOutcome::Updated(first));
            }
        }

        let created = relation.create(txn, origin, target)?;
        adapter.copy_primitive_features(txn, created, source_graph, source)?;
        Ok(MergeOutcome::Created(created))
    }

    /// The single equivalent of a source endpoint in the target
    fn resolve_endpoint(
        &self,
        target: &AnnotationGraph,
        endpoint_layer: &Layer,
        source_graph: &AnnotationGraph,
        source_endpoint: Address,
    ) -> MergeResult<Address> {
        let adapter = TypeAdapter::for_layer(endpoint_layer);
        let position = source_position(&adapter, source_graph, source_endpoint)?;
        let candidates = equivalents(&adapter, target, source_graph, source_endpoint, &position);
        match candidates.as_slice() {
            [single] => Ok(*single),
            [] => Err(AnnotationError::UnfulfilledPrerequisites(format!(
                "There is no suitable [{}] annotation at {position} the relation could \
                 be attached to. The endpoint must first be merged into the target document.",
                endpoint_layer.name
            ))),
            _ => Err(AnnotationError::MergeConflict(format!(
                "Several [{}] annotations at {position} could serve as relation endpoint.",
                endpoint_layer.name
            ))),
        }
    }

    // ========================================================================
    // Slots
    // ========================================================================

    fn merge_slot(
        &self,
        txn: &mut Transaction<'_>,
        layer: &Layer,
        source_graph: &AnnotationGraph,
        source_host: Address,
        feature: &str,
        slot_index: usize,
    ) -> MergeResult<MergeOutcome> {
        let adapter = TypeAdapter::for_layer(layer);
        let declared = layer
            .feature(feature)
            .ok_or_else(|| AnnotationError::FeatureNotFound {
                layer: layer.name.clone(),
                feature: feature.to_string(),
            })?;
        let FeatureKind::Link { target_layer, .. } = &declared.kind else {
            return Err(AnnotationError::InvalidSlot(format!(
                "feature [{feature}] is not a link feature"
            )));
        };

        let host_node = adapter.node(source_graph, source_host)?;
        let link = adapter
            .get_feature_value(feature, host_node)?
            .and_then(FeatureValue::as_links)
            .and_then(|links| links.get(slot_index))
            .ok_or_else(|| {
                AnnotationError::InvalidSlot(format!(
                    "source annotation has no slot {slot_index} in feature [{feature}]"
                ))
            })?;
        if !source_graph.contains(link.target) {
            return Err(AnnotationError::InvalidSlot(format!(
                "slot {slot_index} of feature [{feature}] points to a missing annotation"
            )));
        }

        // Host: the single equivalent of the source host
        let host_position = source_position(&adapter, source_graph, source_host)?;
        let hosts = equivalents(&adapter, txn.graph(), source_graph, source_host, &host_position);
        let host = match hosts.as_slice() {
            [single] => *single,
            [] => {
                return Err(AnnotationError::UnfulfilledPrerequisites(format!(
                    "The annotation at {host_position} to which the slot should be attached \
                     must be merged first."
                )))
            }
            _ => {
                return Err(AnnotationError::MergeConflict(format!(
                    "Several [{}] annotations at {host_position} could receive the slot.",
                    layer.name
                )))
            }
        };

        let filler = self.resolve_filler(txn, target_layer, source_graph, link.target)?;

        let mut links: Vec<LinkWithRole> = txn
            .graph()
            .get(host)
            .and_then(|n| n.feature(feature))
            .and_then(FeatureValue::as_links)
            .map(<[LinkWithRole]>::to_vec)
            .unwrap_or_default();
        let translated = LinkWithRole::new(link.role.clone(), filler);
        if links.contains(&translated) {
            return Err(AnnotationError::AlreadyExists);
        }
        links.push(translated);
        adapter.set_feature_value(txn, host, feature, Some(FeatureValue::Links(links)))?;

        Ok(MergeOutcome::Updated(host))
    }

    /// Locate the filler in the target, merging it if it is a span that is
    /// not there yet
    fn resolve_filler(
        &self,
        txn: &mut Transaction<'_>,
        filler_layer: &str,
        source_graph: &AnnotationGraph,
        source_filler: Address,
    ) -> MergeResult<Address> {
        let layer = self.layer(filler_layer)?;
        let adapter = TypeAdapter::for_layer(layer);
        let position = source_position(&adapter, source_graph, source_filler)?;
        let candidates = equivalents(&adapter, txn.graph(), source_graph, source_filler, &position);
        match candidates.as_slice() {
            [single] => Ok(*single),
            [] if matches!(layer.kind, LayerKind::Span) => {
                debug!(layer = %layer.name, %position, "Merging missing slot filler");
                self.merge_span(txn, layer, source_graph, source_filler, false)
                    .map(MergeOutcome::address)
            }
            [] => Err(AnnotationError::UnfulfilledPrerequisites(format!(
                "The slot filler at {position} must be merged first."
            ))),
            _ => Err(AnnotationError::MergeConflict(format!(
                "Several [{}] annotations at {position} could fill the slot.",
                layer.name
            ))),
        }
    }

    // ========================================================================
    // Chains
    // ========================================================================

    fn merge_chain(
        &self,
        txn: &mut Transaction<'_>,
        layer: &Layer,
        source_graph: &AnnotationGraph,
        source: Address,
    ) -> MergeResult<MergeOutcome> {
        if layer.kind != LayerKind::Chain {
            return Err(wrong_kind(layer, "chain"));
        }
        let adapter = TypeAdapter::for_layer(layer);
        let source_node = adapter.node(source_graph, source)?;

        let (member, created) =
            self.find_or_create_member(txn, layer, source_graph, source, true)?;

        if let Some(source_next) = source_node.next() {
            if !source_graph.contains(source_next) {
                return Err(AnnotationError::InvalidChain(format!(
                    "successor {source_next} of the source member does not exist"
                )));
            }
            // an existing successor keeps its own features
            let (next, _) =
                self.find_or_create_member(txn, layer, source_graph, source_next, false)?;
            let TypeAdapter::Chain(chain) = adapter else {
                return Err(wrong_kind(layer, "chain"));
            };
            chain.link(txn, member, next)?;
        }

        if !txn.is_dirty() {
            return Err(AnnotationError::AlreadyExists);
        }
        Ok(if created {
            MergeOutcome::Created(member)
        } else {
            MergeOutcome::Updated(member)
        })
    }

    /// The target member at the source member's position, created if there
    /// is none. Features of an existing member are overwritten only with
    /// `update_existing`. Returns whether the member was created.
    fn find_or_create_member(
        &self,
        txn: &mut Transaction<'_>,
        layer: &Layer,
        source_graph: &AnnotationGraph,
        source: Address,
        update_existing: bool,
    ) -> MergeResult<(Address, bool)> {
        let adapter = TypeAdapter::for_layer(layer);
        let TypeAdapter::Chain(chain) = adapter else {
            return Err(wrong_kind(layer, "chain"));
        };
        let position = source_position(&adapter, source_graph, source)?;
        let candidates = adapter.select_at(txn.graph(), &position);
        match candidates.as_slice() {
            [] => {
                let created = chain.create_link(txn, position.begin(), position.end())?;
                adapter.copy_primitive_features(txn, created, source_graph, source)?;
                Ok((created, true))
            }
            [single] => {
                if update_existing {
                    adapter.copy_primitive_features(txn, *single, source_graph, source)?;
                }
                Ok((*single, false))
            }
            _ => Err(AnnotationError::MergeConflict(format!(
                "Several [{}] chain members at {position}.",
                layer.name
            ))),
        }
    }

    fn layer(&self, name: &str) -> MergeResult<&'s Layer> {
        self.schema
            .layer(name)
            .ok_or_else(|| AnnotationError::UnknownLayer(name.to_string()))
    }
}

fn stacking_in_effect(layer: &Layer, allow_stacking: bool) -> bool {
    allow_stacking || layer.overlap_mode == OverlapMode::AnyOverlap
}

fn source_position(
    adapter: &TypeAdapter<'_>,
    source_graph: &AnnotationGraph,
    source: Address,
) -> MergeResult<Position> {
    adapter
        .position(source_graph, source)
        .ok_or(AnnotationError::UnknownAddress(source))
}

/// Target annotations equivalent to a source annotation
fn equivalents(
    adapter: &TypeAdapter<'_>,
    target: &AnnotationGraph,
    source_graph: &AnnotationGraph,
    source: Address,
    position: &Position,
) -> Vec<Address> {
    adapter
        .select_at(target, position)
        .into_iter()
        .filter(|a| adapter.is_equivalent(target, *a, source_graph, source))
        .collect()
}

fn wrong_kind(layer: &Layer, expected: &'static str) -> AnnotationError {
    AnnotationError::WrongLayerKind {
        layer: layer.name.clone(),
        expected,
    }
}
