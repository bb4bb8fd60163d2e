//! Bulk merge
//!
//! Applies a strategy to a whole diff and merges every annotation the
//! strategy adopted in all of its configuration sets. Failures are collected
//! in the report instead of aborting the run.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use curation_core::{
    Address, AnnotationError, AnnotationGraph, FeatureKind, FeatureValue, LayerKind,
};
use curation_diff::DiffResult;

use crate::cas_merge::{CasMerge, MergeOutcome};
use crate::strategy::{MergeContext, MergeDecision, MergeStrategy};

/// Summary of a bulk merge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Strategy that made the decisions
    pub strategy: String,

    /// Annotations created in the target
    pub created: usize,

    /// Target annotations changed
    pub updated: usize,

    /// Adopted annotations that were already in the target
    pub already_present: usize,

    /// Configuration sets left for manual curation, plus chain links and
    /// slots whose successor or filler was not adopted
    pub manual: usize,

    /// Configuration sets the strategy skipped
    pub skipped: usize,

    /// Merges refused by the engine
    pub failures: Vec<MergeFailure>,
}

impl MergeReport {
    fn record(&mut self, annotation: &AdoptedAnnotation, result: Result<MergeOutcome, AnnotationError>) {
        match result {
            Ok(MergeOutcome::Created(_)) => self.created += 1,
            Ok(MergeOutcome::Updated(_)) => self.updated += 1,
            Err(AnnotationError::AlreadyExists) => self.already_present += 1,
            Err(e) => {
                warn!(
                    layer = %annotation.layer,
                    group = %annotation.cas_group_id,
                    address = %annotation.address,
                    "Merge failed: {}",
                    e
                );
                self.failures.push(MergeFailure {
                    layer: annotation.layer.clone(),
                    cas_group_id: annotation.cas_group_id.clone(),
                    address: annotation.address,
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// A merge the engine refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeFailure {
    pub layer: String,
    pub cas_group_id: String,
    pub address: Address,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct AdoptedAnnotation {
    layer: String,
    cas_group_id: String,
    address: Address,
}

/// Merge everything the strategy adopts from `graphs` into `target`
///
/// An annotation is merged when every configuration set it appears in was
/// adopted with its value. Merging runs in phases so that prerequisites exist
/// before they are needed: spans, then chains, then relations, then slots.
/// A chain link or slot is only merged when its successor or filler was
/// adopted too, or is already present in the target; otherwise it is left
/// for manual curation. Stacking follows [`CasMerge::allow_stacking`].
pub fn merge_cas(
    merge: &CasMerge<'_>,
    target: &mut AnnotationGraph,
    diff: &DiffResult,
    graphs: &BTreeMap<String, AnnotationGraph>,
    strategy: &dyn MergeStrategy,
    context: &MergeContext<'_>,
) -> MergeReport {
    let mut report = MergeReport {
        strategy: strategy.name().to_string(),
        ..Default::default()
    };

    let mut verdicts: BTreeMap<AdoptedAnnotation, bool> = BTreeMap::new();
    for set in diff.configuration_sets() {
        let decision = strategy.decide(set, context);
        let chosen = match &decision {
            MergeDecision::Adopt(configuration) => Some(&configuration.value),
            MergeDecision::Skip => {
                report.skipped += 1;
                None
            }
            MergeDecision::Manual => {
                report.manual += 1;
                None
            }
        };
        for configuration in set.all_configurations() {
            let key = AdoptedAnnotation {
                layer: configuration.layer.clone(),
                cas_group_id: configuration.cas_group_id.clone(),
                address: configuration.address,
            };
            let adopted = chosen == Some(&configuration.value);
            verdicts
                .entry(key)
                .and_modify(|v| *v &= adopted)
                .or_insert(adopted);
        }
    }

    let adopted: BTreeSet<AdoptedAnnotation> = verdicts
        .into_iter()
        .filter_map(|(annotation, adopted)| adopted.then_some(annotation))
        .collect();

    // a successor or filler may only be merged along if it was adopted or
    // is already in the target
    let is_settled = |target: &AnnotationGraph,
                      layer: &str,
                      group: &str,
                      source: &AnnotationGraph,
                      address: Address| {
        adopted.contains(&AdoptedAnnotation {
            layer: layer.to_string(),
            cas_group_id: group.to_string(),
            address,
        }) || merge.has_equivalent(target, layer, source, address)
    };

    let kind_of = |annotation: &AdoptedAnnotation| {
        merge
            .schema()
            .layer(&annotation.layer)
            .map(|layer| layer.kind.clone())
    };
    for annotation in &adopted {
        if kind_of(annotation).is_none() {
            warn!(layer = %annotation.layer, "Adopted annotation on a layer missing from the schema");
        }
    }

    // Spans
    for annotation in &adopted {
        if kind_of(annotation) == Some(LayerKind::Span) {
            let Some(source) = graphs.get(&annotation.cas_group_id) else {
                continue;
            };
            let result = merge.merge_span_annotation(
                target,
                &annotation.layer,
                source,
                annotation.address,
                merge.allow_stacking(),
            );
            report.record(annotation, result);
        }
    }

    // Chains
    for annotation in &adopted {
        if kind_of(annotation) == Some(LayerKind::Chain) {
            let Some(source) = graphs.get(&annotation.cas_group_id) else {
                continue;
            };
            let next = source.get(annotation.address).and_then(|n| n.next());
            if let Some(next) = next {
                let settled = is_settled(
                    &*target,
                    &annotation.layer,
                    &annotation.cas_group_id,
                    source,
                    next,
                );
                if !settled {
                    debug!(
                        layer = %annotation.layer,
                        group = %annotation.cas_group_id,
                        address = %annotation.address,
                        "Chain successor not adopted, link left for manual curation"
                    );
                    report.manual += 1;
                    continue;
                }
            }
            let result =
                merge.merge_chain_link(target, &annotation.layer, source, annotation.address);
            report.record(annotation, result);
        }
    }

    // Relations
    for annotation in &adopted {
        if matches!(kind_of(annotation), Some(LayerKind::Relation { .. })) {
            let Some(source) = graphs.get(&annotation.cas_group_id) else {
                continue;
            };
            let result = merge.merge_relation_annotation(
                target,
                &annotation.layer,
                source,
                annotation.address,
                merge.allow_stacking(),
            );
            report.record(annotation, result);
        }
    }

    // Slots
    for annotation in &adopted {
        let Some(layer) = merge.schema().layer(&annotation.layer) else {
            continue;
        };
        let Some(source) = graphs.get(&annotation.cas_group_id) else {
            continue;
        };
        let Some(node) = source.get(annotation.address) else {
            continue;
        };
        for feature in layer.link_features() {
            let FeatureKind::Link { target_layer, .. } = &feature.kind else {
                continue;
            };
            let links = node
                .feature(&feature.name)
                .and_then(FeatureValue::as_links)
                .unwrap_or_default();
            for (slot_index, link) in links.iter().enumerate() {
                let settled = is_settled(
                    &*target,
                    target_layer,
                    &annotation.cas_group_id,
                    source,
                    link.target,
                );
                if !settled {
                    debug!(
                        layer = %annotation.layer,
                        group = %annotation.cas_group_id,
                        feature = %feature.name,
                        slot_index,
                        "Slot filler not adopted, slot left for manual curation"
                    );
                    report.manual += 1;
                    continue;
                }
                let result = merge.merge_slot_feature(
                    target,
                    &annotation.layer,
                    source,
                    annotation.address,
                    &feature.name,
                    slot_index,
                );
                report.record(annotation, result);
            }
        }
    }

    info!(
        strategy = %report.strategy,
        created = report.created,
        updated = report.updated,
        already_present = report.already_present,
        manual = report.manual,
        skipped = report.skipped,
        failures = report.failures.len(),
        "Bulk merge complete"
    );
    report
}
