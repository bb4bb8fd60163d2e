//! End-to-end diff and merge scenarios

use std::collections::BTreeMap;

use curation_core::{
    Address, Anchor, AnnotationError, AnnotationGraph, Feature, FeatureValue, Layer, LayerSchema,
    LinkWithRole, OverlapMode,
};
use curation_diff::{compute_full_diff, CurationUnit, CurationUnitState};
use curation_merge::{
    merge_cas, CasMerge, CompleteAgreementStrategy, MergeContext, MergeOutcome,
    ThresholdBasedStrategy,
};
use proptest::prelude::*;

fn schema() -> LayerSchema {
    LayerSchema::new(vec![
        Layer::span("POS").with_feature(Feature::primitive("value")),
        Layer::span("Filler"),
        Layer::span("Host")
            .with_overlap_mode(OverlapMode::AnyOverlap)
            .with_feature(Feature::primitive("value"))
            .with_feature(Feature::link("links", "Filler")),
        Layer::relation("Dependency", "POS").with_feature(Feature::primitive("label")),
    ])
    .unwrap()
}

fn pos(graph: &mut AnnotationGraph, begin: usize, end: usize, tag: &str) -> Address {
    graph
        .annotate("POS", Anchor::span(begin, end))
        .with_feature("value", tag)
        .add()
}

fn pos_values(graph: &AnnotationGraph) -> Vec<String> {
    graph
        .nodes_on("POS")
        .filter_map(|(_, n)| n.feature("value"))
        .filter_map(|v| v.as_primitive().map(|p| p.to_string()))
        .collect()
}

fn links_of(graph: &AnnotationGraph, host: Address) -> Vec<LinkWithRole> {
    graph
        .get(host)
        .and_then(|n| n.feature("links"))
        .and_then(FeatureValue::as_links)
        .map(<[LinkWithRole]>::to_vec)
        .unwrap_or_default()
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn scenario_a_disagreement_on_zero_width_span() {
    let schema = schema();
    let mut user1 = AnnotationGraph::new();
    pos(&mut user1, 0, 0, "NN");
    let mut user2 = AnnotationGraph::new();
    pos(&mut user2, 0, 0, "NE");

    let graphs: BTreeMap<String, AnnotationGraph> = [
        ("user1".to_string(), user1),
        ("user2".to_string(), user2),
    ]
    .into();
    let diff = compute_full_diff(&schema.layers()[..1], &graphs);

    assert_eq!(diff.len(), 1);
    assert!(diff.configuration_sets()[0].has_differences());

    let mut unit = CurationUnit::new(0, 0);
    assert_eq!(unit.evaluate(&diff, None), CurationUnitState::Disagree);
}

#[test]
fn scenario_b_copy_into_empty_target() {
    let schema = schema();
    let merge = CasMerge::new(&schema);
    let mut source = AnnotationGraph::new();
    let nn = pos(&mut source, 0, 0, "NN");

    let mut target = AnnotationGraph::new();
    let outcome = merge
        .merge_span_annotation(&mut target, "POS", &source, nn, false)
        .unwrap();

    assert!(outcome.is_created());
    assert_eq!(pos_values(&target), vec!["NN"]);
}

#[test]
fn scenario_c_overwrite_without_stacking() {
    let schema = schema();
    let merge = CasMerge::new(&schema);
    let mut source = AnnotationGraph::new();
    let nn = pos(&mut source, 0, 0, "NN");

    let mut target = AnnotationGraph::new();
    let existing = pos(&mut target, 0, 0, "NE");

    let outcome = merge
        .merge_span_annotation(&mut target, "POS", &source, nn, false)
        .unwrap();

    assert_eq!(outcome, MergeOutcome::Updated(existing));
    assert_eq!(pos_values(&target), vec!["NN"]);
}

#[test]
fn scenario_d_identical_annotation_exists() {
    let schema = schema();
    let merge = CasMerge::new(&schema);
    let mut source = AnnotationGraph::new();
    let nn = pos(&mut source, 0, 0, "NN");

    let mut target = AnnotationGraph::new();
    pos(&mut target, 0, 0, "NN");
    let before = target.clone();

    let err = merge
        .merge_span_annotation(&mut target, "POS", &source, nn, false)
        .unwrap_err();

    assert_eq!(err, AnnotationError::AlreadyExists);
    assert_eq!(err.to_string(), "The annotation already exists in the target document.");
    assert_eq!(target, before);
}

#[test]
fn scenario_d_identical_annotation_exists_without_overlap() {
    let schema = LayerSchema::new(vec![Layer::span("POS")
        .with_overlap_mode(OverlapMode::NoOverlap)
        .with_feature(Feature::primitive("value"))])
    .unwrap();
    let merge = CasMerge::new(&schema);
    let mut source = AnnotationGraph::new();
    let nn = pos(&mut source, 0, 0, "NN");

    let mut target = AnnotationGraph::new();
    pos(&mut target, 0, 0, "NN");
    let before = target.clone();

    for allow_stacking in [false, true] {
        let err = merge
            .merge_span_annotation(&mut target, "POS", &source, nn, allow_stacking)
            .unwrap_err();
        assert_eq!(err, AnnotationError::AlreadyExists);
        assert_eq!(target, before);
    }
}

#[test]
fn overwriting_host_keeps_its_links() {
    let schema = LayerSchema::new(vec![
        Layer::span("Filler"),
        Layer::span("Host")
            .with_overlap_mode(OverlapMode::NoOverlap)
            .with_feature(Feature::primitive("value"))
            .with_feature(Feature::link("links", "Filler")),
    ])
    .unwrap();
    let merge = CasMerge::new(&schema);

    let mut source = AnnotationGraph::new();
    let filler_a = source.annotate("Filler", Anchor::span(2, 3)).add();
    let host_a = source
        .annotate("Host", Anchor::span(0, 0))
        .with_feature("value", "A")
        .with_feature("links", vec![LinkWithRole::new("slot1", filler_a)])
        .add();

    let mut target = AnnotationGraph::new();
    let filler_c = target.annotate("Filler", Anchor::span(0, 0)).add();
    let host_c = target
        .annotate("Host", Anchor::span(0, 0))
        .with_feature("value", "C")
        .with_feature("links", vec![LinkWithRole::new("slot1", filler_c)])
        .add();

    let outcome = merge
        .merge_span_annotation(&mut target, "Host", &source, host_a, false)
        .unwrap();

    assert_eq!(outcome, MergeOutcome::Updated(host_c));
    assert_eq!(target.nodes_on("Host").count(), 1);
    assert_eq!(
        target.get(host_c).unwrap().feature("value"),
        Some(&FeatureValue::from("A"))
    );
    assert_eq!(
        links_of(&target, host_c),
        vec![LinkWithRole::new("slot1", filler_c)]
    );
}

#[test]
fn scenario_e_stacked_slot_hosts() {
    let schema = schema();
    let merge = CasMerge::new(&schema);

    let mut source = AnnotationGraph::new();
    let filler_a = source.annotate("Filler", Anchor::span(2, 3)).add();
    let host_new = source
        .annotate("Host", Anchor::span(0, 0))
        .with_feature("value", "NEW")
        .with_feature("links", vec![LinkWithRole::new("slot1", filler_a)])
        .add();

    let mut target = AnnotationGraph::new();
    let filler_b = target.annotate("Filler", Anchor::span(0, 0)).add();
    let host_existing = target
        .annotate("Host", Anchor::span(0, 0))
        .with_feature("value", "EXISTING")
        .with_feature("links", vec![LinkWithRole::new("slot1", filler_b)])
        .add();

    let stacked = merge
        .merge_span_annotation(&mut target, "Host", &source, host_new, true)
        .unwrap();
    assert!(stacked.is_created());
    assert!(links_of(&target, stacked.address()).is_empty(), "links are not copied");

    merge
        .merge_slot_feature(&mut target, "Host", &source, host_new, "links", 0)
        .unwrap();

    let hosts: Vec<Address> = target.nodes_on("Host").map(|(a, _)| a).collect();
    assert_eq!(hosts.len(), 2);

    assert_eq!(
        links_of(&target, host_existing),
        vec![LinkWithRole::new("slot1", filler_b)]
    );
    let new_links = links_of(&target, stacked.address());
    assert_eq!(new_links.len(), 1);
    let translated = new_links[0].target;
    assert_ne!(translated, filler_b);
    assert_eq!(target.get(translated).unwrap().layer, "Filler");
    assert_eq!(target.position_of(translated), source.position_of(filler_a));
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn merging_identical_twice_is_idempotent() {
    let schema = schema();
    let merge = CasMerge::new(&schema);
    let mut source = AnnotationGraph::new();
    let det = pos(&mut source, 0, 3, "DT");

    let mut target = AnnotationGraph::new();
    merge
        .merge_span_annotation(&mut target, "POS", &source, det, false)
        .unwrap();
    let once = target.clone();

    let second = merge.merge_span_annotation(&mut target, "POS", &source, det, false);
    assert_eq!(second, Err(AnnotationError::AlreadyExists));
    assert_eq!(target, once);
}

#[test]
fn slot_merge_never_writes_source_addresses() {
    let schema = schema();
    let merge = CasMerge::new(&schema);

    // pad the source so its addresses are out of range in the target
    let mut source = AnnotationGraph::new();
    for i in 0..5 {
        source.annotate("Filler", Anchor::span(20 + i, 21 + i)).add();
    }
    let filler = source.annotate("Filler", Anchor::span(4, 6)).add();
    let host = source
        .annotate("Host", Anchor::span(0, 2))
        .with_feature("value", "x")
        .with_feature(
            "links",
            vec![
                LinkWithRole::new("agent", filler),
                LinkWithRole::new("theme", filler),
            ],
        )
        .add();

    let mut target = AnnotationGraph::new();
    merge
        .merge_span_annotation(&mut target, "Host", &source, host, false)
        .unwrap();
    merge
        .merge_slot_feature(&mut target, "Host", &source, host, "links", 0)
        .unwrap();
    merge
        .merge_slot_feature(&mut target, "Host", &source, host, "links", 1)
        .unwrap();

    let (target_host, _) = target.nodes_on("Host").next().unwrap();
    let links = links_of(&target, target_host);
    assert_eq!(links.len(), 2);
    for link in &links {
        let filler_node = target.get(link.target).expect("link resolves in target");
        assert_eq!(filler_node.layer, "Filler");
        assert_eq!(target.position_of(link.target), source.position_of(filler));
    }
    // both roles share the one filler merged along with the first slot
    assert_eq!(links[0].target, links[1].target);
    assert_eq!(target.nodes_on("Filler").count(), 1);

    let again = merge.merge_slot_feature(&mut target, "Host", &source, host, "links", 0);
    assert_eq!(again, Err(AnnotationError::AlreadyExists));
}

#[test]
fn slot_merge_errors_leave_target_untouched() {
    let schema = schema();
    let merge = CasMerge::new(&schema);

    let mut source = AnnotationGraph::new();
    let filler = source.annotate("Filler", Anchor::span(4, 6)).add();
    let host = source
        .annotate("Host", Anchor::span(0, 2))
        .with_feature("value", "x")
        .with_feature("links", vec![LinkWithRole::new("agent", filler)])
        .add();

    // no host in the target yet
    let mut target = AnnotationGraph::new();
    let result = merge.merge_slot_feature(&mut target, "Host", &source, host, "links", 0);
    assert!(matches!(
        result,
        Err(AnnotationError::UnfulfilledPrerequisites(_))
    ));
    assert!(target.is_empty(), "nothing was merged");

    merge
        .merge_span_annotation(&mut target, "Host", &source, host, false)
        .unwrap();
    let result = merge.merge_slot_feature(&mut target, "Host", &source, host, "links", 3);
    assert!(matches!(result, Err(AnnotationError::InvalidSlot(_))));

    // two equivalent hosts make the slot ambiguous
    merge
        .merge_span_annotation(&mut target, "Host", &source, host, true)
        .unwrap_err();
    target
        .annotate("Host", Anchor::span(0, 2))
        .with_feature("value", "x")
        .add();
    let result = merge.merge_slot_feature(&mut target, "Host", &source, host, "links", 0);
    assert!(matches!(result, Err(AnnotationError::MergeConflict(_))));
}

proptest! {
    #[test]
    fn stacking_adds_exactly_one(existing in 0usize..6) {
        let schema = schema();
        let merge = CasMerge::new(&schema);

        let mut target = AnnotationGraph::new();
        for i in 0..existing {
            target
                .annotate("Host", Anchor::span(0, 4))
                .with_feature("value", format!("v{i}"))
                .add();
        }
        let mut source = AnnotationGraph::new();
        let host = source
            .annotate("Host", Anchor::span(0, 4))
            .with_feature("value", "new")
            .add();

        let before = target.len();
        let outcome = merge
            .merge_span_annotation(&mut target, "Host", &source, host, true)
            .unwrap();
        prop_assert!(outcome.is_created());
        prop_assert_eq!(target.len(), before + 1);
    }
}

// ============================================================================
// Bulk merge
// ============================================================================

fn annotator(tags: &[(usize, usize, &str)], with_arc: bool) -> AnnotationGraph {
    let mut graph = AnnotationGraph::with_text("The cat sat");
    let mut addresses = Vec::new();
    for (begin, end, tag) in tags {
        addresses.push(pos(&mut graph, *begin, *end, tag));
    }
    if with_arc {
        graph
            .annotate("Dependency", Anchor::relation(addresses[1], addresses[0]))
            .with_feature("label", "det")
            .add();
    }
    graph
}

#[test]
fn bulk_merge_with_complete_agreement() {
    let schema = schema();
    let merge = CasMerge::new(&schema);

    let graphs: BTreeMap<String, AnnotationGraph> = [
        (
            "alice".to_string(),
            annotator(&[(0, 3, "DT"), (4, 7, "NN"), (8, 11, "VBD")], true),
        ),
        (
            "bob".to_string(),
            annotator(&[(0, 3, "DT"), (4, 7, "NN"), (8, 11, "VBN")], true),
        ),
    ]
    .into();
    let diff = compute_full_diff(schema.layers(), &graphs);

    let mut target = AnnotationGraph::with_text("The cat sat");
    let context = MergeContext::from_diff(&diff, None);
    let report = merge_cas(
        &merge,
        &mut target,
        &diff,
        &graphs,
        &CompleteAgreementStrategy,
        &context,
    );

    // DT, NN and the arc from both annotators; the second copy already exists
    assert_eq!(report.created, 3);
    assert_eq!(report.already_present, 3);
    assert_eq!(report.manual, 1);
    assert!(report.failures.is_empty());
    assert_eq!(pos_values(&target), vec!["DT", "NN"]);

    let (arc, _) = target.nodes_on("Dependency").next().unwrap();
    assert_eq!(
        target.position_of(arc),
        graphs["alice"].position_of(Address::new(3))
    );
}

#[test]
fn bulk_merge_records_failures() {
    let schema = schema();
    let merge = CasMerge::new(&schema);

    let graphs: BTreeMap<String, AnnotationGraph> = [
        ("alice".to_string(), annotator(&[(0, 3, "DT"), (4, 7, "NN")], true)),
        ("bob".to_string(), annotator(&[(0, 3, "DT"), (4, 7, "NNS")], true)),
        ("carol".to_string(), annotator(&[(0, 3, "DT"), (4, 7, "NNS")], true)),
    ]
    .into();
    let diff = compute_full_diff(schema.layers(), &graphs);

    // the curator already tagged "cat" as NNS twice, so relation endpoints
    // are ambiguous for bob and carol and missing for alice
    let mut target = AnnotationGraph::with_text("The cat sat");
    pos(&mut target, 4, 7, "NNS");
    pos(&mut target, 4, 7, "NNS");

    let strategy = ThresholdBasedStrategy {
        user_threshold: 2,
        confidence_threshold: 0.5,
    };
    let context = MergeContext::from_diff(&diff, None);
    let report = merge_cas(&merge, &mut target, &diff, &graphs, &strategy, &context);

    assert_eq!(report.strategy, "threshold");
    assert_eq!(report.failures.len(), 3, "one failed arc per annotator");
    assert_eq!(report.failures[0].cas_group_id, "alice");
    assert!(report.failures[0].reason.contains("must first be merged"));
    assert!(report.failures[1].reason.contains("Several"));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["failures"].as_array().unwrap().len(), 3);
}

#[test]
fn bulk_merge_passes_stacking_through() {
    let schema = LayerSchema::new(vec![Layer::span("POS")
        .with_overlap_mode(OverlapMode::StackingOnly)
        .with_feature(Feature::primitive("value"))])
    .unwrap();

    let graphs: BTreeMap<String, AnnotationGraph> = [
        ("alice".to_string(), annotator(&[(0, 3, "DT")], false)),
        ("bob".to_string(), annotator(&[(0, 3, "DT")], false)),
    ]
    .into();
    let diff = compute_full_diff(schema.layers(), &graphs);
    let context = MergeContext::from_diff(&diff, None);

    for (allow_stacking, expected) in [(false, vec!["DT"]), (true, vec!["VB", "DT"])] {
        let merge = CasMerge::new(&schema).with_allow_stacking(allow_stacking);
        let mut target = AnnotationGraph::with_text("The cat sat");
        pos(&mut target, 0, 3, "VB");

        let report = merge_cas(
            &merge,
            &mut target,
            &diff,
            &graphs,
            &CompleteAgreementStrategy,
            &context,
        );

        assert_eq!(report.created, usize::from(allow_stacking));
        assert_eq!(report.updated, usize::from(!allow_stacking));
        assert_eq!(report.already_present, 1);
        assert_eq!(pos_values(&target), expected);
    }
}

fn chain_annotator(successor_type: &str) -> AnnotationGraph {
    let mut graph = AnnotationGraph::with_text("The cat sat");
    let a = graph
        .annotate("Coref", Anchor::chain_link(0, 3))
        .with_feature("type", "x")
        .add();
    let b = graph
        .annotate("Coref", Anchor::chain_link(10, 12))
        .with_feature("type", successor_type)
        .add();
    graph.set_next(a, Some(b)).unwrap();
    graph
}

#[test]
fn bulk_merge_leaves_disputed_chain_successor_alone() {
    let schema =
        LayerSchema::new(vec![Layer::chain("Coref").with_feature(Feature::primitive("type"))])
            .unwrap();
    let merge = CasMerge::new(&schema);

    // the successor's type is disputed, so the link waits for the curator
    let graphs: BTreeMap<String, AnnotationGraph> = [
        ("alice".to_string(), chain_annotator("p")),
        ("bob".to_string(), chain_annotator("q")),
    ]
    .into();
    let diff = compute_full_diff(schema.layers(), &graphs);
    let context = MergeContext::from_diff(&diff, None);
    let mut target = AnnotationGraph::with_text("The cat sat");
    let report = merge_cas(
        &merge,
        &mut target,
        &diff,
        &graphs,
        &CompleteAgreementStrategy,
        &context,
    );

    assert!(target.is_empty(), "no disputed value reaches the target");
    assert_eq!(report.created + report.updated, 0);
    // the disputed type set plus one link per annotator
    assert_eq!(report.manual, 3);

    // once the successor agrees, the whole chain is merged
    let graphs: BTreeMap<String, AnnotationGraph> = [
        ("alice".to_string(), chain_annotator("p")),
        ("bob".to_string(), chain_annotator("p")),
    ]
    .into();
    let diff = compute_full_diff(schema.layers(), &graphs);
    let context = MergeContext::from_diff(&diff, None);
    let mut target = AnnotationGraph::with_text("The cat sat");
    let report = merge_cas(
        &merge,
        &mut target,
        &diff,
        &graphs,
        &CompleteAgreementStrategy,
        &context,
    );

    assert_eq!(report.created, 1);
    assert_eq!(report.already_present, 3);
    assert_eq!(report.manual, 0);
    assert!(report.failures.is_empty());
    assert_eq!(target.chains("Coref").len(), 1);
    assert_eq!(target.chains("Coref")[0].len(), 2);
}

#[test]
fn bulk_merge_leaves_disputed_slot_filler_alone() {
    let schema = LayerSchema::new(vec![
        Layer::span("NE").with_feature(Feature::primitive("value")),
        Layer::span("Pred").with_feature(Feature::link("args", "NE")),
    ])
    .unwrap();
    let merge = CasMerge::new(&schema);

    let annotator = |value: &str| {
        let mut graph = AnnotationGraph::with_text("He met Ann");
        let ne = graph
            .annotate("NE", Anchor::span(4, 6))
            .with_feature("value", value)
            .add();
        graph
            .annotate("Pred", Anchor::span(0, 2))
            .with_feature("args", vec![LinkWithRole::new("agent", ne)])
            .add();
        graph
    };
    let graphs: BTreeMap<String, AnnotationGraph> = [
        ("alice".to_string(), annotator("PER")),
        ("bob".to_string(), annotator("ORG")),
    ]
    .into();
    let diff = compute_full_diff(schema.layers(), &graphs);
    let context = MergeContext::from_diff(&diff, None);

    let mut target = AnnotationGraph::with_text("He met Ann");
    let report = merge_cas(
        &merge,
        &mut target,
        &diff,
        &graphs,
        &CompleteAgreementStrategy,
        &context,
    );

    assert_eq!(target.nodes_on("NE").count(), 0, "disputed filler not merged");
    let (host, _) = target.nodes_on("Pred").next().unwrap();
    assert!(target
        .get(host)
        .unwrap()
        .feature("args")
        .and_then(FeatureValue::as_links)
        .map_or(true, |links| links.is_empty()));
    assert_eq!(report.created, 1);
    assert_eq!(report.already_present, 1);
    // the NE set plus one slot per annotator
    assert_eq!(report.manual, 3);
    assert!(report.failures.is_empty());
}
