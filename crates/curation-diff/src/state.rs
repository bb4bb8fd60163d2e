//! Curation unit state
//!
//! A curation unit is a stretch of text the curator works through as a whole,
//! usually a sentence. Its state summarizes the configuration sets inside it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use curation_core::AnnotationGraph;

use crate::configuration::ConfigurationSet;
use crate::result::DiffResult;

// ============================================================================
// State
// ============================================================================

/// State of a curation unit
///
/// `Unseen` units have not been evaluated yet. Evaluation yields one of the
/// agreement states, or `Curated` once the curator has covered the unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurationUnitState {
    #[default]
    Unseen,
    /// All annotators agree
    Agree,
    /// Somebody abstained, the rest agree
    Incomplete,
    /// Annotators chose different values
    Disagree,
    /// Someone stacked annotations at one position
    Stacked,
    /// The curator has annotated every position of the unit
    Curated,
}

impl CurationUnitState {
    /// Whether the unit still needs the curator's attention
    pub fn needs_attention(self) -> bool {
        matches!(self, Self::Incomplete | Self::Disagree | Self::Stacked)
    }
}

impl std::fmt::Display for CurationUnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unseen => write!(f, "unseen"),
            Self::Agree => write!(f, "agree"),
            Self::Incomplete => write!(f, "incomplete"),
            Self::Disagree => write!(f, "disagree"),
            Self::Stacked => write!(f, "stacked"),
            Self::Curated => write!(f, "curated"),
        }
    }
}

/// Judge a group of configuration sets
///
/// `groups` are all compared groups. With a `curator`, the unit is `Curated`
/// when the curator contributed to every set; otherwise sets the curator has
/// already covered are ignored and the curator is not expected elsewhere. The
/// remaining sets rank `Stacked` over `Disagree` over `Incomplete` over
/// `Agree`. A unit without sets agrees.
pub fn evaluate_sets<'a>(
    sets: impl IntoIterator<Item = &'a ConfigurationSet>,
    groups: &BTreeSet<&str>,
    curator: Option<&str>,
) -> CurationUnitState {
    let sets: Vec<&ConfigurationSet> = sets.into_iter().collect();

    if let Some(curator) = curator {
        if !sets.is_empty() && sets.iter().all(|s| s.contains_group(curator)) {
            return CurationUnitState::Curated;
        }
    }

    let expected: Vec<&str> = groups
        .iter()
        .copied()
        .filter(|g| Some(*g) != curator)
        .collect();
    let open: Vec<&ConfigurationSet> = sets
        .into_iter()
        .filter(|s| curator.map_or(true, |c| !s.contains_group(c)))
        .collect();

    if open.iter().any(|s| s.is_stacked()) {
        CurationUnitState::Stacked
    } else if open.iter().any(|s| s.has_differences()) {
        CurationUnitState::Disagree
    } else if open
        .iter()
        .any(|s| s.is_incomplete(expected.iter().copied()))
    {
        CurationUnitState::Incomplete
    } else {
        CurationUnitState::Agree
    }
}

// ============================================================================
// Units
// ============================================================================

/// A stretch of text curated as a whole
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurationUnit {
    pub begin: usize,
    pub end: usize,
    pub state: CurationUnitState,
}

impl CurationUnit {
    pub fn new(begin: usize, end: usize) -> Self {
        Self {
            begin,
            end,
            state: CurationUnitState::Unseen,
        }
    }

    /// Evaluate the unit against a diff and store the state
    pub fn evaluate(&mut self, diff: &DiffResult, curator: Option<&str>) -> CurationUnitState {
        let groups: BTreeSet<&str> = diff.cas_group_ids().collect();
        self.state = evaluate_sets(diff.sets_in_range(self.begin, self.end), &groups, curator);
        self.state
    }
}

/// Units from the annotations of a segmentation layer (e.g. sentences),
/// ordered by position with duplicates removed
pub fn units_from_layer(graph: &AnnotationGraph, layer: &str) -> Vec<CurationUnit> {
    let extents: BTreeSet<(usize, usize)> = graph
        .nodes_on(layer)
        .filter_map(|(_, node)| node.anchor.extent())
        .collect();
    extents
        .into_iter()
        .map(|(begin, end)| CurationUnit::new(begin, end))
        .collect()
}

/// Evaluate every unit against a diff
pub fn evaluate_units(units: &mut [CurationUnit], diff: &DiffResult, curator: Option<&str>) {
    for unit in units {
        unit.evaluate(diff, curator);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::compute_full_diff;
    use curation_core::{Anchor, Feature, Layer, CURATION_USER};
    use std::collections::BTreeMap;

    fn pos_graph(tags: &[(usize, usize, &str)]) -> AnnotationGraph {
        let mut graph = AnnotationGraph::with_text("The cat sat. A dog ran.");
        graph.annotate("Sentence", Anchor::span(0, 12)).add();
        graph.annotate("Sentence", Anchor::span(13, 23)).add();
        for (begin, end, tag) in tags {
            graph
                .annotate("POS", Anchor::span(*begin, *end))
                .with_feature("value", *tag)
                .add();
        }
        graph
    }

    fn layers() -> Vec<Layer> {
        vec![Layer::span("POS").with_feature(Feature::primitive("value"))]
    }

    fn diff(entries: Vec<(&str, AnnotationGraph)>) -> DiffResult {
        let graphs: BTreeMap<String, AnnotationGraph> = entries
            .into_iter()
            .map(|(g, graph)| (g.to_string(), graph))
            .collect();
        compute_full_diff(&layers(), &graphs)
    }

    #[test]
    fn test_units_from_segmentation() {
        let graph = pos_graph(&[]);
        let units = units_from_layer(&graph, "Sentence");
        assert_eq!(units.len(), 2);
        assert!(units.iter().all(|u| u.state == CurationUnitState::Unseen));
        assert_eq!((units[1].begin, units[1].end), (13, 23));
    }

    #[test]
    fn test_unit_states() {
        let result = diff(vec![
            ("a", pos_graph(&[(4, 7, "NN"), (15, 18, "NN")])),
            ("b", pos_graph(&[(4, 7, "NN"), (15, 18, "VB")])),
        ]);

        let mut units = units_from_layer(&pos_graph(&[]), "Sentence");
        evaluate_units(&mut units, &result, None);
        assert_eq!(units[0].state, CurationUnitState::Agree);
        assert_eq!(units[1].state, CurationUnitState::Disagree);
        assert!(units[1].state.needs_attention());
    }

    #[test]
    fn test_stacked_wins_over_disagree() {
        let result = diff(vec![
            ("a", pos_graph(&[(0, 3, "DT"), (0, 3, "DT"), (4, 7, "NN")])),
            ("b", pos_graph(&[(0, 3, "DT"), (4, 7, "VB")])),
        ]);
        let mut unit = CurationUnit::new(0, 12);
        assert_eq!(unit.evaluate(&result, None), CurationUnitState::Stacked);
    }

    #[test]
    fn test_incomplete_ignores_curator() {
        let result = diff(vec![
            ("a", pos_graph(&[(4, 7, "NN")])),
            ("b", pos_graph(&[(4, 7, "NN")])),
            (CURATION_USER, pos_graph(&[])),
        ]);
        let mut unit = CurationUnit::new(0, 12);
        assert_eq!(
            unit.evaluate(&result, Some(CURATION_USER)),
            CurationUnitState::Agree
        );
        // without treating the curator specially, the curator's gap shows
        assert_eq!(unit.evaluate(&result, None), CurationUnitState::Incomplete);
    }

    #[test]
    fn test_curated_unit() {
        let result = diff(vec![
            ("a", pos_graph(&[(4, 7, "NN")])),
            ("b", pos_graph(&[(4, 7, "VB")])),
            (CURATION_USER, pos_graph(&[(4, 7, "NN")])),
        ]);
        let mut unit = CurationUnit::new(0, 12);
        assert_eq!(
            unit.evaluate(&result, Some(CURATION_USER)),
            CurationUnitState::Curated
        );
    }

    #[test]
    fn test_empty_unit_agrees() {
        let result = diff(vec![("a", pos_graph(&[]))]);
        let mut unit = CurationUnit::new(0, 12);
        assert_eq!(unit.evaluate(&result, None), CurationUnitState::Agree);
    }
}
