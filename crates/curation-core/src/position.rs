//! Position model
//!
//! A position identifies the unit an annotation occupies in the document text.
//! Spans are identified by their character offsets, relations by the offsets of
//! both endpoints. Positions are pure values: they are ordered, hashable and
//! comparable across graphs, unlike addresses.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::layer::AnchoringMode;

/// Location of an annotation in the document text
///
/// Ordering is by `(begin, end)` first, then by kind (spans before relations),
/// then by the relation's source endpoint. The anchoring mode is carried along
/// for consumers that need to interpret offsets relative to tokens, but it is
/// not part of equality, ordering or hashing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Position {
    /// A span over `[begin, end)`
    Span {
        begin: usize,
        end: usize,
        #[serde(default)]
        anchoring: AnchoringMode,
    },
    /// A directed relation between two spans
    Relation {
        source_begin: usize,
        source_end: usize,
        target_begin: usize,
        target_end: usize,
    },
}

impl Position {
    /// Create a span position with character anchoring
    pub fn span(begin: usize, end: usize) -> Self {
        assert!(begin <= end, "span begin {begin} is after end {end}");
        Self::Span {
            begin,
            end,
            anchoring: AnchoringMode::Characters,
        }
    }

    /// Create a relation position from the extents of its endpoints
    pub fn relation(source: (usize, usize), target: (usize, usize)) -> Self {
        assert!(source.0 <= source.1, "relation source extent is inverted");
        assert!(target.0 <= target.1, "relation target extent is inverted");
        Self::Relation {
            source_begin: source.0,
            source_end: source.1,
            target_begin: target.0,
            target_end: target.1,
        }
    }

    /// Return a copy with the given anchoring mode (no effect on relations)
    pub fn with_anchoring(self, mode: AnchoringMode) -> Self {
        match self {
            Self::Span { begin, end, .. } => Self::Span {
                begin,
                end,
                anchoring: mode,
            },
            relation => relation,
        }
    }

    /// Begin offset; for relations this is the target endpoint's begin
    pub fn begin(&self) -> usize {
        match self {
            Self::Span { begin, .. } => *begin,
            Self::Relation { target_begin, .. } => *target_begin,
        }
    }

    /// End offset; for relations this is the target endpoint's end
    pub fn end(&self) -> usize {
        match self {
            Self::Span { end, .. } => *end,
            Self::Relation { target_end, .. } => *target_end,
        }
    }

    /// Anchoring mode of a span position
    pub fn anchoring(&self) -> Option<AnchoringMode> {
        match self {
            Self::Span { anchoring, .. } => Some(*anchoring),
            Self::Relation { .. } => None,
        }
    }

    pub fn is_relation(&self) -> bool {
        matches!(self, Self::Relation { .. })
    }

    /// Zero-width spans are valid positions
    pub fn is_empty(&self) -> bool {
        self.begin() == self.end()
    }

    /// Whether this position lies inside `[begin, end]` (inclusive of both
    /// bounds so that zero-width spans at a range edge are covered)
    pub fn is_covered_by(&self, begin: usize, end: usize) -> bool {
        begin <= self.begin() && self.end() <= end
    }

    /// Whether two span positions overlap partially (share text without being
    /// identical). Touching spans and zero-width spans at a boundary do not
    /// overlap.
    pub fn overlaps(&self, other: &Position) -> bool {
        if self == other {
            return false;
        }
        self.begin() < other.end() && other.begin() < self.end()
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Self::Span { .. } => 0,
            Self::Relation { .. } => 1,
        }
    }

    fn secondary_key(&self) -> (usize, usize) {
        match self {
            Self::Span { .. } => (0, 0),
            Self::Relation {
                source_begin,
                source_end,
                ..
            } => (*source_begin, *source_end),
        }
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Position {}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        self.begin()
            .cmp(&other.begin())
            .then_with(|| self.end().cmp(&other.end()))
            .then_with(|| self.kind_rank().cmp(&other.kind_rank()))
            .then_with(|| self.secondary_key().cmp(&other.secondary_key()))
    }
}

impl Hash for Position {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.begin().hash(state);
        self.end().hash(state);
        self.kind_rank().hash(state);
        self.secondary_key().hash(state);
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Span { begin, end, .. } => write!(f, "[{begin}-{end}]"),
            Self::Relation {
                source_begin,
                source_end,
                target_begin,
                target_end,
            } => write!(
                f,
                "[{source_begin}-{source_end}] -> [{target_begin}-{target_end}]"
            ),
        }
    }
}
