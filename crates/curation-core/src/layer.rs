//! Layer schema
//!
//! Layers are the annotation types of a project (POS, named entities,
//! dependencies, coreference chains, ...). Each layer has a kind that selects
//! the adapter used to diff and merge it, an overlap policy and a list of
//! features.

use serde::{Deserialize, Serialize};

use crate::{CurationError, Result};

// ============================================================================
// Policies
// ============================================================================

/// Kind of annotation a layer holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerKind {
    /// Text spans (POS, named entities, ...)
    Span,
    /// Directed arcs between annotations of another layer
    Relation {
        /// Layer the relation endpoints belong to
        endpoint_layer: String,
    },
    /// Linked lists of spans (coreference chains)
    Chain,
}

impl std::fmt::Display for LayerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Span => write!(f, "span"),
            Self::Relation { .. } => write!(f, "relation"),
            Self::Chain => write!(f, "chain"),
        }
    }
}

/// Whether annotations of one layer may stack or overlap
///
/// Stacking means two annotations at the identical position (or, for
/// relations, with identical endpoints). Overlap means partially overlapping
/// spans, or relations that share exactly one endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapMode {
    /// Neither stacking nor overlap
    NoOverlap,
    /// Overlap permitted, stacking rejected
    #[default]
    OverlapOnly,
    /// Stacking permitted, overlap rejected
    StackingOnly,
    /// Anything goes
    AnyOverlap,
}

impl OverlapMode {
    pub fn allows_stacking(self) -> bool {
        matches!(self, Self::StackingOnly | Self::AnyOverlap)
    }

    pub fn allows_overlap(self) -> bool {
        matches!(self, Self::OverlapOnly | Self::AnyOverlap)
    }
}

impl std::fmt::Display for OverlapMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoOverlap => write!(f, "no_overlap"),
            Self::OverlapOnly => write!(f, "overlap_only"),
            Self::StackingOnly => write!(f, "stacking_only"),
            Self::AnyOverlap => write!(f, "any_overlap"),
        }
    }
}

/// How span offsets relate to token boundaries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchoringMode {
    #[default]
    Characters,
    SingleToken,
    Tokens,
    Sentences,
}

/// How link features are compared when diffing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkCompareBehavior {
    /// Links are equal when they carry the same set of role labels,
    /// regardless of the slot fillers
    #[default]
    RoleAsLabel,
    /// Links are equal when role labels and filler positions match
    RoleAndTarget,
}

impl std::str::FromStr for LinkCompareBehavior {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "role_as_label" => Ok(Self::RoleAsLabel),
            "role_and_target" => Ok(Self::RoleAndTarget),
            other => Err(format!("unknown link compare behavior: {other}")),
        }
    }
}

// ============================================================================
// Features
// ============================================================================

/// Kind of value a feature carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureKind {
    /// String, number or boolean
    Primitive,
    /// Ordered role/target slot list
    Link {
        /// Layer the slot fillers belong to
        target_layer: String,
        #[serde(default)]
        compare: LinkCompareBehavior,
    },
}

/// Feature definition of a layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    /// Feature name
    pub name: String,

    /// Value kind
    #[serde(flatten)]
    pub kind: FeatureKind,

    /// Whether the feature takes part in diff and merge
    #[serde(default = "default_curatable")]
    pub curatable: bool,
}

fn default_curatable() -> bool {
    true
}

impl Feature {
    /// Create a primitive feature
    pub fn primitive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FeatureKind::Primitive,
            curatable: true,
        }
    }

    /// Create a link (slot) feature
    pub fn link(name: impl Into<String>, target_layer: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FeatureKind::Link {
                target_layer: target_layer.into(),
                compare: LinkCompareBehavior::default(),
            },
            curatable: true,
        }
    }

    /// Set the link comparison behavior (ignored for primitive features)
    pub fn with_compare(mut self, behavior: LinkCompareBehavior) -> Self {
        if let FeatureKind::Link { compare, .. } = &mut self.kind {
            *compare = behavior;
        }
        self
    }

    /// Exclude the feature from curation
    pub fn not_curatable(mut self) -> Self {
        self.curatable = false;
        self
    }

    pub fn is_link(&self) -> bool {
        matches!(self.kind, FeatureKind::Link { .. })
    }
}

// ============================================================================
// Layers
// ============================================================================

/// An annotation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    /// Unique layer name (e.g., "POS")
    pub name: String,

    /// Annotation kind
    #[serde(flatten)]
    pub kind: LayerKind,

    /// Stacking and overlap policy
    #[serde(default)]
    pub overlap_mode: OverlapMode,

    /// Offset anchoring
    #[serde(default)]
    pub anchoring_mode: AnchoringMode,

    /// Feature definitions
    #[serde(default)]
    pub features: Vec<Feature>,
}

impl Layer {
    /// Create a span layer
    pub fn span(name: impl Into<String>) -> Self {
        Self::new(name, LayerKind::Span)
    }

    /// Create a relation layer over the given endpoint layer
    pub fn relation(name: impl Into<String>, endpoint_layer: impl Into<String>) -> Self {
        Self::new(
            name,
            LayerKind::Relation {
                endpoint_layer: endpoint_layer.into(),
            },
        )
    }

    /// Create a chain layer
    pub fn chain(name: impl Into<String>) -> Self {
        Self::new(name, LayerKind::Chain)
    }

    fn new(name: impl Into<String>, kind: LayerKind) -> Self {
        Self {
            name: name.into(),
            kind,
            overlap_mode: OverlapMode::default(),
            anchoring_mode: AnchoringMode::default(),
            features: Vec::new(),
        }
    }

    /// Add a feature
    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.features.push(feature);
        self
    }

    /// Set overlap mode
    pub fn with_overlap_mode(mut self, mode: OverlapMode) -> Self {
        self.overlap_mode = mode;
        self
    }

    /// Set anchoring mode
    pub fn with_anchoring_mode(mut self, mode: AnchoringMode) -> Self {
        self.anchoring_mode = mode;
        self
    }

    /// Look up a feature by name
    pub fn feature(&self, name: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.name == name)
    }

    /// Features that take part in curation
    pub fn curatable_features(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter().filter(|f| f.curatable)
    }

    /// Curatable primitive features, the ones compared for equivalence and
    /// copied on merge
    pub fn primitive_features(&self) -> impl Iterator<Item = &Feature> {
        self.curatable_features().filter(|f| !f.is_link())
    }

    /// Curatable link features
    pub fn link_features(&self) -> impl Iterator<Item = &Feature> {
        self.curatable_features().filter(|f| f.is_link())
    }

    /// Check internal consistency of the layer definition
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CurationError::Validation(
                "layer name must not be empty".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for feature in &self.features {
            if !seen.insert(feature.name.as_str()) {
                return Err(CurationError::Validation(format!(
                    "layer {} declares feature {} twice",
                    self.name, feature.name
                )));
            }
        }
        Ok(())
    }
}

/// The layers of one project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSchema {
    #[serde(default, rename = "layer")]
    layers: Vec<Layer>,
}

impl LayerSchema {
    /// Create a schema from layers, validating each one and rejecting
    /// duplicate names and dangling layer references
    pub fn new(layers: Vec<Layer>) -> Result<Self> {
        let schema = Self { layers };
        schema.validate()?;
        Ok(schema)
    }

    /// Parse a TOML schema document (`[[layer]]` tables)
    pub fn from_toml(content: &str) -> Result<Self> {
        let schema: Self = toml::from_str(content)
            .map_err(|e| CurationError::Validation(format!("invalid layer schema: {e}")))?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Look up a layer by name
    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name == name)
    }

    fn validate(&self) -> Result<()> {
        let mut names = std::collections::HashSet::new();
        for layer in &self.layers {
            layer.validate()?;
            if !names.insert(layer.name.as_str()) {
                return Err(CurationError::Validation(format!(
                    "duplicate layer {}",
                    layer.name
                )));
            }
        }
        for layer in &self.layers {
            if let LayerKind::Relation { endpoint_layer } = &layer.kind {
                match self.layer(endpoint_layer).map(|l| &l.kind) {
                    None => {
                        return Err(CurationError::Validation(format!(
                            "relation layer {} refers to unknown layer {}",
                            layer.name, endpoint_layer
                        )))
                    }
                    Some(LayerKind::Relation { .. }) => {
                        return Err(CurationError::Validation(format!(
                            "relation layer {} cannot connect annotations of relation layer {}",
                            layer.name, endpoint_layer
                        )))
                    }
                    Some(_) => {}
                }
            }
            for feature in layer.link_features() {
                if let FeatureKind::Link { target_layer, .. } = &feature.kind {
                    if self.layer(target_layer).is_none() {
                        return Err(CurationError::Validation(format!(
                            "feature {}.{} refers to unknown layer {}",
                            layer.name, feature.name, target_layer
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
