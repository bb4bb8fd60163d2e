//! Curation Core - Annotation graphs, layer schema, and shared types
//!
//! This crate defines the abstractions shared by the diff and merge engines:
//! - Annotation graphs (arena of nodes addressed by graph-local [`Address`])
//! - Positions and feature values
//! - Layer schema and per-kind adapters
//! - Common error types
//! - Provider traits for loading and saving graphs
//! - Configuration management

pub mod adapter;
pub mod config;
pub mod graph;
pub mod layer;
pub mod position;
pub mod provider;
pub mod value;

pub use adapter::{ChainAdapter, RelationAdapter, SpanAdapter, TypeAdapter};
pub use config::{
    ConfigError, CurationConfig, DiffConfig, LoggingConfig, MergeConfig, MergeStrategyKind,
};
pub use graph::{Address, Anchor, AnnotationGraph, AnnotationNode, Transaction};
pub use layer::{
    AnchoringMode, Feature, FeatureKind, Layer, LayerKind, LayerSchema, LinkCompareBehavior,
    OverlapMode,
};
pub use position::Position;
pub use provider::{GraphProvider, LayerProvider, MemoryStore};
pub use value::{FeatureValue, LinkWithRole, PrimitiveValue};

use thiserror::Error;

/// Name under which the curator's own graph takes part in a diff
pub const CURATION_USER: &str = "CURATION_USER";

// ============================================================================
// Error Types
// ============================================================================

/// Structural reasons a merge operation was refused
///
/// The target graph is left untouched whenever one of these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnnotationError {
    #[error("The annotation already exists in the target document.")]
    AlreadyExists,

    #[error("Cannot create another annotation of layer [{layer}] at {position}: {reason}")]
    OverlapViolation {
        layer: String,
        position: String,
        reason: String,
    },

    #[error("{0}")]
    UnfulfilledPrerequisites(String),

    #[error("{0}")]
    MergeConflict(String),

    #[error("Layer [{layer}] has no feature [{feature}]")]
    FeatureNotFound { layer: String, feature: String },

    #[error("Invalid slot: {0}")]
    InvalidSlot(String),

    #[error("Invalid chain: {0}")]
    InvalidChain(String),

    #[error("No annotation at address {0}")]
    UnknownAddress(graph::Address),

    #[error("Annotation {address} is on layer [{actual}], expected [{expected}]")]
    LayerMismatch {
        address: graph::Address,
        expected: String,
        actual: String,
    },

    #[error("Unknown layer [{0}]")]
    UnknownLayer(String),

    #[error("Layer [{layer}] cannot be merged as a {expected} layer")]
    WrongLayerKind { layer: String, expected: &'static str },
}

/// Core error types for curation operations
#[derive(Error, Debug)]
pub enum CurationError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Annotation(#[from] AnnotationError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CurationError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_exists_message() {
        assert_eq!(
            AnnotationError::AlreadyExists.to_string(),
            "The annotation already exists in the target document."
        );
    }

    #[test]
    fn test_annotation_error_converts() {
        let err: CurationError = AnnotationError::InvalidChain("cycle".to_string()).into();
        assert!(matches!(err, CurationError::Annotation(_)));
        assert_eq!(err.to_string(), "Invalid chain: cycle");
    }
}
