//! Graph and layer providers
//!
//! The engines never load or persist anything themselves. Callers fetch the
//! annotator graphs and the curation graph through a [`GraphProvider`], the
//! layer definitions through a [`LayerProvider`], and hand them over as plain
//! values.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::graph::AnnotationGraph;
use crate::layer::{Feature, Layer, LayerSchema};
use crate::{CurationError, Result};

/// Access to the annotation graphs of documents
#[async_trait]
pub trait GraphProvider: Send + Sync {
    /// Load the graphs of the given annotators for a document, keyed by
    /// annotator. Annotators without a graph for the document are left out.
    async fn load_annotator_graphs(
        &self,
        document: &str,
        annotators: &[String],
    ) -> Result<BTreeMap<String, AnnotationGraph>>;

    /// Load the curation graph of a document. A document that has not been
    /// curated yet yields an empty graph over the document text.
    async fn load_curation_graph(&self, document: &str) -> Result<AnnotationGraph>;

    /// Persist the curation graph of a document
    async fn save_curation_graph(&self, document: &str, graph: &AnnotationGraph) -> Result<()>;
}

/// Access to the layer definitions of projects
#[async_trait]
pub trait LayerProvider: Send + Sync {
    /// All layers of a project
    async fn list_layers(&self, project: &str) -> Result<Vec<Layer>>;

    /// Features of one layer
    async fn list_features(&self, project: &str, layer: &str) -> Result<Vec<Feature>>;
}

#[derive(Debug, Default)]
struct DocumentEntry {
    text: String,
    annotators: BTreeMap<String, AnnotationGraph>,
    curation: Option<AnnotationGraph>,
}

/// In-memory provider for callers that already hold the graphs and schemas
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, DocumentEntry>>,
    schemas: RwLock<HashMap<String, LayerSchema>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document text
    pub fn add_document(&self, document: impl Into<String>, text: impl Into<String>) -> Result<()> {
        let mut documents = self.documents.write().map_err(poisoned)?;
        documents.entry(document.into()).or_default().text = text.into();
        Ok(())
    }

    /// Store an annotator's graph for a document, registering the document
    /// with the graph's text if it is unknown
    pub fn put_annotator_graph(
        &self,
        document: &str,
        annotator: impl Into<String>,
        graph: AnnotationGraph,
    ) -> Result<()> {
        let mut documents = self.documents.write().map_err(poisoned)?;
        let entry = documents
            .entry(document.to_string())
            .or_insert_with(|| DocumentEntry {
                text: graph.text().to_string(),
                ..Default::default()
            });
        entry.annotators.insert(annotator.into(), graph);
        Ok(())
    }

    /// Register the layer schema of a project
    pub fn put_schema(&self, project: impl Into<String>, schema: LayerSchema) -> Result<()> {
        self.schemas
            .write()
            .map_err(poisoned)?
            .insert(project.into(), schema);
        Ok(())
    }
}

#[async_trait]
impl GraphProvider for MemoryStore {
    async fn load_annotator_graphs(
        &self,
        document: &str,
        annotators: &[String],
    ) -> Result<BTreeMap<String, AnnotationGraph>> {
        let documents = self.documents.read().map_err(poisoned)?;
        let entry = documents
            .get(document)
            .ok_or_else(|| CurationError::NotFound(format!("document {document}")))?;

        let mut graphs = BTreeMap::new();
        for annotator in annotators {
            match entry.annotators.get(annotator) {
                Some(graph) => {
                    graphs.insert(annotator.clone(), graph.clone());
                }
                None => debug!(document, annotator = %annotator, "No annotations from annotator"),
            }
        }
        Ok(graphs)
    }

    async fn load_curation_graph(&self, document: &str) -> Result<AnnotationGraph> {
        let documents = self.documents.read().map_err(poisoned)?;
        let entry = documents
            .get(document)
            .ok_or_else(|| CurationError::NotFound(format!("document {document}")))?;
        Ok(entry
            .curation
            .clone()
            .unwrap_or_else(|| AnnotationGraph::with_text(entry.text.clone())))
    }

    async fn save_curation_graph(&self, document: &str, graph: &AnnotationGraph) -> Result<()> {
        let mut documents = self.documents.write().map_err(poisoned)?;
        let entry = documents
            .get_mut(document)
            .ok_or_else(|| CurationError::NotFound(format!("document {document}")))?;
        entry.curation = Some(graph.clone());
        debug!(document, nodes = graph.len(), "Saved curation graph");
        Ok(())
    }
}

#[async_trait]
impl LayerProvider for MemoryStore {
    async fn list_layers(&self, project: &str) -> Result<Vec<Layer>> {
        let schemas = self.schemas.read().map_err(poisoned)?;
        schemas
            .get(project)
            .map(|s| s.layers().to_vec())
            .ok_or_else(|| CurationError::NotFound(format!("project {project}")))
    }

    async fn list_features(&self, project: &str, layer: &str) -> Result<Vec<Feature>> {
        let schemas = self.schemas.read().map_err(poisoned)?;
        let schema = schemas
            .get(project)
            .ok_or_else(|| CurationError::NotFound(format!("project {project}")))?;
        schema
            .layer(layer)
            .map(|l| l.features.clone())
            .ok_or_else(|| CurationError::NotFound(format!("layer {layer}")))
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> CurationError {
    CurationError::Storage("store lock poisoned".to_string())
}
