//! File-backed providers
//!
//! Annotator and curation graphs are JSON files, the layer schema is a TOML
//! file. Every graph file belongs to the one document named on the command
//! line.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use curation_core::{
    AnnotationGraph, CurationError, Feature, GraphProvider, Layer, LayerProvider, LayerSchema,
    Result,
};

/// Graph and schema files of one document
#[derive(Debug, Clone, Default)]
pub struct FileStore {
    document: String,
    annotators: BTreeMap<String, PathBuf>,
    curation: Option<PathBuf>,
    output: Option<PathBuf>,
    schema: LayerSchema,
}

impl FileStore {
    pub fn new(document: impl Into<String>, schema: LayerSchema) -> Self {
        Self {
            document: document.into(),
            schema,
            ..Default::default()
        }
    }

    /// Read the layer schema from a TOML file
    pub async fn read_schema(path: &PathBuf) -> Result<LayerSchema> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CurationError::Storage(format!("{}: {e}", path.display())))?;
        LayerSchema::from_toml(&content)
    }

    pub fn with_annotator(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.annotators.insert(name.into(), path.into());
        self
    }

    /// Existing curation graph; without one curation starts empty
    pub fn with_curation(mut self, path: Option<PathBuf>) -> Self {
        self.curation = path;
        self
    }

    /// Where the curation graph is written
    pub fn with_output(mut self, path: Option<PathBuf>) -> Self {
        self.output = path;
        self
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn annotators(&self) -> Vec<String> {
        self.annotators.keys().cloned().collect()
    }

    pub fn schema(&self) -> &LayerSchema {
        &self.schema
    }

    fn check_document(&self, document: &str) -> Result<()> {
        if document != self.document {
            return Err(CurationError::NotFound(format!("document {document}")));
        }
        Ok(())
    }
}

async fn read_graph(path: &PathBuf) -> Result<AnnotationGraph> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CurationError::Storage(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|e| CurationError::Validation(format!("{}: {e}", path.display())))
}

#[async_trait]
impl GraphProvider for FileStore {
    async fn load_annotator_graphs(
        &self,
        document: &str,
        annotators: &[String],
    ) -> Result<BTreeMap<String, AnnotationGraph>> {
        self.check_document(document)?;
        let mut graphs = BTreeMap::new();
        for annotator in annotators {
            let Some(path) = self.annotators.get(annotator) else {
                debug!(document, annotator = %annotator, "No graph file for annotator");
                continue;
            };
            graphs.insert(annotator.clone(), read_graph(path).await?);
        }
        Ok(graphs)
    }

    async fn load_curation_graph(&self, document: &str) -> Result<AnnotationGraph> {
        self.check_document(document)?;
        match &self.curation {
            Some(path) => read_graph(path).await,
            None => {
                // start from the document text of any annotator
                let text = match self.annotators.values().next() {
                    Some(path) => read_graph(path).await?.text().to_string(),
                    None => String::new(),
                };
                Ok(AnnotationGraph::with_text(text))
            }
        }
    }

    async fn save_curation_graph(&self, document: &str, graph: &AnnotationGraph) -> Result<()> {
        self.check_document(document)?;
        let path = self
            .output
            .as_ref()
            .or(self.curation.as_ref())
            .ok_or_else(|| CurationError::Storage("no output file configured".to_string()))?;
        let json = serde_json::to_string_pretty(graph)
            .map_err(|e| CurationError::Storage(e.to_string()))?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| CurationError::Storage(format!("{}: {e}", path.display())))?;
        debug!(document, path = %path.display(), "Wrote curation graph");
        Ok(())
    }
}

#[async_trait]
impl LayerProvider for FileStore {
    async fn list_layers(&self, _project: &str) -> Result<Vec<Layer>> {
        Ok(self.schema.layers().to_vec())
    }

    async fn list_features(&self, _project: &str, layer: &str) -> Result<Vec<Feature>> {
        self.schema
            .layer(layer)
            .map(|l| l.features.clone())
            .ok_or_else(|| CurationError::NotFound(format!("layer {layer}")))
    }
}
