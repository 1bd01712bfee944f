use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::error::RetrievalError;

/// Turns query text into a dense vector
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;
}

/// Local ONNX embedder running `mixedbread-ai/mxbai-embed-large-v1`.
///
/// The model is downloaded and loaded on first use, so a missing model only
/// degrades retrieval instead of stopping the service.
#[derive(Clone)]
pub struct FastEmbedder {
    model: Arc<Mutex<Option<TextEmbedding>>>,
    cache_dir: Option<PathBuf>,
}

impl FastEmbedder {
    pub fn new() -> Self {
        Self {
            model: Arc::new(Mutex::new(None)),
            cache_dir: None,
        }
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    fn init_options(&self) -> InitOptions {
        let options =
            InitOptions::new(EmbeddingModel::MxbaiEmbedLargeV1).with_show_download_progress(false);
        match &self.cache_dir {
            Some(dir) => options.with_cache_dir(dir.clone()),
            None => options,
        }
    }
}

impl Default for FastEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let input = text.to_owned();
        let model = self.model.clone();
        let options = self.init_options();
        debug!(chars = input.len(), "Embedding retrieval query");

        // ONNX inference is CPU bound; keep it off the async workers.
        let embedding = tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|_| RetrievalError::Embedding("embedding model lock poisoned".into()))?;

            if guard.is_none() {
                info!("Loading mxbai-embed-large-v1 embedding model");
                let loaded = TextEmbedding::try_new(options)
                    .map_err(|e| RetrievalError::Embedding(e.to_string()))?;
                *guard = Some(loaded);
            }

            let embedder = guard
                .as_mut()
                .ok_or_else(|| RetrievalError::Embedding("embedding model unavailable".into()))?;
            let embeddings = embedder
                .embed(vec![input], None)
                .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

            embeddings
                .into_iter()
                .next()
                .ok_or_else(|| RetrievalError::Embedding("no embedding returned".into()))
        })
        .await
        .map_err(|e| RetrievalError::Embedding(format!("embedding task failed: {e}")))??;

        debug!(dimensions = embedding.len(), "Query embedded");
        Ok(embedding)
    }
}
