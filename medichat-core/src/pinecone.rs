//! Pinecone REST client.
//!
//! Index hosts are looked up through the control plane once per index and
//! cached; queries go straight to the data plane host.

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    embedding::Embedder,
    error::RetrievalError,
    query::RetrievalQuery,
    retrieval::{Passage, SearchScope, VectorStore},
};

const CONTROL_PLANE_URL: &str = "https://api.pinecone.io";
const API_VERSION: &str = "2024-07";
/// Metadata field holding the passage text
const TEXT_FIELD: &str = "chunk";

pub struct PineconeStore {
    http: Client,
    api_key: Option<String>,
    hosts: DashMap<String, String>,
    embedder: Arc<dyn Embedder>,
}

impl PineconeStore {
    pub fn new(api_key: Option<String>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            http: Client::new(),
            api_key,
            hosts: DashMap::new(),
            embedder,
        }
    }

    /// Pin the data plane host for an index, skipping the control plane lookup.
    pub fn with_index_host(self, index: impl Into<String>, host: impl Into<String>) -> Self {
        self.hosts.insert(index.into(), normalize_host(&host.into()));
        self
    }

    fn api_key(&self) -> Result<&str, RetrievalError> {
        self.api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| RetrievalError::NotConfigured("PINECONE_API_KEY is not set".into()))
    }

    async fn index_host(&self, index: &str) -> Result<String, RetrievalError> {
        if let Some(host) = self.hosts.get(index) {
            return Ok(host.clone());
        }

        let url = format!("{CONTROL_PLANE_URL}/indexes/{index}");
        debug!(%url, "Describing Pinecone index");

        let response = self
            .http
            .get(&url)
            .header("Api-Key", self.api_key()?)
            .header("X-Pinecone-API-Version", API_VERSION)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let description: IndexDescription = response.json().await?;
        let host = normalize_host(&description.host);
        info!(index, %host, "Resolved Pinecone index host");
        self.hosts.insert(index.to_string(), host.clone());
        Ok(host)
    }
}

#[async_trait]
impl VectorStore for PineconeStore {
    async fn search(
        &self,
        query: &RetrievalQuery,
        scope: &SearchScope,
    ) -> Result<Vec<Passage>, RetrievalError> {
        let api_key = self.api_key()?;
        let vector = self.embedder.embed(query.as_str()).await?;
        let host = self.index_host(&scope.collection).await?;

        let request = QueryRequest {
            namespace: &scope.namespace,
            vector: &vector,
            top_k: scope.top_k,
            include_metadata: true,
            include_values: false,
        };

        let response = self
            .http
            .post(format!("{host}/query"))
            .header("Api-Key", api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::InvalidResponse(e.to_string()))?;

        Ok(body.into_passages(TEXT_FIELD))
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    host: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    namespace: &'a str,
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

impl QueryResponse {
    fn into_passages(self, text_field: &str) -> Vec<Passage> {
        self.matches
            .into_iter()
            .filter_map(|m| {
                let text = m
                    .metadata
                    .as_ref()
                    .and_then(|meta| meta.get(text_field))
                    .and_then(Value::as_str)?
                    .to_string();
                Some(Passage {
                    id: m.id,
                    score: m.score,
                    text,
                })
            })
            .collect()
    }
}
