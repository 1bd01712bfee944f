use async_trait::async_trait;
use std::fmt;
use tracing::{info, warn};

use crate::{error::RetrievalError, query::RetrievalQuery};

/// Findings text used whenever retrieval fails or finds nothing.
pub const FALLBACK_FINDINGS: &str = "No relevant clinical findings available.";

/// A single vector store match
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub id: String,
    pub score: f32,
    pub text: String,
}

/// Where and how much to search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchScope {
    pub collection: String,
    pub namespace: String,
    pub top_k: usize,
}

impl SearchScope {
    pub fn new(collection: impl Into<String>, namespace: impl Into<String>, top_k: usize) -> Self {
        Self {
            collection: collection.into(),
            namespace: namespace.into(),
            top_k,
        }
    }
}

impl Default for SearchScope {
    fn default() -> Self {
        Self::new("medic", "ns1", 5)
    }
}

/// Top-k similarity search over a namespaced collection.
///
/// Results come back ranked, most similar first. Score semantics depend on the
/// index metric (a euclidean index reports distances), so callers keep the
/// store's order instead of re-sorting on `score`.
///
/// Implementations own their embedding step and must be safe to share across
/// concurrent requests.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn search(
        &self,
        query: &RetrievalQuery,
        scope: &SearchScope,
    ) -> Result<Vec<Passage>, RetrievalError>;
}

/// Concatenated findings handed to the prompt and the side channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalResult(String);

impl RetrievalResult {
    pub fn fallback() -> Self {
        Self(FALLBACK_FINDINGS.to_string())
    }

    pub fn is_fallback(&self) -> bool {
        self.0 == FALLBACK_FINDINGS
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Join passages in store rank order, in the "Clinical Finding n" layout.
    ///
    /// Passages without text are dropped; if none remain the result is
    /// [`RetrievalError::NoMatches`].
    pub fn from_passages(
        mut passages: Vec<Passage>,
        scope: &SearchScope,
    ) -> Result<Self, RetrievalError> {
        passages.retain(|p| !p.text.trim().is_empty());
        if passages.is_empty() {
            return Err(RetrievalError::NoMatches {
                collection: scope.collection.clone(),
                namespace: scope.namespace.clone(),
            });
        }

        let joined = passages
            .iter()
            .enumerate()
            .map(|(index, passage)| format!("\nClinical Finding {}: \n {}", index + 1, passage.text))
            .collect::<Vec<_>>()
            .join(". \n\n");

        Ok(Self(joined))
    }
}

impl fmt::Display for RetrievalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fallible retrieval: search the store and concatenate what it returns.
pub async fn search_findings(
    store: &dyn VectorStore,
    query: &RetrievalQuery,
    scope: &SearchScope,
) -> Result<RetrievalResult, RetrievalError> {
    let passages = store.search(query, scope).await?;
    info!(
        collection = %scope.collection,
        namespace = %scope.namespace,
        matches = passages.len(),
        "Vector search returned passages"
    );
    RetrievalResult::from_passages(passages, scope)
}

/// Retrieval boundary. Any fault is logged and replaced by the fallback
/// findings so generation can still go ahead.
pub async fn retrieve(
    store: &dyn VectorStore,
    query: &RetrievalQuery,
    scope: &SearchScope,
) -> RetrievalResult {
    match search_findings(store, query, scope).await {
        Ok(result) => result,
        Err(e) => {
            warn!(
                collection = %scope.collection,
                namespace = %scope.namespace,
                error = %e,
                "Retrieval failed, continuing without clinical findings"
            );
            RetrievalResult::fallback()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::format_query;

    struct FixedStore(Vec<Passage>);

    #[async_trait]
    impl VectorStore for FixedStore {
        async fn search(
            &self,
            _query: &RetrievalQuery,
            _scope: &SearchScope,
        ) -> Result<Vec<Passage>, RetrievalError> {
            Ok(self.0.clone())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl VectorStore for FailingStore {
        async fn search(
            &self,
            _query: &RetrievalQuery,
            _scope: &SearchScope,
        ) -> Result<Vec<Passage>, RetrievalError> {
            Err(RetrievalError::Status {
                status: 401,
                body: "unauthorized".to_string(),
            })
        }
    }

    fn passage(id: &str, score: f32, text: &str) -> Passage {
        Passage {
            id: id.to_string(),
            score,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_passages_keep_store_rank() {
        // euclidean index: smallest distance ranks first
        let result = RetrievalResult::from_passages(
            vec![
                passage("b", 0.12, "high"),
                passage("c", 0.48, "mid"),
                passage("a", 0.95, "low"),
            ],
            &SearchScope::default(),
        )
        .unwrap();

        assert_eq!(
            result.as_str(),
            "\nClinical Finding 1: \n high. \n\n\nClinical Finding 2: \n mid. \n\n\nClinical Finding 3: \n low"
        );
    }

    #[test]
    fn test_blank_passages_count_as_no_match() {
        let err = RetrievalResult::from_passages(
            vec![passage("a", 0.9, "  ")],
            &SearchScope::default(),
        )
        .unwrap_err();
        assert!(matches!(err, RetrievalError::NoMatches { .. }));
    }

    #[tokio::test]
    async fn test_retrieve_success() {
        let store = FixedStore(vec![passage(
            "p1",
            0.88,
            "Reducing sodium lowers blood pressure in hypertensive patients.",
        )]);
        let query = format_query("Patient has mild hypertension.", "Should I reduce salt intake?");

        let result = retrieve(&store, &query, &SearchScope::default()).await;
        assert!(!result.is_fallback());
        assert!(
            result
                .as_str()
                .contains("Reducing sodium lowers blood pressure in hypertensive patients.")
        );
    }

    #[tokio::test]
    async fn test_retrieve_masks_store_errors() {
        let query = format_query("report", "question");
        let result = retrieve(&FailingStore, &query, &SearchScope::default()).await;
        assert_eq!(result.as_str(), FALLBACK_FINDINGS);
        assert!(result.is_fallback());
    }

    #[tokio::test]
    async fn test_retrieve_masks_empty_results() {
        let query = format_query("report", "question");
        let result = retrieve(&FixedStore(vec![]), &query, &SearchScope::default()).await;
        assert_eq!(result.into_string(), FALLBACK_FINDINGS);
    }

    #[tokio::test]
    async fn test_search_findings_surfaces_error() {
        let query = format_query("report", "question");
        let err = search_findings(&FailingStore, &query, &SearchScope::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Status { status: 401, .. }));
    }
}
