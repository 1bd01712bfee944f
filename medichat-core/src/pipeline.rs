use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::{
    error::GenerationError,
    generation::CompletionModel,
    prompt::{ComposedPrompt, compose_prompt},
    query::{RetrievalQuery, format_query},
    retrieval::{RetrievalResult, SearchScope, VectorStore, retrieve},
    stream::{AnswerStream, stream_answer},
};

pub const DEFAULT_GENERATION_BUDGET: Duration = Duration::from_secs(60);

/// Everything computed before the model is called
#[derive(Debug, Clone)]
pub struct PreparedPrompt {
    pub query: RetrievalQuery,
    pub retrieval: RetrievalResult,
    pub prompt: ComposedPrompt,
}

/// Query formatting, retrieval, prompt composition and streamed generation
/// over injected store and model handles.
///
/// The handles are only read, so one pipeline serves all requests.
#[derive(Clone)]
pub struct RagPipeline {
    store: Arc<dyn VectorStore>,
    model: Arc<dyn CompletionModel>,
    scope: SearchScope,
    generation_budget: Duration,
}

impl RagPipeline {
    pub fn new(store: Arc<dyn VectorStore>, model: Arc<dyn CompletionModel>, scope: SearchScope) -> Self {
        Self {
            store,
            model,
            scope,
            generation_budget: DEFAULT_GENERATION_BUDGET,
        }
    }

    pub fn with_generation_budget(mut self, budget: Duration) -> Self {
        self.generation_budget = budget;
        self
    }

    pub fn scope(&self) -> &SearchScope {
        &self.scope
    }

    /// Run the stages that precede generation. These cannot fail: retrieval
    /// faults become the fallback findings.
    pub async fn prepare(&self, report_text: &str, user_question: &str) -> PreparedPrompt {
        let query = format_query(report_text, user_question);
        let retrieval = retrieve(self.store.as_ref(), &query, &self.scope).await;
        let prompt = compose_prompt(report_text, user_question, &retrieval);

        info!(
            report_chars = report_text.len(),
            question_chars = user_question.len(),
            fallback = retrieval.is_fallback(),
            prompt_chars = prompt.as_str().len(),
            "Prompt composed"
        );

        PreparedPrompt {
            query,
            retrieval,
            prompt,
        }
    }

    /// Answer a question about a report as a stream of events.
    pub async fn answer(
        &self,
        report_text: &str,
        user_question: &str,
    ) -> Result<AnswerStream, GenerationError> {
        let prepared = self.prepare(report_text, user_question).await;
        stream_answer(
            self.model.as_ref(),
            &prepared.prompt,
            &prepared.retrieval,
            self.generation_budget,
        )
        .await
    }
}
