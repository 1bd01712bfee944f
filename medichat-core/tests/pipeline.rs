use async_trait::async_trait;
use futures::{StreamExt, stream};
use medichat_core::prompt::{FINDINGS_END, FINDINGS_START, QUERY_START, REPORT_START};
use medichat_core::query::QUERY_INSTRUCTION;
use medichat_core::{
    AnswerEvent, ComposedPrompt, CompletionModel, FALLBACK_FINDINGS, FinishReason,
    GenerationError, ModelEvent, ModelStream, Passage, RagPipeline, RetrievalError,
    RetrievalQuery, SearchScope, VectorStore,
};
use std::sync::{Arc, Mutex};

const REPORT: &str = "Patient has mild hypertension.";
const QUESTION: &str = "Should I reduce salt intake?";
const FINDING: &str = "Reducing sodium lowers blood pressure in hypertensive patients.";

/// Returns fixed passages and records the queries it received.
struct RecordingStore {
    passages: Vec<Passage>,
    queries: Mutex<Vec<String>>,
}

impl RecordingStore {
    fn new(passages: Vec<Passage>) -> Self {
        Self {
            passages,
            queries: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl VectorStore for RecordingStore {
    async fn search(
        &self,
        query: &RetrievalQuery,
        _scope: &SearchScope,
    ) -> Result<Vec<Passage>, RetrievalError> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(self.passages.clone())
    }
}

struct BrokenStore;

#[async_trait]
impl VectorStore for BrokenStore {
    async fn search(
        &self,
        _query: &RetrievalQuery,
        _scope: &SearchScope,
    ) -> Result<Vec<Passage>, RetrievalError> {
        Err(RetrievalError::Embedding("connection refused".into()))
    }
}

/// Streams the given chunks and remembers the prompt it was called with.
struct EchoModel {
    chunks: Vec<&'static str>,
    prompts: Mutex<Vec<String>>,
}

impl EchoModel {
    fn new(chunks: Vec<&'static str>) -> Self {
        Self {
            chunks,
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl CompletionModel for EchoModel {
    fn model_id(&self) -> &str {
        "echo"
    }

    async fn stream_completion(&self, prompt: &ComposedPrompt) -> Result<ModelStream, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut events: Vec<Result<ModelEvent, GenerationError>> = self
            .chunks
            .iter()
            .map(|c| Ok(ModelEvent::Text(c.to_string())))
            .collect();
        events.push(Ok(ModelEvent::Finished {
            reason: FinishReason::Stop,
            usage: None,
        }));
        Ok(stream::iter(events).boxed())
    }
}

struct RejectingModel;

#[async_trait]
impl CompletionModel for RejectingModel {
    fn model_id(&self) -> &str {
        "rejecting"
    }

    async fn stream_completion(&self, _prompt: &ComposedPrompt) -> Result<ModelStream, GenerationError> {
        Err(GenerationError::Status {
            status: 429,
            message: "Resource has been exhausted".into(),
        })
    }
}

fn finding() -> Passage {
    Passage {
        id: "finding-1".into(),
        score: 0.87,
        text: FINDING.into(),
    }
}

fn findings_section(prompt: &str) -> &str {
    let start = prompt.find(FINDINGS_START).unwrap() + FINDINGS_START.len();
    let end = prompt.find(FINDINGS_END).unwrap();
    prompt[start..end].trim_matches('\n')
}

#[tokio::test]
async fn test_grounded_answer_streams_and_closes() -> anyhow::Result<()> {
    let store = Arc::new(RecordingStore::new(vec![finding()]));
    let model = Arc::new(EchoModel::new(vec!["Yes. ", "Lower sodium helps."]));
    let pipeline = RagPipeline::new(store.clone(), model.clone(), SearchScope::default());

    let events: Vec<AnswerEvent> = pipeline.answer(REPORT, QUESTION).await?.collect().await;

    let prompt = model.last_prompt();
    let report_at = prompt.find(REPORT).unwrap();
    let question_at = prompt.find(QUESTION).unwrap();
    let finding_at = prompt.find(FINDING).unwrap();
    assert!(report_at < question_at && question_at < finding_at);

    let query = store.queries.lock().unwrap()[0].clone();
    assert!(query.starts_with(QUERY_INSTRUCTION));
    assert!(query.contains(REPORT) && query.contains(QUESTION));

    let AnswerEvent::Data(data) = &events[0] else {
        panic!("first event must carry the retrievals");
    };
    assert!(data.retrievals.contains(FINDING));

    let texts = events
        .iter()
        .filter(|e| matches!(e, AnswerEvent::Text(_)))
        .count();
    assert!(texts >= 1);
    assert!(matches!(events.last(), Some(AnswerEvent::Finish { .. })));
    Ok(())
}

#[tokio::test]
async fn test_unreachable_store_falls_back() -> anyhow::Result<()> {
    let model = Arc::new(EchoModel::new(vec!["Based on the report alone..."]));
    let pipeline = RagPipeline::new(Arc::new(BrokenStore), model.clone(), SearchScope::default());

    let prepared = pipeline.prepare(REPORT, QUESTION).await;
    assert_eq!(prepared.retrieval.as_str(), FALLBACK_FINDINGS);
    assert_eq!(findings_section(prepared.prompt.as_str()), FALLBACK_FINDINGS);

    let events: Vec<AnswerEvent> = pipeline.answer(REPORT, QUESTION).await?.collect().await;
    assert!(matches!(&events[0], AnswerEvent::Data(d) if d.retrievals == FALLBACK_FINDINGS));
    assert_eq!(findings_section(&model.last_prompt()), FALLBACK_FINDINGS);
    assert!(matches!(events.last(), Some(AnswerEvent::Finish { .. })));
    Ok(())
}

#[tokio::test]
async fn test_empty_question_reaches_the_model() -> anyhow::Result<()> {
    let store = Arc::new(RecordingStore::new(vec![finding()]));
    let model = Arc::new(EchoModel::new(vec!["Please ask a question."]));
    let pipeline = RagPipeline::new(store.clone(), model.clone(), SearchScope::default());

    let answer = pipeline.answer(REPORT, "").await?;
    let events: Vec<AnswerEvent> = answer.collect().await;

    let query = store.queries.lock().unwrap()[0].clone();
    assert!(query.starts_with(QUERY_INSTRUCTION));
    assert!(query.contains(REPORT));
    assert!(query.ends_with("\n\n"));

    let prompt = model.last_prompt();
    assert!(prompt.find(REPORT_START).unwrap() < prompt.find(QUERY_START).unwrap());
    assert!(matches!(events.last(), Some(AnswerEvent::Finish { .. })));
    Ok(())
}

#[tokio::test]
async fn test_model_failure_fails_the_request() {
    let store = Arc::new(RecordingStore::new(vec![finding()]));
    let pipeline = RagPipeline::new(store.clone(), Arc::new(RejectingModel), SearchScope::default());

    let result = pipeline.answer(REPORT, QUESTION).await;
    assert!(matches!(
        result,
        Err(GenerationError::Status { status: 429, .. })
    ));
    // retrieval still ran before generation was attempted
    assert_eq!(store.queries.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_empty_report_is_tolerated() -> anyhow::Result<()> {
    let model = Arc::new(EchoModel::new(vec!["No report provided."]));
    let pipeline = RagPipeline::new(
        Arc::new(RecordingStore::new(vec![])),
        model.clone(),
        SearchScope::new("medic", "ns1", 3),
    );

    let events: Vec<AnswerEvent> = pipeline.answer("", QUESTION).await?.collect().await;
    assert!(matches!(&events[0], AnswerEvent::Data(d) if d.retrievals == FALLBACK_FINDINGS));
    assert!(model.last_prompt().contains(QUESTION));
    Ok(())
}
