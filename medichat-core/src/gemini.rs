//! Gemini REST client: one-shot `generateContent` and SSE `streamGenerateContent`.

use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::{Stream, StreamExt, future, stream};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use crate::{
    error::GenerationError,
    generation::{CompletionModel, FinishReason, ModelEvent, ModelStream, Usage},
    prompt::ComposedPrompt,
};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HarmCategory {
    #[serde(rename = "HARM_CATEGORY_HARASSMENT")]
    Harassment,
    #[serde(rename = "HARM_CATEGORY_HATE_SPEECH")]
    HateSpeech,
    #[serde(rename = "HARM_CATEGORY_SEXUALLY_EXPLICIT")]
    SexuallyExplicit,
    #[serde(rename = "HARM_CATEGORY_DANGEROUS_CONTENT")]
    DangerousContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarmBlockThreshold {
    BlockNone,
    BlockOnlyHigh,
    BlockMediumAndAbove,
    BlockLowAndAbove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SafetySetting {
    pub category: HarmCategory,
    pub threshold: HarmBlockThreshold,
}

impl SafetySetting {
    /// Clinical answers routinely touch on drugs, injuries and anatomy, so
    /// every harm category is let through.
    pub fn permissive() -> Vec<SafetySetting> {
        [
            HarmCategory::Harassment,
            HarmCategory::HateSpeech,
            HarmCategory::SexuallyExplicit,
            HarmCategory::DangerousContent,
        ]
        .into_iter()
        .map(|category| SafetySetting {
            category,
            threshold: HarmBlockThreshold::BlockNone,
        })
        .collect()
    }
}

/// One piece of request content
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: Blob,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    /// Base64-encoded file content sent alongside the prompt.
    pub fn inline_data(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Part::InlineData {
            inline_data: Blob {
                mime_type: mime_type.into(),
                data: data.into(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
    safety_settings: Vec<SafetySetting>,
    request_timeout: Duration,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            safety_settings: SafetySetting::permissive(),
            request_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Accepts both `gemini-2.0-flash` and `models/gemini-2.0-flash`.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.model = model
            .strip_prefix("models/")
            .map(str::to_string)
            .unwrap_or(model);
        self
    }

    /// Timeout for one-shot calls. Streaming calls are bounded by the caller.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, self.model, method)
    }

    fn request_body(&self, parts: Vec<Part>) -> GenerateContentRequest<'_> {
        GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts,
            }],
            safety_settings: &self.safety_settings,
        }
    }

    /// Single non-streaming call; returns the concatenated text of the first candidate.
    pub async fn generate(&self, parts: Vec<Part>) -> Result<String, GenerationError> {
        info!(model = %self.model, parts = parts.len(), "Calling Gemini generateContent");

        let response = self
            .http
            .post(self.endpoint("generateContent"))
            .header("x-goog-api-key", &self.api_key)
            .timeout(self.request_timeout)
            .json(&self.request_body(parts))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout(self.request_timeout)
                } else {
                    GenerationError::Http(e)
                }
            })?;

        let response = ensure_success(response).await?;
        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        if let Some(reason) = body.block_reason() {
            return Err(GenerationError::Blocked(reason));
        }

        let text = body.text();
        if text.trim().is_empty() {
            return Err(GenerationError::InvalidResponse(
                "response contained no text".into(),
            ));
        }
        Ok(text)
    }
}

#[async_trait]
impl CompletionModel for GeminiClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn stream_completion(&self, prompt: &ComposedPrompt) -> Result<ModelStream, GenerationError> {
        info!(
            model = %self.model,
            prompt_chars = prompt.as_str().len(),
            "Opening Gemini completion stream"
        );

        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(vec![Part::text(prompt.as_str())]))
            .send()
            .await?;

        let response = ensure_success(response).await?;
        Ok(sse_events(response.bytes_stream()).boxed())
    }
}

async fn ensure_success(response: Response) -> Result<Response, GenerationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|envelope| envelope.error.message)
        .unwrap_or(body);

    Err(GenerationError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Decode a server-sent-event byte stream into model events.
///
/// The stream ends after the first error.
pub fn sse_events<S, B, E>(bytes: S) -> impl Stream<Item = Result<ModelEvent, GenerationError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<GenerationError> + fmt::Display,
{
    bytes
        .eventsource()
        .map(|frame| match frame {
            Ok(event) if event.data.trim().is_empty() => Ok(Vec::new()),
            Ok(event) => parse_stream_chunk(&event.data),
            Err(EventStreamError::Transport(e)) => Err(e.into()),
            Err(e) => Err(GenerationError::InvalidResponse(format!("bad event stream: {e}"))),
        })
        .scan(false, |failed, frame| {
            if *failed {
                return future::ready(None);
            }
            *failed = frame.is_err();
            future::ready(Some(frame))
        })
        .flat_map(|frame| {
            let events: Vec<Result<ModelEvent, GenerationError>> = match frame {
                Ok(events) => events.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            };
            stream::iter(events)
        })
}

/// Turn one streamed `GenerateContentResponse` JSON payload into events.
pub fn parse_stream_chunk(payload: &str) -> Result<Vec<ModelEvent>, GenerationError> {
    let mut chunk: GenerateContentResponse = serde_json::from_str(payload)
        .map_err(|e| GenerationError::InvalidResponse(format!("{e}: {payload}")))?;

    if let Some(error) = chunk.error.take() {
        return Err(error.into_generation_error());
    }

    if let Some(reason) = chunk.block_reason() {
        return Err(GenerationError::Blocked(reason));
    }

    let mut events = Vec::new();
    let text = chunk.text();
    if !text.is_empty() {
        events.push(ModelEvent::Text(text));
    }

    if let Some(reason) = chunk.finish_reason() {
        debug!(?reason, "Gemini reported completion");
        events.push(ModelEvent::Finished {
            reason,
            usage: chunk.usage(),
        });
    }

    Ok(events)
}

fn map_finish_reason(reason: &str) -> Option<FinishReason> {
    match reason {
        "FINISH_REASON_UNSPECIFIED" | "" => None,
        "STOP" => Some(FinishReason::Stop),
        "MAX_TOKENS" => Some(FinishReason::Length),
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => {
            Some(FinishReason::ContentFilter)
        }
        _ => Some(FinishReason::Other),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content>,
    safety_settings: &'a [SafetySetting],
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<UsageMetadata>,
    error: Option<ErrorDetail>,
}

impl GenerateContentResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    fn finish_reason(&self) -> Option<FinishReason> {
        self.candidates
            .first()
            .and_then(|c| c.finish_reason.as_deref())
            .and_then(map_finish_reason)
    }

    fn block_reason(&self) -> Option<String> {
        self.prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.clone())
    }

    fn usage(&self) -> Option<Usage> {
        self.usage_metadata.as_ref().map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: String,
}

impl ErrorDetail {
    /// Errors can also arrive as a frame inside an otherwise successful stream.
    fn into_generation_error(self) -> GenerationError {
        match self.code {
            Some(status) => GenerationError::Status {
                status,
                message: self.message,
            },
            None => GenerationError::InvalidResponse(self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_permissive_safety_settings_wire_form() {
        let value = serde_json::to_value(SafetySetting::permissive()).unwrap();
        assert_eq!(
            value,
            json!([
                {"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_NONE"},
                {"category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_NONE"},
                {"category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "BLOCK_NONE"},
                {"category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "BLOCK_NONE"}
            ])
        );
    }

    #[test]
    fn test_request_body_shape() {
        let client = GeminiClient::new("key");
        let body = client.request_body(vec![
            Part::text("Summarise this report"),
            Part::inline_data("image/jpeg", "aGVsbG8="),
        ]);
        let value = serde_json::to_value(&body).unwrap();

        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["contents"][0]["parts"][0]["text"], "Summarise this report");
        assert_eq!(
            value["contents"][0]["parts"][1]["inlineData"]["mimeType"],
            "image/jpeg"
        );
        assert_eq!(value["safetySettings"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_model_prefix_stripped() {
        let client = GeminiClient::new("key")
            .with_model("models/gemini-2.0-flash")
            .with_base_url("http://localhost:8080/v1beta/");
        assert_eq!(client.model_id(), "gemini-2.0-flash");
        assert_eq!(
            client.endpoint("generateContent"),
            "http://localhost:8080/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[tokio::test]
    async fn test_sse_events_handle_split_frames() {
        let frames: Vec<Result<&[u8], GenerationError>> = vec![
            Ok(&b": keep-alive\r\n\r\ndata: {\"candidates\":[{\"content\":"[..]),
            Ok(&b"{\"parts\":[{\"text\":\"split\"}]}}]}\r\n"[..]),
            Ok(&b"\r\n"[..]),
        ];

        let events: Vec<_> = sse_events(stream::iter(frames)).collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Ok(ModelEvent::Text(t)) if t == "split"));
    }

    #[test]
    fn test_parse_text_and_finish() {
        let payload = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Yes, "}, {"text": "reduce salt."}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 120, "candidatesTokenCount": 8, "totalTokenCount": 128}
        })
        .to_string();

        let events = parse_stream_chunk(&payload).unwrap();
        assert_eq!(
            events,
            vec![
                ModelEvent::Text("Yes, reduce salt.".into()),
                ModelEvent::Finished {
                    reason: FinishReason::Stop,
                    usage: Some(Usage {
                        prompt_tokens: 120,
                        completion_tokens: 8
                    }),
                },
            ]
        );
    }

    #[test]
    fn test_parse_text_only_chunk() {
        let payload = r#"{"candidates":[{"content":{"parts":[{"text":"partial"}]}}]}"#;
        assert_eq!(
            parse_stream_chunk(payload).unwrap(),
            vec![ModelEvent::Text("partial".into())]
        );
    }

    #[test]
    fn test_parse_blocked_prompt() {
        let payload = r#"{"promptFeedback":{"blockReason":"OTHER"}}"#;
        let err = parse_stream_chunk(payload).unwrap_err();
        assert!(matches!(err, GenerationError::Blocked(reason) if reason == "OTHER"));
    }

    #[test]
    fn test_safety_finish_maps_to_content_filter() {
        let payload = r#"{"candidates":[{"finishReason":"SAFETY"}]}"#;
        let events = parse_stream_chunk(payload).unwrap();
        assert!(matches!(
            events.as_slice(),
            [ModelEvent::Finished {
                reason: FinishReason::ContentFilter,
                ..
            }]
        ));
    }

    #[tokio::test]
    async fn test_sse_events_from_bytes() {
        let frames: Vec<Result<Vec<u8>, GenerationError>> = vec![
            Ok(b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel\"}]}}]}\r\n\r\n".to_vec()),
            Ok(b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"lo\"}]},\"finishReason\":\"STOP\"}]}\r\n\r\n".to_vec()),
        ];

        let events: Vec<_> = sse_events(stream::iter(frames)).collect().await;
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], Ok(ModelEvent::Text(t)) if t == "Hel"));
        assert!(matches!(&events[1], Ok(ModelEvent::Text(t)) if t == "lo"));
        assert!(matches!(
            &events[2],
            Ok(ModelEvent::Finished {
                reason: FinishReason::Stop,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_sse_events_stop_after_malformed_payload() {
        let frames: Vec<Result<&[u8], GenerationError>> = vec![
            Ok(&b"data: not json\n\n"[..]),
            Ok(&b"data: {\"candidates\":[]}\n\n"[..]),
        ];

        let events: Vec<_> = sse_events(stream::iter(frames)).collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Err(GenerationError::InvalidResponse(_))));
    }

    #[test]
    fn test_parse_error_frame() {
        let payload = r#"{"error":{"code":503,"message":"The model is overloaded.","status":"UNAVAILABLE"}}"#;
        let err = parse_stream_chunk(payload).unwrap_err();
        assert!(matches!(
            err,
            GenerationError::Status { status: 503, ref message } if message == "The model is overloaded."
        ));
    }

    #[tokio::test]
    async fn test_sse_events_surface_in_stream_error() {
        let frames: Vec<Result<&[u8], GenerationError>> = vec![
            Ok(&b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Partial\"}]}}]}\r\n\r\n"[..]),
            Ok(&b"data: {\"error\":{\"code\":503,\"message\":\"The model is overloaded.\"}}\r\n\r\n"[..]),
            Ok(&b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"late\"}]}}]}\r\n\r\n"[..]),
        ];

        let events: Vec<_> = sse_events(stream::iter(frames)).collect().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Ok(ModelEvent::Text(t)) if t == "Partial"));
        assert!(matches!(
            &events[1],
            Err(GenerationError::Status { status: 503, .. })
        ));
    }

    /// Usage: GEMINI_API_KEY=key cargo test test_live_stream_completion
    #[tokio::test]
    async fn test_live_stream_completion() -> anyhow::Result<()> {
        let Ok(api_key) = std::env::var("GEMINI_API_KEY") else {
            println!("Skipping test - set GEMINI_API_KEY environment variable");
            return Ok(());
        };

        let client = GeminiClient::new(api_key);
        let prompt = crate::prompt::compose_prompt(
            "Patient has mild hypertension.",
            "Should I reduce salt intake?",
            &crate::retrieval::RetrievalResult::fallback(),
        );
        let mut stream = client.stream_completion(&prompt).await?;

        let mut text = String::new();
        let mut finished = false;
        while let Some(event) = stream.next().await {
            match event? {
                ModelEvent::Text(chunk) => text.push_str(&chunk),
                ModelEvent::Finished { .. } => finished = true,
            }
        }
        assert!(finished);
        assert!(!text.is_empty());
        Ok(())
    }
}
