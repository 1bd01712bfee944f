use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::{error::GenerationError, prompt::ComposedPrompt};

/// Why the model stopped producing tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Other,
    Unknown,
}

/// Token accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Incremental output of a streaming completion
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    Text(String),
    Finished {
        reason: FinishReason,
        usage: Option<Usage>,
    },
}

pub type ModelStream = BoxStream<'static, Result<ModelEvent, GenerationError>>;

/// A generative model that can stream a completion for a single prompt.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    fn model_id(&self) -> &str;

    /// Open a streaming completion. Errors returned here mean generation never
    /// started; errors inside the stream mean it failed part way.
    async fn stream_completion(&self, prompt: &ComposedPrompt) -> Result<ModelStream, GenerationError>;
}
