pub mod embedding;
pub mod error;
pub mod gemini;
pub mod generation;
pub mod message;
pub mod pinecone;
pub mod pipeline;
pub mod prompt;
pub mod query;
pub mod retrieval;
pub mod stream;

// Re-export commonly used types
pub use embedding::{Embedder, FastEmbedder};
pub use error::{GenerationError, RetrievalError};
pub use gemini::{GeminiClient, HarmBlockThreshold, HarmCategory, SafetySetting};
pub use generation::{CompletionModel, FinishReason, ModelEvent, ModelStream, Usage};
pub use message::{ChatMessage, MessageRole};
pub use pinecone::PineconeStore;
pub use pipeline::{PreparedPrompt, RagPipeline};
pub use prompt::{ComposedPrompt, compose_prompt};
pub use query::{RetrievalQuery, format_query};
pub use retrieval::{
    FALLBACK_FINDINGS, Passage, RetrievalResult, SearchScope, VectorStore, retrieve,
    search_findings,
};
pub use stream::{AnswerEvent, AnswerStream, StreamData, stream_answer};
