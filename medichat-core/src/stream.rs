//! Answer streaming.
//!
//! An [`AnswerStream`] multiplexes two channels to the consumer:
//! * a single-shot metadata slot carrying the retrievals, always yielded first;
//! * a token channel fed by a pump task, ending in exactly one terminal event
//!   ([`AnswerEvent::Finish`] or [`AnswerEvent::Error`]).
//!
//! Dropping the stream closes the token channel; the pump notices, stops
//! polling the model and drops the upstream response.

use futures::{Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, error, info};

use crate::{
    error::GenerationError,
    generation::{CompletionModel, FinishReason, ModelEvent, ModelStream, Usage},
    prompt::ComposedPrompt,
    retrieval::RetrievalResult,
};

const TOKEN_BUFFER: usize = 32;

/// Side-channel record sent ahead of the answer text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamData {
    pub retrievals: String,
}

/// Item of an [`AnswerStream`]
#[derive(Debug)]
pub enum AnswerEvent {
    Data(StreamData),
    Text(String),
    Finish {
        reason: FinishReason,
        usage: Option<Usage>,
    },
    Error(GenerationError),
}

impl AnswerEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnswerEvent::Finish { .. } | AnswerEvent::Error(_))
    }
}

enum TokenEvent {
    Chunk(String),
    Finished {
        reason: FinishReason,
        usage: Option<Usage>,
    },
    Failed(GenerationError),
}

pub struct AnswerStream {
    metadata: Option<StreamData>,
    tokens: mpsc::Receiver<TokenEvent>,
    closed: bool,
}

impl Stream for AnswerStream {
    type Item = AnswerEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.closed {
            return Poll::Ready(None);
        }

        if let Some(data) = this.metadata.take() {
            return Poll::Ready(Some(AnswerEvent::Data(data)));
        }

        let event = match this.tokens.poll_recv(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(event) => event,
        };

        let answer = match event {
            Some(TokenEvent::Chunk(text)) => AnswerEvent::Text(text),
            Some(TokenEvent::Finished { reason, usage }) => {
                this.closed = true;
                AnswerEvent::Finish { reason, usage }
            }
            Some(TokenEvent::Failed(e)) => {
                this.closed = true;
                AnswerEvent::Error(e)
            }
            // pump went away without a terminal event
            None => {
                this.closed = true;
                AnswerEvent::Error(GenerationError::Aborted)
            }
        };

        Poll::Ready(Some(answer))
    }
}

/// Start generation and wrap it as an [`AnswerStream`].
///
/// Failing to open the model call is returned as an error; failures after that
/// arrive as a terminal [`AnswerEvent::Error`]. `budget` bounds the whole call.
pub async fn stream_answer(
    model: &dyn CompletionModel,
    prompt: &ComposedPrompt,
    retrieval: &RetrievalResult,
    budget: Duration,
) -> Result<AnswerStream, GenerationError> {
    let deadline = Instant::now() + budget;

    let upstream = timeout(budget, model.stream_completion(prompt))
        .await
        .map_err(|_| GenerationError::Timeout(budget))?
        .inspect_err(|e| error!(model = model.model_id(), error = %e, "Failed to open completion stream"))?;

    info!(model = model.model_id(), "Completion stream opened");

    let (tx, rx) = mpsc::channel(TOKEN_BUFFER);
    tokio::spawn(pump(upstream, tx, deadline, budget));

    Ok(AnswerStream {
        metadata: Some(StreamData {
            retrievals: retrieval.as_str().to_string(),
        }),
        tokens: rx,
        closed: false,
    })
}

async fn pump(
    mut upstream: ModelStream,
    tx: mpsc::Sender<TokenEvent>,
    deadline: Instant,
    budget: Duration,
) {
    let mut chunks = 0usize;

    loop {
        let next = tokio::select! {
            _ = tx.closed() => {
                debug!(chunks, "Answer consumer went away, stopping generation");
                return;
            }
            next = timeout_at(deadline, upstream.next()) => next,
        };

        let event = match next {
            Err(_) => {
                error!(chunks, ?budget, "Generation exceeded its budget");
                TokenEvent::Failed(GenerationError::Timeout(budget))
            }
            Ok(None) => {
                debug!(chunks, "Upstream ended without a finish signal");
                TokenEvent::Finished {
                    reason: FinishReason::Unknown,
                    usage: None,
                }
            }
            Ok(Some(Ok(ModelEvent::Text(text)))) => {
                if text.is_empty() {
                    continue;
                }
                chunks += 1;
                if tx.send(TokenEvent::Chunk(text)).await.is_err() {
                    return;
                }
                continue;
            }
            Ok(Some(Ok(ModelEvent::Finished { reason, usage }))) => {
                info!(chunks, ?reason, "Generation finished");
                TokenEvent::Finished { reason, usage }
            }
            Ok(Some(Err(e))) => {
                error!(chunks, error = %e, "Generation failed mid-stream");
                TokenEvent::Failed(e)
            }
        };

        // terminal: the consumer may already be gone, nothing left to do either way
        let _ = tx.send(event).await;
        return;
    }
}
