//! HTTP NDJSON streaming completion source.
//!
//! Talks to the QA generation service: POST the assembled context to
//! `/api/qa/professional-stream`, then read the response body as
//! newline-delimited JSON frames. `status: "answering"` frames carry a
//! text chunk; `status: "complete"` ends the stream. Undecodable lines
//! are logged and skipped, matching the service's tolerant consumers.

use std::io;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, future};
use parley_core::completion::{CompletionSource, GenerationContext, HistoryTurn, IncrementStream};
use parley_core::{ParleyError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;

const STREAM_PATH: &str = "/api/qa/professional-stream";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_TOP_K: u32 = 10;
const DEFAULT_EMBEDDING_MODEL: &str = "embedding-001";

/// Streaming client for the QA generation service.
#[derive(Clone)]
pub struct HttpCompletionSource {
    client: Client,
    base_url: String,
    top_k: u32,
    embedding_model: String,
}

impl HttpCompletionSource {
    /// Creates a source pointed at the service's base URL (no trailing
    /// slash, e.g. `https://qa.internal:8080`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            top_k: DEFAULT_TOP_K,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }

    /// Replaces the HTTP client, e.g. to set timeouts or proxies.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Overrides the retrieval depth sent to the service.
    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = top_k;
        self
    }

    /// Overrides the embedding model name sent to the service.
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    fn build_request<'a>(&'a self, context: &'a GenerationContext) -> GenerateRequest<'a> {
        let responder = &context.responder;
        GenerateRequest {
            question_text: &context.question,
            model: if responder.model.is_empty() {
                DEFAULT_MODEL
            } else {
                &responder.model
            },
            ai_info: ResponderInfo {
                id: &responder.id,
                name: &responder.name,
                description: &responder.description,
                personality: &responder.personality,
                system_prompt: &context.instructions,
            },
            room_id: &context.room_id,
            top_k: self.top_k,
            histories_chat: &context.history,
            embedding_model: &self.embedding_model,
        }
    }
}

#[async_trait]
impl CompletionSource for HttpCompletionSource {
    async fn generate(&self, context: &GenerationContext) -> Result<IncrementStream> {
        let url = format!("{}{STREAM_PATH}", self.base_url);
        tracing::debug!(
            "requesting generation from {} for responder {}",
            url,
            context.responder.id
        );

        let response = self
            .client
            .post(&url)
            .json(&self.build_request(context))
            .send()
            .await
            .map_err(|err| ParleyError::provider(format!("generation request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ParleyError::provider(format!(
                "generation service returned {status}: {body}"
            )));
        }

        let bytes = response.bytes_stream().map_err(io::Error::other);
        Ok(decode_increments(StreamReader::new(bytes)))
    }
}

/// Wire request for one generation, matching the service's schema.
#[derive(Serialize)]
struct GenerateRequest<'a> {
    question_text: &'a str,
    model: &'a str,
    ai_info: ResponderInfo<'a>,
    room_id: &'a str,
    top_k: u32,
    histories_chat: &'a [HistoryTurn],
    embedding_model: &'a str,
}

#[derive(Serialize)]
struct ResponderInfo<'a> {
    id: &'a str,
    name: &'a str,
    description: &'a str,
    personality: &'a str,
    system_prompt: &'a str,
}

#[derive(Deserialize)]
struct StreamFrame {
    status: String,
    #[serde(default)]
    chunk: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Increment(String),
    Complete,
}

/// Decodes one NDJSON line. `None` means the line carries nothing for
/// the consumer (blank, undecodable, or an unknown status).
fn decode_line(line: &str) -> Option<Frame> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<StreamFrame>(line) {
        Ok(frame) if frame.status == "answering" => Some(Frame::Increment(frame.chunk)),
        Ok(frame) if frame.status == "complete" => Some(Frame::Complete),
        Ok(frame) => {
            tracing::debug!("ignoring stream frame with status {:?}", frame.status);
            None
        }
        Err(err) => {
            tracing::warn!("skipping undecodable stream line: {}", err);
            None
        }
    }
}

/// Turns the raw response body into the increment stream: line-framed,
/// decoded, ended at the first `complete` frame.
fn decode_increments<R>(reader: R) -> IncrementStream
where
    R: AsyncRead + Send + 'static,
{
    let frames = FramedRead::new(reader, LinesCodec::new())
        .map(|line| match line {
            Ok(line) => Ok(decode_line(&line)),
            Err(err) => Err(ParleyError::provider(format!("stream read failed: {err}"))),
        })
        .take_while(|item| future::ready(!matches!(item, Ok(Some(Frame::Complete)))))
        .filter_map(|item| {
            future::ready(match item {
                Ok(Some(Frame::Increment(chunk))) => Some(Ok(chunk)),
                Ok(_) => None,
                Err(err) => Some(Err(err)),
            })
        });

    Box::pin(frames)
}
