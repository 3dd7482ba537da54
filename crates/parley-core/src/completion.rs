//! Completion source seam.
//!
//! The generative provider is consumed only through this trait: submit an
//! assembled context, receive a finite, non-restartable sequence of text
//! increments. The source may fail at any point, including before the
//! first increment.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::responder::Responder;

/// A lazy sequence of text increments from the provider.
pub type IncrementStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One question/answer exchange from the thread history.
///
/// Serializes with capitalized keys, matching the upstream generation
/// service's history format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HistoryTurn {
    pub question: String,
    pub answer: String,
}

/// Everything a completion source needs to generate one response.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationContext {
    /// The responder configuration driving this generation.
    pub responder: Responder,
    /// Behavioral instructions (system prompt) for the provider.
    pub instructions: String,
    /// The question text. For moderators this is the roster brief built
    /// around the user's prompt; for standard responders it is the user's
    /// prompt verbatim.
    pub question: String,
    /// Room the generation is scoped to.
    pub room_id: String,
    /// Recent thread history, oldest first.
    pub history: Vec<HistoryTurn>,
}

/// An external generative-response provider.
#[async_trait]
pub trait CompletionSource: Send + Sync {
    /// Starts one generation and returns its increment stream.
    async fn generate(&self, context: &GenerationContext) -> Result<IncrementStream>;
}
