//! Responder configuration.
//!
//! A responder is an automated participant backed by a completion source.
//! Its kind is a tagged variant read once per run: a `Moderator` selects
//! and hands off to another responder instead of answering directly.

use serde::{Deserialize, Serialize};

/// How a responder participates in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponderKind {
    /// Answers the user directly.
    Standard,
    /// Recommends another responder and hands off to it.
    Moderator,
}

impl Default for ResponderKind {
    fn default() -> Self {
        ResponderKind::Standard
    }
}

/// An automated responder's behavioral configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Responder {
    /// Unique identifier.
    pub id: String,
    /// Display name, used for name-based moderator selection.
    pub name: String,
    /// Short description folded into the moderator roster brief.
    #[serde(default)]
    pub description: String,
    /// Personality traits folded into the moderator roster brief.
    #[serde(default)]
    pub personality: String,
    /// Behavioral instructions (system prompt).
    pub instructions: String,
    /// Generation model identifier passed to the completion source.
    #[serde(default)]
    pub model: String,
    /// Participation kind.
    #[serde(default)]
    pub kind: ResponderKind,
}

impl Responder {
    /// Whether this responder is flagged as a moderator.
    pub fn is_moderator(&self) -> bool {
        self.kind == ResponderKind::Moderator
    }
}
