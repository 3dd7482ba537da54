//! Moderator selection resolution.
//!
//! A moderator's output names the responder it hands off to, in one of
//! two interchangeable encodings depending on how the completion source
//! is configured: a structured JSON field carrying the responder id, or
//! a fixed textual pattern carrying the display name. Both live behind
//! `SelectionResolver`, isolated from the state machine.
//!
//! Resolution misses are normal outcomes, not errors: no marker, an
//! unrecognized name, or a selection pointing at a moderator all end the
//! chain silently.

use once_cell::sync::Lazy;
use parley_core::responder::Responder;
use regex::Regex;

/// Decodes a moderator's output into a selected responder.
pub trait SelectionResolver: Send + Sync {
    /// Resolves the selection against the room roster. Responders
    /// flagged as moderators are never resolvable targets.
    fn resolve(&self, output: &str, roster: &[Responder]) -> Option<Responder>;
}

/// Policy A: structured JSON output with a `responder_id` field.
///
/// The provider may wrap the JSON in a Markdown code fence; the fence is
/// stripped before parsing. `ai_id` is accepted as a legacy field name.
pub struct StructuredSelection;

impl SelectionResolver for StructuredSelection {
    fn resolve(&self, output: &str, roster: &[Responder]) -> Option<Responder> {
        let body = strip_code_fences(output);
        let value: serde_json::Value = serde_json::from_str(body).ok()?;
        let selected_id = value
            .get("responder_id")
            .or_else(|| value.get("ai_id"))?
            .as_str()?;

        roster
            .iter()
            .find(|r| r.id == selected_id && !r.is_moderator())
            .cloned()
    }
}

/// Policy B: a fixed textual marker naming the target by display name,
/// e.g. `Forward to AI mentor: **Data Scientist**`. Name matching is
/// case-insensitive.
pub struct PatternSelection;

static SELECTION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)forward\s+to\s+ai\s+mentor:\s*\*\*([^*]+)\*\*")
        .expect("selection pattern is a valid regex")
});

impl SelectionResolver for PatternSelection {
    fn resolve(&self, output: &str, roster: &[Responder]) -> Option<Responder> {
        let captures = SELECTION_PATTERN.captures(output)?;
        let name = captures.get(1)?.as_str().trim();

        roster
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name) && !r.is_moderator())
            .cloned()
    }
}

/// Resolves a completed moderator run's output to the responder that
/// should answer next. The orchestrator starts the chained run; this
/// type only decides the target.
pub struct ModeratorChainer {
    resolvers: Vec<Box<dyn SelectionResolver>>,
}

impl ModeratorChainer {
    /// Builds the default chainer: structured selection first, textual
    /// pattern as fallback.
    pub fn new() -> Self {
        Self {
            resolvers: vec![Box::new(StructuredSelection), Box::new(PatternSelection)],
        }
    }

    /// Resolves the moderator's selection, trying each policy in order.
    pub fn resolve_selection(&self, output: &str, roster: &[Responder]) -> Option<Responder> {
        self.resolvers
            .iter()
            .find_map(|resolver| resolver.resolve(output, roster))
    }
}

impl Default for ModeratorChainer {
    fn default() -> Self {
        Self::new()
    }
}

/// Strips a surrounding Markdown code fence (```json ... ``` or
/// ``` ... ```), returning the inner body.
fn strip_code_fences(raw: &str) -> &str {
    let mut body = raw.trim();
    if let Some(rest) = body.strip_prefix("```json") {
        body = rest;
    } else if let Some(rest) = body.strip_prefix("```") {
        body = rest;
    }
    if let Some(rest) = body.strip_suffix("```") {
        body = rest;
    }
    body.trim()
}
