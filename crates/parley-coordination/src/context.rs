//! Prompt context assembly.
//!
//! Folds responder configuration and the recent thread history into a
//! `GenerationContext`. Moderators get a roster brief built around the
//! user's prompt so they can recommend one of the room's responders.

use minijinja::{Environment, context};
use parley_core::completion::{GenerationContext, HistoryTurn};
use parley_core::message::{Message, SenderKind};
use parley_core::responder::Responder;
use parley_core::{ParleyError, Result};

/// Roster brief template rendered for moderator runs. Moderators are
/// excluded from the roster so one can never recommend another.
const MODERATOR_BRIEF: &str = "\
User prompt: {{ question }}.
{%- if responders %}

## Available responders in this room:
{%- for r in responders %}
- Responder ID: {{ r.id }}, Name: {{ r.name }}\
{%- if r.description %}. Description: {{ r.description }}{% endif %}\
{%- if r.personality %}. Personality: {{ r.personality }}{% endif %}.
{%- endfor %}
{%- endif %}";

/// Builds the completion-source context for one run.
///
/// `history` must be oldest-first. For a moderator, `roster` is the
/// room's active responders; standard responders pass an empty slice.
pub fn build_context(
    responder: &Responder,
    question: &str,
    history: &[Message],
    room_id: &str,
    roster: &[Responder],
) -> Result<GenerationContext> {
    let question = if responder.is_moderator() {
        moderator_brief(question, roster)?
    } else {
        question.to_string()
    };

    Ok(GenerationContext {
        responder: responder.clone(),
        instructions: responder.instructions.clone(),
        question,
        room_id: room_id.to_string(),
        history: fold_history(history),
    })
}

/// Pairs each human message with the responder replies that answer it,
/// producing the Question/Answer turns the completion source consumes.
/// Input must be oldest-first; output preserves that order.
pub fn fold_history(messages: &[Message]) -> Vec<HistoryTurn> {
    let mut turns = Vec::new();

    for (i, message) in messages.iter().enumerate() {
        if message.sender_kind != SenderKind::Human {
            continue;
        }
        for reply in &messages[i + 1..] {
            if reply.sender_kind == SenderKind::Responder
                && reply.in_reply_to.as_deref() == Some(message.id.as_str())
            {
                turns.push(HistoryTurn {
                    question: message.content.clone(),
                    answer: reply.content.clone(),
                });
            }
        }
    }

    turns
}

/// Renders the moderator roster brief around the user's prompt.
fn moderator_brief(question: &str, roster: &[Responder]) -> Result<String> {
    let selectable: Vec<&Responder> = roster.iter().filter(|r| !r.is_moderator()).collect();

    Environment::new()
        .render_str(
            MODERATOR_BRIEF,
            context! { question => question, responders => selectable },
        )
        .map_err(|e| ParleyError::internal(format!("moderator brief rendering failed: {e}")))
}
