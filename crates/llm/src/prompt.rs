//! Prompt building
//!
//! Constructs the message list for the agricultural-advisor persona.

use std::fmt;

use serde::{Deserialize, Serialize};

use agri_voice_core::{ConversationHistory, TurnRole};

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Advisor persona for every call.
pub const SYSTEM_PROMPT: &str = "You are a helpful agricultural advisor for Indian farmers. \
Always reply in the exact language the user speaks. \
Keep every reply to at most 2 short sentences and never use lists. \
When information is missing, ask exactly one counter-question at a time. \
If a query is outside farming or abusive, politely bring the caller back to farming topics. \
When you are unsure of an answer, suggest calling the Kisan Call Center at 1800-180-1551.";

/// Build the message list for one generation: system prompt plus the full
/// conversation history (the current user utterance is already the last
/// history turn when this is called).
pub fn build_messages(history: &ConversationHistory) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(Message {
        role: Role::System,
        content: SYSTEM_PROMPT.to_string(),
    });
    for turn in history.turns() {
        messages.push(Message {
            role: match turn.role {
                TurnRole::User => Role::User,
                TurnRole::Assistant => Role::Assistant,
            },
            content: turn.content.clone(),
        });
    }
    messages
}
