//! Conversation history for interactive sessions.
//!
//! A session is an append-only sequence of turns that lives as long as the
//! interactive session itself. Assistant turns carry the trace of tool calls
//! that produced them.

use crate::agent::ToolCallRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    /// Markdown summary of the function calls behind this turn.
    pub fn trace_markdown(&self) -> Option<String> {
        if self.tool_calls.is_empty() {
            return None;
        }

        let mut details = String::new();
        for call in &self.tool_calls {
            details.push_str("- Function call:\n");
            details.push_str(&format!("   - Function name: ```{}```\n\n", call.name));
            details.push_str(&format!("   - Function parameters: ```{}```\n\n", call.arguments));
            details.push_str(&format!("   - API response: ```{}```\n\n", call.result));
        }
        Some(details)
    }
}

/// An interactive session's history.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    turns: Vec<ConversationTurn>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            turns: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn push_user(&mut self, content: &str) -> &ConversationTurn {
        self.push(Role::User, content, Vec::new())
    }

    pub fn push_assistant(
        &mut self,
        content: &str,
        tool_calls: Vec<ToolCallRecord>,
    ) -> &ConversationTurn {
        self.push(Role::Assistant, content, tool_calls)
    }

    fn push(
        &mut self,
        role: Role,
        content: &str,
        tool_calls: Vec<ToolCallRecord>,
    ) -> &ConversationTurn {
        self.turns.push(ConversationTurn {
            role,
            content: content.to_string(),
            tool_calls,
            created_at: Utc::now(),
        });
        &self.turns[self.turns.len() - 1]
    }

    /// Turns in the order they happened.
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
