use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Who produced a conversation turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A message typed by the person chatting.
    User,
    /// A reply produced by one of the route handlers.
    Assistant,
}

impl Role {
    /// Wire name used in chat-completion payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Conversation turns
// =============================================================================

/// One role-tagged message in a session's history.
///
/// Turns are immutable once created; the history store only ever appends
/// or drops whole turns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    /// Citations backing an assistant answer, if the handler produced any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    /// Create a turn stamped with a fresh id and the current time.
    pub fn new(role: Role, content: impl Into<String>, sources: Option<Vec<String>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            sources,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, None)
    }

    pub fn assistant(content: impl Into<String>, sources: Option<Vec<String>>) -> Self {
        Self::new(Role::Assistant, content, sources)
    }
}
