//! Values passed between the router, the handlers, and callers.

use serde::{Deserialize, Serialize};

use parley_core::types::ConversationTurn;

/// Route label reported when no route meets its threshold.
pub const UNMATCHED: &str = "unmatched";

/// Outcome of classifying one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Matched route name, or `None` when nothing qualified.
    pub route: Option<String>,
    /// Score of the matched route, or the best score seen when unmatched.
    pub score: f64,
}

impl ClassificationResult {
    pub fn matched(route: impl Into<String>, score: f64) -> Self {
        Self {
            route: Some(route.into()),
            score,
        }
    }

    pub fn unmatched(best_score: f64) -> Self {
        Self {
            route: None,
            score: best_score,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.route.is_some()
    }

    /// Route name, or [`UNMATCHED`].
    pub fn label(&self) -> &str {
        self.route.as_deref().unwrap_or(UNMATCHED)
    }
}

/// Per-route score breakdown for one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteScore {
    pub route: String,
    pub score: f64,
    pub threshold: f32,
    pub qualifies: bool,
}

/// What a route handler produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandlerReply {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

impl HandlerReply {
    pub fn text(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            sources: Vec::new(),
        }
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }
}

/// Result of one full interaction, as returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub answer: String,
    pub sources: Vec<String>,
    /// Route that answered, or [`UNMATCHED`].
    pub route: String,
    pub score: f64,
}

/// Snapshot of one session's stored turns, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHistory {
    pub session_id: String,
    pub turns: Vec<ConversationTurn>,
}

impl SessionHistory {
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
