//! Conversational core for Parley.
//!
//! Routes each message to an intent handler by semantic similarity, keeps
//! bounded per-session history, and ties the two together in the
//! conversation orchestrator.

pub mod error;
pub mod handler;
pub mod history;
pub mod llm;
pub mod orchestrator;
pub mod router;
pub mod types;

pub use error::{ChatError, ErrorKind};
pub use handler::{
    FallbackHandler, FaqHandler, FaqSettings, HandlerRegistry, ProductSearchHandler, RouteHandler,
    SmallTalkHandler,
};
pub use history::{SessionGuard, SessionHistoryStore};
pub use llm::{ChatMessage, ChatModel, CompletionOptions, OpenAiCompatibleClient};
pub use orchestrator::{ConversationOrchestrator, OrchestratorSettings};
pub use router::{pick_route, IntentRouter};
pub use types::{ChatReply, ClassificationResult, HandlerReply, RouteScore, SessionHistory, UNMATCHED};
