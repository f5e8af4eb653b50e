//! Parley API crate - axum HTTP surface for the chat assistant.
//!
//! Exposes chat, session history, session clearing, route diagnostics,
//! health, and a small browser chat page.

pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod state;
pub mod ui;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
