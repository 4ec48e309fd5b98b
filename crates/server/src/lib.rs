//! HTTP server for the chat agent
//!
//! The wiring layer: constructs the subsystem graph once at startup
//! (explicit dependency injection, no globals) and exposes the streaming
//! chat endpoint plus health and memory inspection routes.

pub mod http;
pub mod state;

pub use http::create_router;
pub use state::AppState;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("initialization error: {0}")]
    Init(String),
}
