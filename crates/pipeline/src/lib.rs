//! Request pipeline
//!
//! Drives one chat request end to end: intent classification (deterministic
//! checks, then LLM arbitration), memory context assembly, streamed response
//! generation, persistence, and the fire-and-forget post-turn memory update.
//! The code intent runs in two phases: generate-and-execute, then answer
//! from the execution result.

pub mod chat;
pub mod events;
pub mod fetch;
pub mod intent;
pub mod search;

pub use chat::{ChatOrchestrator, OrchestratorConfig};
pub use events::ChatEvent;
pub use fetch::{HttpPageFetcher, PageFetcherConfig};
pub use intent::{IntentClassifier, IntentResult};
pub use search::TavilySearcher;
