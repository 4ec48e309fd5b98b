//! Collaborator traits
//!
//! External systems the pipeline depends on but does not own: the persistent
//! conversation store, the Python sandbox, the web-search API, and the page
//! fetcher. Each seam ships with a default realization suitable for wiring
//! the service without the real collaborator (in-memory store, disabled
//! sandbox); tests substitute their own doubles.

pub mod fetch;
pub mod sandbox;
pub mod search;
pub mod store;
