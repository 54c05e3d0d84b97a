//! HTTP API layer for survey-proxy.
//!
//! - **Extract**: `GET /{path}` proxies one logical upstream path
//! - **Transform**: `POST /transform/{path}` fills `{{field}}` placeholders
//!   from the request body, then extracts
//!
//! Success bodies are JSON arrays, either buffered or streamed with
//! `_do_stream=1`.

pub mod endpoints;
pub mod extractors;
pub mod response;
pub mod state;

pub use endpoints::router;
pub use state::AppState;
