//! API endpoints.

mod extract;
mod transform;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

pub use transform::substitute_placeholders;

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/transform/{*path}", post(transform::transform))
        .route("/{*path}", get(extract::extract))
}
