//! Extraction endpoint.

use axum::{
    extract::{Path, State},
    response::Response,
};
use survey_proxy_common::AppResult;
use survey_proxy_core::ExtractRequest;
use tracing::info;

use crate::{extractors::ProxyQuery, response, state::AppState};

/// Proxy one logical upstream path.
pub(super) async fn extract(
    State(state): State<AppState>,
    Path(path): Path<String>,
    query: ProxyQuery,
) -> AppResult<Response> {
    run(&state, path, query).await
}

/// Run an extraction and render its entities.
pub(super) async fn run(state: &AppState, path: String, query: ProxyQuery) -> AppResult<Response> {
    let ProxyQuery {
        service_args,
        api_args,
    } = query;
    let do_stream = service_args.do_stream;
    info!(path = %path, do_stream, "Extraction requested");

    let entities = state
        .orchestrator
        .start(ExtractRequest {
            path,
            service_args,
            api_args,
        })
        .await?;

    if do_stream {
        Ok(response::streamed(entities))
    } else {
        response::buffered(entities).await
    }
}
