//! Entity array responses.

use axum::{
    body::Body,
    http::header,
    response::{IntoResponse, Response},
};
use survey_proxy_common::{AppResult, error::RESPONSE_CONTENT_TYPE};
use survey_proxy_core::{Entity, assembler};
use tokio_stream::wrappers::ReceiverStream;

type Entities = ReceiverStream<AppResult<Entity>>;

/// Stream the array as entities arrive. The status is committed up front,
/// so a later failure only shows up inside the array.
pub fn streamed(entities: Entities) -> Response {
    (
        [(header::CONTENT_TYPE, RESPONSE_CONTENT_TYPE)],
        Body::from_stream(assembler::streaming_body(entities)),
    )
        .into_response()
}

/// Collect the whole array first; a failure becomes an error response.
pub async fn buffered(entities: Entities) -> AppResult<Response> {
    let body = assembler::buffer(entities).await?;
    Ok(([(header::CONTENT_TYPE, RESPONSE_CONTENT_TYPE)], body).into_response())
}
