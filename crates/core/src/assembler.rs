//! JSON array framing of an entity stream.
//!
//! The array is always closed, including when the source fails part way:
//! the error text becomes one more element before `]`, and the error itself
//! is yielded after the closing bracket. Buffered responses surface it;
//! streamed responses have already committed their status and drop it.

use std::convert::Infallible;

use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use survey_proxy_common::{AppError, AppResult};
use tracing::error;

use crate::entity::Entity;

enum Phase {
    Open,
    Body,
    Close(Option<AppError>),
    Raise(AppError),
    Done,
}

struct Framer<S> {
    entities: S,
    first: bool,
    phase: Phase,
}

impl<S> Framer<S> {
    fn element(&mut self, json: &[u8]) -> Bytes {
        let mut chunk = BytesMut::with_capacity(json.len() + 1);
        if !self.first {
            chunk.put_u8(b',');
        }
        self.first = false;
        chunk.put_slice(json);
        chunk.freeze()
    }

    fn error_element(&mut self, err: &AppError) -> Bytes {
        let text = serde_json::to_vec(&err.to_string()).unwrap_or_else(|_| b"\"error\"".to_vec());
        self.element(&text)
    }
}

/// Frame entities as a JSON array, one chunk per element.
///
/// Chunks are `Ok` up to and including the closing bracket. A source error
/// follows it as a final `Err`.
pub fn frame<S>(entities: S) -> impl Stream<Item = AppResult<Bytes>> + Send
where
    S: Stream<Item = AppResult<Entity>> + Unpin + Send,
{
    let framer = Framer {
        entities,
        first: true,
        phase: Phase::Open,
    };

    stream::unfold(framer, |mut framer| async move {
        match std::mem::replace(&mut framer.phase, Phase::Done) {
            Phase::Open => {
                framer.phase = Phase::Body;
                Some((Ok(Bytes::from_static(b"[")), framer))
            }
            Phase::Body => {
                let chunk = match framer.entities.next().await {
                    Some(Ok(entity)) => match serde_json::to_vec(&entity) {
                        Ok(json) => {
                            framer.phase = Phase::Body;
                            framer.element(&json)
                        }
                        Err(e) => {
                            let err = AppError::Internal(format!("failed to encode entity: {e}"));
                            error!(error = %err, "Aborting entity stream");
                            let chunk = framer.error_element(&err);
                            framer.phase = Phase::Close(Some(err));
                            chunk
                        }
                    },
                    Some(Err(err)) => {
                        error!(error = %err, "Entity stream failed");
                        let chunk = framer.error_element(&err);
                        framer.phase = Phase::Close(Some(err));
                        chunk
                    }
                    None => {
                        framer.phase = Phase::Done;
                        Bytes::from_static(b"]\n")
                    }
                };
                Some((Ok(chunk), framer))
            }
            Phase::Close(err) => {
                framer.phase = err.map_or(Phase::Done, Phase::Raise);
                Some((Ok(Bytes::from_static(b"]\n")), framer))
            }
            Phase::Raise(err) => Some((Err(err), framer)),
            Phase::Done => None,
        }
    })
}

/// Body chunks for a streamed response. A source error is embedded in the
/// array and not raised.
pub fn streaming_body<S>(entities: S) -> impl Stream<Item = Result<Bytes, Infallible>> + Send
where
    S: Stream<Item = AppResult<Entity>> + Unpin + Send,
{
    frame(entities).filter_map(|chunk| async move { chunk.ok().map(Ok) })
}

/// Collect the whole array, failing if the source failed.
pub async fn buffer<S>(entities: S) -> AppResult<Bytes>
where
    S: Stream<Item = AppResult<Entity>> + Unpin + Send,
{
    let framed = frame(entities);
    futures::pin_mut!(framed);

    let mut body = BytesMut::new();
    while let Some(chunk) = framed.next().await {
        body.put(chunk?);
    }

    Ok(body.freeze())
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    fn entity(value: Value) -> AppResult<Entity> {
        Ok(value.as_object().cloned().unwrap())
    }

    fn failing() -> AppResult<Entity> {
        Err(AppError::UpstreamHttp {
            payload: json!({"message": "boom", "http_status_code": 503}),
        })
    }

    async fn streamed(items: Vec<AppResult<Entity>>) -> String {
        let chunks = streaming_body(stream::iter(items))
            .map(|chunk| chunk.unwrap())
            .collect::<Vec<_>>()
            .await;
        String::from_utf8(chunks.concat()).unwrap()
    }

    #[tokio::test]
    async fn test_empty_stream_is_empty_array() {
        assert_eq!(streamed(vec![]).await, "[]\n");
    }

    #[tokio::test]
    async fn test_entities_are_comma_separated() {
        let body = streamed(vec![entity(json!({"a": 1})), entity(json!({"b": 2}))]).await;
        assert_eq!(body, "[{\"a\":1},{\"b\":2}]\n");
    }

    #[tokio::test]
    async fn test_streamed_error_is_embedded() {
        let body = streamed(vec![entity(json!({"a": 1})), failing(), entity(json!({"c": 3}))]).await;

        let parsed: Value = serde_json::from_str(&body).unwrap();
        let elements = parsed.as_array().unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0], json!({"a": 1}));
        assert!(elements[1].as_str().unwrap().contains("boom"));
        assert!(body.ends_with("]\n"));
    }

    #[tokio::test]
    async fn test_error_as_first_element() {
        let body = streamed(vec![failing()]).await;
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_frame_raises_after_closing() {
        let chunks = frame(stream::iter(vec![entity(json!({"a": 1})), failing()]))
            .collect::<Vec<_>>()
            .await;

        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[3].as_ref().unwrap().as_ref(), b"]\n");
        assert!(matches!(chunks[4], Err(AppError::UpstreamHttp { .. })));
    }

    #[tokio::test]
    async fn test_buffer_success() {
        let body = buffer(stream::iter(vec![entity(json!({"a": 1}))])).await.unwrap();
        assert_eq!(body.as_ref(), b"[{\"a\":1}]\n");
    }

    #[tokio::test]
    async fn test_buffer_reraises() {
        let err = buffer(stream::iter(vec![entity(json!({"a": 1})), failing()]))
            .await
            .unwrap_err();
        assert_eq!(err.status_code().as_u16(), 503);
    }
}
