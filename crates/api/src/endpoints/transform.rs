//! Path-template endpoint.

use std::sync::LazyLock;

use axum::{
    extract::{Path, State},
    response::Response,
};
use bytes::Bytes;
use regex::Regex;
use serde_json::Value;
use survey_proxy_common::{AppError, AppResult};
use survey_proxy_core::{Entity, entity::stringify};
use tracing::debug;

use super::extract::run;
use crate::{extractors::ProxyQuery, state::AppState};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\{\{(.*?)\}\}").unwrap()
});

/// Fill the path template from the posted record, then extract.
pub(super) async fn transform(
    State(state): State<AppState>,
    Path(template): Path<String>,
    query: ProxyQuery,
    body: Bytes,
) -> AppResult<Response> {
    let record = posted_record(&body)?;
    let path = substitute_placeholders(&template, &record)?;
    debug!(template = %template, path = %path, "Resolved path template");

    run(&state, path, query).await
}

/// The posted object, or the first element of a posted array.
fn posted_record(body: &[u8]) -> AppResult<Entity> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("request body is not JSON: {e}")))?;

    match value {
        Value::Object(record) => Ok(record),
        Value::Array(items) => match items.into_iter().next() {
            Some(Value::Object(record)) => Ok(record),
            _ => Err(AppError::BadRequest(
                "request body array must start with an object".to_string(),
            )),
        },
        _ => Err(AppError::BadRequest(
            "request body must be an object or an array of objects".to_string(),
        )),
    }
}

/// Replace every `{{field}}` in `template` with the stringified field.
pub fn substitute_placeholders(template: &str, record: &Entity) -> AppResult<String> {
    let mut path = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let (Some(token), Some(field)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = record.get(field.as_str()).ok_or_else(|| {
            AppError::PlaceholderResolution(format!(
                "field '{}' is not in the request body",
                field.as_str()
            ))
        })?;

        path.push_str(&template[last..token.start()]);
        path.push_str(&stringify(value));
        last = token.end();
    }
    path.push_str(&template[last..]);

    Ok(path)
}
