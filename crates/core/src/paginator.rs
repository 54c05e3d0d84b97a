//! Cursor-following pagination over one upstream endpoint.

use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use reqwest::StatusCode;
use serde_json::{Value, json};
use survey_proxy_common::{AppError, AppResult};
use tracing::{debug, info, warn};

use crate::args::ApiArgs;
use crate::entity::Entity;
use crate::governor::{Governor, GovernorSignal};
use crate::upstream::{UpstreamResponse, UpstreamSession};

/// Marker that replaces numeric path segments in canonical endpoints.
pub const ID_MARKER: &str = "{id}";

/// Endpoints whose entities live in the response's `data` field.
pub const COLLECTION_ENDPOINTS: &[&str] = &[
    "users/{id}/workgroups",
    "users/{id}/shared",
    "groups",
    "groups/{id}/members",
    "surveys",
    "survey_categories",
    "survey_templates",
    "survey_languages",
    "surveys/{id}/pages",
    "surveys/{id}/questions",
    "surveys/{id}/responses/bulk",
    "question_bank/questions",
    "survey_folders",
    "surveys/{id}/languages",
    "contact_lists",
    "contact_lists/{id}/contacts",
    "contact_lists/{id}/contacts/bulk",
    "surveys/{id}/collectors",
    "collectors/{id}/messages",
    "collectors/{id}/recipients",
    "collectors/{id}/responses",
    "collectors/{id}/responses/bulk",
    "webhooks",
    "benchmark_bundles",
    "workgroups",
    "workgroups/{id}/members",
    "workgroups/{id}/shares",
    "roles",
    "errors",
    "contacts",
    "contacts/bulk",
    "contact_fields",
];

/// Reduce an upstream URL to its canonical endpoint: base URL removed,
/// numeric segments replaced by [`ID_MARKER`], surrounding slashes stripped.
#[must_use]
pub fn canonical_endpoint(url: &str, base_url: &str) -> String {
    let path = url.strip_prefix(base_url).unwrap_or(url);
    let path = path.split(['?', '#']).next().unwrap_or_default();

    path.trim_matches('/')
        .split('/')
        .map(|segment| {
            if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
                ID_MARKER
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether a URL addresses a collection endpoint.
#[must_use]
pub fn is_collection_endpoint(url: &str, base_url: &str) -> bool {
    let endpoint = canonical_endpoint(url, base_url);
    COLLECTION_ENDPOINTS.contains(&endpoint.as_str())
}

/// Lazy page-by-page fetch of one logical upstream resource.
///
/// Nothing is requested until the first [`Paginator::next_page`] call.
pub struct Paginator<'a> {
    session: &'a UpstreamSession,
    governor: &'a Governor,
    url: String,
    api_args: ApiArgs,
    is_paging_on: bool,
    read_data_field: bool,
    finished: bool,
}

impl<'a> Paginator<'a> {
    /// Prepare a fetch of `url`. Collection endpoints get the default page
    /// size unless the caller set `per_page`.
    pub fn new(
        session: &'a UpstreamSession,
        governor: &'a Governor,
        url: impl Into<String>,
        mut api_args: ApiArgs,
        is_paging_on: bool,
    ) -> Self {
        let url = url.into();
        let read_data_field = is_collection_endpoint(&url, session.base_url());
        if read_data_field && !api_args.contains("per_page") {
            api_args.set("per_page", session.per_page().to_string());
        }

        Self {
            session,
            governor,
            url,
            api_args,
            is_paging_on,
            read_data_field,
            finished: false,
        }
    }

    /// Fetch the next page. `Ok(None)` once pagination is over, including
    /// when the governor stopped it.
    pub async fn next_page(&mut self) -> AppResult<Option<Vec<Entity>>> {
        if self.finished {
            return Ok(None);
        }

        if self.governor.is_rejecting().await {
            info!(url = %self.url, "Rejection window is active; stopping pagination");
            self.finished = true;
            return Ok(None);
        }

        let response = self.session.get(&self.url, &self.api_args).await?;

        if self
            .governor
            .post_check(&response.headers, response.status)
            .await
            == GovernorSignal::Stop
        {
            warn!(url = %self.url, "Upstream rate limit exhausted; stopping pagination");
            self.finished = true;
            return Ok(None);
        }

        if response.status != StatusCode::OK {
            self.finished = true;
            return Err(AppError::UpstreamHttp {
                payload: error_payload(&response),
            });
        }

        let entities = self.entities_of(&response);
        self.advance(&response.body);

        Ok(Some(entities))
    }

    /// Consume the paginator as a lazy stream of entities.
    pub fn into_entities(self) -> BoxStream<'a, AppResult<Entity>> {
        stream::try_unfold(self, |mut pager| async move {
            let page = pager.next_page().await?;
            Ok::<_, AppError>(page.map(|entities| {
                let entities = entities.into_iter().map(Ok::<Entity, AppError>);
                (stream::iter(entities), pager)
            }))
        })
        .try_flatten()
        .boxed()
    }

    fn entities_of(&self, response: &UpstreamResponse) -> Vec<Entity> {
        if !self.read_data_field {
            return match &response.body {
                Value::Object(entity) => vec![entity.clone()],
                other => {
                    warn!(url = %self.url, body = %other, "Upstream body is not an object; skipping");
                    Vec::new()
                }
            };
        }

        let Some(data) = response.body.get("data").and_then(Value::as_array) else {
            debug!(url = %self.url, "Collection response has no data field");
            return Vec::new();
        };

        data.iter()
            .filter_map(|item| match item {
                Value::Object(entity) => Some(entity.clone()),
                other => {
                    warn!(url = %self.url, item = %other, "Skipping non-object collection item");
                    None
                }
            })
            .collect()
    }

    fn advance(&mut self, body: &Value) {
        let has_next = body
            .get("links")
            .and_then(|links| links.get("next"))
            .is_some_and(|next| match next {
                Value::Null | Value::Bool(false) => false,
                Value::String(s) => !s.is_empty(),
                _ => true,
            });

        if !(self.is_paging_on && has_next) {
            self.finished = true;
            return;
        }

        let current = body.get("page").and_then(Value::as_u64).unwrap_or_else(|| {
            let sent = self
                .api_args
                .get("page")
                .and_then(|p| p.parse().ok())
                .unwrap_or(1);
            warn!(url = %self.url, page = sent, "Response has no page number; using the requested one");
            sent
        });
        self.api_args.set("page", (current + 1).to_string());
    }
}

/// Error object relayed to the caller for a failed upstream call.
fn error_payload(response: &UpstreamResponse) -> Value {
    match response.body.get("error") {
        Some(Value::Object(error)) => Value::Object(error.clone()),
        Some(other) => json!({
            "message": other,
            "http_status_code": response.status.as_u16(),
        }),
        None => json!({
            "message": response.body,
            "http_status_code": response.status.as_u16(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://api.example.com/v3/";

    #[test]
    fn test_canonical_endpoint() {
        assert_eq!(canonical_endpoint("https://api.example.com/v3/surveys", BASE), "surveys");
        assert_eq!(
            canonical_endpoint("https://api.example.com/v3/surveys/123/responses/bulk/", BASE),
            "surveys/{id}/responses/bulk"
        );
        assert_eq!(
            canonical_endpoint("https://api.example.com/v3/surveys/12a/details", BASE),
            "surveys/12a/details"
        );
        assert_eq!(
            canonical_endpoint("https://other.example.com/x/1", BASE),
            "https://other.example.com/x/{id}"
        );
    }

    #[test]
    fn test_collection_endpoints() {
        assert!(is_collection_endpoint("https://api.example.com/v3/surveys", BASE));
        assert!(is_collection_endpoint(
            "https://api.example.com/v3/surveys/42/collectors",
            BASE
        ));
        assert!(is_collection_endpoint(
            "https://api.example.com/v3/contact_lists/7/contacts/bulk",
            BASE
        ));
        assert!(!is_collection_endpoint("https://api.example.com/v3/surveys/42/details", BASE));
        assert!(!is_collection_endpoint("https://api.example.com/v3/users/me", BASE));
    }

    #[test]
    fn test_error_payload_prefers_upstream_error_object() {
        let response = UpstreamResponse {
            status: StatusCode::NOT_FOUND,
            headers: reqwest::header::HeaderMap::new(),
            body: json!({"error": {"id": "1020", "http_status_code": 404}}),
        };
        assert_eq!(error_payload(&response), json!({"id": "1020", "http_status_code": 404}));

        let response = UpstreamResponse {
            status: StatusCode::BAD_GATEWAY,
            headers: reqwest::header::HeaderMap::new(),
            body: Value::String("bad gateway".to_string()),
        };
        assert_eq!(error_payload(&response)["http_status_code"], 502);
    }
}
