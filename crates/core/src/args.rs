//! Splitting inbound query parameters into service and upstream arguments.

use std::collections::BTreeMap;

use survey_proxy_common::{AppError, AppResult};

/// Query parameters consumed by the proxy and never forwarded upstream.
pub const SERVICE_PARAMETERS: [&str; 6] = [
    "_id_src",
    "_updated_src",
    "_do_stream",
    "since",
    "limit",
    "_account_keys",
];

/// Per-request settings that steer extraction and normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceArgs {
    /// Follow `next` links. Off when the caller pins a `page`.
    pub is_paging_on: bool,
    /// Stream the array as it is produced instead of buffering it.
    pub do_stream: bool,
    /// Source field copied into `_id`.
    pub id_src: Option<String>,
    /// Source field copied into `_updated`.
    pub updated_src: Option<String>,
    /// Accounts requested by the caller, in order. Empty when omitted.
    pub account_keys: Vec<String>,
    /// Maximum number of entities emitted for this request.
    pub limit: Option<usize>,
    /// Running `date_modified` watermark for this request.
    pub latest_date_modified: String,
}

/// Query parameters forwarded to upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiArgs(BTreeMap<String, String>);

impl ApiArgs {
    /// Create an empty argument set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a parameter value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether a parameter is set.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Set a parameter, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder form of [`ApiArgs::set`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Iterate over the parameters in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Split the inbound query into service and upstream arguments.
///
/// Repeated keys keep their first value. `since` is forwarded as
/// `start_modified_at`; a `page` parameter disables auto-paging.
pub fn split_query<I, K, V>(params: I) -> AppResult<(ServiceArgs, ApiArgs)>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut query: BTreeMap<String, String> = BTreeMap::new();
    for (key, value) in params {
        query.entry(key.into()).or_insert_with(|| value.into());
    }

    let mut service = ServiceArgs {
        is_paging_on: !query.contains_key("page"),
        do_stream: matches!(query.get("_do_stream").map(String::as_str), Some("1" | "true")),
        ..ServiceArgs::default()
    };

    if let Some(since) = query.get("since").cloned() {
        query.insert("start_modified_at".to_string(), since);
    }

    service.id_src = query.remove("_id_src").filter(|s| !s.is_empty());
    service.updated_src = query.remove("_updated_src").filter(|s| !s.is_empty());
    service.account_keys = query
        .remove("_account_keys")
        .map(|keys| {
            keys.split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    service.limit = query
        .remove("limit")
        .map(|limit| {
            limit
                .trim()
                .parse::<usize>()
                .map_err(|_| AppError::BadRequest(format!("limit must be a positive integer, got {limit}")))
        })
        .transpose()?;

    for key in SERVICE_PARAMETERS {
        query.remove(key);
    }

    Ok((service, ApiArgs(query)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_reserved_parameters() {
        let (service, api) = split_query([
            ("_id_src", "id"),
            ("_updated_src", "date_modified"),
            ("_do_stream", "1"),
            ("since", "2020-01-01T00:00:00"),
            ("limit", "10"),
            ("_account_keys", "eu, us"),
            ("include", "response_count"),
        ])
        .unwrap();

        assert!(service.is_paging_on);
        assert!(service.do_stream);
        assert_eq!(service.id_src.as_deref(), Some("id"));
        assert_eq!(service.updated_src.as_deref(), Some("date_modified"));
        assert_eq!(service.account_keys, vec!["eu", "us"]);
        assert_eq!(service.limit, Some(10));
        assert_eq!(service.latest_date_modified, "");

        assert_eq!(api.iter().count(), 2);
        assert_eq!(api.get("include"), Some("response_count"));
        assert_eq!(api.get("start_modified_at"), Some("2020-01-01T00:00:00"));
        assert!(!api.contains("since"));
        assert!(!api.contains("limit"));
    }

    #[test]
    fn test_page_disables_paging_and_is_forwarded() {
        let (service, api) = split_query([("page", "3")]).unwrap();
        assert!(!service.is_paging_on);
        assert!(!service.do_stream);
        assert_eq!(api.get("page"), Some("3"));
    }

    #[test]
    fn test_first_value_wins() {
        let (_, api) = split_query([("status", "open"), ("status", "closed")]).unwrap();
        assert_eq!(api.get("status"), Some("open"));
    }

    #[test]
    fn test_invalid_limit_is_rejected() {
        let err = split_query([("limit", "many")]).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
