//! Request extractors.

use axum::{
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use survey_proxy_common::AppError;
use survey_proxy_core::{ApiArgs, ServiceArgs, split_query};

/// Query string split into service and upstream arguments.
#[derive(Debug, Clone)]
pub struct ProxyQuery {
    /// Reserved parameters.
    pub service_args: ServiceArgs,
    /// Parameters forwarded upstream.
    pub api_args: ApiArgs,
}

impl<S> FromRequestParts<S> for ProxyQuery
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri)
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        let (service_args, api_args) = split_query(pairs)?;

        Ok(Self {
            service_args,
            api_args,
        })
    }
}
