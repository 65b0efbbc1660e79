//! REST adapters that back the console orchestrators with a JSON HTTP API.
//!
//! Listings are `GET {base}/{resource}` with the query flattened into query
//! parameters; deletes are one `DELETE {base}/{resource}/{id}` per target.

use std::{fmt, marker::PhantomData, time::Duration};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use console_core::{BatchExecutor, ConsoleContext, OperationResult, RecordSource};
use futures::future::join_all;
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use shared::{
    error::{ApiError, ApiException, ErrorCode},
    query::{FilterMap, QueryState},
    record::{Record, RecordSet},
};
use tracing::debug;
use url::Url;

/// Name under which the console API address is registered in a [`ConsoleContext`].
pub const CONSOLE_SERVICE: &str = "console";

#[derive(Debug, Clone)]
pub struct ConsoleApi {
    http: Client,
    base: Url,
}

impl ConsoleApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("invalid API base url '{base_url}'"))?;
        if base.cannot_be_a_base() {
            bail!("API base url '{base_url}' cannot carry resource paths");
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, base })
    }

    /// Builds the client for `service` from the address registered in `context`.
    pub fn from_context(context: &ConsoleContext, service: &str, timeout: Duration) -> Result<Self> {
        let address = context
            .api_address(service)
            .with_context(|| format!("no API address registered for '{service}'"))?;
        Self::new(address, timeout)
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn list_source<F, T>(&self, resource: &str) -> Result<RestListSource<F, T>> {
        Ok(RestListSource {
            http: self.http.clone(),
            endpoint: self.endpoint(resource)?,
            _marker: PhantomData,
        })
    }

    pub fn delete_executor<T>(&self, resource: &str) -> Result<RestDeleteExecutor<T>> {
        Ok(RestDeleteExecutor {
            http: self.http.clone(),
            endpoint: self.endpoint(resource)?,
            _marker: PhantomData,
        })
    }

    fn endpoint(&self, resource: &str) -> Result<Url> {
        let resource = resource.trim_matches('/');
        if resource.is_empty() {
            bail!("resource name must not be empty");
        }
        let segments: Vec<&str> = resource.split('/').collect();
        Ok(resource_url(&self.base, &segments)?)
    }
}

/// Lists `{base}/{resource}` pages.
pub struct RestListSource<F, T> {
    http: Client,
    endpoint: Url,
    _marker: PhantomData<fn() -> (F, T)>,
}

impl<F, T> RestListSource<F, T> {
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl<F, T> RecordSource<F, T> for RestListSource<F, T>
where
    F: Serialize + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
{
    async fn fetch(&self, query: QueryState<F>) -> Result<RecordSet<T>, ApiException> {
        let params = query_params(&query)?;
        debug!(url = %self.endpoint, ?params, "GET");
        let response = self
            .http
            .get(self.endpoint.clone())
            .query(&params)
            .send()
            .await
            .map_err(transport)?;
        check_status(response)
            .await?
            .json()
            .await
            .map_err(transport)
    }
}

/// Deletes each target with its own request; query parameters come from the
/// workflow params.
pub struct RestDeleteExecutor<T> {
    http: Client,
    endpoint: Url,
    _marker: PhantomData<fn() -> T>,
}

impl<T> RestDeleteExecutor<T>
where
    T: Record,
    T::Id: fmt::Display,
{
    async fn delete_one(&self, target: &T, params: &FilterMap) -> Result<(), ApiException> {
        let id = target.record_id().to_string();
        let url = resource_url(&self.endpoint, &[id.as_str()])?;
        debug!(%url, "DELETE");
        let response = self
            .http
            .delete(url)
            .query(params)
            .send()
            .await
            .map_err(transport)?;
        check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl<T> BatchExecutor<T, FilterMap> for RestDeleteExecutor<T>
where
    T: Record,
    T::Id: fmt::Display,
{
    async fn execute(
        &self,
        targets: Vec<T>,
        params: FilterMap,
    ) -> Result<Vec<OperationResult<T>>, ApiException> {
        let params = &params;
        let deletes = targets.into_iter().map(|target| async move {
            match self.delete_one(&target, params).await {
                Ok(()) => OperationResult::succeeded(target),
                Err(error) => OperationResult::failed(target, error),
            }
        });
        Ok(join_all(deletes).await)
    }
}

/// Flattens a query into `key=value` pairs: filter fields first, then
/// `search`, `pageIndex`, `pageSize` and `continue`. Null filter fields are
/// dropped.
pub fn query_params<F: Serialize>(query: &QueryState<F>) -> Result<Vec<(String, String)>, ApiException> {
    let mut params = Vec::new();
    let filter = serde_json::to_value(&query.filter)
        .map_err(|error| ApiException::new(ErrorCode::Validation, format!("unserializable filter: {error}")))?;
    match filter {
        Value::Object(fields) => {
            for (key, value) in fields {
                match value {
                    Value::Null => {}
                    Value::String(text) => params.push((key, text)),
                    other => params.push((key, other.to_string())),
                }
            }
        }
        Value::Null => {}
        other => {
            return Err(ApiException::new(
                ErrorCode::Validation,
                format!("filter must serialize to an object, got {other}"),
            ))
        }
    }
    if let Some(search) = &query.search {
        params.push(("search".to_string(), search.clone()));
    }
    if let Some(paging) = &query.paging {
        params.push(("pageIndex".to_string(), paging.page_index.to_string()));
        params.push(("pageSize".to_string(), paging.page_size.to_string()));
    }
    if let Some(token) = &query.continue_token {
        params.push(("continue".to_string(), token.clone()));
    }
    Ok(params)
}

/// Converts a non-2xx response into an [`ApiException`], keeping the server's
/// message when the body is an [`ApiError`].
pub async fn check_status(response: Response) -> Result<Response, ApiException> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

fn status_error(status: StatusCode, body: &str) -> ApiException {
    let code = ErrorCode::from_status(status.as_u16());
    let body = body.trim();
    let message = match serde_json::from_str::<ApiError>(body) {
        Ok(error) => error.message,
        Err(_) if !body.is_empty() => body.to_string(),
        Err(_) => status.to_string(),
    };
    ApiException::new(code, message)
}

fn transport(error: reqwest::Error) -> ApiException {
    if error.is_timeout() {
        ApiException::transport(format!("request timed out: {error}"))
    } else {
        ApiException::transport(error.to_string())
    }
}

fn resource_url(base: &Url, segments: &[&str]) -> Result<Url, ApiException> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ApiException::transport(format!("'{base}' cannot carry a resource path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
