use crate::error::GatewayError;
use crate::tenant::{Tenant, TenantConfig};
use crate::token_cache::TokenCache;
use reqwest::header::ACCEPT;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Canonical page size for listing endpoints.
pub const PAGE_LIMIT: usize = 50;
/// The upstream refuses offsets beyond this within one filter window.
pub const OFFSET_CAP: usize = 500;
/// Hard bound on date-keyed window advances per call.
pub const MAX_BATCHES: usize = 100;

pub const MONITORING_BASE_PATH: &str = "ic/api/integration/v1/monitoring";

/// Timestamp fields tried, in order, to advance the paging window.
const RECORD_DATE_KEYS: [&str; 5] = [
    "creation-date",
    "creationDate",
    "last-tracked-time",
    "lastTrackedTime",
    "date",
];

pub type Params = Vec<(String, String)>;

/// Aggregated result of a paginated retrieval.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    pub total: u64,
    pub retrieved: u64,
    pub items: Vec<Value>,
}

/// Authenticated client for the monitoring REST API.
///
/// Handlers consume the three primitives and nothing else; token refresh and
/// the single 401 retry live here.
pub struct UpstreamClient {
    http: reqwest::Client,
    tokens: Arc<TokenCache>,
}

impl UpstreamClient {
    pub fn new(http: reqwest::Client, tokens: Arc<TokenCache>) -> Self {
        Self { http, tokens }
    }

    pub fn tokens(&self) -> &Arc<TokenCache> {
        &self.tokens
    }

    /// One GET, parsed as JSON.
    pub async fn get_single(
        &self,
        tenant: Tenant,
        config: &TenantConfig,
        path: &str,
        params: &[(String, String)],
    ) -> Result<Value, GatewayError> {
        let url = monitoring_url(config, path);
        let resp = self
            .send_authorized(tenant, config, Method::GET, &url, params, None)
            .await?;
        let status = resp.status();
        let body = checked_body(resp).await?;
        let value: Value = serde_json::from_str(&body).map_err(|_| GatewayError::UpstreamFailure {
            status: status.as_u16(),
            status_text: status_text(status),
            body: "upstream returned a non-JSON body".to_string(),
        })?;
        log_exchange(&url, status, Some(&value));
        Ok(value)
    }

    /// One GET, returned as raw text (the logs endpoint is not JSON).
    pub async fn get_text(
        &self,
        tenant: Tenant,
        config: &TenantConfig,
        path: &str,
        params: &[(String, String)],
    ) -> Result<String, GatewayError> {
        let url = monitoring_url(config, path);
        let resp = self
            .send_authorized(tenant, config, Method::GET, &url, params, None)
            .await?;
        let status = resp.status();
        let body = checked_body(resp).await?;
        log_exchange(&url, status, None);
        Ok(body)
    }

    /// One POST with a JSON body, for the mutating endpoints.
    pub async fn post(
        &self,
        tenant: Tenant,
        config: &TenantConfig,
        path: &str,
        params: &[(String, String)],
        body: &Value,
    ) -> Result<Value, GatewayError> {
        let url = monitoring_url(config, path);
        let resp = self
            .send_authorized(tenant, config, Method::POST, &url, params, Some(body))
            .await?;
        let status = resp.status();
        let text = checked_body(resp).await?;
        let value: Value = if text.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        log_exchange(&url, status, Some(&value));
        Ok(value)
    }

    /// Retrieve a listing endpoint to completion.
    ///
    /// The upstream caps the cumulative offset at [`OFFSET_CAP`] per filter
    /// window, so retrieval proceeds in date-keyed batches: page with
    /// `limit`/`offset` until the window is exhausted, then rewrite the
    /// filter's `startdate` clause from the last record's date and restart at
    /// offset 0. A window whose final record carries no recognizable date
    /// ends the retrieval.
    pub async fn get_paginated(
        &self,
        tenant: Tenant,
        config: &TenantConfig,
        path: &str,
        params: Params,
        q: Option<String>,
    ) -> Result<PageResult, GatewayError> {
        let mut items: Vec<Value> = Vec::new();
        let mut reported_total: Option<u64> = None;
        let mut filter = q;
        let mut batch = 0usize;

        'window: loop {
            batch += 1;
            if batch > MAX_BATCHES {
                tracing::warn!(
                    path,
                    batches = MAX_BATCHES,
                    retrieved = items.len(),
                    "pagination hit the batch safety bound; returning partial results"
                );
                // Partial result: report what was actually collected.
                reported_total = None;
                break;
            }

            let mut offset = 0usize;
            loop {
                let mut page_params = params.clone();
                if let Some(f) = &filter {
                    page_params.push(("q".to_string(), f.clone()));
                }
                page_params.push(("limit".to_string(), PAGE_LIMIT.to_string()));
                page_params.push(("offset".to_string(), offset.to_string()));

                let body = self.get_single(tenant, config, path, &page_params).await?;
                if reported_total.is_none() {
                    reported_total = body.get("totalRecordsCount").and_then(Value::as_u64);
                }
                let page_items = body
                    .get("items")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let count = page_items.len();
                items.extend(page_items);

                if count < PAGE_LIMIT {
                    break 'window;
                }
                offset += PAGE_LIMIT;
                if offset > OFFSET_CAP {
                    match items.last().and_then(record_date) {
                        Some(date) => {
                            filter = Some(advance_filter_window(filter.as_deref(), &date));
                            continue 'window;
                        }
                        None => break 'window,
                    }
                }
            }
        }

        let retrieved = items.len() as u64;
        Ok(PageResult {
            total: reported_total.unwrap_or(retrieved),
            retrieved,
            items,
        })
    }

    /// Send with bearer auth; on a 401, evict the tenant's token, acquire a
    /// fresh one, and retry exactly once. A second 401 classifies as
    /// `AuthenticationFailure` via the status check downstream.
    async fn send_authorized(
        &self,
        tenant: Tenant,
        config: &TenantConfig,
        method: Method,
        url: &str,
        params: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<reqwest::Response, GatewayError> {
        let mut retried = false;
        loop {
            let token = self.tokens.bearer(tenant, config).await?;
            let mut req = self
                .http
                .request(method.clone(), url)
                .header(ACCEPT, "application/json")
                .bearer_auth(token);
            if method == Method::GET && !config.integration_instance.is_empty() {
                req = req.query(&[(
                    "integrationInstance",
                    config.integration_instance.as_str(),
                )]);
            }
            if !params.is_empty() {
                req = req.query(params);
            }
            if let Some(b) = body {
                req = req.json(b);
            }

            let resp = req.send().await.map_err(|e| GatewayError::from_reqwest(&e))?;
            if resp.status() == StatusCode::UNAUTHORIZED && !retried {
                retried = true;
                tracing::info!(tenant = %tenant, url, "upstream returned 401; refreshing token and retrying once");
                self.tokens.evict(tenant);
                continue;
            }
            return Ok(resp);
        }
    }
}

fn monitoring_url(config: &TenantConfig, path: &str) -> String {
    format!(
        "{}/{}/{}",
        config.api_base_url.trim_end_matches('/'),
        MONITORING_BASE_PATH,
        path.trim_start_matches('/')
    )
}

/// Consume the response body, classifying non-2xx statuses.
async fn checked_body(resp: reqwest::Response) -> Result<String, GatewayError> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| GatewayError::from_reqwest(&e))?;
    if status.is_success() {
        return Ok(body);
    }
    Err(match status {
        StatusCode::UNAUTHORIZED => GatewayError::AuthenticationFailure {
            status: status.as_u16(),
            body,
        },
        StatusCode::FORBIDDEN => GatewayError::PermissionDenied { body },
        StatusCode::NOT_FOUND => GatewayError::NotFound { body },
        other => GatewayError::UpstreamFailure {
            status: other.as_u16(),
            status_text: status_text(other),
            body,
        },
    })
}

fn status_text(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or("Unknown").to_string()
}

/// One operator log line per exchange: URL, status, item count, reported
/// total. Never bodies, never credentials.
fn log_exchange(url: &str, status: StatusCode, body: Option<&Value>) {
    let items = body
        .and_then(|b| b.get("items"))
        .and_then(Value::as_array)
        .map(Vec::len);
    let total = body
        .and_then(|b| b.get("totalRecordsCount"))
        .and_then(Value::as_u64);
    tracing::info!(
        url,
        status = status.as_u16(),
        items = ?items,
        total_records = ?total,
        "upstream exchange"
    );
}

/// Extract the paging date from a record, trying the candidate keys in order.
pub(crate) fn record_date(item: &Value) -> Option<String> {
    RECORD_DATE_KEYS
        .iter()
        .find_map(|key| item.get(*key).and_then(Value::as_str).map(str::to_string))
}

/// Rewrite a brace-delimited filter expression so its `startdate` clause
/// carries `start_date`, preserving every other clause.
pub(crate) fn advance_filter_window(q: Option<&str>, start_date: &str) -> String {
    let clause = format!("startdate:'{start_date}'");
    match q {
        None => format!("{{{clause}}}"),
        Some(raw) => {
            let trimmed = raw.trim();
            let inner = trimmed
                .strip_prefix('{')
                .and_then(|s| s.strip_suffix('}'))
                .unwrap_or(trimmed);
            let mut clauses: Vec<&str> = inner
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty() && !c.starts_with("startdate:"))
                .collect();
            clauses.push(&clause);
            format!("{{{}}}", clauses.join(", "))
        }
    }
}
