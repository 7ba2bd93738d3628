//! Paginated vendor REST API adapter
//!
//! Issues `GET {base_url}{path}?page=N` once per page, gated by the run's
//! [`RateLimiter`], with bounded retry and exponential backoff for transient
//! failures. The response is expected to look like
//! `{ "data": [...], "meta": { "total_pages": N, "total_count": M } }`; both
//! paths are configurable.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::auth::{AuthConfig, Authenticator, Credentials};
use super::retry::{parse_retry_after, RetryPolicy};
use super::{clean_text, parse_cost, parse_inventory, Page, RawRecord, SourceAdapter};
use crate::error::SourceError;
use crate::rate_limit::{RateLimitConfig, RateLimitStats, RateLimiter};

/// JSON field names (dot paths) for each logical record field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiFieldMap {
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub part: Option<String>,
    #[serde(default)]
    pub vendor_code: Option<String>,
    #[serde(default)]
    pub part_number: Option<String>,
    #[serde(default)]
    pub cost: Option<String>,
    #[serde(default)]
    pub inventory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSourceConfig {
    pub base_url: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_page_param")]
    pub page_param: String,
    /// Vendor's number for the first page (usually 1)
    #[serde(default = "default_first_page")]
    pub first_page: u32,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub page_size_param: Option<String>,
    #[serde(default = "default_records_path")]
    pub records_path: String,
    #[serde(default = "default_total_pages_path")]
    pub total_pages_path: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub auth: AuthConfig,
    pub fields: ApiFieldMap,
}

fn default_path() -> String {
    "/items".to_string()
}

fn default_page_param() -> String {
    "page".to_string()
}

fn default_first_page() -> u32 {
    1
}

fn default_records_path() -> String {
    "data".to_string()
}

fn default_total_pages_path() -> String {
    "meta.total_pages".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl ApiSourceConfig {
    pub fn new(base_url: impl Into<String>, fields: ApiFieldMap) -> Self {
        Self {
            base_url: base_url.into(),
            path: default_path(),
            page_param: default_page_param(),
            first_page: default_first_page(),
            page_size: None,
            page_size_param: None,
            records_path: default_records_path(),
            total_pages_path: default_total_pages_path(),
            timeout_secs: default_timeout_secs(),
            query: BTreeMap::new(),
            auth: AuthConfig::None,
            fields,
        }
    }

    pub fn with_page_size(mut self, param: impl Into<String>, size: u32) -> Self {
        self.page_size_param = Some(param.into());
        self.page_size = Some(size);
        self
    }
}

pub struct PaginatedApiSource {
    source_id: String,
    config: ApiSourceConfig,
    endpoint: Url,
    http: Client,
    auth: Authenticator,
    limiter: RateLimiter,
    retry: RetryPolicy,
    next: u32,
    total_pages: Option<u32>,
    /// Item count of the first full page when the vendor takes no page size
    observed_page_size: Option<usize>,
    /// Previous page's records, to catch vendors that clamp out-of-range pages
    last_records: Option<Vec<RawRecord>>,
    exhausted: bool,
}

impl PaginatedApiSource {
    pub fn new(
        source_id: impl Into<String>,
        config: ApiSourceConfig,
        credentials: Credentials,
        rate_limit: &RateLimitConfig,
        retry: RetryPolicy,
    ) -> Result<Self, SourceError> {
        let endpoint = Url::parse(&config.base_url)
            .and_then(|base| base.join(&config.path))
            .map_err(|e| {
                SourceError::Config(format!("invalid vendor URL {}: {e}", config.base_url))
            })?;

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SourceError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            source_id: source_id.into(),
            auth: Authenticator::new(http.clone(), credentials, retry.statuses.clone()),
            limiter: RateLimiter::new(rate_limit),
            endpoint,
            http,
            config,
            retry,
            next: 0,
            total_pages: None,
            observed_page_size: None,
            last_records: None,
            exhausted: false,
        })
    }

    pub fn rate_limit_stats(&self) -> RateLimitStats {
        self.limiter.stats()
    }

    fn query_for(&self, index: u32) -> Vec<(String, String)> {
        let mut query: Vec<(String, String)> = self
            .config
            .query
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        query.push((
            self.config.page_param.clone(),
            (self.config.first_page + index).to_string(),
        ));
        if let (Some(param), Some(size)) = (&self.config.page_size_param, self.config.page_size) {
            query.push((param.clone(), size.to_string()));
        }
        query
    }

    /// GET one page with rate limiting and retry
    async fn fetch_json(&mut self, index: u32) -> Result<Value, SourceError> {
        let url = self.endpoint.to_string();
        let query = self.query_for(index);
        let mut attempt: u32 = 0;
        let mut refreshed_token = false;

        loop {
            attempt += 1;
            self.limiter.acquire().await;

            let request = self.http.get(self.endpoint.clone()).query(&query);
            let request = match self.auth.apply(request).await {
                Ok(request) => request,
                Err(SourceError::Transient { message, .. }) if self.retry.allows(attempt) => {
                    let wait = self.retry.delay(attempt);
                    warn!(
                        page = index,
                        error = %message,
                        attempt = attempt,
                        wait_ms = wait.as_millis() as u64,
                        "Token request failed, retrying with backoff"
                    );
                    tokio::time::sleep(wait).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            debug!(url = %url, page = index, attempt = attempt, "Requesting vendor page");

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        if self.auth.uses_token() && !refreshed_token {
                            warn!(
                                page = index,
                                status = %status,
                                "Vendor rejected token, refreshing once"
                            );
                            self.auth.invalidate();
                            refreshed_token = true;
                            continue;
                        }
                        return Err(SourceError::Auth(format!("{status} from {url}")));
                    }

                    if self.retry.retries_status(status.as_u16()) {
                        if self.retry.allows(attempt) {
                            let wait = if status == StatusCode::TOO_MANY_REQUESTS {
                                resp.headers()
                                    .get(header::RETRY_AFTER)
                                    .and_then(|v| v.to_str().ok())
                                    .and_then(parse_retry_after)
                                    .unwrap_or_else(|| self.retry.delay(attempt))
                            } else {
                                self.retry.delay(attempt)
                            };
                            warn!(
                                page = index,
                                status = %status,
                                attempt = attempt,
                                wait_ms = wait.as_millis() as u64,
                                "Transient vendor error, retrying with backoff"
                            );
                            tokio::time::sleep(wait).await;
                            continue;
                        }
                        return Err(SourceError::Transient {
                            url,
                            message: format!("{status} after {attempt} attempts"),
                        });
                    }

                    if !status.is_success() {
                        return Err(SourceError::Status {
                            status: status.as_u16(),
                            url,
                        });
                    }

                    return resp
                        .json::<Value>()
                        .await
                        .map_err(|e| SourceError::Decode(format!("page {index}: {e}")));
                }
                Err(e) => {
                    if self.retry.allows(attempt) {
                        let wait = self.retry.delay(attempt);
                        warn!(
                            page = index,
                            error = %e,
                            attempt = attempt,
                            wait_ms = wait.as_millis() as u64,
                            "Request failed, retrying with backoff"
                        );
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    return Err(SourceError::Transient {
                        url,
                        message: format!("{e} after {attempt} attempts"),
                    });
                }
            }
        }
    }

    fn record_from_item(&self, item: &Value) -> RawRecord {
        let fields = &self.config.fields;
        let text = |path: &Option<String>| {
            path.as_deref()
                .and_then(|p| value_at(item, p))
                .and_then(scalar_text)
        };

        let (inventory_qty, inventory_text) = text(&fields.inventory)
            .map(|s| parse_inventory(&s))
            .unwrap_or((None, None));

        RawRecord {
            sku: text(&fields.sku).and_then(|s| clean_text(&s)),
            brand: text(&fields.brand).and_then(|s| clean_text(&s)),
            part: text(&fields.part).and_then(|s| clean_text(&s)),
            vendor_code: text(&fields.vendor_code).and_then(|s| clean_text(&s)),
            part_number: text(&fields.part_number).and_then(|s| clean_text(&s)),
            cost: text(&fields.cost).and_then(|s| parse_cost(&s)),
            inventory_qty,
            inventory_text,
        }
    }
}

#[async_trait]
impl SourceAdapter for PaginatedApiSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn position(&self) -> u32 {
        self.next
    }

    fn seek(&mut self, page: u32) {
        self.next = page;
        self.last_records = None;
        self.exhausted = false;
    }

    async fn next_page(&mut self) -> Result<Option<Page>, SourceError> {
        if self.exhausted {
            return Ok(None);
        }
        if let Some(total) = self.total_pages {
            if self.next >= total {
                self.exhausted = true;
                return Ok(None);
            }
        }

        let index = self.next;
        // Advance first so a failed page is skipped rather than retried forever
        self.next += 1;

        let body = self.fetch_json(index).await?;

        let items = value_at(&body, &self.config.records_path)
            .and_then(Value::as_array)
            .ok_or_else(|| {
                SourceError::Decode(format!(
                    "page {index}: no array at '{}'",
                    self.config.records_path
                ))
            })?;

        let total_pages = value_at(&body, &self.config.total_pages_path)
            .and_then(Value::as_u64)
            .map(|n| n as u32);
        if total_pages.is_some() {
            self.total_pages = total_pages;
        }

        let records: Vec<RawRecord> =
            items.iter().map(|item| self.record_from_item(item)).collect();

        if self.total_pages.is_none() && self.last_records.as_ref() == Some(&records) {
            info!(
                source_id = %self.source_id,
                page = index,
                "Vendor repeated the previous page, treating feed as exhausted"
            );
            self.exhausted = true;
            return Ok(None);
        }

        let full_size = match self.config.page_size {
            Some(size) => size as usize,
            None => *self.observed_page_size.get_or_insert(records.len()),
        };
        let short_page = records.len() < full_size;
        if records.is_empty() || (self.total_pages.is_none() && short_page) {
            self.exhausted = true;
        }
        if self.total_pages.is_none() {
            self.last_records = Some(records.clone());
        }
        if let Some(total) = self.total_pages {
            if self.next >= total {
                self.exhausted = true;
            }
        }

        info!(
            source_id = %self.source_id,
            page = index,
            records = records.len(),
            total_pages = ?self.total_pages,
            "Fetched vendor page"
        );

        Ok(Some(Page {
            index,
            records,
            total_pages: self.total_pages,
        }))
    }
}

/// Follow a dot-separated path (`meta.total_pages`) into a JSON value
pub fn value_at<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |v, segment| match v {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
