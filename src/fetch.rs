//! Page fetching with bounded retries and exponential backoff.
//!
//! One [`PageFetcher`] wraps the shared HTTP client for the whole run;
//! connections are reused, never rebuilt per call. Transient trouble
//! (network errors, error statuses, bodies that fail to parse) is retried
//! with exponentially growing delays; only once the attempt limit is spent
//! does a [`FetchError`] escape, and that is the orchestrator's sole signal
//! that a page is unreachable.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use reqwest::{Client, Url};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::models::{Page, Record};
use crate::urls;

/// Key holding the child-record list in a page body.
const RESULTS_KEY: &str = "results";

/// Terminal failure for one page after retries are exhausted.
#[derive(Debug, Error)]
#[error("page {page} failed after {attempts} attempts: {source}")]
pub struct FetchError {
    /// The `sp` value that could not be fetched.
    pub page: u32,
    /// How many attempts were actually made.
    pub attempts: u32,
    #[source]
    pub source: anyhow::Error,
}

/// Fetches collection pages over one persistent client.
pub struct PageFetcher {
    client: Client,
    base_url: String,
    per_page: u32,
    max_attempts: u32,
    backoff_base: Duration,
    timeout: Duration,
}

impl PageFetcher {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            per_page: config.per_page,
            max_attempts: config.max_retries.max(1),
            backoff_base: Duration::from_millis(config.backoff_ms),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Fetch one page, retrying transient failures with exponential backoff.
    pub async fn fetch(&self, page: u32) -> Result<Page, FetchError> {
        let url = match urls::with_params(
            &self.base_url,
            &[
                ("fo", "json".to_string()),
                ("c", self.per_page.to_string()),
                ("sp", page.to_string()),
            ],
        ) {
            Ok(url) => url,
            Err(e) => {
                return Err(FetchError {
                    page,
                    attempts: 0,
                    source: e,
                })
            }
        };

        let mut last_err = None;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                // 1x, 2x, 4x, 8x ... the base delay, capped at 32x
                let delay = self.backoff_base * (1u32 << (attempt - 1).min(5));
                debug!(
                    "page {page}: attempt {}/{} after {delay:?}",
                    attempt + 1,
                    self.max_attempts
                );
                tokio::time::sleep(delay).await;
            }

            match self.try_fetch(&url, page).await {
                Ok(parsed) => return Ok(parsed),
                Err(e) => {
                    warn!("page {page}: attempt {} failed: {e:#}", attempt + 1);
                    last_err = Some(e);
                }
            }
        }

        Err(FetchError {
            page,
            attempts: self.max_attempts,
            source: last_err.unwrap_or_else(|| anyhow!("no attempts made")),
        })
    }

    async fn try_fetch(&self, url: &Url, page: u32) -> Result<Page> {
        let resp = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            bail!("HTTP {status}");
        }

        let body: Value = resp.json().await?;
        let records = extract_records(&body)?
            .into_iter()
            .enumerate()
            .map(|(i, raw)| Record {
                raw,
                position: i + 1,
            })
            .collect();

        Ok(Page {
            number: page,
            records,
        })
    }
}

/// Pull the child-record list out of a page body.
///
/// A missing or null `results` key is a legitimate empty page (end of
/// collection); any other shape is a malformed body and retried upstream.
fn extract_records(body: &Value) -> Result<Vec<Value>> {
    let object = body
        .as_object()
        .ok_or_else(|| anyhow!("page body is not a JSON object"))?;

    match object.get(RESULTS_KEY) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(other) => bail!(
            "'{RESULTS_KEY}' is not an array (got {})",
            json_kind(other)
        ),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
