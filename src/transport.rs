//! Authenticated HTTP primitives of the search API.
//!
//! Every call attaches a fresh bearer token, issues exactly one request and
//! classifies the outcome into a [`TransportError`]. Nothing here retries.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::{Endpoints, SessionOptions};
use crate::error::{Error, TransportError};
use crate::poller::{JobState, JobStatus};
use crate::table::ResultPage;
use crate::token::TokenManager;

/// Page token equivalent to requesting the first page.
pub(crate) const FIRST_PAGE_TOKEN: &str = "0";

/// `{"items": [...]}` envelope used by every search API response.
#[derive(Debug, Deserialize)]
struct Items<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct CreatedJob {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusItem {
    status: String,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct DatasetItem {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// First line of an NDJSON results download.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultsHeader {
    #[serde(default)]
    offset: Option<u64>,
    #[serde(default)]
    total_event_count: u64,
}

/// Protocol-to-structure mapper for the search API.
#[derive(Debug, Clone)]
pub struct Transport {
    http: Client,
    base_url: String,
    tokens: Arc<TokenManager>,
    results_timeout: Duration,
    page_size: u32,
}

impl Transport {
    pub(crate) fn new(
        tokens: Arc<TokenManager>,
        endpoints: &Endpoints,
        options: &SessionOptions,
    ) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(concat!("searchgoat/", env!("CARGO_PKG_VERSION")))
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| Error::Configuration {
                message: format!("Failed to build search HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            base_url: endpoints.api_base_url.trim_end_matches('/').to_string(),
            tokens,
            results_timeout: options.results_timeout,
            page_size: options.page_size.max(1),
        })
    }

    /// Submits a search job and returns its id.
    pub async fn submit(
        &self,
        query: &str,
        earliest: &str,
        latest: &str,
    ) -> Result<String, TransportError> {
        let payload = json!({
            "query": query,
            "earliest": earliest,
            "latest": latest,
            "sampleRate": 1,
        });
        let request = self
            .http
            .post(format!("{}/search/jobs", self.base_url))
            .json(&payload);

        let created: Items<CreatedJob> = decode(self.send(request).await?).await?;
        created
            .items
            .into_iter()
            .next()
            .map(|job| job.id)
            .ok_or_else(|| TransportError::Decode("submit response carried no job".to_string()))
    }

    /// Reads the current state of a job.
    pub async fn poll(&self, job_id: &str) -> Result<JobStatus, TransportError> {
        let request = self
            .http
            .get(format!("{}/search/jobs/{}/status", self.base_url, job_id));

        let status: Items<StatusItem> = decode(self.send(request).await?).await?;
        let item = status
            .items
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Decode("status response carried no job".to_string()))?;

        let error = item.error.map(|e| match e {
            Value::String(s) => s,
            other => other.to_string(),
        });
        Ok(JobStatus {
            state: JobState::from_server_status(&item.status),
            error,
        })
    }

    /// Downloads one page of results. `None` requests the first page.
    pub async fn fetch_page(
        &self,
        job_id: &str,
        page_token: Option<&str>,
    ) -> Result<ResultPage, TransportError> {
        let offset = match page_token {
            None => 0,
            Some(token) => token
                .parse::<u64>()
                .map_err(|_| TransportError::Decode(format!("invalid page token '{token}'")))?,
        };

        let request = self
            .http
            .get(format!("{}/search/jobs/{}/results", self.base_url, job_id))
            .query(&[("limit", u64::from(self.page_size)), ("offset", offset)])
            .header(ACCEPT, "application/x-ndjson")
            .timeout(self.results_timeout);

        let body = self.send(request).await?.text().await?;
        parse_results_page(&body, offset)
    }

    /// Lists the datasets visible to the credentials.
    pub async fn list_datasets(&self) -> Result<Vec<String>, TransportError> {
        let request = self.http.get(format!("{}/datasets", self.base_url));

        let datasets: Items<DatasetItem> = decode(self.send(request).await?).await?;
        Ok(datasets
            .items
            .into_iter()
            .map(|d| {
                let non_empty = |v: &String| !v.is_empty();
                d.id.filter(non_empty)
                    .or(d.name.filter(non_empty))
                    .unwrap_or_default()
            })
            .collect())
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, TransportError> {
        let token = self
            .tokens
            .get_valid_token()
            .await
            .map_err(|e| TransportError::Token(Box::new(e)))?;

        let request = builder.bearer_auth(token.secret()).build()?;
        let method = request.method().clone();
        let url = request.url().clone();
        debug!(%method, %url, "sending search API request");

        let response = self.http.execute(request).await?;
        let status = response.status();
        debug!(%method, %url, %status, "received search API response");

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED => {
                self.tokens.invalidate_if_current(&token).await;
                TransportError::Unauthorized(body)
            }
            StatusCode::NOT_FOUND => TransportError::NotFound(body),
            s if s.is_server_error() => TransportError::Server { status: s, body },
            s => TransportError::Rejected {
                status: s,
                message: body,
            },
        })
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, TransportError> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| TransportError::Decode(e.to_string()))
}

/// Parses an NDJSON results body: one metadata line followed by event objects.
///
/// The next page token is the offset after this page, present only while it
/// is below the reported total.
pub(crate) fn parse_results_page(
    body: &str,
    requested_offset: u64,
) -> Result<ResultPage, TransportError> {
    let mut lines = body.lines().filter(|line| !line.trim().is_empty());

    let Some(first) = lines.next() else {
        return Ok(ResultPage::default());
    };
    let header: ResultsHeader = serde_json::from_str(first)
        .map_err(|e| TransportError::Decode(format!("bad results metadata: {e}")))?;

    let mut columns: Vec<String> = Vec::new();
    let mut rows: Vec<Map<String, Value>> = Vec::new();
    for line in lines {
        let event: Map<String, Value> = serde_json::from_str(line)
            .map_err(|e| TransportError::Decode(format!("bad result event: {e}")))?;
        for key in event.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
        rows.push(event);
    }

    let offset = header.offset.unwrap_or(requested_offset);
    let end = offset + rows.len() as u64;
    let next_page_token = (end < header.total_event_count).then(|| end.to_string());

    Ok(ResultPage {
        columns,
        rows,
        next_page_token,
    })
}
