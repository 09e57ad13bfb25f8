//! Public entry point tying token, transport, poller and assembler together.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::{CredentialArgs, Credentials, Endpoints, SessionOptions};
use crate::error::{Error, ErrorKind, Result};
use crate::poller::JobPoller;
use crate::table::{ResultAssembler, ResultTable};
use crate::token::TokenManager;
use crate::transport::Transport;

/// Default start of the search time range.
pub const DEFAULT_EARLIEST: &str = "-1h";

/// Default end of the search time range.
pub const DEFAULT_LATEST: &str = "now";

/// Parameters of one search.
///
/// ```
/// use std::time::Duration;
/// use searchgoat::SearchRequest;
///
/// let request = SearchRequest::new(r#"cribl dataset="logs" | limit 100"#)
///     .earliest("-24h")
///     .timeout(Duration::from_secs(60));
/// assert_eq!(request.latest_time(), "now");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    query: String,
    earliest: String,
    latest: String,
    timeout: Option<Duration>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            earliest: DEFAULT_EARLIEST.to_string(),
            latest: DEFAULT_LATEST.to_string(),
            timeout: None,
        }
    }

    pub fn earliest(mut self, earliest: impl Into<String>) -> Self {
        self.earliest = earliest.into();
        self
    }

    pub fn latest(mut self, latest: impl Into<String>) -> Self {
        self.latest = latest.into();
        self
    }

    /// Overrides the session's default query timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn query_text(&self) -> &str {
        &self.query
    }

    pub fn earliest_time(&self) -> &str {
        &self.earliest
    }

    pub fn latest_time(&self) -> &str {
        &self.latest
    }
}

impl From<&str> for SearchRequest {
    fn from(query: &str) -> Self {
        Self::new(query)
    }
}

impl From<String> for SearchRequest {
    fn from(query: String) -> Self {
        Self::new(query)
    }
}

/// Rejects queries that cannot be valid before anything is sent.
fn validate_query(query: &str) -> Result<()> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(Error::query("Query syntax error: query is empty"));
    }

    let first_stage = trimmed.split('|').next().unwrap_or_default().trim();
    let starts_with_cribl = first_stage.split_whitespace().next() == Some("cribl");
    if !starts_with_cribl || !first_stage.contains("dataset") {
        return Err(Error::query(
            "Query syntax error: query must start with 'cribl dataset=\"...\"'",
        ));
    }
    Ok(())
}

/// A connection to one organization/workspace of the search service.
///
/// Cheap to share behind an `Arc`: concurrent queries each own their job and
/// page sequence while sharing one cached access token.
///
/// # Examples
///
/// ```no_run
/// use searchgoat::{Credentials, SearchSession};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), searchgoat::Error> {
/// let session = SearchSession::builder()
///     .credentials(Credentials::new("client-id", "client-secret", "my-org", "main")?)
///     .build()?;
///
/// let table = session.query(r#"cribl dataset="logs" | limit 100"#).await?;
/// println!("{} rows, columns {:?}", table.len(), table.columns());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SearchSession {
    credentials: Credentials,
    options: SessionOptions,
    tokens: Arc<TokenManager>,
    transport: Transport,
}

impl SearchSession {
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Session with default endpoints and options.
    pub fn new(credentials: Credentials) -> Result<Self> {
        Self::builder().credentials(credentials).build()
    }

    /// Session whose credentials come entirely from `CRIBL_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::builder().build()
    }

    pub fn org_id(&self) -> &str {
        self.credentials.org_id()
    }

    pub fn workspace(&self) -> &str {
        self.credentials.workspace()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Verifies credentials and reachability with a fresh token and a probe request.
    ///
    /// # Errors
    ///
    /// Always [`Error::Authentication`]; callers should treat any error as failure.
    pub async fn test_connection(&self) -> Result<bool> {
        self.tokens.invalidate().await;
        self.tokens.get_valid_token().await?;

        match self.transport.list_datasets().await {
            Ok(_) => {
                info!(org_id = self.org_id(), workspace = self.workspace(), "connection test succeeded");
                Ok(true)
            }
            Err(err) => match err.into_error("Connection test failed", None) {
                auth @ Error::Authentication { .. } => Err(auth),
                other => Err(Error::Authentication {
                    message: other.to_string(),
                    source: Some(Box::new(other)),
                }),
            },
        }
    }

    /// Names of the datasets that can appear in `dataset="..."`.
    pub async fn list_datasets(&self) -> Result<Vec<String>> {
        self.transport
            .list_datasets()
            .await
            .map_err(|err| err.into_error("Failed to list datasets", None))
    }

    /// Runs a search and returns its complete result.
    ///
    /// Accepts a bare query string (time range `-1h`..`now`, default timeout)
    /// or a [`SearchRequest`].
    ///
    /// # Errors
    ///
    /// - [`Error::Query`] for an invalid query, a failed job, unreachable
    ///   service after the poll retry budget, or a pagination violation
    /// - [`Error::Authentication`] when credentials are rejected
    /// - [`Error::Timeout`] when the job outlives the timeout
    pub async fn query(&self, request: impl Into<SearchRequest>) -> Result<ResultTable> {
        let request = request.into();
        validate_query(&request.query)?;
        let timeout = request.timeout.unwrap_or(self.options.query_timeout);
        debug!(query = %request.query, ?timeout, "running search");

        let poller = JobPoller::new(&self.transport, &self.options);
        let mut job = poller
            .submit(&request.query, &request.earliest, &request.latest, timeout)
            .await?;
        poller.wait(&mut job, timeout).await?;

        let table = ResultAssembler::new(&self.transport)
            .assemble(job.job_id())
            .await?;
        info!(job_id = job.job_id(), rows = table.len(), polls = job.polls(), "search finished");
        Ok(table)
    }
}

/// Builder for [`SearchSession`].
///
/// Without explicit [`credentials`](Self::credentials), the fields given via
/// [`credential_args`](Self::credential_args) are completed from the
/// `CRIBL_*` environment variables.
#[derive(Debug, Default)]
pub struct Builder {
    credentials: Option<Credentials>,
    credential_args: CredentialArgs,
    auth_url: Option<String>,
    audience: Option<String>,
    api_base_url: Option<String>,
    options: SessionOptions,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Partially supplied credentials, completed from the environment at build time.
    pub fn credential_args(mut self, args: CredentialArgs) -> Self {
        self.credential_args = args;
        self
    }

    /// Overrides the OAuth2 token URL.
    pub fn auth_url(mut self, url: impl Into<String>) -> Self {
        self.auth_url = Some(url.into());
        self
    }

    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Overrides the search API base URL derived from workspace and org.
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Default timeout for queries that do not set their own.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.query_timeout = timeout;
        self
    }

    /// Resolves credentials and wires the components. Performs no network I/O.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] when any credential is missing.
    pub fn build(self) -> Result<SearchSession> {
        let credentials = match self.credentials {
            Some(credentials) => credentials,
            None => Credentials::from_env(self.credential_args)?,
        };

        let mut endpoints = Endpoints::for_credentials(&credentials);
        if let Some(url) = self.auth_url {
            endpoints.auth_url = url;
        }
        if let Some(audience) = self.audience {
            endpoints.audience = audience;
        }
        if let Some(url) = self.api_base_url {
            endpoints.api_base_url = url;
        }

        let tokens = Arc::new(TokenManager::new(credentials.clone(), &endpoints, &self.options)?);
        let transport = Transport::new(tokens.clone(), &endpoints, &self.options)?;

        Ok(SearchSession {
            credentials,
            options: self.options,
            tokens,
            transport,
        })
    }
}

/// True when `err` means the caller should fix credentials rather than retry.
pub fn is_fatal(err: &Error) -> bool {
    matches!(err.kind(), ErrorKind::Configuration | ErrorKind::Authentication)
}
