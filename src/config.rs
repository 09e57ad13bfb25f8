//! Credential resolution, service endpoints and session tuning knobs.

use std::env;
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default OAuth2 token endpoint.
pub const DEFAULT_AUTH_URL: &str = "https://login.cribl.cloud/oauth/token";

/// Audience requested during the client-credentials exchange.
pub const DEFAULT_AUDIENCE: &str = "https://api.cribl.cloud";

/// Environment variable holding the OAuth2 client id.
pub const ENV_CLIENT_ID: &str = "CRIBL_CLIENT_ID";
/// Environment variable holding the OAuth2 client secret.
pub const ENV_CLIENT_SECRET: &str = "CRIBL_CLIENT_SECRET";
/// Environment variable holding the organization id.
pub const ENV_ORG_ID: &str = "CRIBL_ORG_ID";
/// Environment variable holding the workspace name.
pub const ENV_WORKSPACE: &str = "CRIBL_WORKSPACE";

/// The four identifiers required to talk to the search service.
///
/// Construct through [`Credentials::new`], [`Credentials::resolve`] or
/// [`Credentials::from_env`]; all of them refuse empty fields.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    client_id: String,
    client_secret: String,
    org_id: String,
    workspace: String,
}

/// Explicitly supplied credential fields. `None` falls back to the external source.
#[derive(Debug, Clone, Default)]
pub struct CredentialArgs {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub org_id: Option<String>,
    pub workspace: Option<String>,
}

impl Credentials {
    /// Builds credentials from explicit values only.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        org_id: impl Into<String>,
        workspace: impl Into<String>,
    ) -> Result<Self> {
        Self::resolve(
            CredentialArgs {
                client_id: Some(client_id.into()),
                client_secret: Some(client_secret.into()),
                org_id: Some(org_id.into()),
                workspace: Some(workspace.into()),
            },
            |_| None,
        )
    }

    /// Resolves each field from `explicit`, else from `lookup(VARIABLE_NAME)`.
    ///
    /// Blank values count as absent. All missing fields are reported in a
    /// single [`Error::Configuration`].
    pub fn resolve<F>(explicit: CredentialArgs, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |value: Option<String>, var: &str| {
            value
                .filter(|v| !v.trim().is_empty())
                .or_else(|| lookup(var).filter(|v| !v.trim().is_empty()))
        };

        let client_id = pick(explicit.client_id, ENV_CLIENT_ID);
        let client_secret = pick(explicit.client_secret, ENV_CLIENT_SECRET);
        let org_id = pick(explicit.org_id, ENV_ORG_ID);
        let workspace = pick(explicit.workspace, ENV_WORKSPACE);

        let missing: Vec<(&str, &str)> = [
            ("client_id", ENV_CLIENT_ID, client_id.is_none()),
            ("client_secret", ENV_CLIENT_SECRET, client_secret.is_none()),
            ("org_id", ENV_ORG_ID, org_id.is_none()),
            ("workspace", ENV_WORKSPACE, workspace.is_none()),
        ]
        .into_iter()
        .filter(|(_, _, absent)| *absent)
        .map(|(field, var, _)| (field, var))
        .collect();

        match (client_id, client_secret, org_id, workspace) {
            (Some(client_id), Some(client_secret), Some(org_id), Some(workspace)) => Ok(Self {
                client_id,
                client_secret,
                org_id,
                workspace,
            }),
            _ => {
                let fields: Vec<&str> = missing.iter().map(|(f, _)| *f).collect();
                let vars: Vec<&str> = missing.iter().map(|(_, v)| *v).collect();
                Err(Error::configuration(format!(
                    "Missing required credentials: {}. Either pass them explicitly or set \
                     environment variables: {}",
                    fields.join(", "),
                    vars.join(", ")
                )))
            }
        }
    }

    /// Resolves credentials from `explicit`, falling back to `CRIBL_*` environment variables.
    pub fn from_env(explicit: CredentialArgs) -> Result<Self> {
        Self::resolve(explicit, |name| env::var(name).ok())
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub(crate) fn client_secret(&self) -> &str {
        &self.client_secret
    }

    pub fn org_id(&self) -> &str {
        &self.org_id
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("org_id", &self.org_id)
            .field("workspace", &self.workspace)
            .finish()
    }
}

/// Network locations of the identity and search services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// OAuth2 token URL.
    pub auth_url: String,
    /// Audience parameter sent with the token request.
    pub audience: String,
    /// Search API base, e.g. `https://ws-org.cribl.cloud/api/v1/m/default_search`.
    pub api_base_url: String,
}

impl Endpoints {
    /// Production endpoints for the workspace/organization pair in `credentials`.
    pub fn for_credentials(credentials: &Credentials) -> Self {
        Self {
            auth_url: DEFAULT_AUTH_URL.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            api_base_url: format!(
                "https://{}-{}.cribl.cloud/api/v1/m/default_search",
                credentials.workspace, credentials.org_id
            ),
        }
    }
}

/// Timing and sizing knobs for a [`SearchSession`](crate::SearchSession).
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Default wall-clock budget of a query, measured from submission.
    pub query_timeout: Duration,
    /// Per-request timeout for token, submit, poll and dataset requests.
    pub request_timeout: Duration,
    /// Per-request timeout for result page downloads.
    pub results_timeout: Duration,
    /// First sleep between polls.
    pub initial_poll_interval: Duration,
    /// Upper bound for the poll backoff.
    pub max_poll_interval: Duration,
    /// Consecutive transient poll failures tolerated before giving up.
    pub max_poll_retries: u32,
    /// Tokens are refreshed once this close to expiry.
    pub token_safety_margin: Duration,
    /// Token lifetime assumed when the identity endpoint omits `expires_in`.
    pub default_token_lifetime: Duration,
    /// Rows requested per result page.
    pub page_size: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(300),
            request_timeout: Duration::from_secs(30),
            results_timeout: Duration::from_secs(60),
            initial_poll_interval: Duration::from_millis(500),
            max_poll_interval: Duration::from_secs(5),
            max_poll_retries: 3,
            token_safety_margin: Duration::from_secs(30),
            default_token_lifetime: Duration::from_secs(86_400),
            page_size: 1000,
        }
    }
}
