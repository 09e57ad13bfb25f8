//! OAuth2 client-credentials exchange with a cached, self-refreshing token.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use oauth2::basic::BasicClient;
use oauth2::{AuthType, ClientId, ClientSecret, RequestTokenError, TokenResponse, TokenUrl};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{Credentials, Endpoints, SessionOptions};
use crate::error::{Error, Result};

/// Extra attempts made when the identity endpoint cannot be reached at all.
const EXCHANGE_NETWORK_RETRIES: u32 = 2;

/// First delay between unreachable-endpoint retries; doubles each time.
const EXCHANGE_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Bearer token plus the instant it stops being valid.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub(crate) fn new(value: String, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value,
            issued_at,
            expires_at,
        }
    }

    /// The raw bearer value.
    pub fn secret(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Validity granted by the identity endpoint.
    pub fn lifetime(&self) -> Duration {
        (self.expires_at - self.issued_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// False once `now >= expires_at - margin`.
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin = TimeDelta::from_std(margin).unwrap_or(TimeDelta::MAX);
        match self.expires_at.checked_sub_signed(margin) {
            Some(threshold) => now < threshold,
            None => false,
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Owns the session's single cached [`AccessToken`].
///
/// The cache sits behind an async mutex that stays locked for the duration of
/// an exchange, so concurrent callers queue behind one refresh and all observe
/// its result.
pub struct TokenManager {
    credentials: Credentials,
    auth_url: String,
    audience: String,
    http: reqwest::Client,
    safety_margin: Duration,
    default_lifetime: Duration,
    cached: Mutex<Option<AccessToken>>,
}

impl TokenManager {
    pub(crate) fn new(
        credentials: Credentials,
        endpoints: &Endpoints,
        options: &SessionOptions,
    ) -> Result<Self> {
        // Redirects are disabled so credentials are never replayed to another host.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| Error::Configuration {
                message: format!("Failed to build identity HTTP client: {e}"),
            })?;

        Ok(Self {
            credentials,
            auth_url: endpoints.auth_url.clone(),
            audience: endpoints.audience.clone(),
            http,
            safety_margin: options.token_safety_margin,
            default_lifetime: options.default_token_lifetime,
            cached: Mutex::new(None),
        })
    }

    /// Returns a token that is valid for at least the safety margin.
    ///
    /// Performs a credential exchange when nothing is cached or the cached token
    /// is about to expire.
    ///
    /// # Errors
    ///
    /// [`Error::Authentication`] when the identity endpoint rejects the
    /// credentials or cannot be reached.
    pub async fn get_valid_token(&self) -> Result<AccessToken> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Utc::now(), self.margin_for(token)) {
                return Ok(token.clone());
            }
            debug!(expires_at = %token.expires_at, "cached access token is expiring, refreshing");
        }

        let token = self.exchange().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Refresh margin for `token`, capped at half its lifetime so that
    /// short-lived tokens are still reused.
    fn margin_for(&self, token: &AccessToken) -> Duration {
        self.safety_margin.min(token.lifetime() / 2)
    }

    /// Drops the cached token so the next call performs a fresh exchange.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    /// Drops the cached token only if it is still `rejected`.
    ///
    /// A newer token installed by a concurrent refresh is left alone.
    pub(crate) async fn invalidate_if_current(&self, rejected: &AccessToken) {
        let mut cached = self.cached.lock().await;
        if cached.as_ref() == Some(rejected) {
            warn!("access token rejected by the service, discarding it");
            *cached = None;
        }
    }

    async fn exchange(&self) -> Result<AccessToken> {
        let token_url = TokenUrl::new(self.auth_url.clone()).map_err(|e| Error::Configuration {
            message: format!("Invalid identity endpoint URL '{}': {e}", self.auth_url),
        })?;

        let oauth2_client = BasicClient::new(ClientId::new(self.credentials.client_id().to_string()))
            .set_client_secret(ClientSecret::new(self.credentials.client_secret().to_string()))
            .set_auth_type(AuthType::RequestBody)
            .set_token_uri(token_url);

        let mut attempt = 0;
        let response = loop {
            let result = oauth2_client
                .exchange_client_credentials()
                .add_extra_param("audience", self.audience.as_str())
                .request_async(&self.http)
                .await;

            match result {
                Ok(response) => break response,
                Err(RequestTokenError::Request(err)) if attempt < EXCHANGE_NETWORK_RETRIES => {
                    attempt += 1;
                    let delay = EXCHANGE_RETRY_BACKOFF * 2u32.pow(attempt - 1);
                    warn!(attempt, error = %err, "identity endpoint unreachable, retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
                Err(RequestTokenError::Request(err)) => {
                    return Err(Error::Authentication {
                        message: format!("Authentication request failed: {err}"),
                        source: Some(Box::new(err)),
                    });
                }
                Err(err) => {
                    return Err(Error::Authentication {
                        message: format!("Credential exchange rejected: {err}"),
                        source: Some(Box::new(err)),
                    });
                }
            }
        };

        let lifetime = response.expires_in().unwrap_or(self.default_lifetime);
        let issued_at = Utc::now();
        let expires_at = TimeDelta::from_std(lifetime)
            .ok()
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if lifetime <= self.safety_margin {
            warn!(?lifetime, margin = ?self.safety_margin, "access token lifetime is within the refresh margin");
        }

        info!(%expires_at, "obtained access token");
        Ok(AccessToken::new(
            response.access_token().secret().to_string(),
            issued_at,
            expires_at,
        ))
    }
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("credentials", &self.credentials)
            .field("auth_url", &self.auth_url)
            .field("safety_margin", &self.safety_margin)
            .finish_non_exhaustive()
    }
}
