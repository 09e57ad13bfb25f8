//! Error taxonomy shared by every searchgoat operation.
//!
//! All failures surface as one [`Error`] so callers can catch broadly, while
//! [`Error::kind`] lets them branch on the specific category.

use std::time::Duration;

use reqwest::StatusCode;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid credentials, detected before any network call.
    Configuration,
    /// Credential exchange rejected or a request answered with 401.
    Authentication,
    /// Malformed query, unknown dataset, failed job or protocol violation.
    Query,
    /// The job did not reach a terminal state before the deadline.
    Timeout,
}

/// Errors returned by a [`SearchSession`](crate::SearchSession).
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Credentials are missing or invalid. Never retried.
    #[error("Configuration error: {message}")]
    Configuration {
        /// What is missing and where it can be supplied.
        message: String,
    },

    /// The identity endpoint rejected the exchange or the service answered 401.
    #[error("Authentication failed: {message}")]
    Authentication {
        /// Human readable description of the failure.
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The query could not be executed or its results could not be retrieved.
    #[error("{message}")]
    Query {
        /// Server-provided or protocol-level failure reason.
        message: String,
        /// Search job the failure belongs to, when one was created.
        job_id: Option<String>,
        /// Underlying transport failure, if any.
        #[source]
        source: Option<Box<TransportError>>,
    },

    /// The job was still running when the wall-clock deadline passed.
    #[error(
        "Query did not complete within {} seconds. \
         Try narrowing the time range or adding '| limit N' to your query.",
        timeout.as_secs_f64()
    )]
    Timeout {
        /// Effective timeout that was exceeded.
        timeout: Duration,
        /// Search job that was abandoned; it may still run server-side.
        job_id: String,
    },
}

impl Error {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration { .. } => ErrorKind::Configuration,
            Error::Authentication { .. } => ErrorKind::Authentication,
            Error::Query { .. } => ErrorKind::Query,
            Error::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Returns the search job id attached to this error, if any.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Error::Query { job_id, .. } => job_id.as_deref(),
            Error::Timeout { job_id, .. } => Some(job_id),
            _ => None,
        }
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn query(message: impl Into<String>) -> Self {
        Error::Query {
            message: message.into(),
            job_id: None,
            source: None,
        }
    }

    pub(crate) fn query_for_job(message: impl Into<String>, job_id: &str) -> Self {
        Error::Query {
            message: message.into(),
            job_id: Some(job_id.to_string()),
            source: None,
        }
    }
}

/// Classified outcome of a single failed HTTP exchange.
///
/// The transport layer never retries; callers decide based on
/// [`TransportError::is_transient`].
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// The service answered 401.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The service rejected the request (400, 422 and other 4xx).
    #[error("request rejected ({status}): {message}")]
    Rejected {
        /// HTTP status returned.
        status: StatusCode,
        /// Response body as sent by the service.
        message: String,
    },

    /// The job or resource does not exist (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// The service failed with a 5xx status.
    #[error("server error ({status}): {body}")]
    Server {
        /// HTTP status returned.
        status: StatusCode,
        /// Response body as sent by the service.
        body: String,
    },

    /// Connection, DNS, TLS or request timeout failure.
    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),

    /// A 2xx response whose body could not be understood.
    #[error("malformed response: {0}")]
    Decode(String),

    /// No valid access token could be obtained for the request.
    #[error("could not obtain access token: {0}")]
    Token(#[source] Box<Error>),
}

impl TransportError {
    /// True for failures worth retrying: 5xx responses and network errors.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Server { .. } | TransportError::Network(_))
    }

    /// Converts this failure into the public taxonomy.
    ///
    /// 401 and token failures become [`Error::Authentication`]; everything else
    /// becomes [`Error::Query`] prefixed with `context`.
    pub(crate) fn into_error(self, context: &str, job_id: Option<&str>) -> Error {
        match self {
            TransportError::Token(inner) => *inner,
            TransportError::Unauthorized(body) => Error::Authentication {
                message: format!("{context}: service answered 401"),
                source: Some(Box::new(TransportError::Unauthorized(body))),
            },
            other => Error::Query {
                message: format!("{context}: {other}"),
                job_id: job_id.map(str::to_string),
                source: Some(Box::new(other)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_variants() {
        assert_eq!(Error::configuration("x").kind(), ErrorKind::Configuration);
        let auth = Error::Authentication {
            message: "x".into(),
            source: None,
        };
        assert_eq!(auth.kind(), ErrorKind::Authentication);
        assert_eq!(Error::query("x").kind(), ErrorKind::Query);
        let timeout = Error::Timeout {
            timeout: Duration::from_secs(5),
            job_id: "job-1".to_string(),
        };
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        assert_eq!(timeout.job_id(), Some("job-1"));
    }

    #[test]
    fn transient_classification() {
        let server = TransportError::Server {
            status: StatusCode::BAD_GATEWAY,
            body: String::new(),
        };
        assert!(server.is_transient());
        assert!(!TransportError::NotFound("gone".into()).is_transient());
        assert!(!TransportError::Unauthorized(String::new()).is_transient());
        let rejected = TransportError::Rejected {
            status: StatusCode::BAD_REQUEST,
            message: "bad".into(),
        };
        assert!(!rejected.is_transient());
    }

    #[test]
    fn unauthorized_maps_to_authentication() {
        let err = TransportError::Unauthorized("nope".into()).into_error("Job submission failed", None);
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[test]
    fn token_failure_is_unwrapped() {
        let revoked = Error::Authentication {
            message: "revoked".into(),
            source: None,
        };
        let err = TransportError::Token(Box::new(revoked))
            .into_error("Failed to list datasets", None);
        assert!(matches!(err, Error::Authentication { ref message, .. } if message == "revoked"));
    }

    #[test]
    fn other_failures_keep_cause_and_job() {
        let err = TransportError::NotFound("job".into()).into_error("Failed to retrieve results", Some("j1"));
        assert_eq!(err.kind(), ErrorKind::Query);
        assert_eq!(err.job_id(), Some("j1"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().starts_with("Failed to retrieve results: not found"));
    }

    #[test]
    fn timeout_message_mentions_seconds() {
        let err = Error::Timeout {
            timeout: Duration::from_secs(5),
            job_id: "j".into(),
        };
        assert!(err.to_string().contains("within 5 seconds"));
    }
}
