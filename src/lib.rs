//! # searchgoat
//!
//! Run Cribl Search queries and get back the fully materialized result table.
//!
//! ## Main Components
//!
//! - [`SearchSession`]: entry point; runs `test_connection`, `list_datasets` and `query`
//! - [`Credentials`]: the four identifiers, given explicitly or read from `CRIBL_*` variables
//! - [`ResultTable`]: the merged result of every page, with a stable column schema
//! - [`Error`]: one error type with [`ErrorKind`] `Configuration`, `Authentication`,
//!   `Query` or `Timeout`
//!
//! A query submits a search job, polls it with capped exponential backoff until
//! it finishes or the timeout passes, then downloads and merges every result
//! page. The OAuth2 access token is cached per session and refreshed shortly
//! before it expires.
//!
//! ## Example
//!
//! ```no_run
//! use searchgoat::{SearchRequest, SearchSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), searchgoat::Error> {
//!     // Reads CRIBL_CLIENT_ID, CRIBL_CLIENT_SECRET, CRIBL_ORG_ID, CRIBL_WORKSPACE
//!     let session = SearchSession::from_env()?;
//!
//!     session.test_connection().await?;
//!     println!("datasets: {:?}", session.list_datasets().await?);
//!
//!     let table = session
//!         .query(SearchRequest::new(r#"cribl dataset="logs" | limit 100"#).earliest("-24h"))
//!         .await?;
//!     println!("{} rows", table.len());
//!     Ok(())
//! }
//! ```

mod args;
pub mod config;
mod error;
pub mod poller;
mod session;
pub mod table;
pub mod token;
pub mod transport;

pub use crate::args::Args;
pub use crate::config::{CredentialArgs, Credentials, Endpoints, SessionOptions};
pub use crate::error::{Error, ErrorKind, Result, TransportError};
pub use crate::poller::{JobState, JobStatus, SearchJob};
pub use crate::session::{is_fatal, Builder, SearchRequest, SearchSession, DEFAULT_EARLIEST, DEFAULT_LATEST};
pub use crate::table::{ResultPage, ResultTable};
pub use crate::token::AccessToken;
