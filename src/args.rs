use std::time::Duration;

use clap::Parser;

use crate::config::CredentialArgs;

/// Local harness for running Cribl Search queries from the command line.
/// Credentials not given as flags are read from CRIBL_* variables (or a .env file).
#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about,
    long_about = "Runs Cribl Search queries and prints or saves the complete result table. \
                  Several queries run concurrently over one shared, authenticated session."
)]
pub struct Args {
    /// Search queries to run, e.g. 'cribl dataset="logs" | limit 100'.
    #[clap(short, long = "query", num_args = 1..)]
    pub queries: Vec<String>,

    /// Start of the time range.
    #[clap(short, long, default_value = "-1h")]
    pub earliest: String,

    /// End of the time range.
    #[clap(short, long, default_value = "now")]
    pub latest: String,

    /// Per-query timeout in seconds.
    #[clap(short, long, value_name = "SECS")]
    pub timeout: Option<f64>,

    /// Write result rows as JSON lines to this file instead of printing a summary.
    #[clap(short, long)]
    pub output: Option<String>,

    /// Maximum number of queries in flight.
    #[clap(short = 'c', long, default_value = "4")]
    pub concurrency: usize,

    /// Only verify credentials and connectivity.
    #[clap(long)]
    pub test_connection: bool,

    /// List the available datasets.
    #[clap(long)]
    pub list_datasets: bool,

    /// OAuth2 client id (falls back to CRIBL_CLIENT_ID).
    #[clap(long)]
    pub client_id: Option<String>,

    /// OAuth2 client secret (falls back to CRIBL_CLIENT_SECRET).
    #[clap(long)]
    pub client_secret: Option<String>,

    /// Organization id (falls back to CRIBL_ORG_ID).
    #[clap(long)]
    pub org_id: Option<String>,

    /// Workspace name (falls back to CRIBL_WORKSPACE).
    #[clap(long)]
    pub workspace: Option<String>,
}

impl Args {
    /// Credential flags; missing ones are completed from the environment.
    pub fn credential_args(&self) -> CredentialArgs {
        CredentialArgs {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            org_id: self.org_id.clone(),
            workspace: self.workspace.clone(),
        }
    }

    /// `--timeout` as a `Duration`; rejects non-positive and unrepresentable values.
    pub fn query_timeout(&self) -> Result<Option<Duration>, String> {
        match self.timeout {
            None => Ok(None),
            Some(secs) if secs > 0.0 => Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(|_| format!("invalid timeout: {}", secs)),
            Some(secs) => Err(format!("invalid timeout: {}", secs)),
        }
    }
}
