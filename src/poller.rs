//! Drives a submitted search job to a terminal state.
//!
//! ```text
//! SUBMITTED -> RUNNING -> SUCCEEDED | FAILED
//!     \          \-----> TIMED_OUT   (deadline passed between polls)
//!      \-------------->  CANCELLED   (deadline passed mid-request, or server cancelled)
//! ```

use std::time::Duration;

use reqwest::StatusCode;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SessionOptions;
use crate::error::{Error, Result, TransportError};
use crate::transport::Transport;

/// Deadline used when `submitted_at + timeout` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Lifecycle state of a [`SearchJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::TimedOut | JobState::Cancelled
        )
    }

    /// Maps the service's status string. Unknown values mean "not done yet".
    pub(crate) fn from_server_status(status: &str) -> Self {
        match status {
            "completed" => JobState::Succeeded,
            "failed" => JobState::Failed,
            "canceled" | "cancelled" => JobState::Cancelled,
            _ => JobState::Running,
        }
    }
}

/// A job state as reported by one poll, with the failure reason if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub state: JobState,
    pub error: Option<String>,
}

/// One server-side search execution, owned by a single `query()` call.
#[derive(Debug)]
pub struct SearchJob {
    job_id: String,
    state: JobState,
    submitted_at: Instant,
    deadline: Instant,
    polls: u32,
}

impl SearchJob {
    fn new(job_id: String, timeout: Duration) -> Self {
        let submitted_at = Instant::now();
        Self {
            job_id,
            state: JobState::Submitted,
            submitted_at,
            deadline: submitted_at
                .checked_add(timeout)
                .unwrap_or_else(|| submitted_at + FAR_FUTURE),
            polls: 0,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Number of status requests that returned an answer.
    pub fn polls(&self) -> u32 {
        self.polls
    }
}

/// Exponential delay doubling from `initial` up to `max`.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            max,
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }
}

/// Submits jobs and polls them under a time and retry budget.
pub(crate) struct JobPoller<'a> {
    transport: &'a Transport,
    initial_interval: Duration,
    max_interval: Duration,
    max_retries: u32,
}

impl<'a> JobPoller<'a> {
    pub(crate) fn new(transport: &'a Transport, options: &SessionOptions) -> Self {
        Self {
            transport,
            initial_interval: options.initial_poll_interval,
            max_interval: options.max_poll_interval,
            max_retries: options.max_poll_retries,
        }
    }

    /// Submits the query; the deadline starts counting now.
    pub(crate) async fn submit(
        &self,
        query: &str,
        earliest: &str,
        latest: &str,
        timeout: Duration,
    ) -> Result<SearchJob> {
        match self.transport.submit(query, earliest, latest).await {
            Ok(job_id) => {
                info!(%job_id, earliest, latest, "submitted search job");
                Ok(SearchJob::new(job_id, timeout))
            }
            Err(TransportError::Rejected { status, message })
                if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY =>
            {
                Err(Error::Query {
                    message: format!("Invalid query syntax: {message}"),
                    job_id: None,
                    source: Some(Box::new(TransportError::Rejected { status, message })),
                })
            }
            Err(err) => Err(err.into_error("Job submission failed", None)),
        }
    }

    /// Polls until the job succeeds, fails or runs out of time.
    ///
    /// Returns `Ok(())` only for [`JobState::Succeeded`].
    pub(crate) async fn wait(&self, job: &mut SearchJob, timeout: Duration) -> Result<()> {
        let mut backoff = Backoff::new(self.initial_interval, self.max_interval);
        let mut transient_failures = 0u32;

        loop {
            if Instant::now() >= job.deadline {
                job.state = JobState::TimedOut;
                warn!(job_id = %job.job_id, ?timeout, "search job timed out");
                return Err(Error::Timeout {
                    timeout,
                    job_id: job.job_id.clone(),
                });
            }

            let polled = tokio::time::timeout_at(job.deadline, self.transport.poll(&job.job_id)).await;
            match polled {
                Err(_elapsed) => {
                    job.state = JobState::Cancelled;
                    warn!(job_id = %job.job_id, ?timeout, "deadline passed during status request, abandoning job");
                    return Err(Error::Timeout {
                        timeout,
                        job_id: job.job_id.clone(),
                    });
                }
                Ok(Ok(status)) => {
                    job.polls += 1;
                    transient_failures = 0;
                    debug!(job_id = %job.job_id, state = ?status.state, polls = job.polls, "polled search job");

                    match status.state {
                        JobState::Succeeded => {
                            job.state = JobState::Succeeded;
                            info!(job_id = %job.job_id, elapsed = ?job.submitted_at.elapsed(), "search job completed");
                            return Ok(());
                        }
                        JobState::Failed => {
                            job.state = JobState::Failed;
                            let reason = status.error.unwrap_or_else(|| "Unknown error".to_string());
                            return Err(Error::query_for_job(
                                format!("Query failed: {reason}"),
                                &job.job_id,
                            ));
                        }
                        JobState::Cancelled => {
                            job.state = JobState::Cancelled;
                            return Err(Error::query_for_job("Query was canceled", &job.job_id));
                        }
                        _ => job.state = JobState::Running,
                    }
                }
                Ok(Err(err)) if err.is_transient() => {
                    transient_failures += 1;
                    if transient_failures > self.max_retries {
                        return Err(Error::Query {
                            message: format!(
                                "Failed to check job status after {transient_failures} attempts: {err}"
                            ),
                            job_id: Some(job.job_id.clone()),
                            source: Some(Box::new(err)),
                        });
                    }
                    warn!(job_id = %job.job_id, attempt = transient_failures, error = %err, "transient failure polling search job");
                }
                Ok(Err(err)) => {
                    return Err(err.into_error("Failed to check job status", Some(&job.job_id)));
                }
            }

            let remaining = job.deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(backoff.next_delay().min(remaining)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));
        let delays: Vec<u128> = (0..5).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn backoff_initial_is_capped() {
        let mut backoff = Backoff::new(Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn server_status_mapping() {
        assert_eq!(JobState::from_server_status("completed"), JobState::Succeeded);
        assert_eq!(JobState::from_server_status("failed"), JobState::Failed);
        assert_eq!(JobState::from_server_status("canceled"), JobState::Cancelled);
        assert_eq!(JobState::from_server_status("queued"), JobState::Running);
        assert_eq!(JobState::from_server_status("running"), JobState::Running);
        assert_eq!(JobState::from_server_status("new"), JobState::Running);
    }

    #[test]
    fn terminal_states() {
        assert!(!JobState::Submitted.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::TimedOut.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
    }

    #[tokio::test]
    async fn deadline_is_measured_from_submission() {
        let job = SearchJob::new("j".into(), Duration::from_secs(5));
        assert_eq!(job.deadline() - job.submitted_at(), Duration::from_secs(5));
        assert_eq!(job.state(), JobState::Submitted);
        assert_eq!(job.polls(), 0);
    }

    #[tokio::test]
    async fn unbounded_timeout_gets_far_deadline() {
        let job = SearchJob::new("j".into(), Duration::MAX);
        assert!(job.deadline() - job.submitted_at() >= FAR_FUTURE);
    }
}
