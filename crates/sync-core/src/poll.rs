//! Completion polling
//!
//! Callers that need to know when a peer has caught up poll a
//! [`CompletionQuery`] until it reports 100 for that peer. A query that
//! times out is retried; a query that fails for good ends the wait, and so
//! does running out of patience, which is reported as a convergence failure
//! rather than a timeout.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use tokio::sync::watch;

use crate::entry::PeerId;

/// Source of per-peer completion percentages.
#[async_trait]
pub trait CompletionQuery: Send + Sync {
    /// Completion, 0 to 100, towards each known peer.
    async fn peer_completion(&self) -> Result<HashMap<PeerId, f64>, QueryError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// The query did not answer in time. Worth asking again.
    #[error("Completion query timed out")]
    Timeout,

    #[error("Completion query failed: {0}")]
    Fatal(String),
}

impl QueryError {
    pub fn retryable(&self) -> bool {
        matches!(self, QueryError::Timeout)
    }
}

/// Why waiting for completion ended without success.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WaitError {
    /// The peer never reached 100 while polling was allowed to continue.
    #[error("Peer {peer} did not converge within {elapsed:?} (last reading: {last:?})")]
    NotConverged {
        peer: PeerId,
        elapsed: Duration,
        last: Option<f64>,
    },

    #[error(transparent)]
    Query(QueryError),

    #[error("Stopped while waiting for completion")]
    Stopped,
}

/// Polling cadence and limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Give up once this much time has passed.
    pub max_elapsed: Duration,
    /// Deadline for a single query.
    pub query_timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(50),
            max_interval: Duration::from_secs(1),
            max_elapsed: Duration::from_secs(60),
            query_timeout: Duration::from_secs(5),
        }
    }
}

impl PollPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_max_elapsed_time(Some(self.max_elapsed))
            .build()
    }
}

/// Poll `query` until `peer` reads 100.
///
/// # Errors
///
/// - [`WaitError::Query`] when the query fails with a non-retryable error
/// - [`WaitError::NotConverged`] when the backoff is exhausted
/// - [`WaitError::Stopped`] when `stop` flips to true
pub async fn wait_for_completion(
    query: &dyn CompletionQuery,
    peer: PeerId,
    policy: &PollPolicy,
    mut stop: Option<watch::Receiver<bool>>,
) -> Result<(), WaitError> {
    let started = Instant::now();
    let mut backoff = policy.backoff();
    let mut last = None;

    loop {
        let reading = match tokio::time::timeout(policy.query_timeout, query.peer_completion()).await {
            Ok(result) => result,
            Err(_) => Err(QueryError::Timeout),
        };

        match reading {
            Ok(completions) => {
                let percent = completions.get(&peer).copied();
                if percent.is_some() {
                    last = percent;
                }
                if percent.is_some_and(|p| p >= 100.0) {
                    tracing::debug!(peer = %peer.short(), elapsed = ?started.elapsed(), "Peer complete");
                    return Ok(());
                }
                tracing::debug!(peer = %peer.short(), percent = ?percent, "Peer not complete yet");
            }
            Err(e) if e.retryable() => {
                tracing::debug!(peer = %peer.short(), error = %e, "Completion query failed, retrying");
            }
            Err(e) => return Err(WaitError::Query(e)),
        }

        let Some(delay) = backoff.next_backoff() else {
            return Err(WaitError::NotConverged {
                peer,
                elapsed: started.elapsed(),
                last,
            });
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop_requested(&mut stop) => return Err(WaitError::Stopped),
        }
    }
}

async fn stop_requested(stop: &mut Option<watch::Receiver<bool>>) {
    match stop {
        Some(rx) => {
            if rx.wait_for(|stopped| *stopped).await.is_err() {
                // Sender gone: nobody can ask us to stop any more.
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}
