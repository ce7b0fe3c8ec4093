//! Retrying query executor.
//!
//! Runs a caller-supplied traversal function against the current session.
//! Recognised transient failures are retried after a fixed interval, and a
//! closed socket additionally rebuilds the session first. Anything else is
//! returned to the caller on the first failure.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tether_core::RetryConfig;

use crate::client::GraphError;
use crate::connection::{ConnectionManager, SessionHandle};
use crate::traversal::{TraversalError, TraversalErrorKind, TraversalHandle};

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Rebuild the session, then retry with the new handle.
    Reconnect,
    /// Retry with the same handle.
    Retry,
    /// Give up and return the error.
    Fail,
}

/// Default classification, in priority order: socket not open (or a fatal
/// session close), concurrent modification, read-only violation.
pub fn classify_default(err: &TraversalError) -> RetryDecision {
    match err.kind {
        TraversalErrorKind::SocketNotOpen | TraversalErrorKind::SessionClosed { .. } => {
            RetryDecision::Reconnect
        }
        TraversalErrorKind::ConcurrentModification => RetryDecision::Retry,
        TraversalErrorKind::ReadOnlyViolation => RetryDecision::Retry,
        TraversalErrorKind::Other => RetryDecision::Fail,
    }
}

/// Attempt bound, wait interval, and error classifier.
#[derive(Clone)]
pub struct QueryRetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    classifier: fn(&TraversalError) -> RetryDecision,
}

impl fmt::Debug for QueryRetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryRetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl Default for QueryRetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl QueryRetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            classifier: classify_default,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.interval())
    }

    /// Use a custom classifier instead of [`classify_default`].
    pub fn with_classifier(mut self, classifier: fn(&TraversalError) -> RetryDecision) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn classify(&self, err: &TraversalError) -> RetryDecision {
        (self.classifier)(err)
    }

    pub fn is_retryable(&self, err: &TraversalError) -> bool {
        self.classify(err) != RetryDecision::Fail
    }

    /// Total attempts allowed; never less than one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Executes traversal functions with reconnect and retry.
#[derive(Clone)]
pub struct RetryingQueryExecutor {
    connection: Arc<ConnectionManager>,
    policy: QueryRetryPolicy,
}

impl RetryingQueryExecutor {
    pub fn new(connection: Arc<ConnectionManager>, policy: QueryRetryPolicy) -> Self {
        Self { connection, policy }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn policy(&self) -> &QueryRetryPolicy {
        &self.policy
    }

    /// Run `query_fn` until it succeeds, fails with a non-retryable error,
    /// or the attempt bound is reached.
    ///
    /// `query_fn` is called once per attempt with the handle of the session
    /// current at that time. While an attempt runs, an abnormal close of its
    /// session fails the attempt with [`TraversalErrorKind::SessionClosed`].
    pub async fn execute<F, Fut, T>(&self, mut query_fn: F) -> Result<T, GraphError>
    where
        F: FnMut(TraversalHandle) -> Fut,
        Fut: Future<Output = Result<T, TraversalError>>,
    {
        let max_attempts = self.policy.attempts();
        let mut session = self.connection.current_handle().await?;
        let mut attempt = 1;

        loop {
            let err = match run_attempt(&mut session, &mut query_fn).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            match self.policy.classify(&err) {
                RetryDecision::Fail => {
                    tracing::debug!(attempt, error = %err, "Query failed with non-retryable error");
                    return Err(GraphError::NonRetryable(err));
                }
                RetryDecision::Reconnect => {
                    tracing::warn!(
                        attempt,
                        generation = session.generation(),
                        error = %err,
                        "Session lost, reconnecting"
                    );
                    session = self.connection.reopen_if_current(session.generation()).await?;
                }
                RetryDecision::Retry => {}
            }

            if attempt >= max_attempts {
                tracing::error!(attempts = attempt, error = %err, "Query retries exhausted");
                return Err(GraphError::RetryExhausted {
                    attempts: attempt,
                    source: err,
                });
            }

            tracing::warn!(
                attempt,
                max_attempts,
                kind = %err.kind,
                delay_ms = self.policy.interval.as_millis() as u64,
                "Transient query failure, retrying"
            );
            tokio::time::sleep(self.policy.interval).await;
            attempt += 1;
        }
    }
}

async fn run_attempt<F, Fut, T>(
    session: &mut SessionHandle,
    query_fn: &mut F,
) -> Result<T, TraversalError>
where
    F: FnMut(TraversalHandle) -> Fut,
    Fut: Future<Output = Result<T, TraversalError>>,
{
    let query = query_fn(session.traversal());
    tokio::select! {
        result = query => result,
        event = session.abnormal_close() => Err(TraversalError::session_closed(&event)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryGraph;
    use tether_core::ConnectionConfig;
    use tokio::time::Instant;

    async fn executor(graph: &MemoryGraph, policy: QueryRetryPolicy) -> RetryingQueryExecutor {
        let mgr = Arc::new(ConnectionManager::new(
            Arc::new(graph.clone()),
            ConnectionConfig::default(),
        ));
        mgr.open().await.unwrap();
        RetryingQueryExecutor::new(mgr, policy)
    }

    fn fast_policy() -> QueryRetryPolicy {
        QueryRetryPolicy::new(5, Duration::ZERO)
    }

    fn transient(kind: TraversalErrorKind) -> TraversalError {
        TraversalError::new(kind, "transient")
    }

    #[test]
    fn test_default_classification_order() {
        let policy = QueryRetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.interval, Duration::from_millis(1000));
        assert_eq!(
            policy.classify(&transient(TraversalErrorKind::SocketNotOpen)),
            RetryDecision::Reconnect
        );
        assert_eq!(
            policy.classify(&transient(TraversalErrorKind::ConcurrentModification)),
            RetryDecision::Retry
        );
        assert_eq!(
            policy.classify(&transient(TraversalErrorKind::ReadOnlyViolation)),
            RetryDecision::Retry
        );
        assert!(!policy.is_retryable(&TraversalError::other("syntax error")));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(QueryRetryPolicy::new(0, Duration::ZERO).attempts(), 1);
    }

    #[tokio::test]
    async fn test_success_returns_immediately() {
        let graph = MemoryGraph::new();
        let exec = executor(&graph, fast_policy()).await;
        let mut calls = 0;

        let value = exec
            .execute(|_g| {
                calls += 1;
                async { Ok::<_, TraversalError>(42) }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_exhausts_after_five_attempts() {
        let graph = MemoryGraph::new();
        let exec = executor(&graph, fast_policy()).await;
        let mut calls = 0;

        let err = exec
            .execute(|_g| {
                calls += 1;
                async { Err::<(), _>(transient(TraversalErrorKind::ConcurrentModification)) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls, 5);
        match err {
            GraphError::RetryExhausted { attempts, source } => {
                assert_eq!(attempts, 5);
                assert_eq!(source.kind, TraversalErrorKind::ConcurrentModification);
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
        assert_eq!(graph.open_count(), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let graph = MemoryGraph::new();
        let exec = executor(&graph, fast_policy()).await;
        let mut calls = 0;

        let err = exec
            .execute(|_g| {
                calls += 1;
                async { Err::<(), _>(TraversalError::other("MalformedQueryException")) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls, 1);
        assert!(matches!(err, GraphError::NonRetryable(_)));
        assert_eq!(graph.open_count(), 1);
    }

    #[tokio::test]
    async fn test_socket_not_open_reconnects_once_per_occurrence() {
        let graph = MemoryGraph::new();
        let exec = executor(&graph, fast_policy()).await;
        let mut calls = 0;

        let value = exec
            .execute(|_g| {
                calls += 1;
                let failing = calls <= 2;
                async move {
                    if failing {
                        Err(transient(TraversalErrorKind::SocketNotOpen))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls, 3);
        assert_eq!(graph.open_count(), 3);
        assert_eq!(graph.close_count(), 2);
        assert_eq!(exec.connection().generation().await, 3);
    }

    #[tokio::test]
    async fn test_retry_keeps_handle_for_conflicts() {
        let graph = MemoryGraph::new();
        let exec = executor(&graph, fast_policy()).await;
        let mut seen = Vec::new();

        exec.execute(|g| {
            seen.push(Arc::as_ptr(&g) as *const () as usize);
            let failing = seen.len() == 1;
            async move {
                if failing {
                    Err(transient(TraversalErrorKind::ReadOnlyViolation))
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], seen[1]);
        assert_eq!(graph.open_count(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_failure_propagates() {
        let graph = MemoryGraph::new();
        let exec = executor(&graph, fast_policy()).await;
        graph.fail_next_opens(1);

        let err = exec
            .execute(|_g| async { Err::<(), _>(transient(TraversalErrorKind::SocketNotOpen)) })
            .await
            .unwrap_err();

        assert!(matches!(err, GraphError::Connection(_)));
    }

    #[tokio::test]
    async fn test_not_connected_is_a_connection_error() {
        let graph = MemoryGraph::new();
        let mgr = Arc::new(ConnectionManager::new(
            Arc::new(graph.clone()),
            ConnectionConfig::default(),
        ));
        let exec = RetryingQueryExecutor::new(mgr, fast_policy());

        let err = exec
            .execute(|_g| async { Ok::<_, TraversalError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::Connection(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_fixed_interval_between_attempts() {
        let graph = MemoryGraph::new();
        let exec = executor(&graph, QueryRetryPolicy::default()).await;
        let start = Instant::now();

        let _ = exec
            .execute(|_g| async {
                Err::<(), _>(transient(TraversalErrorKind::ConcurrentModification))
            })
            .await;

        // Four waits between five attempts.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(4000), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(5000), "{elapsed:?}");
    }

    #[tokio::test]
    async fn test_abnormal_close_fails_in_flight_attempt() {
        let graph = MemoryGraph::new();
        let exec = executor(&graph, fast_policy()).await;
        graph.stall_next();

        let closer = {
            let graph = graph.clone();
            tokio::spawn(async move {
                while !graph.is_stalled() {
                    tokio::task::yield_now().await;
                }
                graph.drop_connection(1006, "connection reset by peer");
            })
        };

        let exists = exec
            .execute(|g| async move { g.vertex_exists("v1").await })
            .await
            .unwrap();
        closer.await.unwrap();

        assert!(!exists);
        assert_eq!(graph.open_count(), 2);
    }
}
