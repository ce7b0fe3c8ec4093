//! Connection facade and shared graph error type.

use std::future::Future;
use std::sync::Arc;

use tether_core::TetherConfig;

use crate::connection::{ConnectionManager, ConnectionState};
use crate::retry::{QueryRetryPolicy, RetryingQueryExecutor};
use crate::signer::SigningError;
use crate::traversal::{GraphTraversalClient, TraversalError, TraversalHandle};

/// Errors from graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),

    #[error("Query failed after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: TraversalError,
    },

    #[error("Query error: {0}")]
    NonRetryable(#[source] TraversalError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl GraphError {
    /// The traversal failure behind this error, if any.
    pub fn traversal_error(&self) -> Option<&TraversalError> {
        match self {
            Self::RetryExhausted { source, .. } => Some(source),
            Self::NonRetryable(source) => Some(source),
            _ => None,
        }
    }
}

/// A resilient connection to a remote graph endpoint.
///
/// All reads and writes flow through the retrying executor. Clone is cheap
/// (inner Arc); clones share one session.
#[derive(Clone)]
pub struct Connection {
    executor: RetryingQueryExecutor,
}

impl Connection {
    /// Build an unconnected connection around an existing manager.
    pub fn new(manager: ConnectionManager, policy: QueryRetryPolicy) -> Self {
        Self {
            executor: RetryingQueryExecutor::new(Arc::new(manager), policy),
        }
    }

    /// Build an unconnected connection from loaded configuration.
    pub fn from_config(client: Arc<dyn GraphTraversalClient>, config: &TetherConfig) -> Self {
        Self::new(
            ConnectionManager::new(client, config.connection.clone()),
            QueryRetryPolicy::from_config(&config.retry),
        )
    }

    /// Build from configuration and open the session.
    pub async fn open(
        client: Arc<dyn GraphTraversalClient>,
        config: &TetherConfig,
    ) -> Result<Self, GraphError> {
        let conn = Self::from_config(client, config);
        conn.connect().await?;
        Ok(conn)
    }

    /// Open the session if it is not already open.
    pub async fn connect(&self) -> Result<(), GraphError> {
        let manager = self.manager();
        manager.open().await?;
        tracing::info!(url = %manager.url(), "Connected to graph endpoint");
        Ok(())
    }

    /// Close the session.
    pub async fn close(&self) {
        self.manager().close().await;
    }

    pub async fn state(&self) -> ConnectionState {
        self.manager().state().await
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        self.executor.connection()
    }

    pub fn retry_policy(&self) -> &QueryRetryPolicy {
        self.executor.policy()
    }

    /// Run a caller-supplied traversal with reconnect and retry.
    pub async fn query<F, Fut, T>(&self, query_fn: F) -> Result<T, GraphError>
    where
        F: FnMut(TraversalHandle) -> Fut,
        Fut: Future<Output = Result<T, TraversalError>>,
    {
        self.executor.execute(query_fn).await
    }
}
