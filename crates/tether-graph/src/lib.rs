//! Tether Graph — resilient client layer for a remote property-graph endpoint.
//!
//! All graph reads and writes flow through a [`Connection`], which runs
//! each traversal through the retrying executor: transient failures are
//! retried, a closed socket rebuilds the session, and anything else is
//! returned to the caller immediately. Saves are create-or-update with
//! property reconciliation; searches return a consistent subgraph.

pub mod client;
pub mod connection;
pub mod memory;
pub mod mutations;
pub mod queries;
pub mod reconcile;
pub mod retry;
pub mod signer;
pub mod traversal;

pub use client::{Connection, GraphError};
pub use connection::{ConnectionManager, ConnectionState, SessionHandle};
pub use memory::MemoryGraph;
pub use reconcile::ReconcileReport;
pub use retry::{QueryRetryPolicy, RetryDecision, RetryingQueryExecutor};
pub use signer::{Credentials, RequestSigner, SigV4Signer, SigningError, SigningRequest};
pub use traversal::{
    CloseEvent, GraphTraversalClient, TraversalError, TraversalErrorKind, TraversalHandle,
    TraversalSession, TraversalSource,
};
