//! Boundary to the wire-protocol client.
//!
//! The remote engine is reached through three traits: a
//! [`GraphTraversalClient`] opens [`TraversalSession`]s, and a session hands
//! out a [`TraversalSource`] handle that executes individual traversals.
//! Errors crossing this boundary carry a [`TraversalErrorKind`] so the
//! retry policy never has to look at message text.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tether_core::{Focus, Properties};
use tokio::sync::watch;

/// WebSocket close code for an abnormal closure (no close frame received).
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;

/// Message fragments the engine uses for its transient failure classes.
const SOCKET_NOT_OPEN: &str = "WebSocket is not open";
const CONCURRENT_MODIFICATION: &str = "ConcurrentModificationException";
const READ_ONLY_VIOLATION: &str = "ReadOnlyViolationException";

/// Handshake headers sent when a session is opened.
pub type Headers = BTreeMap<String, String>;

/// A traversal handle bound to one session.
pub type TraversalHandle = Arc<dyn TraversalSource>;

// ── Errors ───────────────────────────────────────────────────────

/// Failure category reported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalErrorKind {
    /// The underlying socket is not open; the session must be rebuilt.
    SocketNotOpen,
    /// A concurrent write conflicted with this traversal.
    ConcurrentModification,
    /// The traversal tried to write through a read-only replica.
    ReadOnlyViolation,
    /// The session was closed by the remote end while the traversal ran.
    SessionClosed { code: u16 },
    /// Anything else.
    Other,
}

/// Error returned by a single traversal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TraversalError {
    pub kind: TraversalErrorKind,
    pub message: String,
}

impl TraversalError {
    pub fn new(kind: TraversalErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify an engine error message. Client implementations call this
    /// once, where the raw message enters the process.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = if message.contains(SOCKET_NOT_OPEN) {
            TraversalErrorKind::SocketNotOpen
        } else if message.contains(CONCURRENT_MODIFICATION) {
            TraversalErrorKind::ConcurrentModification
        } else if message.contains(READ_ONLY_VIOLATION) {
            TraversalErrorKind::ReadOnlyViolation
        } else {
            TraversalErrorKind::Other
        };
        Self { kind, message }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(TraversalErrorKind::Other, message)
    }

    /// Build the error delivered when a session closes underneath a traversal.
    pub fn session_closed(event: &CloseEvent) -> Self {
        Self::new(
            TraversalErrorKind::SessionClosed { code: event.code },
            event.message.clone(),
        )
    }

    /// Whether this is one of the recognised transient failure classes.
    pub fn is_transient(&self) -> bool {
        !matches!(self.kind, TraversalErrorKind::Other)
    }
}

impl fmt::Display for TraversalErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SocketNotOpen => f.write_str("socket not open"),
            Self::ConcurrentModification => f.write_str("concurrent modification"),
            Self::ReadOnlyViolation => f.write_str("read-only violation"),
            Self::SessionClosed { code } => write!(f, "session closed with code {code}"),
            Self::Other => f.write_str("query failed"),
        }
    }
}

// ── Elements ─────────────────────────────────────────────────────

/// Reference to a vertex or an edge by identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementRef<'a> {
    Vertex(&'a str),
    Edge(&'a str),
}

impl ElementRef<'_> {
    pub fn id(&self) -> &str {
        match self {
            Self::Vertex(id) | Self::Edge(id) => id,
        }
    }

    pub fn is_vertex(&self) -> bool {
        matches!(self, Self::Vertex(_))
    }
}

/// Storage mode used when setting a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Replace whatever is stored under the key.
    Single,
    /// Plain set, as used for edge properties.
    Unspecified,
}

/// Edge direction relative to a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Edges pointing at the vertex.
    In,
    /// Edges leaving the vertex.
    Out,
}

/// Field key in a raw element map.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ElementKey {
    Id,
    Label,
    /// Edge endpoint the edge comes from.
    FromVertex,
    /// Edge endpoint the edge goes to.
    ToVertex,
    Property(String),
}

impl ElementKey {
    pub fn property(key: impl Into<String>) -> Self {
        Self::Property(key.into())
    }
}

/// One element exactly as the engine returned it.
pub type RawElement = BTreeMap<ElementKey, serde_json::Value>;

/// Unprocessed output of a subgraph fetch.
#[derive(Debug, Clone, Default)]
pub struct RawSubgraph {
    pub vertices: Vec<RawElement>,
    pub edges: Vec<RawElement>,
}

// ── Traits ───────────────────────────────────────────────────────

/// Traversals the graph layer issues against one session.
#[async_trait]
pub trait TraversalSource: Send + Sync {
    async fn vertex_exists(&self, id: &str) -> Result<bool, TraversalError>;

    async fn edge_exists(&self, id: &str) -> Result<bool, TraversalError>;

    /// Current property mapping of an element, without id/label fields.
    async fn properties(&self, element: ElementRef<'_>) -> Result<Properties, TraversalError>;

    async fn drop_property(&self, element: ElementRef<'_>, key: &str)
        -> Result<(), TraversalError>;

    async fn set_property(
        &self,
        element: ElementRef<'_>,
        key: &str,
        value: &serde_json::Value,
        cardinality: Cardinality,
    ) -> Result<(), TraversalError>;

    async fn add_vertex(&self, id: &str, label: &str) -> Result<(), TraversalError>;

    async fn add_edge(&self, id: &str, label: &str, from: &str, to: &str)
        -> Result<(), TraversalError>;

    /// Drop every edge of `vertex_id` in the given direction.
    async fn drop_edges(&self, vertex_id: &str, direction: Direction)
        -> Result<(), TraversalError>;

    async fn drop_vertex(&self, id: &str) -> Result<(), TraversalError>;

    async fn drop_edge(&self, id: &str) -> Result<(), TraversalError>;

    /// Fetch element maps for the focus neighbourhood, or the whole graph.
    async fn fetch_subgraph(&self, focus: Option<&Focus>) -> Result<RawSubgraph, TraversalError>;
}

/// Notification emitted when a session closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: u16,
    pub message: String,
}

impl CloseEvent {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Abnormal closes are fatal for the session they end.
    pub fn is_abnormal(&self) -> bool {
        self.code == ABNORMAL_CLOSE_CODE
    }
}

/// A live session with the remote engine.
#[async_trait]
pub trait TraversalSession: Send + Sync {
    /// Close the session. Safe to call more than once.
    async fn close(&self) -> Result<(), TraversalError>;

    /// Watch channel that holds `Some(event)` once the session has closed.
    fn close_events(&self) -> watch::Receiver<Option<CloseEvent>>;

    /// A traversal handle bound to this session.
    fn traversal(&self) -> TraversalHandle;
}

/// Opens sessions against the remote engine.
#[async_trait]
pub trait GraphTraversalClient: Send + Sync {
    async fn open(
        &self,
        url: &str,
        headers: &Headers,
        mime_type: &str,
    ) -> Result<Arc<dyn TraversalSession>, TraversalError>;
}
