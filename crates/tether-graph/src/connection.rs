//! Session lifecycle for one remote endpoint.
//!
//! The [`ConnectionManager`] owns at most one live session. Every session
//! gets a new generation number; handles carry the generation they were
//! issued for, so a reconnect requested through a stale handle reuses the
//! session someone else already rebuilt instead of tearing it down again.

use std::sync::Arc;

use tether_core::ConnectionConfig;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::client::GraphError;
use crate::signer::{Credentials, RequestSigner, SigV4Signer, SigningRequest, GRAPH_DB_SERVICE};
use crate::traversal::{
    CloseEvent, GraphTraversalClient, Headers, TraversalHandle, TraversalSession,
};

/// Sub-path of the traversal endpoint.
pub const GREMLIN_PATH: &str = "/gremlin";

/// Media type negotiated when the session opens.
pub const GREMLIN_MIME_TYPE: &str = "application/vnd.gremlin-v2.0+json";

/// Lifecycle state of the managed session.
///
/// `Connecting` is visible to [`ConnectionManager::state`] while an open is
/// in flight, even though the open itself holds the session lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// A traversal handle together with the session it belongs to.
#[derive(Clone)]
pub struct SessionHandle {
    generation: u64,
    traversal: TraversalHandle,
    closed: watch::Receiver<Option<CloseEvent>>,
}

impl SessionHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn traversal(&self) -> TraversalHandle {
        self.traversal.clone()
    }

    /// Resolves once the session closes abnormally. Pending forever otherwise.
    pub async fn abnormal_close(&mut self) -> CloseEvent {
        loop {
            let event = self.closed.borrow_and_update().clone();
            if let Some(event) = event.filter(CloseEvent::is_abnormal) {
                return event;
            }
            if self.closed.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

struct ActiveSession {
    session: Arc<dyn TraversalSession>,
    watcher: JoinHandle<()>,
}

struct Inner {
    generation: u64,
    active: Option<ActiveSession>,
}

/// Owns the lifecycle of one traversal session.
pub struct ConnectionManager {
    client: Arc<dyn GraphTraversalClient>,
    signer: Arc<dyn RequestSigner>,
    config: ConnectionConfig,
    state: watch::Sender<ConnectionState>,
    inner: Mutex<Inner>,
}

impl ConnectionManager {
    pub fn new(client: Arc<dyn GraphTraversalClient>, config: ConnectionConfig) -> Self {
        Self {
            client,
            signer: Arc::new(SigV4Signer::new()),
            config,
            state: watch::Sender::new(ConnectionState::Disconnected),
            inner: Mutex::new(Inner {
                generation: 0,
                active: None,
            }),
        }
    }

    /// Replace the default SigV4 signer used when IAM auth is enabled.
    pub fn with_signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = signer;
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Target URL of the traversal endpoint.
    pub fn url(&self) -> String {
        format!("wss://{}:{}{}", self.config.host, self.config.port, GREMLIN_PATH)
    }

    /// Current state. A session the remote end has closed counts as disconnected.
    pub async fn state(&self) -> ConnectionState {
        let state = *self.state.borrow();
        if state != ConnectionState::Connected {
            return state;
        }
        let inner = self.inner.lock().await;
        let state = *self.state.borrow();
        match state {
            ConnectionState::Connected if !self.is_live(&inner) => ConnectionState::Disconnected,
            state => state,
        }
    }

    /// Generation of the current session; zero before the first open.
    pub async fn generation(&self) -> u64 {
        self.inner.lock().await.generation
    }

    /// Open a session unless a live one is already connected.
    ///
    /// A session the remote end has closed is torn down and replaced.
    pub async fn open(&self) -> Result<(), GraphError> {
        let mut inner = self.inner.lock().await;
        if self.is_live(&inner) {
            return Ok(());
        }
        if inner.active.is_some() {
            tracing::debug!(generation = inner.generation, "Replacing remotely closed session");
            self.close_locked(&mut inner).await;
        }
        self.open_locked(&mut inner).await
    }

    /// Handle bound to the current session.
    pub async fn current_handle(&self) -> Result<SessionHandle, GraphError> {
        let inner = self.inner.lock().await;
        self.handle_locked(&inner)
    }

    /// Close the current session (best effort) and open a new one.
    pub async fn reopen(&self) -> Result<SessionHandle, GraphError> {
        let mut inner = self.inner.lock().await;
        self.close_locked(&mut inner).await;
        self.open_locked(&mut inner).await?;
        self.handle_locked(&inner)
    }

    /// Reopen only if `generation` still names the current session.
    ///
    /// When another caller already rebuilt the session, its handle is
    /// returned and no second reconnect happens.
    pub async fn reopen_if_current(
        &self,
        generation: u64,
    ) -> Result<SessionHandle, GraphError> {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation && self.is_connected() {
            tracing::debug!(
                stale = generation,
                current = inner.generation,
                "Session already rebuilt, reusing it"
            );
            return self.handle_locked(&inner);
        }
        self.close_locked(&mut inner).await;
        self.open_locked(&mut inner).await?;
        self.handle_locked(&inner)
    }

    /// Close the current session and return to `Disconnected`.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        self.close_locked(&mut inner).await;
    }

    async fn open_locked(&self, inner: &mut Inner) -> Result<(), GraphError> {
        self.state.send_replace(ConnectionState::Connecting);
        let url = self.url();

        let headers = match self.headers() {
            Ok(h) => h,
            Err(e) => {
                self.state.send_replace(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let session = match self.client.open(&url, &headers, GREMLIN_MIME_TYPE).await {
            Ok(s) => s,
            Err(e) => {
                self.state.send_replace(ConnectionState::Disconnected);
                tracing::warn!(url = %url, error = %e, "Failed to open session");
                return Err(GraphError::Connection(e.to_string()));
            }
        };

        inner.generation += 1;
        let watcher = tokio::spawn(watch_close(session.close_events(), inner.generation));
        inner.active = Some(ActiveSession { session, watcher });
        self.state.send_replace(ConnectionState::Connected);

        tracing::info!(
            url = %url,
            generation = inner.generation,
            iam = self.config.use_iam,
            "Session opened"
        );
        Ok(())
    }

    async fn close_locked(&self, inner: &mut Inner) {
        if let Some(active) = inner.active.take() {
            active.watcher.abort();
            if let Err(e) = active.session.close().await {
                tracing::debug!(
                    generation = inner.generation,
                    error = %e,
                    "Ignoring error while closing session"
                );
            }
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }

    fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }

    /// Connected, and the remote end has not closed the session.
    fn is_live(&self, inner: &Inner) -> bool {
        self.is_connected()
            && inner
                .active
                .as_ref()
                .is_some_and(|active| active.session.close_events().borrow().is_none())
    }

    fn handle_locked(&self, inner: &Inner) -> Result<SessionHandle, GraphError> {
        match &inner.active {
            Some(active) if self.is_connected() => Ok(SessionHandle {
                generation: inner.generation,
                traversal: active.session.traversal(),
                closed: active.session.close_events(),
            }),
            _ => Err(GraphError::Connection("not connected".to_string())),
        }
    }

    fn headers(&self) -> Result<Headers, GraphError> {
        if !self.config.use_iam {
            return Ok(Headers::new());
        }
        let request = SigningRequest {
            host: Some(self.config.host.clone()).filter(|h| !h.is_empty()),
            port: Some(self.config.port),
            path: GREMLIN_PATH.to_string(),
            service: GRAPH_DB_SERVICE.to_string(),
            credentials: Credentials::from(&self.config),
        };
        Ok(self.signer.sign(&request)?)
    }
}

/// Log close notifications for one session generation.
async fn watch_close(mut events: watch::Receiver<Option<CloseEvent>>, generation: u64) {
    loop {
        let event = events.borrow_and_update().clone();
        if let Some(event) = event {
            if event.is_abnormal() {
                tracing::warn!(
                    generation,
                    code = event.code,
                    message = %event.message,
                    "Session closed abnormally"
                );
            } else {
                tracing::debug!(
                    generation,
                    code = event.code,
                    message = %event.message,
                    "Session closed"
                );
            }
            return;
        }
        if events.changed().await.is_err() {
            return;
        }
    }
}
