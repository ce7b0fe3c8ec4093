//! MemoryGraph — in-process traversal client.
//!
//! Implements [`GraphTraversalClient`] over a plain map of vertices and
//! edges so the graph layer can run without a remote engine. Element maps
//! come back shaped the way the remote engine returns them: vertex
//! properties wrapped in single-element lists, edge properties bare.
//!
//! Faults can be injected to drive the retry and reconnect paths: queued
//! traversal errors, failing opens, a stalled traversal, and remote closes.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tether_core::{Focus, Properties, LABEL_SEPARATOR};
use tokio::sync::watch;

use crate::traversal::{
    Cardinality, CloseEvent, Direction, ElementKey, ElementRef, GraphTraversalClient, Headers,
    RawElement, RawSubgraph, TraversalError, TraversalHandle, TraversalSession, TraversalSource,
};

const CLIENT_CLOSE_CODE: u16 = 1000;

#[derive(Debug, Clone)]
struct StoredVertex {
    label: String,
    properties: Properties,
}

#[derive(Debug, Clone)]
struct StoredEdge {
    label: String,
    from: String,
    to: String,
    properties: Properties,
}

#[derive(Default)]
struct State {
    vertices: BTreeMap<String, StoredVertex>,
    edges: BTreeMap<String, StoredEdge>,

    /// Each entry fails the call after `skip` more successful calls.
    faults: VecDeque<(usize, TraversalError)>,
    failing_opens: usize,
    stall_next: bool,
    stalled: bool,

    opens: usize,
    closes: usize,
    traversal_calls: usize,
    last_url: Option<String>,
    last_headers: Option<Headers>,
    last_mime_type: Option<String>,
    current: Option<Arc<watch::Sender<Option<CloseEvent>>>>,
}

impl State {
    fn take_fault(&mut self) -> Option<TraversalError> {
        let front = self.faults.front_mut()?;
        if front.0 == 0 {
            self.faults.pop_front().map(|(_, err)| err)
        } else {
            front.0 -= 1;
            None
        }
    }
}

/// In-process graph engine with fault injection. Clone is cheap (inner Arc).
#[derive(Clone, Default)]
pub struct MemoryGraph {
    state: Arc<Mutex<State>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Fault injection ──────────────────────────────────────────

    /// Fail the next traversal call with `err`.
    pub fn fail_next(&self, err: TraversalError) {
        self.fail_after(0, err);
    }

    /// Let `skip` traversal calls succeed, then fail the next one with `err`.
    /// Faults queue up; each countdown starts after the previous fault fired.
    pub fn fail_after(&self, skip: usize, err: TraversalError) {
        self.state.lock().faults.push_back((skip, err));
    }

    /// Refuse the next `count` session opens.
    pub fn fail_next_opens(&self, count: usize) {
        self.state.lock().failing_opens = count;
    }

    /// Make the next traversal call hang until its future is dropped.
    pub fn stall_next(&self) {
        self.state.lock().stall_next = true;
    }

    /// Whether a stalled call has been reached.
    pub fn is_stalled(&self) -> bool {
        self.state.lock().stalled
    }

    /// Close the most recently opened session from the remote side.
    pub fn drop_connection(&self, code: u16, message: &str) {
        let current = self.state.lock().current.clone();
        if let Some(sender) = current {
            tracing::debug!(code, message, "Memory session dropped");
            sender.send_replace(Some(CloseEvent::new(code, message)));
        }
    }

    // ── Inspection ───────────────────────────────────────────────

    pub fn open_count(&self) -> usize {
        self.state.lock().opens
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }

    pub fn traversal_calls(&self) -> usize {
        self.state.lock().traversal_calls
    }

    pub fn last_url(&self) -> Option<String> {
        self.state.lock().last_url.clone()
    }

    pub fn last_headers(&self) -> Option<Headers> {
        self.state.lock().last_headers.clone()
    }

    pub fn last_mime_type(&self) -> Option<String> {
        self.state.lock().last_mime_type.clone()
    }

    pub fn vertex_count(&self) -> usize {
        self.state.lock().vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.state.lock().edges.len()
    }

    pub fn vertex_label(&self, id: &str) -> Option<String> {
        self.state.lock().vertices.get(id).map(|v| v.label.clone())
    }

    pub fn vertex_properties(&self, id: &str) -> Option<Properties> {
        self.state.lock().vertices.get(id).map(|v| v.properties.clone())
    }

    pub fn edge_properties(&self, id: &str) -> Option<Properties> {
        self.state.lock().edges.get(id).map(|e| e.properties.clone())
    }

    /// `(label, from, to)` of an edge.
    pub fn edge_endpoints(&self, id: &str) -> Option<(String, String, String)> {
        self.state
            .lock()
            .edges
            .get(id)
            .map(|e| (e.label.clone(), e.from.clone(), e.to.clone()))
    }
}

#[async_trait]
impl GraphTraversalClient for MemoryGraph {
    async fn open(
        &self,
        url: &str,
        headers: &Headers,
        mime_type: &str,
    ) -> Result<Arc<dyn TraversalSession>, TraversalError> {
        let mut state = self.state.lock();
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(TraversalError::other(format!("connection refused: {url}")));
        }

        let (tx, rx) = watch::channel(None);
        let tx = Arc::new(tx);
        state.opens += 1;
        state.last_url = Some(url.to_string());
        state.last_headers = Some(headers.clone());
        state.last_mime_type = Some(mime_type.to_string());
        state.current = Some(tx.clone());
        tracing::debug!(url, session = state.opens, "Memory session opened");

        let traversal = Arc::new(MemoryTraversal {
            graph: self.clone(),
            closed: rx,
        });
        let session: Arc<dyn TraversalSession> = Arc::new(MemorySession {
            graph: self.clone(),
            close_tx: tx,
            traversal,
        });
        Ok(session)
    }
}

struct MemorySession {
    graph: MemoryGraph,
    close_tx: Arc<watch::Sender<Option<CloseEvent>>>,
    traversal: Arc<MemoryTraversal>,
}

#[async_trait]
impl TraversalSession for MemorySession {
    async fn close(&self) -> Result<(), TraversalError> {
        self.graph.state.lock().closes += 1;
        if self.close_tx.borrow().is_none() {
            self.close_tx
                .send_replace(Some(CloseEvent::new(CLIENT_CLOSE_CODE, "closed by client")));
        }
        Ok(())
    }

    fn close_events(&self) -> watch::Receiver<Option<CloseEvent>> {
        self.close_tx.subscribe()
    }

    fn traversal(&self) -> TraversalHandle {
        self.traversal.clone()
    }
}

struct MemoryTraversal {
    graph: MemoryGraph,
    closed: watch::Receiver<Option<CloseEvent>>,
}

impl MemoryTraversal {
    /// Bookkeeping shared by every call: closed check, faults, stalls.
    async fn begin(&self) -> Result<(), TraversalError> {
        if self.closed.borrow().is_some() {
            return Err(TraversalError::from_message(
                "WebSocket is not open: readyState 3 (CLOSED)",
            ));
        }

        let stall = {
            let mut state = self.graph.state.lock();
            state.traversal_calls += 1;
            if let Some(err) = state.take_fault() {
                return Err(err);
            }
            if state.stall_next {
                state.stall_next = false;
                state.stalled = true;
                true
            } else {
                false
            }
        };

        if stall {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

fn not_found(kind: &str, id: &str) -> TraversalError {
    TraversalError::other(format!("{kind} not found: {id}"))
}

fn raw_vertex(id: &str, vertex: &StoredVertex) -> RawElement {
    let mut raw = RawElement::new();
    raw.insert(ElementKey::Id, Value::String(id.to_string()));
    raw.insert(ElementKey::Label, Value::String(vertex.label.clone()));
    for (key, value) in &vertex.properties {
        raw.insert(ElementKey::property(key), Value::Array(vec![value.clone()]));
    }
    raw
}

fn raw_edge(id: &str, edge: &StoredEdge) -> RawElement {
    let mut raw = RawElement::new();
    raw.insert(ElementKey::Id, Value::String(id.to_string()));
    raw.insert(ElementKey::Label, Value::String(edge.label.clone()));
    raw.insert(ElementKey::FromVertex, Value::String(edge.from.clone()));
    raw.insert(ElementKey::ToVertex, Value::String(edge.to.clone()));
    for (key, value) in &edge.properties {
        raw.insert(ElementKey::property(key), value.clone());
    }
    raw
}

fn matches_focus(vertex: &StoredVertex, focus: &Focus) -> bool {
    vertex.label.split(LABEL_SEPARATOR).any(|l| l == focus.label)
        && vertex.properties.get(&focus.key) == Some(&focus.value)
}

#[async_trait]
impl TraversalSource for MemoryTraversal {
    async fn vertex_exists(&self, id: &str) -> Result<bool, TraversalError> {
        self.begin().await?;
        Ok(self.graph.state.lock().vertices.contains_key(id))
    }

    async fn edge_exists(&self, id: &str) -> Result<bool, TraversalError> {
        self.begin().await?;
        Ok(self.graph.state.lock().edges.contains_key(id))
    }

    async fn properties(&self, element: ElementRef<'_>) -> Result<Properties, TraversalError> {
        self.begin().await?;
        let state = self.graph.state.lock();
        match element {
            ElementRef::Vertex(id) => state
                .vertices
                .get(id)
                .map(|v| v.properties.clone())
                .ok_or_else(|| not_found("vertex", id)),
            ElementRef::Edge(id) => state
                .edges
                .get(id)
                .map(|e| e.properties.clone())
                .ok_or_else(|| not_found("edge", id)),
        }
    }

    async fn drop_property(
        &self,
        element: ElementRef<'_>,
        key: &str,
    ) -> Result<(), TraversalError> {
        self.begin().await?;
        let mut state = self.graph.state.lock();
        let properties = match element {
            ElementRef::Vertex(id) => state.vertices.get_mut(id).map(|v| &mut v.properties),
            ElementRef::Edge(id) => state.edges.get_mut(id).map(|e| &mut e.properties),
        };
        if let Some(properties) = properties {
            properties.remove(key);
        }
        Ok(())
    }

    async fn set_property(
        &self,
        element: ElementRef<'_>,
        key: &str,
        value: &Value,
        cardinality: Cardinality,
    ) -> Result<(), TraversalError> {
        self.begin().await?;
        let mut state = self.graph.state.lock();
        let properties = match element {
            ElementRef::Vertex(id) => state
                .vertices
                .get_mut(id)
                .map(|v| &mut v.properties)
                .ok_or_else(|| not_found("vertex", id))?,
            ElementRef::Edge(id) => state
                .edges
                .get_mut(id)
                .map(|e| &mut e.properties)
                .ok_or_else(|| not_found("edge", id))?,
        };

        // Vertex properties without single cardinality accumulate values.
        if cardinality == Cardinality::Unspecified && element.is_vertex() {
            if let Some(existing) = properties.get_mut(key) {
                let mut values = match existing.take() {
                    Value::Array(items) => items,
                    other => vec![other],
                };
                values.push(value.clone());
                *existing = Value::Array(values);
                return Ok(());
            }
        }
        properties.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn add_vertex(&self, id: &str, label: &str) -> Result<(), TraversalError> {
        self.begin().await?;
        let mut state = self.graph.state.lock();
        if state.vertices.contains_key(id) {
            return Err(TraversalError::other(format!(
                "Vertex with id already exists: {id}"
            )));
        }
        state.vertices.insert(
            id.to_string(),
            StoredVertex {
                label: label.to_string(),
                properties: Properties::new(),
            },
        );
        Ok(())
    }

    async fn add_edge(
        &self,
        id: &str,
        label: &str,
        from: &str,
        to: &str,
    ) -> Result<(), TraversalError> {
        self.begin().await?;
        let mut state = self.graph.state.lock();
        if state.edges.contains_key(id) {
            return Err(TraversalError::other(format!("Edge with id already exists: {id}")));
        }
        for endpoint in [from, to] {
            if !state.vertices.contains_key(endpoint) {
                return Err(not_found("vertex", endpoint));
            }
        }
        state.edges.insert(
            id.to_string(),
            StoredEdge {
                label: label.to_string(),
                from: from.to_string(),
                to: to.to_string(),
                properties: Properties::new(),
            },
        );
        Ok(())
    }

    async fn drop_edges(
        &self,
        vertex_id: &str,
        direction: Direction,
    ) -> Result<(), TraversalError> {
        self.begin().await?;
        self.graph.state.lock().edges.retain(|_, e| match direction {
            Direction::In => e.to != vertex_id,
            Direction::Out => e.from != vertex_id,
        });
        Ok(())
    }

    async fn drop_vertex(&self, id: &str) -> Result<(), TraversalError> {
        self.begin().await?;
        let mut state = self.graph.state.lock();
        if state.vertices.remove(id).is_some() {
            state.edges.retain(|_, e| e.from != id && e.to != id);
        }
        Ok(())
    }

    async fn drop_edge(&self, id: &str) -> Result<(), TraversalError> {
        self.begin().await?;
        self.graph.state.lock().edges.remove(id);
        Ok(())
    }

    async fn fetch_subgraph(&self, focus: Option<&Focus>) -> Result<RawSubgraph, TraversalError> {
        self.begin().await?;
        let state = self.graph.state.lock();

        let Some(focus) = focus else {
            return Ok(RawSubgraph {
                vertices: state.vertices.iter().map(|(id, v)| raw_vertex(id, v)).collect(),
                edges: state.edges.iter().map(|(id, e)| raw_edge(id, e)).collect(),
            });
        };

        let focal: BTreeSet<&str> = state
            .vertices
            .iter()
            .filter(|(_, v)| matches_focus(v, focus))
            .map(|(id, _)| id.as_str())
            .collect();

        let edges: Vec<(&String, &StoredEdge)> = state
            .edges
            .iter()
            .filter(|(_, e)| focal.contains(e.from.as_str()) || focal.contains(e.to.as_str()))
            .collect();

        let mut vertex_ids = focal.clone();
        for (_, e) in &edges {
            vertex_ids.insert(e.from.as_str());
            vertex_ids.insert(e.to.as_str());
        }

        Ok(RawSubgraph {
            vertices: vertex_ids
                .into_iter()
                .filter_map(|id| state.vertices.get(id).map(|v| raw_vertex(id, v)))
                .collect(),
            edges: edges.into_iter().map(|(id, e)| raw_edge(id, e)).collect(),
        })
    }
}
