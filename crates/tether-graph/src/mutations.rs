//! Write operations for the remote graph.
//!
//! Saves are create-or-update: the element is created when its id is
//! unknown, and its properties are then reconciled to exactly what the
//! caller supplied. Labels and edge endpoints are never changed after
//! creation. Each operation runs as one retried traversal function; every
//! step in it is idempotent, so re-running the whole function is safe.

use tether_core::{Edge, Node};

use crate::client::{Connection, GraphError};
use crate::reconcile::reconcile;
use crate::traversal::{Direction, ElementRef};

impl Connection {
    // ── Nodes ────────────────────────────────────────────────────

    /// Create or update a node.
    pub async fn save_node(&self, node: &Node) -> Result<(), GraphError> {
        if node.id.is_empty() {
            return Err(GraphError::InvalidInput("node id must not be empty".into()));
        }
        if node.labels.is_empty() {
            return Err(GraphError::InvalidInput(format!(
                "node {} must have at least one label",
                node.id
            )));
        }
        let label = node.combined_label();
        let label = label.as_str();

        let report = self
            .query(|g| async move {
                if !g.vertex_exists(&node.id).await? {
                    g.add_vertex(&node.id, label).await?;
                    tracing::debug!(id = %node.id, label, "Vertex created");
                }
                reconcile(g.as_ref(), ElementRef::Vertex(&node.id), &node.properties).await
            })
            .await?;

        tracing::debug!(id = %node.id, removed = ?report.removed, "Node saved");
        Ok(())
    }

    /// Delete a node: incoming edges, then outgoing edges, then the vertex.
    pub async fn delete_node(&self, id: &str) -> Result<(), GraphError> {
        self.query(|g| async move {
            g.drop_edges(id, Direction::In).await?;
            g.drop_edges(id, Direction::Out).await?;
            g.drop_vertex(id).await
        })
        .await?;

        tracing::debug!(id, "Node deleted");
        Ok(())
    }

    // ── Edges ────────────────────────────────────────────────────

    /// Create or update an edge.
    pub async fn save_edge(&self, edge: &Edge) -> Result<(), GraphError> {
        if edge.id.is_empty() {
            return Err(GraphError::InvalidInput("edge id must not be empty".into()));
        }

        let report = self
            .query(|g| async move {
                if !g.edge_exists(&edge.id).await? {
                    g.add_edge(&edge.id, &edge.label, &edge.from, &edge.to).await?;
                    tracing::debug!(
                        id = %edge.id,
                        label = %edge.label,
                        from = %edge.from,
                        to = %edge.to,
                        "Edge created"
                    );
                }
                reconcile(g.as_ref(), ElementRef::Edge(&edge.id), &edge.properties).await
            })
            .await?;

        tracing::debug!(id = %edge.id, removed = ?report.removed, "Edge saved");
        Ok(())
    }

    /// Delete an edge by id.
    pub async fn delete_edge(&self, id: &str) -> Result<(), GraphError> {
        self.query(|g| async move { g.drop_edge(id).await }).await?;

        tracing::debug!(id, "Edge deleted");
        Ok(())
    }
}
