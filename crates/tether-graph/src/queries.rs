//! Subgraph search and extraction of raw element maps into nodes and edges.

use std::collections::HashSet;

use serde_json::Value;
use tether_core::{Edge, Node, Properties, SearchOptions, Subgraph};

use crate::client::{Connection, GraphError};
use crate::traversal::{ElementKey, RawElement, RawSubgraph};

impl Connection {
    /// Fetch the focus neighbourhood (or the whole graph) as nodes and edges.
    ///
    /// Edges whose endpoints are not both among the returned nodes are
    /// dropped.
    pub async fn search(&self, options: &SearchOptions) -> Result<Subgraph, GraphError> {
        let focus = options.focus.as_ref();
        let raw = self
            .query(|g| async move { g.fetch_subgraph(focus).await })
            .await?;

        let result = extract_subgraph(raw);
        tracing::debug!(
            focused = focus.is_some(),
            nodes = result.nodes.len(),
            edges = result.edges.len(),
            "Search complete"
        );
        Ok(result)
    }
}

/// Turn raw element maps into a consistent subgraph.
pub fn extract_subgraph(raw: RawSubgraph) -> Subgraph {
    let nodes: Vec<Node> = raw.vertices.iter().filter_map(extract_node).collect();
    let node_ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();

    let mut edges = Vec::with_capacity(raw.edges.len());
    for edge in raw.edges.iter().filter_map(extract_edge) {
        if node_ids.contains(edge.from.as_str()) && node_ids.contains(edge.to.as_str()) {
            edges.push(edge);
        } else {
            tracing::debug!(
                id = %edge.id,
                from = %edge.from,
                to = %edge.to,
                "Dropping edge with endpoint outside result set"
            );
        }
    }

    Subgraph { nodes, edges }
}

/// Extract a node. Single-element property lists are unwrapped.
pub fn extract_node(raw: &RawElement) -> Option<Node> {
    let Some(id) = raw.get(&ElementKey::Id).map(value_to_string) else {
        tracing::warn!("Skipping vertex without id");
        return None;
    };

    let labels = match raw.get(&ElementKey::Label) {
        Some(Value::Array(items)) => items.iter().map(value_to_string).collect(),
        Some(label) => vec![value_to_string(label)],
        None => Vec::new(),
    };

    let properties = raw
        .iter()
        .filter_map(|(key, value)| match key {
            ElementKey::Property(name) => Some((name.clone(), unwrap_single(value))),
            _ => None,
        })
        .collect();

    Some(Node {
        id,
        labels,
        properties,
    })
}

/// Extract an edge. Property values are kept verbatim.
pub fn extract_edge(raw: &RawElement) -> Option<Edge> {
    let field = |key: &ElementKey| raw.get(key).map(value_to_string);

    let (Some(id), Some(from), Some(to)) = (
        field(&ElementKey::Id),
        field(&ElementKey::FromVertex),
        field(&ElementKey::ToVertex),
    ) else {
        tracing::warn!(id = ?raw.get(&ElementKey::Id), "Skipping edge without id or endpoints");
        return None;
    };

    let properties: Properties = raw
        .iter()
        .filter_map(|(key, value)| match key {
            ElementKey::Property(name) => Some((name.clone(), value.clone())),
            _ => None,
        })
        .collect();

    Some(Edge {
        id,
        label: field(&ElementKey::Label).unwrap_or_default(),
        from,
        to,
        properties,
    })
}

fn unwrap_single(value: &Value) -> Value {
    match value {
        Value::Array(items) if items.len() == 1 => items[0].clone(),
        other => other.clone(),
    }
}

/// Identifiers and labels may come back as strings or numbers.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
