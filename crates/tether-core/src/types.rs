//! Core domain types for graphs read from and written to the remote engine.
//!
//! These are plain DTOs: built fresh from every search result or supplied
//! by the caller on every write. Nothing here is cached.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Property mapping shared by nodes and edges.
pub type Properties = BTreeMap<String, serde_json::Value>;

/// Separator used to store an ordered label set as one combined vertex label.
pub const LABEL_SEPARATOR: &str = "::";

// ── Nodes ─────────────────────────────────────────────────────────

/// A vertex in the remote graph.
///
/// `id` and `labels` are fixed once the vertex exists; only `properties`
/// converge on later saves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: String,
    pub labels: Vec<String>,
    #[serde(default)]
    pub properties: Properties,
}

impl Node {
    /// Create a node with a random identifier.
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: Uuid::new_v4().to_string(),
            labels: labels.into_iter().map(Into::into).collect(),
            properties: Properties::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// The single label the vertex is stored under.
    pub fn combined_label(&self) -> String {
        self.labels.join(LABEL_SEPARATOR)
    }
}

// ── Edges ─────────────────────────────────────────────────────────

/// A directed, labeled relationship between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub id: String,
    pub label: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub properties: Properties,
}

impl Edge {
    /// Create an edge with a random identifier.
    pub fn new(label: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            from: from.into(),
            to: to.into(),
            properties: Properties::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

// ── Search ────────────────────────────────────────────────────────

/// Result of a subgraph search. Every edge has both endpoints in `nodes`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Subgraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Subgraph {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// Anchor vertex for a focus search, matched by label and one property.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Focus {
    pub label: String,
    pub key: String,
    pub value: serde_json::Value,
}

impl Focus {
    pub fn new(
        label: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            label: label.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Options for `search`. No focus means the whole graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchOptions {
    pub focus: Option<Focus>,
}

impl SearchOptions {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn focused(focus: Focus) -> Self {
        Self { focus: Some(focus) }
    }
}
