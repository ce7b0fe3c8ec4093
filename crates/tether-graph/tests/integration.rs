//! End-to-end tests for tether-graph against the in-process MemoryGraph.
//!
//! Run with: cargo test --package tether-graph --test integration
//! Set RUST_LOG=tether_graph=debug to see retry and reconnect logging.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tether_core::{ConnectionConfig, Edge, Focus, Node, SearchOptions, TetherConfig};
use tether_graph::{
    Connection, ConnectionManager, ConnectionState, GraphError, MemoryGraph, QueryRetryPolicy,
    TraversalError, TraversalErrorKind,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn connect(graph: &MemoryGraph) -> Connection {
    init_tracing();
    let manager = ConnectionManager::new(Arc::new(graph.clone()), ConnectionConfig::default());
    let conn = Connection::new(manager, QueryRetryPolicy::new(5, Duration::ZERO));
    conn.connect().await.unwrap();
    conn
}

fn person(id: &str, name: &str) -> Node {
    Node::new(["person"]).with_id(id).with_property("name", name)
}

#[tokio::test]
async fn test_save_node_create_then_update() {
    let graph = MemoryGraph::new();
    let conn = connect(&graph).await;

    conn.save_node(&person("v1", "Eric")).await.unwrap();
    let result = conn.search(&SearchOptions::all()).await.unwrap();
    let node = result.node("v1").unwrap();
    assert_eq!(node.labels, vec!["person"]);
    assert_eq!(node.properties["name"], json!("Eric"));

    conn.save_node(&person("v1", "Erik")).await.unwrap();
    let result = conn.search(&SearchOptions::all()).await.unwrap();
    assert_eq!(result.nodes.len(), 1);
    let node = result.node("v1").unwrap();
    assert_eq!(node.labels, vec!["person"]);
    assert_eq!(node.properties["name"], json!("Erik"));
}

#[tokio::test]
async fn test_save_node_removes_dropped_properties() {
    let graph = MemoryGraph::new();
    let conn = connect(&graph).await;

    let full = person("v1", "Eric").with_property("age", 41).with_property("city", "Oslo");
    conn.save_node(&full).await.unwrap();
    conn.save_node(&person("v1", "Eric")).await.unwrap();

    let result = conn.search(&SearchOptions::all()).await.unwrap();
    let props = &result.node("v1").unwrap().properties;
    assert_eq!(props.len(), 1);
    assert_eq!(props["name"], json!("Eric"));
}

#[tokio::test]
async fn test_save_edge_then_search() {
    let graph = MemoryGraph::new();
    let conn = connect(&graph).await;
    conn.save_node(&person("v1", "Eric")).await.unwrap();
    conn.save_node(&Node::new(["car"]).with_id("v2")).await.unwrap();

    let edge = Edge::new("owns", "v1", "v2").with_id("e1").with_property("since", 2020);
    conn.save_edge(&edge).await.unwrap();

    let result = conn.search(&SearchOptions::all()).await.unwrap();
    assert_eq!(result.edges, vec![edge]);
}

#[tokio::test]
async fn test_save_edge_with_missing_endpoint_fails_without_retry() {
    let graph = MemoryGraph::new();
    let conn = connect(&graph).await;
    conn.save_node(&person("v1", "Eric")).await.unwrap();

    let err = conn
        .save_edge(&Edge::new("owns", "v1", "v2").with_id("e1"))
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::NonRetryable(_)));

    let result = conn.search(&SearchOptions::all()).await.unwrap();
    assert!(result.edges.is_empty());
}

#[tokio::test]
async fn test_delete_node_then_search() {
    let graph = MemoryGraph::new();
    let conn = connect(&graph).await;
    conn.save_node(&person("v1", "Eric")).await.unwrap();
    conn.save_node(&person("v2", "Ann")).await.unwrap();
    conn.save_node(&person("v3", "Bo")).await.unwrap();
    conn.save_edge(&Edge::new("knows", "v1", "v2").with_id("e1")).await.unwrap();
    conn.save_edge(&Edge::new("knows", "v3", "v1").with_id("e2")).await.unwrap();
    conn.save_edge(&Edge::new("knows", "v2", "v3").with_id("e3")).await.unwrap();

    conn.delete_node("v1").await.unwrap();

    let result = conn.search(&SearchOptions::all()).await.unwrap();
    assert!(result.node("v1").is_none());
    assert!(result.edges.iter().all(|e| e.from != "v1" && e.to != "v1"));
    assert_eq!(result.edges.len(), 1);
}

#[tokio::test]
async fn test_focus_search_returns_neighbourhood() {
    let graph = MemoryGraph::new();
    let conn = connect(&graph).await;
    for (id, name) in [("v1", "Eric"), ("v2", "Ann"), ("v3", "Bo"), ("v4", "Cy")] {
        conn.save_node(&person(id, name)).await.unwrap();
    }
    conn.save_edge(&Edge::new("knows", "v1", "v2").with_id("e1")).await.unwrap();
    conn.save_edge(&Edge::new("knows", "v3", "v1").with_id("e2")).await.unwrap();
    conn.save_edge(&Edge::new("knows", "v3", "v4").with_id("e3")).await.unwrap();

    let result = conn
        .search(&SearchOptions::focused(Focus::new("person", "name", "Eric")))
        .await
        .unwrap();

    let mut node_ids: Vec<&str> = result.nodes.iter().map(|n| n.id.as_str()).collect();
    node_ids.sort();
    assert_eq!(node_ids, vec!["v1", "v2", "v3"]);
    let mut edge_ids: Vec<&str> = result.edges.iter().map(|e| e.id.as_str()).collect();
    edge_ids.sort();
    assert_eq!(edge_ids, vec!["e1", "e2"]);
}

#[tokio::test]
async fn test_focus_without_match_is_empty() {
    let graph = MemoryGraph::new();
    let conn = connect(&graph).await;
    conn.save_node(&person("v1", "Eric")).await.unwrap();

    let result = conn
        .search(&SearchOptions::focused(Focus::new("person", "name", "Nobody")))
        .await
        .unwrap();
    assert!(result.is_empty());
}

#[tokio::test]
async fn test_remote_close_is_recovered_transparently() {
    let graph = MemoryGraph::new();
    let conn = connect(&graph).await;
    conn.save_node(&person("v1", "Eric")).await.unwrap();

    graph.drop_connection(1000, "idle timeout");
    assert_eq!(conn.state().await, ConnectionState::Disconnected);

    conn.save_node(&person("v1", "Erik")).await.unwrap();
    assert_eq!(graph.open_count(), 2);
    assert_eq!(conn.state().await, ConnectionState::Connected);
    assert_eq!(graph.vertex_properties("v1").unwrap()["name"], json!("Erik"));
}

#[tokio::test]
async fn test_persistent_conflict_exhausts_retries() {
    let graph = MemoryGraph::new();
    let conn = connect(&graph).await;
    for _ in 0..5 {
        graph.fail_next(TraversalError::from_message(
            "ConcurrentModificationException: conflicting write",
        ));
    }

    let err = conn.search(&SearchOptions::all()).await.unwrap_err();
    match err {
        GraphError::RetryExhausted { attempts, source } => {
            assert_eq!(attempts, 5);
            assert_eq!(source.kind, TraversalErrorKind::ConcurrentModification);
        }
        other => panic!("expected RetryExhausted, got {other:?}"),
    }
    assert_eq!(graph.traversal_calls(), 5);
}

#[tokio::test]
async fn test_query_runs_caller_traversal() {
    let graph = MemoryGraph::new();
    let conn = Connection::open(Arc::new(graph.clone()), &TetherConfig::default())
        .await
        .unwrap();
    conn.save_node(&person("v1", "Eric")).await.unwrap();

    let exists = conn
        .query(|g| async move { g.vertex_exists("v1").await })
        .await
        .unwrap();
    assert!(exists);
}
