//! tether-core: Shared types, configuration, and error handling for Tether.
//!
//! This crate provides the foundational pieces used by the graph layer:
//! - Node, Edge, and Subgraph DTOs
//! - Search options (whole graph or focus vertex)
//! - Configuration loading
//! - Common error types

pub mod config;
pub mod error;
pub mod types;

pub use config::{ConnectionConfig, RetryConfig, TetherConfig};
pub use error::TetherError;
pub use types::{Edge, Focus, Node, Properties, SearchOptions, Subgraph, LABEL_SEPARATOR};
