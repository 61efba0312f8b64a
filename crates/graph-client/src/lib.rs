//! Knowledge-graph store client for Baton.
//!
//! Provides the [`GraphStore`] trait that abstracts over the knowledge-graph
//! server sessions are persisted to, an MCP implementation
//! ([`McpGraphClient`]), an in-memory implementation for tests and local
//! runs ([`InMemoryGraphStore`]), and the wire DTOs.
//!
//! # Transport selection
//!
//! Use [`create_store`] to build the right implementation from the
//! `graph_store.transport` config field:
//!
//! | Transport | Implementation       | Best for              |
//! |-----------|----------------------|-----------------------|
//! | `mcp`     | `McpGraphClient`     | Production (default)  |
//! | `memory`  | `InMemoryGraphStore` | Tests, throwaway runs |
//!
//! # Quick start
//!
//! ```rust,no_run
//! use baton_domain::config::GraphStoreConfig;
//! use baton_graph::{GraphStore, McpGraphClient};
//!
//! # async fn example() -> baton_domain::error::Result<()> {
//! let cfg = GraphStoreConfig::default();
//! let client = McpGraphClient::new(&cfg)?;
//!
//! let entity = client.read_entity("session_abc").await?;
//! println!("found: {}", entity.is_some());
//! # Ok(())
//! # }
//! ```

pub mod mcp;
pub mod memory;
pub mod store;
pub mod types;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use mcp::McpGraphClient;
pub use memory::InMemoryGraphStore;
pub use store::GraphStore;
pub use types::{Entity, GraphView, ObservationAppend};

use std::sync::Arc;

use baton_domain::config::{GraphStoreConfig, GraphTransport};
use baton_domain::error::Result;

/// Create the appropriate [`GraphStore`] for the configured transport.
pub fn create_store(cfg: &GraphStoreConfig) -> Result<Arc<dyn GraphStore>> {
    match cfg.transport {
        GraphTransport::Mcp => {
            let client = McpGraphClient::new(cfg)?;
            tracing::info!(base_url = %cfg.base_url, "using MCP transport for the graph store");
            Ok(Arc::new(client))
        }
        GraphTransport::Memory => {
            tracing::info!("using in-memory graph store");
            Ok(Arc::new(InMemoryGraphStore::new()))
        }
    }
}
