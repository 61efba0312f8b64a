//! The `GraphStore` trait defines the interface for all knowledge-graph
//! backends (MCP, in-memory test double).

use async_trait::async_trait;
use baton_domain::error::Result;

use crate::types::Entity;

/// Abstraction over the knowledge-graph surface the engine persists to.
///
/// Implementations may talk to a real MCP server or a test double. All
/// methods return `baton_domain::error::Result`.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Fetch a single entity by exact name (`open_nodes`).
    async fn read_entity(&self, name: &str) -> Result<Option<Entity>>;

    /// Create an entity if it does not already exist (`create_entities`).
    /// Existing entities are left untouched, so replays are harmless.
    async fn upsert_entity(
        &self,
        name: &str,
        entity_type: &str,
        observations: Vec<String>,
    ) -> Result<()>;

    /// Append observation lines to an existing entity (`add_observations`).
    async fn append_observations(&self, name: &str, observations: Vec<String>) -> Result<()>;

    /// Full-text match over names, types and observations (`search_nodes`).
    /// Eventually consistent on real servers.
    async fn search_entities(&self, query: &str) -> Result<Vec<Entity>>;
}
