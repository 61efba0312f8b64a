//! In-memory implementation of [`GraphStore`] for tests and local runs.

use std::collections::HashMap;

use async_trait::async_trait;
use baton_domain::error::{Error, Result};
use parking_lot::RwLock;

use crate::store::GraphStore;
use crate::types::Entity;

/// A process-local graph store.
///
/// Observation logs are append-only and upserts skip existing entities,
/// matching the semantics of the real server.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    entities: RwLock<HashMap<String, Entity>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn read_entity(&self, name: &str) -> Result<Option<Entity>> {
        Ok(self.entities.read().get(name).cloned())
    }

    async fn upsert_entity(
        &self,
        name: &str,
        entity_type: &str,
        observations: Vec<String>,
    ) -> Result<()> {
        let mut entities = self.entities.write();
        entities.entry(name.to_string()).or_insert_with(|| Entity {
            name: name.to_string(),
            entity_type: entity_type.to_string(),
            observations,
        });
        Ok(())
    }

    async fn append_observations(&self, name: &str, observations: Vec<String>) -> Result<()> {
        let mut entities = self.entities.write();
        match entities.get_mut(name) {
            Some(entity) => {
                entity.observations.extend(observations);
                Ok(())
            }
            None => Err(Error::Graph(format!("no such entity: {name}"))),
        }
    }

    async fn search_entities(&self, query: &str) -> Result<Vec<Entity>> {
        let entities = self.entities.read();
        let query = query.to_lowercase();
        let mut hits: Vec<Entity> = entities
            .values()
            .filter(|e| {
                e.name.to_lowercase().contains(&query)
                    || e.entity_type.to_lowercase().contains(&query)
                    || e.observations
                        .iter()
                        .any(|o| o.to_lowercase().contains(&query))
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_skips_existing_entities() {
        let store = InMemoryGraphStore::new();
        store
            .upsert_entity("sess_1", "session", vec!["role: coder".into()])
            .await
            .unwrap();
        store
            .upsert_entity("sess_1", "session", vec!["role: planner".into()])
            .await
            .unwrap();

        let entity = store.read_entity("sess_1").await.unwrap().unwrap();
        assert_eq!(entity.observation("role"), Some("coder"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn appends_accumulate_and_last_wins() {
        let store = InMemoryGraphStore::new();
        store
            .upsert_entity("sess_1", "session", vec!["current_phase: INIT".into()])
            .await
            .unwrap();
        store
            .append_observations("sess_1", vec!["current_phase: QUERY".into()])
            .await
            .unwrap();

        let entity = store.read_entity("sess_1").await.unwrap().unwrap();
        assert_eq!(entity.observations.len(), 2);
        assert_eq!(entity.observation("current_phase"), Some("QUERY"));
    }

    #[tokio::test]
    async fn append_to_missing_entity_errors() {
        let store = InMemoryGraphStore::new();
        let err = store
            .append_observations("ghost", vec!["x: y".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Graph(_)));
    }

    #[tokio::test]
    async fn search_matches_names_and_observations() {
        let store = InMemoryGraphStore::new();
        store
            .upsert_entity("sess_1_task_a", "task", vec!["content: ship it".into()])
            .await
            .unwrap();
        store
            .upsert_entity("other", "session", vec![])
            .await
            .unwrap();

        let by_name = store.search_entities("sess_1_task").await.unwrap();
        assert_eq!(by_name.len(), 1);

        let by_observation = store.search_entities("ship").await.unwrap();
        assert_eq!(by_observation.len(), 1);
        assert_eq!(by_observation[0].name, "sess_1_task_a");
    }
}
