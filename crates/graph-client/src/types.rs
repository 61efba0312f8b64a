//! Wire types for the knowledge-graph MCP server.
//!
//! Field names use `camelCase` on the wire (matching the reference
//! knowledge-graph server) and `snake_case` in Rust code via
//! `#[serde(rename_all = "camelCase")]`.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entities
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A node in the knowledge graph.
///
/// Observations are an append-only log of `"key: value"` lines; readers take
/// the last occurrence of a key, so re-emitting state is harmless.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub name: String,
    pub entity_type: String,
    #[serde(default)]
    pub observations: Vec<String>,
}

impl Entity {
    /// The last `"key: value"` observation for `key`, if any.
    pub fn observation(&self, key: &str) -> Option<&str> {
        let prefix = format!("{key}: ");
        self.observations
            .iter()
            .rev()
            .find_map(|o| o.strip_prefix(prefix.as_str()))
    }
}

/// Result body of `open_nodes` and `search_nodes`. The server also returns a
/// `relations` array; sessions never use relations, so it is not modeled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphView {
    #[serde(default)]
    pub entities: Vec<Entity>,
}

/// Request body for `add_observations`: one target entity plus the lines
/// to append.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationAppend {
    pub entity_name: String,
    pub contents: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_wire_form_is_camel_case() {
        let entity = Entity {
            name: "sess_1".into(),
            entity_type: "session".into(),
            observations: vec!["current_phase: QUERY".into()],
        };
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["entityType"], "session");
    }

    #[test]
    fn last_observation_wins() {
        let entity = Entity {
            name: "sess_1".into(),
            entity_type: "session".into(),
            observations: vec![
                "current_phase: QUERY".into(),
                "role: coder".into(),
                "current_phase: ENHANCE".into(),
            ],
        };
        assert_eq!(entity.observation("current_phase"), Some("ENHANCE"));
        assert_eq!(entity.observation("role"), Some("coder"));
        assert_eq!(entity.observation("missing"), None);
    }
}
