use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Graph store connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStoreConfig {
    #[serde(default = "d_transport")]
    pub transport: GraphTransport,
    /// Base URL of the knowledge-graph MCP server.
    #[serde(default = "d_graph_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Per-request timeout. Bounds individual sync attempts, not the
    /// reconciliation as a whole.
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
    /// When set, loads return fresh defaults and saves are skipped entirely.
    /// For tests and throwaway runs that must not touch durable state.
    #[serde(default)]
    pub ephemeral: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphTransport {
    Mcp,
    Memory,
}

impl Default for GraphStoreConfig {
    fn default() -> Self {
        Self {
            transport: d_transport(),
            base_url: d_graph_url(),
            api_key: None,
            timeout_ms: d_timeout_ms(),
            ephemeral: false,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_transport() -> GraphTransport {
    GraphTransport::Mcp
}
fn d_graph_url() -> String {
    "http://localhost:3100".into()
}
fn d_timeout_ms() -> u64 {
    8000
}
