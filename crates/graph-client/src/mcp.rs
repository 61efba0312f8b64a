//! MCP (Model Context Protocol) implementation of [`GraphStore`].
//!
//! `McpGraphClient` translates the `GraphStore` trait into MCP `tools/call`
//! requests against a knowledge-graph MCP server.
//!
//! # MCP Tool Mapping
//!
//! | Store method          | MCP tool name      |
//! |-----------------------|--------------------|
//! | `read_entity`         | `open_nodes`       |
//! | `upsert_entity`       | `create_entities`  |
//! | `append_observations` | `add_observations` |
//! | `search_entities`     | `search_nodes`     |

use std::time::{Duration, Instant};

use async_trait::async_trait;
use baton_domain::config::GraphStoreConfig;
use baton_domain::error::{Error, Result};
use baton_domain::trace::TraceEvent;
use reqwest::Client;
use uuid::Uuid;

use crate::store::GraphStore;
use crate::types::{Entity, GraphView, ObservationAppend};

/// An MCP-based client for a knowledge-graph server.
///
/// Sends JSON-RPC 2.0 requests over HTTP to the MCP endpoint. Each
/// `GraphStore` method maps to a specific MCP tool invocation.
#[derive(Debug, Clone)]
pub struct McpGraphClient {
    http: Client,
    /// MCP endpoint URL (e.g. `http://localhost:3100/mcp`).
    mcp_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

/// JSON-RPC 2.0 request envelope for MCP `tools/call`.
#[derive(Debug, serde::Serialize)]
struct McpRequest {
    jsonrpc: &'static str,
    id: String,
    method: &'static str,
    params: McpCallParams,
}

#[derive(Debug, serde::Serialize)]
struct McpCallParams {
    name: String,
    arguments: serde_json::Value,
}

/// JSON-RPC 2.0 response envelope.
#[derive(Debug, serde::Deserialize)]
struct McpResponse {
    #[allow(dead_code)]
    id: String,
    result: Option<McpToolResult>,
    error: Option<McpError>,
}

#[derive(Debug, serde::Deserialize)]
struct McpToolResult {
    content: Vec<McpContent>,
}

#[derive(Debug, serde::Deserialize)]
struct McpContent {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct McpError {
    code: i64,
    message: String,
}

impl McpGraphClient {
    /// Build a new MCP client from the shared `GraphStoreConfig`.
    pub fn new(cfg: &GraphStoreConfig) -> Result<Self> {
        let mcp_url = format!("{}/mcp", cfg.base_url.trim_end_matches('/'));

        let timeout = Duration::from_millis(cfg.timeout_ms);
        let mut builder = Client::builder();
        if !timeout.is_zero() {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            http,
            mcp_url,
            api_key: cfg.api_key.clone(),
            timeout,
        })
    }

    /// The configured request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Call an MCP tool and return the parsed text content.
    async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let started = Instant::now();
        let outcome = self.call_tool_inner(tool_name, arguments).await;
        TraceEvent::GraphCall {
            tool: tool_name.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            ok: outcome.is_ok(),
        }
        .emit();
        outcome
    }

    async fn call_tool_inner(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let request = McpRequest {
            jsonrpc: "2.0",
            id: Uuid::new_v4().to_string(),
            method: "tools/call",
            params: McpCallParams {
                name: tool_name.to_string(),
                arguments,
            },
        };

        let mut rb = self.http.post(&self.mcp_url).json(&request);

        if let Some(ref key) = self.api_key {
            rb = rb.header("X-Api-Key", key);
        }

        let resp = rb.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("MCP {tool_name}: {e}"))
            } else {
                Error::Http(format!("MCP {tool_name}: {e}"))
            }
        })?;

        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::Auth(format!("MCP {tool_name} HTTP {status}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Graph(format!(
                "MCP {tool_name} HTTP {status}: {body}"
            )));
        }

        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        let mcp_resp: McpResponse = serde_json::from_str(&body).map_err(|e| {
            Error::Graph(format!("MCP {tool_name} response parse error: {e}: {body}"))
        })?;

        if let Some(err) = mcp_resp.error {
            return Err(Error::Graph(format!(
                "MCP {tool_name} error {}: {}",
                err.code, err.message
            )));
        }

        let result = mcp_resp
            .result
            .ok_or_else(|| Error::Graph(format!("MCP {tool_name}: empty result")))?;

        // Extract the text content from the first content block.
        let text = result
            .content
            .into_iter()
            .find_map(|c| c.text)
            .unwrap_or_else(|| "{}".to_string());

        if text.is_empty() {
            tracing::debug!("MCP {tool_name}: empty text content, returning null");
            return Ok(serde_json::Value::Null);
        }

        serde_json::from_str(&text).map_err(|e| {
            tracing::warn!(
                tool = %tool_name,
                text_len = text.len(),
                text_start = %text.chars().take(200).collect::<String>(),
                error = %e,
                "MCP content parse error"
            );
            Error::Graph(format!("MCP {tool_name} content parse error: {e}"))
        })
    }
}

#[async_trait]
impl GraphStore for McpGraphClient {
    async fn read_entity(&self, name: &str) -> Result<Option<Entity>> {
        let val = self
            .call_tool("open_nodes", serde_json::json!({ "names": [name] }))
            .await?;
        if val.is_null() {
            return Ok(None);
        }
        let view: GraphView = serde_json::from_value(val)
            .map_err(|e| Error::Graph(format!("open_nodes parse: {e}")))?;
        Ok(view.entities.into_iter().find(|e| e.name == name))
    }

    async fn upsert_entity(
        &self,
        name: &str,
        entity_type: &str,
        observations: Vec<String>,
    ) -> Result<()> {
        let entity = Entity {
            name: name.to_string(),
            entity_type: entity_type.to_string(),
            observations,
        };
        self.call_tool("create_entities", serde_json::json!({ "entities": [entity] }))
            .await?;
        Ok(())
    }

    async fn append_observations(&self, name: &str, observations: Vec<String>) -> Result<()> {
        let append = ObservationAppend {
            entity_name: name.to_string(),
            contents: observations,
        };
        self.call_tool(
            "add_observations",
            serde_json::json!({ "observations": [append] }),
        )
        .await?;
        Ok(())
    }

    async fn search_entities(&self, query: &str) -> Result<Vec<Entity>> {
        let val = self
            .call_tool("search_nodes", serde_json::json!({ "query": query }))
            .await?;
        if val.is_null() {
            return Ok(Vec::new());
        }
        let view: GraphView = serde_json::from_value(val)
            .map_err(|e| Error::Graph(format!("search_nodes parse: {e}")))?;
        Ok(view.entities)
    }
}
