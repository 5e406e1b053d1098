//! LLM tool wrapper over the search service: strict input schema, tool-safe
//! limits, and compact JSON output to keep context predictable for
//! downstream reasoning.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::service::Service;
use crate::types::{SearchFilters, SearchMode, SearchRequest};

const TOOL_TOP_K_DEFAULT: u32 = 10;
const TOOL_TOP_K_MAX: u32 = 20;

/// Result of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub ok: bool,
    pub content: String,
}

impl ToolResult {
    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            content: message.into(),
        }
    }

    fn success(content: impl Into<String>) -> Self {
        Self {
            ok: true,
            content: content.into(),
        }
    }
}

pub struct SearchTool {
    service: Arc<Service>,
}

impl SearchTool {
    pub fn new(service: Arc<Service>) -> Self {
        Self { service }
    }

    /// Stable tool identifier required by prompts and registry wiring.
    pub fn name(&self) -> &'static str {
        "rag_search"
    }

    pub fn description(&self) -> &'static str {
        "Search the local knowledge base and return a compact evidence pack for LLM use"
    }

    /// Strict input schema so invalid calls fail early instead of producing
    /// ambiguous retrieval behavior.
    pub fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                },
                "profile_id": {
                    "type": "string",
                    "description": "Fixed profile id: default_research, decisions_recent, templates_lookup"
                },
                "mode": {
                    "type": "string",
                    "enum": ["keyword-only", "semantic-only", "hybrid"],
                    "description": "Retrieval mode"
                },
                "top_k": {
                    "type": "integer",
                    "description": "Number of results (tool max 20)"
                },
                "filters": {
                    "type": "object",
                    "description": "Optional filters"
                }
            },
            "required": ["query"]
        })
    }

    pub async fn execute(&self, ctx: &CancellationToken, args: &Value) -> ToolResult {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim();
        if query.is_empty() {
            return ToolResult::error("query is required");
        }

        let mut req = SearchRequest {
            query: query.to_string(),
            ..Default::default()
        };
        if let Some(profile) = args.get("profile_id").and_then(Value::as_str) {
            req.profile_id = profile.to_string();
        }
        if let Some(mode) = args.get("mode").and_then(Value::as_str) {
            req.mode = SearchMode::parse(mode);
        }
        let top_k = args
            .get("top_k")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(TOOL_TOP_K_DEFAULT);
        req.top_k = top_k.clamp(1, TOOL_TOP_K_MAX);

        if let Some(filters) = args.get("filters").and_then(Value::as_object) {
            req.filters = parse_filters(filters);
        }

        match self.service.search(ctx, req).await {
            Ok(result) => match serde_json::to_string(&result.llm) {
                Ok(payload) => ToolResult::success(payload),
                Err(e) => ToolResult::error(format!("rag_search failed: {e}")),
            },
            Err(e) if e.is_queue_full() => ToolResult::error(format!(
                "busy/queue_full retry_after_seconds={}",
                self.service.retry_after_seconds()
            )),
            Err(e) => ToolResult::error(format!("rag_search failed: {e}")),
        }
    }
}

fn parse_filters(raw: &serde_json::Map<String, Value>) -> SearchFilters {
    SearchFilters {
        tags: string_list(raw.get("tags")),
        tag_mode: raw
            .get("tag_mode")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        project: string_list(raw.get("project")),
        doc_type: string_list(raw.get("doc_type")),
        date_from: raw
            .get("date_from")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        date_to: raw
            .get("date_to")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        confidentiality_allow: string_list(raw.get("confidentiality_allow")),
        allow_restricted: raw
            .get("allow_restricted")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
