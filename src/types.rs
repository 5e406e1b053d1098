//! Data model shared across the engine: search requests, indexed chunks,
//! index metadata, and evidence packs.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Retrieval mode for a search request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchMode {
    KeywordOnly,
    SemanticOnly,
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::KeywordOnly => "keyword-only",
            SearchMode::SemanticOnly => "semantic-only",
            SearchMode::Hybrid => "hybrid",
        }
    }

    pub fn parse(value: &str) -> Option<SearchMode> {
        match value {
            "keyword-only" => Some(SearchMode::KeywordOnly),
            "semantic-only" => Some(SearchMode::SemanticOnly),
            "hybrid" => Some(SearchMode::Hybrid),
            _ => None,
        }
    }
}

/// Policy filters applied during ranking
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// "any" (default) or "all"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag_mode: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub project: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub doc_type: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub date_from: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub date_to: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub confidentiality_allow: Vec<String>,
    #[serde(default)]
    pub allow_restricted: bool,
}

/// A search request against the knowledge base
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub profile_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<SearchMode>,
    #[serde(default)]
    pub top_k: u32,
    #[serde(default)]
    pub filters: SearchFilters,
}

/// Exact chunk identity within one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub source_path: String,
    pub chunk_ordinal: u32,
}

/// Chunk location within the document body. Offsets are byte offsets,
/// inclusive start / exclusive end, block-granular when one accumulated
/// block produced multiple sub-chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLoc {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub heading_path: String,
    pub start_char: usize,
    pub end_char: usize,
}

/// Per-item score components surfaced for audit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub bm25_norm: f64,
    pub cosine_norm: f64,
    pub freshness_norm: f64,
    pub metadata_boost: f64,
    pub final_score: f64,
}

/// One evidence item in the full (audit/CLI) view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItemFull {
    pub source_path: String,
    pub chunk_ref: ChunkRef,
    pub chunk_loc: ChunkLoc,
    pub document_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub date: String,
    pub snippet: String,
    pub score: f64,
    pub score_breakdown: ScoreBreakdown,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

/// Result-set coverage summary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Coverage {
    pub unique_sources: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_span: Option<TimeSpan>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSpan {
    pub from: String,
    pub to: String,
}

/// Index build metadata persisted alongside the chunks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexInfo {
    pub index_version: String,
    pub index_state: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub index_provider: String,
    pub built_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub embedding_model_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chunking_hash: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub total_documents: usize,
    pub total_chunks: usize,
}

/// Full evidence pack for audit and CLI display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidencePackFull {
    pub query: String,
    pub profile_id: String,
    pub index_info: IndexInfo,
    pub items: Vec<EvidenceItemFull>,
    pub coverage: Coverage,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

/// One evidence item in the compact LLM view: `ref` is `"{alias}#{ordinal}"`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItemLlm {
    #[serde(rename = "ref")]
    pub chunk_ref: String,
    pub snippet: String,
    pub score: f64,
}

/// Compact evidence pack for tool consumption: source paths are replaced
/// with aliases (`S1`, `S2`, ...) to keep token cost predictable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidencePackLlm {
    pub query: String,
    pub profile_id: String,
    pub sources: std::collections::BTreeMap<String, String>,
    pub items: Vec<EvidenceItemLlm>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

/// Both views of a search result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub full: EvidencePackFull,
    pub llm: EvidencePackLlm,
}

/// Unit of retrieval: a located, normalized fragment of one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub source_path: String,
    pub chunk_ordinal: u32,
    pub chunk_loc: ChunkLoc,
    pub document_version: String,
    pub paragraph_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub date: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub confidentiality: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub doc_type: String,
    pub text: String,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    #[serde(default)]
    pub risk_score: f64,
}

/// Full text of a fetched chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResult {
    pub source_path: String,
    pub chunk_ordinal: u32,
    pub chunk_loc: ChunkLoc,
    pub text: String,
    pub snippet: String,
}

/// Serialized form of the simple JSON provider's state file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub info: IndexInfo,
    pub chunks: Vec<IndexedChunk>,
}

/// Parse an ISO date: `YYYY-MM-DD` or RFC-3339. Unparseable values are
/// treated as absent by filtering and scoring.
pub fn parse_iso_date(value: &str) -> Option<DateTime<Utc>> {
    if value.is_empty() {
        return None;
    }
    if let Ok(d) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
