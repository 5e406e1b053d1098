//! Service facade: walks the knowledge base, assembles indexed chunks, and
//! exposes `build_index` / `search` / `fetch_chunk` with admission control.
//!
//! The service centralizes runtime defaults so every entry point (CLI, tool
//! wrapper, watcher) gets identical behavior and reproducible scoring.

mod gate;

pub use gate::SearchGate;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::chunker::{normalize_text, split_markdown_chunks};
use crate::config::{resolve_workspace_path, ChunkingConfig, Config};
use crate::embedding::{new_embedder, Embedder};
use crate::error::{RagError, Result, RETRY_AFTER_SECONDS};
use crate::frontmatter::parse_frontmatter;
use crate::guardrails::{detect_injection_risk, safe_snippet};
use crate::index::{new_index_provider, IndexProvider, ProviderSearchOptions};
use crate::profiles::resolve_profile;
use crate::search::ranker;
use crate::search::tokenize;
use crate::types::{
    ChunkLoc, ChunkResult, IndexInfo, IndexedChunk, SearchMode, SearchRequest, SearchResult,
};

pub struct Service {
    workspace: PathBuf,
    kb_root: PathBuf,
    index_root: PathBuf,
    chunking: ChunkingConfig,
    default_profile_id: String,
    embedding_model_id: String,
    allow_external_embeddings: bool,
    provider: Arc<dyn IndexProvider>,
    gate: SearchGate,

    // Precomputed from engine.denylist_paths at construction
    deny_exact: HashSet<String>,
    deny_prefixes: Vec<String>,
}

impl Service {
    /// Construct a service with the embedder derived from config.
    pub fn new(workspace: &Path, config: &Config) -> Result<Self> {
        let embedder = new_embedder(
            &config.embedding.provider,
            &config.embedding.model_id,
            &config.embedding.api_base,
            &config.embedding_api_key(),
            config.embedding.allow_external,
        );
        Self::with_embedder(workspace, config, embedder)
    }

    /// Construct a service with an explicit embedder (or none). Lets tests
    /// inject a deterministic embedder that needs no API keys.
    pub fn with_embedder(
        workspace: &Path,
        config: &Config,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self> {
        let kb_root = resolve_workspace_path(workspace, &config.engine.kb_root);
        let index_root = resolve_workspace_path(workspace, &config.engine.index_root);

        let allow_external_embeddings = config.embedding.allow_external && embedder.is_some();
        let embedding_model_id = embedder
            .as_ref()
            .map(|e| e.model_id().to_string())
            .unwrap_or_default();
        let provider = new_index_provider(&config.engine.index_provider, &index_root, embedder)?;

        let mut svc = Self {
            workspace: workspace.to_path_buf(),
            kb_root,
            index_root,
            chunking: config.chunking.clone(),
            default_profile_id: config.engine.default_profile_id.clone(),
            embedding_model_id,
            allow_external_embeddings,
            provider,
            gate: SearchGate::new(
                config.engine.queue_size.max(1),
                config.engine.concurrency.max(1),
            ),
            deny_exact: HashSet::new(),
            deny_prefixes: Vec::new(),
        };
        svc.precompute_denylist(&config.engine.denylist_paths);
        Ok(svc)
    }

    pub fn kb_root(&self) -> &Path {
        &self.kb_root
    }

    pub fn index_root(&self) -> &Path {
        &self.index_root
    }

    pub fn provider(&self) -> &Arc<dyn IndexProvider> {
        &self.provider
    }

    /// Deterministic backoff hint for queue saturation.
    pub fn retry_after_seconds(&self) -> u32 {
        RETRY_AFTER_SECONDS
    }

    /// Stored index metadata, without loading chunks.
    pub fn index_info(&self) -> Result<IndexInfo> {
        self.provider.load_index_info()
    }

    /// Rebuild the searchable snapshot from KB files in one pass so
    /// retrieval and audits refer to the same index version.
    pub async fn build_index(&self, ctx: &CancellationToken) -> Result<IndexInfo> {
        let reports_dir = self.index_root.join("reports");
        std::fs::create_dir_all(&reports_dir)
            .map_err(|e| RagError::io(e, format!("create {}", reports_dir.display())))?;

        // Chunking is stateless IO; only the provider mutation below needs a
        // concurrency slot.
        let (chunks, info) = self.build_chunks_and_info(ctx)?;

        let _slot = self.gate.acquire_slot(ctx).await?;
        self.provider.build(ctx, chunks, info.clone()).await?;
        Ok(info)
    }

    /// Walk the KB and produce chunks + metadata without touching the
    /// provider. Used by full builds and by the watcher's in-memory rebuild.
    pub fn build_chunks_and_info(
        &self,
        ctx: &CancellationToken,
    ) -> Result<(Vec<IndexedChunk>, IndexInfo)> {
        let mut indexed_chunks: Vec<IndexedChunk> = Vec::with_capacity(512);
        let mut warnings: Vec<String> = Vec::new();
        let mut doc_count = 0usize;

        let abs_workspace = std::fs::canonicalize(&self.workspace)
            .unwrap_or_else(|_| self.workspace.clone());

        for entry in WalkDir::new(&self.kb_root).sort_by_file_name() {
            if ctx.is_cancelled() {
                return Err(RagError::Cancelled);
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warnings.push(format!("walk_error:{e}"));
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                continue;
            }
            let path = entry.path();
            let is_md = path
                .extension()
                .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("md"))
                .unwrap_or(false);
            if !is_md {
                continue;
            }

            // Path-safety gate: resolve symlinks and refuse anything that
            // escapes the workspace.
            let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
            if !is_within_path(&resolved, &abs_workspace) {
                warnings.push(format!("security_path_blocked:{}", path.display()));
                continue;
            }

            let rel = match path.strip_prefix(&self.kb_root) {
                Ok(rel) => slash_normalize(rel),
                Err(_) => {
                    warnings.push(format!("rel_error:{}", path.display()));
                    continue;
                }
            };
            if self.is_denied(&rel) {
                warnings.push(format!("security_path_blocked:{rel}"));
                continue;
            }

            let data = match std::fs::read(path) {
                Ok(data) => data,
                Err(_) => {
                    warnings.push(format!("read_error:{rel}"));
                    continue;
                }
            };
            if data.len() > self.chunking.document_hard_bytes {
                warnings.push(format!("doc_hard_limit:{rel}"));
                continue;
            }

            let content = String::from_utf8_lossy(&data);
            let (mut meta, body, parse_warnings) = parse_frontmatter(&content);
            for w in parse_warnings {
                warnings.push(format!("{rel}:{w}"));
            }
            if meta.confidentiality.is_empty() {
                meta.confidentiality = "internal".to_string();
            }

            let doc_version = sha256_hex(&data);
            let doc_type = classify_doc_type(&rel);
            let effective_date = if meta.effective_date.is_empty() {
                meta.date.clone()
            } else {
                meta.effective_date.clone()
            };

            let mut chunks = split_markdown_chunks(
                body,
                self.chunking.soft_limit_bytes,
                self.chunking.hard_limit_bytes,
            );
            if chunks.len() > self.chunking.max_chunks_per_document {
                chunks.truncate(self.chunking.max_chunks_per_document);
                warnings.push(format!("max_chunks_per_document:{rel}"));
            }

            for (i, c) in chunks.into_iter().enumerate() {
                let norm = normalize_text(&c.text);
                let (flags, risk) = detect_injection_risk(&norm);
                indexed_chunks.push(IndexedChunk {
                    source_path: rel.clone(),
                    chunk_ordinal: i as u32 + 1,
                    chunk_loc: ChunkLoc {
                        heading_path: c.loc.heading_path,
                        start_char: c.loc.start_char,
                        end_char: c.loc.end_char,
                    },
                    document_version: doc_version.clone(),
                    paragraph_id: sha256_hex(format!("{rel}\n{norm}").as_bytes()),
                    title: meta.title.clone(),
                    date: effective_date.clone(),
                    project: meta.project.trim().to_lowercase(),
                    tags: normalize_tags(&meta.tags),
                    confidentiality: meta.confidentiality.trim().to_lowercase(),
                    doc_type: doc_type.to_string(),
                    snippet: safe_snippet(&norm, 0),
                    flags,
                    risk_score: risk,
                    text: norm,
                });
            }
            doc_count += 1;
        }

        let now = Utc::now();
        let info = IndexInfo {
            index_version: format!("idx-{}", now.timestamp()),
            index_state: "healthy".to_string(),
            index_provider: self.provider.name().to_string(),
            built_at: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            embedding_model_id: self.embedding_model_id.clone(),
            chunking_hash: sha256_hex(
                format!(
                    "{}:{}:{}",
                    self.chunking.soft_limit_bytes,
                    self.chunking.hard_limit_bytes,
                    self.chunking.max_chunks_per_document
                )
                .as_bytes(),
            ),
            warnings,
            total_documents: doc_count,
            total_chunks: indexed_chunks.len(),
        };
        Ok((indexed_chunks, info))
    }

    /// Borrow a concurrency slot for background work (watcher rebuilds).
    pub async fn acquire_slot(
        &self,
        ctx: &CancellationToken,
    ) -> Result<tokio::sync::OwnedSemaphorePermit> {
        self.gate.acquire_slot(ctx).await
    }

    /// Profile-constrained retrieval and ranking with predictable policy
    /// behavior: privacy filters, risk downrank, per-source caps.
    pub async fn search(
        &self,
        ctx: &CancellationToken,
        req: SearchRequest,
    ) -> Result<SearchResult> {
        let _guard = self.gate.begin_queued(ctx).await?;

        let query = req.query.trim().to_string();
        if query.is_empty() {
            return Err(RagError::InvalidArgument("query is required".to_string()));
        }

        let profile = resolve_profile(&req.profile_id, &self.default_profile_id);
        let mut mode = req.mode.unwrap_or(profile.default_mode);

        let mut notes: Vec<String> = Vec::new();
        let semantic_available =
            self.allow_external_embeddings && self.provider.capabilities().semantic;
        if matches!(mode, SearchMode::SemanticOnly | SearchMode::Hybrid) && !semantic_available {
            notes.push("semantic unavailable; fallback=keyword-only".to_string());
            mode = SearchMode::KeywordOnly;
        }

        ranker::validate_filters(&req.filters).map_err(RagError::InvalidArgument)?;

        if tokenize(&query).is_empty() {
            return Err(RagError::InvalidArgument(
                "query does not contain searchable tokens".to_string(),
            ));
        }

        let top_k = if req.top_k == 0 { 20 } else { req.top_k };
        let top_k = top_k.clamp(1, 100) as usize;
        let candidate_limit = profile.bm25_top_n.max(top_k * 4).clamp(200, 2000);

        let provider_result = self
            .provider
            .search(
                ctx,
                &query,
                ProviderSearchOptions {
                    limit: candidate_limit,
                    mode,
                },
            )
            .await?;

        Ok(ranker::rank(
            &query,
            profile,
            mode,
            semantic_available,
            top_k,
            &req.filters,
            provider_result,
            notes,
        ))
    }

    /// Resolve an exact chunk reference for follow-up inspection, so callers
    /// can request full text only when needed instead of inflating initial
    /// payloads.
    pub async fn fetch_chunk(&self, source_path: &str, chunk_ordinal: u32) -> Result<ChunkResult> {
        let chunk = self.provider.fetch_chunk(source_path, chunk_ordinal).await?;
        Ok(ChunkResult {
            source_path: chunk.source_path,
            chunk_ordinal: chunk.chunk_ordinal,
            chunk_loc: chunk.chunk_loc,
            text: chunk.text,
            snippet: chunk.snippet,
        })
    }

    /// Split raw deny patterns into exact-match and prefix sets so per-file
    /// checks avoid repeated normalization.
    fn precompute_denylist(&mut self, raw: &[String]) {
        for entry in raw {
            let normalized = entry.trim().replace('\\', "/").to_lowercase();
            if normalized.is_empty() {
                continue;
            }
            if normalized.ends_with('/') {
                self.deny_prefixes.push(normalized);
            } else {
                self.deny_exact.insert(normalized);
            }
        }
    }

    fn is_denied(&self, rel_path: &str) -> bool {
        let norm = rel_path.replace('\\', "/").to_lowercase();

        // Exact match as full relative path or filename
        if self.deny_exact.contains(&norm) {
            return true;
        }
        // Exact entries also match as path components
        for entry in &self.deny_exact {
            if norm.ends_with(&format!("/{entry}")) || norm.contains(&format!("/{entry}/")) {
                return true;
            }
        }
        // Directory prefixes
        for prefix in &self.deny_prefixes {
            let as_component = format!("/{}/", prefix.trim_end_matches('/'));
            if norm.starts_with(prefix) || norm.contains(&as_component) {
                return true;
            }
        }
        false
    }
}

fn slash_normalize(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_within_path(candidate: &Path, root: &Path) -> bool {
    candidate.starts_with(root)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn classify_doc_type(rel_path: &str) -> &'static str {
    let rel = rel_path.replace('\\', "/").to_lowercase();
    if rel.starts_with("notes/") {
        "note"
    } else if rel.starts_with("papers/") {
        "paper"
    } else if rel.starts_with("templates/") {
        "template"
    } else if rel.ends_with("policy.md") {
        "policy"
    } else if rel.ends_with("glossary.md") {
        "glossary"
    } else {
        "note"
    }
}

fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(tags.len());
    let mut seen = HashSet::new();
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if tag.is_empty() || !seen.insert(tag.clone()) {
            continue;
        }
        out.push(tag);
    }
    out
}
