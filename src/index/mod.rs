//! Index provider boundary: isolates index construction and candidate
//! generation so storage and search engines can be swapped without changing
//! the public retrieval APIs.
//!
//! A provider is a capability set (`name`, `capabilities`, `build`,
//! `search`, `fetch_chunk`, `load_index_info`) plus an optional flushable
//! extension (`build_in_memory`, `flush`, `invalidate`, `is_dirty`) that
//! enables the watcher's two-tier rebuild/flush protocol. Providers without
//! the extension are driven by full builds only.

pub mod bm25;
pub mod flat;
pub mod hybrid;
pub mod simple;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::types::{IndexInfo, IndexedChunk, SearchMode};

#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderCapabilities {
    pub semantic: bool,
}

/// Keeps provider-side retrieval bounded so service-level ranking remains
/// predictable even when backends differ.
#[derive(Debug, Clone, Copy)]
pub struct ProviderSearchOptions {
    pub limit: usize,
    pub mode: SearchMode,
}

/// Carries backend-native scores forward so profile math stays centralized
/// and auditable in the service layer. A backend reports either separate
/// lexical/semantic components or a single pre-fused score.
#[derive(Debug, Clone)]
pub struct ProviderHit {
    pub chunk: IndexedChunk,
    pub lexical_score: f64,
    pub semantic_score: f64,
    pub fused_score: f64,
}

/// Bundles candidates with index metadata so responses stay traceable to a
/// concrete index build across providers.
#[derive(Debug, Clone)]
pub struct ProviderSearchResult {
    pub index_info: IndexInfo,
    pub hits: Vec<ProviderHit>,
}

#[async_trait]
pub trait IndexProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> ProviderCapabilities;

    /// Full one-shot build: index the chunks and persist them as the new
    /// source of truth.
    async fn build(
        &self,
        ctx: &CancellationToken,
        chunks: Vec<IndexedChunk>,
        info: IndexInfo,
    ) -> Result<()>;

    /// Return up to `opts.limit` unordered candidates with backend-native
    /// scores; the service re-ranks.
    async fn search(
        &self,
        ctx: &CancellationToken,
        query: &str,
        opts: ProviderSearchOptions,
    ) -> Result<ProviderSearchResult>;

    async fn fetch_chunk(&self, source_path: &str, chunk_ordinal: u32) -> Result<IndexedChunk>;

    fn load_index_info(&self) -> Result<IndexInfo>;

    /// The flushable extension, when this provider supports the in-memory
    /// rebuild + deferred flush protocol.
    fn as_flushable(&self) -> Option<&dyn FlushableProvider> {
        None
    }
}

/// Optional provider extension backing the watcher's two-tier protocol.
#[async_trait]
pub trait FlushableProvider: Send + Sync {
    /// Rebuild in-memory indexes without flushing; marks the store dirty so
    /// a crash before the next flush forces a rebuild.
    async fn build_in_memory(
        &self,
        ctx: &CancellationToken,
        chunks: Vec<IndexedChunk>,
        info: IndexInfo,
    ) -> Result<()>;

    /// Persist current in-memory state and clear the dirty flag.
    async fn flush(&self) -> Result<()>;

    /// Discard resident state; the next operation reloads from the store.
    fn invalidate(&self);

    fn is_dirty(&self) -> bool;
}

/// Construct the configured provider. `index_root` is the directory that
/// holds persisted index state.
pub fn new_index_provider(
    id: &str,
    index_root: &Path,
    embedder: Option<Arc<dyn Embedder>>,
) -> Result<Arc<dyn IndexProvider>> {
    let id = id.trim().to_lowercase();
    match id.as_str() {
        "" | "hybrid" => Ok(Arc::new(hybrid::HybridProvider::new(index_root, embedder)?)),
        "simple" | "json" => Ok(Arc::new(simple::SimpleProvider::new(index_root))),
        other => Err(RagError::InvalidArgument(format!(
            "unsupported index provider: {other}"
        ))),
    }
}
