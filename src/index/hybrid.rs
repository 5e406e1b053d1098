//! Hybrid provider: BM25 + flat cosine retrieval over a crash-consistent
//! store, with the flushable extension that backs the watcher's two-tier
//! rebuild/flush protocol.
//!
//! State lives in one of two places at a time: after a flush the store is
//! the source of truth and the in-memory chunk/vector buffers are released;
//! between an in-memory rebuild and the next flush the buffers are resident
//! and the durable dirty flag records that disk is stale.
//!
//! Locking: a reader-writer lock guards the index fields. The slow
//! `ensure_loaded` path upgrades in two phases (drop shared, take exclusive,
//! re-check) and the lock is never held across an embed call; builds and
//! flushes are serialized by a separate async mutex so store fsyncs also
//! happen outside the reader-writer lock.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::store::Store;
use crate::types::{IndexInfo, IndexedChunk, SearchMode};

use super::bm25::Bm25Index;
use super::flat::FlatIndex;
use super::{
    FlushableProvider, IndexProvider, ProviderCapabilities, ProviderHit, ProviderSearchOptions,
    ProviderSearchResult,
};

const EMBED_BATCH_SIZE: usize = 64;
const DEFAULT_CANDIDATE_LIMIT: usize = 200;

#[derive(Default)]
struct HybridState {
    ready: bool,
    dirty: bool,
    info: Option<IndexInfo>,
    bm25: Option<Bm25Index>,
    flat: Option<FlatIndex>,
    // Resident only while dirty; released by flush, after which search hits
    // are resolved through batch reads from the store.
    chunks: Option<Arc<Vec<IndexedChunk>>>,
    vectors: Option<Arc<Vec<Vec<f32>>>>,
}

pub struct HybridProvider {
    store: Store,
    embedder: Option<Arc<dyn Embedder>>,
    state: RwLock<HybridState>,
    build_mu: tokio::sync::Mutex<()>,
}

impl HybridProvider {
    pub fn new(index_root: &Path, embedder: Option<Arc<dyn Embedder>>) -> Result<Self> {
        let store = Store::open(&index_root.join("state"))?;
        Ok(Self {
            store,
            embedder,
            state: RwLock::new(HybridState::default()),
            build_mu: tokio::sync::Mutex::new(()),
        })
    }

    /// Load indexes from the store if not already resident. Two-phase lock
    /// upgrade: check under shared access, then re-check after taking the
    /// exclusive lock.
    fn ensure_loaded(&self) -> Result<()> {
        {
            let state = self.state.read().unwrap();
            if state.ready {
                return Ok(());
            }
        }

        let mut state = self.state.write().unwrap();
        if state.ready {
            return Ok(());
        }
        if self.store.is_dirty() {
            return Err(RagError::DirtyIndex);
        }

        let info = self.store.load_index_info()?;
        if info.total_chunks == 0 {
            state.info = Some(info);
            state.ready = true;
            return Ok(());
        }

        let mut bm25 = Bm25Index::new()?;
        let mut insert_err = None;
        let mut chunk_count = 0usize;
        self.store.for_each_chunk(|idx, chunk| {
            chunk_count += 1;
            match bm25.insert(idx, &chunk.text) {
                Ok(()) => ControlFlow::Continue(()),
                Err(e) => {
                    insert_err = Some(e);
                    ControlFlow::Break(())
                }
            }
        })?;
        if let Some(e) = insert_err {
            return Err(e);
        }
        bm25.commit()?;

        let mut flat = None;
        if let Some(dims) = self.store.stored_vector_dims()? {
            if let Some(embedder) = &self.embedder {
                let embedder_dims = embedder.dims();
                if embedder_dims != 0 && embedder_dims != dims {
                    return Err(RagError::EmbeddingDimMismatch {
                        stored: dims,
                        embedder: embedder_dims,
                    });
                }
            }

            let mut index = FlatIndex::new(dims as usize);
            let mut add_err = None;
            self.store.for_each_vector(|_, vec| match index.add(vec) {
                Ok(()) => ControlFlow::Continue(()),
                Err(e) => {
                    add_err = Some(e);
                    ControlFlow::Break(())
                }
            })?;
            if let Some(e) = add_err {
                return Err(e);
            }

            if index.len() == chunk_count {
                flat = Some(index);
            } else {
                tracing::warn!(
                    vectors = index.len(),
                    chunks = chunk_count,
                    "vector/chunk count mismatch; degrading to keyword-only"
                );
            }
        }

        state.bm25 = Some(bm25);
        state.flat = flat;
        state.info = Some(info);
        state.ready = true;
        Ok(())
    }

    /// Compute one vector per chunk, reusing cached vectors keyed by
    /// paragraph id so unchanged paragraphs are never re-embedded. The cache
    /// comes from resident buffers when the provider is dirty, otherwise
    /// from the store.
    async fn compute_vectors(
        &self,
        ctx: &CancellationToken,
        chunks: &[IndexedChunk],
    ) -> Result<Vec<Vec<f32>>> {
        let Some(embedder) = &self.embedder else {
            return Ok(Vec::new());
        };
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let cache = self.vector_cache();
        let known_dims = embedder.dims();

        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; chunks.len()];
        let mut missing: Vec<usize> = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            match cache.get(&chunk.paragraph_id) {
                Some(vec) if known_dims == 0 || vec.len() == known_dims as usize => {
                    vectors[i] = Some(vec.clone());
                }
                _ => missing.push(i),
            }
        }

        for batch in missing.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|&i| chunks[i].text.clone()).collect();
            let embedded = embedder.embed(ctx, &texts).await?;
            if embedded.len() != texts.len() {
                return Err(RagError::Embedding(format!(
                    "embedder returned {} vectors for {} texts",
                    embedded.len(),
                    texts.len()
                )));
            }
            for (&i, vec) in batch.iter().zip(embedded) {
                vectors[i] = Some(vec);
            }
        }

        let mut out = Vec::with_capacity(chunks.len());
        let mut dims = 0usize;
        for (i, vec) in vectors.into_iter().enumerate() {
            let vec = vec
                .ok_or_else(|| RagError::Embedding(format!("no vector for chunk {i}")))?;
            if dims == 0 {
                dims = vec.len();
            } else if vec.len() != dims {
                return Err(RagError::Embedding(format!(
                    "vector {i} has {} dims, expected {dims}",
                    vec.len()
                )));
            }
            out.push(vec);
        }
        Ok(out)
    }

    /// paragraph_id -> vector map for incremental embedding. Released by the
    /// caller as soon as reuse is done.
    fn vector_cache(&self) -> std::collections::HashMap<String, Vec<f32>> {
        let mut cache = std::collections::HashMap::new();

        let resident = {
            let state = self.state.read().unwrap();
            match (&state.chunks, &state.vectors) {
                (Some(chunks), Some(vectors)) if chunks.len() == vectors.len() => {
                    Some((Arc::clone(chunks), Arc::clone(vectors)))
                }
                _ => None,
            }
        };
        if let Some((chunks, vectors)) = resident {
            for (chunk, vec) in chunks.iter().zip(vectors.iter()) {
                cache.insert(chunk.paragraph_id.clone(), vec.clone());
            }
            return cache;
        }

        let mut paragraph_ids: Vec<String> = Vec::new();
        let loaded = self
            .store
            .for_each_chunk(|_, chunk| {
                paragraph_ids.push(chunk.paragraph_id);
                ControlFlow::Continue(())
            })
            .and_then(|()| {
                self.store.for_each_vector(|idx, vec| {
                    if let Some(id) = paragraph_ids.get(idx as usize) {
                        cache.insert(id.clone(), vec);
                    }
                    ControlFlow::Continue(())
                })
            });
        if let Err(e) = loaded {
            // A damaged cache only costs re-embedding; never fail a build
            // over it.
            tracing::warn!("vector cache unavailable: {e}");
            cache.clear();
        }
        cache
    }

    fn build_indexes(
        chunks: &[IndexedChunk],
        vectors: &[Vec<f32>],
    ) -> Result<(Bm25Index, Option<FlatIndex>)> {
        let mut bm25 = Bm25Index::new()?;
        for (i, chunk) in chunks.iter().enumerate() {
            bm25.insert(i as u32, &chunk.text)?;
        }
        bm25.commit()?;

        let flat = if vectors.is_empty() {
            None
        } else {
            let mut index = FlatIndex::new(vectors[0].len());
            for vec in vectors {
                index.add(vec.clone())?;
            }
            Some(index)
        };
        Ok((bm25, flat))
    }

    /// Resolve merged positional hits to full chunk records: resident
    /// buffers when dirty, otherwise one batch read from the store.
    fn resolve_hits(&self, merged: BTreeMap<u32, (f64, f64)>) -> Result<Vec<ProviderHit>> {
        let resident = {
            let state = self.state.read().unwrap();
            state.chunks.clone()
        };

        let mut hits = Vec::with_capacity(merged.len());
        if let Some(chunks) = resident {
            for (id, (lexical, semantic)) in merged {
                if let Some(chunk) = chunks.get(id as usize) {
                    hits.push(ProviderHit {
                        chunk: chunk.clone(),
                        lexical_score: lexical,
                        semantic_score: semantic,
                        fused_score: 0.0,
                    });
                }
            }
            return Ok(hits);
        }

        let ids: Vec<u32> = merged.keys().copied().collect();
        let mut records = self.store.load_chunks_by_indexes(&ids)?;
        for (id, (lexical, semantic)) in merged {
            if let Some(chunk) = records.remove(&id) {
                hits.push(ProviderHit {
                    chunk,
                    lexical_score: lexical,
                    semantic_score: semantic,
                    fused_score: 0.0,
                });
            }
        }
        Ok(hits)
    }

    fn install(
        &self,
        info: IndexInfo,
        bm25: Bm25Index,
        flat: Option<FlatIndex>,
        resident: Option<(Arc<Vec<IndexedChunk>>, Arc<Vec<Vec<f32>>>)>,
        dirty: bool,
    ) {
        let mut state = self.state.write().unwrap();
        state.ready = true;
        state.dirty = dirty;
        state.info = Some(info);
        state.bm25 = Some(bm25);
        state.flat = flat;
        match resident {
            Some((chunks, vectors)) => {
                state.chunks = Some(chunks);
                state.vectors = Some(vectors);
            }
            None => {
                state.chunks = None;
                state.vectors = None;
            }
        }
    }
}

#[async_trait]
impl IndexProvider for HybridProvider {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            semantic: self.embedder.is_some(),
        }
    }

    async fn build(
        &self,
        ctx: &CancellationToken,
        chunks: Vec<IndexedChunk>,
        info: IndexInfo,
    ) -> Result<()> {
        let _guard = self.build_mu.lock().await;

        let vectors = self.compute_vectors(ctx, &chunks).await?;
        let (bm25, flat) = Self::build_indexes(&chunks, &vectors)?;

        self.store.save_index(&info, &chunks)?;
        self.store.save_vectors(&vectors)?;
        self.store.set_dirty(false)?;

        // The store is now the source of truth; release buffers.
        self.install(info, bm25, flat, None, false);
        Ok(())
    }

    async fn search(
        &self,
        ctx: &CancellationToken,
        query: &str,
        opts: ProviderSearchOptions,
    ) -> Result<ProviderSearchResult> {
        self.ensure_loaded()?;

        let (mut info, has_vectors) = {
            let state = self.state.read().unwrap();
            (
                state.info.clone().ok_or(RagError::NotBuilt)?,
                state.flat.is_some(),
            )
        };
        if info.total_chunks == 0 {
            return Ok(ProviderSearchResult {
                index_info: info,
                hits: Vec::new(),
            });
        }

        let limit = if opts.limit == 0 {
            DEFAULT_CANDIDATE_LIMIT
        } else {
            opts.limit
        };

        // Embed the query outside the state lock; a failing embedding
        // service degrades this search to its lexical leg.
        let mut query_vector = None;
        if has_vectors && opts.mode != SearchMode::KeywordOnly {
            if let Some(embedder) = &self.embedder {
                match embedder.embed(ctx, &[query.to_string()]).await {
                    Ok(mut vecs) if !vecs.is_empty() => query_vector = Some(vecs.remove(0)),
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("query embedding failed, using keyword leg only: {e}");
                        info.warnings.push(format!("semantic degraded: {e}"));
                    }
                }
            }
        }

        let merged = {
            let state = self.state.read().unwrap();
            let bm25 = state.bm25.as_ref().ok_or(RagError::NotBuilt)?;

            let (lexical, semantic) = match (state.flat.as_ref(), query_vector.as_ref()) {
                (Some(flat), Some(qvec)) => {
                    // Independent legs; merged by positional id below.
                    let (lex, sem) =
                        rayon::join(|| bm25.search(query, limit), || flat.search(qvec, limit));
                    (lex?, sem?)
                }
                _ => (bm25.search(query, limit)?, Vec::new()),
            };

            let mut merged: BTreeMap<u32, (f64, f64)> = BTreeMap::new();
            for (id, score) in lexical {
                merged.entry(id).or_default().0 = score as f64;
            }
            for (id, score) in semantic {
                merged.entry(id).or_default().1 = score as f64;
            }
            merged
        };

        let hits = self.resolve_hits(merged)?;
        Ok(ProviderSearchResult {
            index_info: info,
            hits,
        })
    }

    async fn fetch_chunk(&self, source_path: &str, chunk_ordinal: u32) -> Result<IndexedChunk> {
        self.ensure_loaded()?;

        let norm = source_path.trim().replace('\\', "/");
        let resident = {
            let state = self.state.read().unwrap();
            state.chunks.clone()
        };
        if let Some(chunks) = resident {
            return chunks
                .iter()
                .find(|c| c.source_path == norm && c.chunk_ordinal == chunk_ordinal)
                .cloned()
                .ok_or(RagError::NotFound);
        }
        self.store.load_chunk_by_source_and_ordinal(&norm, chunk_ordinal)
    }

    fn load_index_info(&self) -> Result<IndexInfo> {
        {
            let state = self.state.read().unwrap();
            if let Some(info) = &state.info {
                return Ok(info.clone());
            }
        }
        self.store.load_index_info()
    }

    fn as_flushable(&self) -> Option<&dyn FlushableProvider> {
        Some(self)
    }
}

#[async_trait]
impl FlushableProvider for HybridProvider {
    async fn build_in_memory(
        &self,
        ctx: &CancellationToken,
        chunks: Vec<IndexedChunk>,
        info: IndexInfo,
    ) -> Result<()> {
        let _guard = self.build_mu.lock().await;

        let vectors = self.compute_vectors(ctx, &chunks).await?;
        let (bm25, flat) = Self::build_indexes(&chunks, &vectors)?;

        // Persist the dirty marker before exposing the new in-memory state
        // so a crash in the gap still forces a rebuild.
        self.store.set_dirty(true)?;

        let resident = (Arc::new(chunks), Arc::new(vectors));
        self.install(info, bm25, flat, Some(resident), true);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let _guard = self.build_mu.lock().await;

        let (info, chunks, vectors) = {
            let state = self.state.read().unwrap();
            if !state.dirty {
                return Ok(());
            }
            (
                state.info.clone(),
                state.chunks.clone(),
                state.vectors.clone(),
            )
        };
        let (Some(info), Some(chunks)) = (info, chunks) else {
            return Ok(());
        };

        self.store.save_index(&info, &chunks)?;
        self.store
            .save_vectors(vectors.as_deref().map_or(&[][..], |v| v.as_slice()))?;
        self.store.set_dirty(false)?;

        let mut state = self.state.write().unwrap();
        state.dirty = false;
        state.chunks = None;
        state.vectors = None;
        Ok(())
    }

    fn invalidate(&self) {
        let mut state = self.state.write().unwrap();
        *state = HybridState::default();
    }

    fn is_dirty(&self) -> bool {
        // Either in-memory state is ahead of disk, or a previous process
        // crashed between rebuild and flush and left the persistent marker.
        self.state.read().unwrap().dirty || self.store.is_dirty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Deterministic local embedder: token hashes bucketed into a small
    /// vector. Good enough to make related texts measurably closer.
    struct HashEmbedder {
        dims: u32,
        calls: AtomicUsize,
        embedded_texts: AtomicUsize,
    }

    impl HashEmbedder {
        fn new(dims: u32) -> Self {
            Self {
                dims,
                calls: AtomicUsize::new(0),
                embedded_texts: AtomicUsize::new(0),
            }
        }

        fn vector_for(&self, text: &str) -> Vec<f32> {
            let mut vec = vec![0.0f32; self.dims as usize];
            for token in crate::search::tokenize(text) {
                let mut hash = 5381u64;
                for b in token.bytes() {
                    hash = hash.wrapping_mul(33).wrapping_add(b as u64);
                }
                vec[(hash % self.dims as u64) as usize] += 1.0;
            }
            vec
        }
    }

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed(
            &self,
            _ctx: &CancellationToken,
            texts: &[String],
        ) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.embedded_texts.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|t| self.vector_for(t)).collect())
        }

        fn dims(&self) -> u32 {
            self.dims
        }

        fn model_id(&self) -> &str {
            "hash-test"
        }
    }

    fn chunk(path: &str, ordinal: u32, text: &str) -> IndexedChunk {
        IndexedChunk {
            source_path: path.to_string(),
            chunk_ordinal: ordinal,
            chunk_loc: Default::default(),
            document_version: "v".to_string(),
            paragraph_id: format!("{path}\n{text}"),
            title: String::new(),
            date: String::new(),
            project: String::new(),
            tags: Vec::new(),
            confidentiality: "internal".to_string(),
            doc_type: "note".to_string(),
            text: text.to_string(),
            snippet: text.to_string(),
            flags: Vec::new(),
            risk_score: 0.0,
        }
    }

    fn info(total_chunks: usize) -> IndexInfo {
        IndexInfo {
            index_version: "idx-test".to_string(),
            index_state: "healthy".to_string(),
            built_at: "2025-01-01T00:00:00Z".to_string(),
            total_documents: 1,
            total_chunks,
            ..Default::default()
        }
    }

    fn opts(mode: SearchMode) -> ProviderSearchOptions {
        ProviderSearchOptions { limit: 50, mode }
    }

    #[tokio::test]
    async fn keyword_only_build_and_search() {
        let temp = TempDir::new().unwrap();
        let provider = HybridProvider::new(temp.path(), None).unwrap();
        let ctx = CancellationToken::new();

        provider
            .build(
                &ctx,
                vec![
                    chunk("a.md", 1, "write-through caching policy"),
                    chunk("b.md", 1, "hiring update for the quarter"),
                ],
                info(2),
            )
            .await
            .unwrap();

        let result = provider
            .search(&ctx, "caching policy", opts(SearchMode::Hybrid))
            .await
            .unwrap();
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].chunk.source_path, "a.md");
        assert!(result.hits[0].lexical_score > 0.0);
        assert_eq!(result.hits[0].semantic_score, 0.0);
    }

    #[tokio::test]
    async fn search_before_build_is_not_built() {
        let temp = TempDir::new().unwrap();
        let provider = HybridProvider::new(temp.path(), None).unwrap();
        let ctx = CancellationToken::new();
        let err = provider
            .search(&ctx, "query", opts(SearchMode::KeywordOnly))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::NotBuilt));
    }

    #[tokio::test]
    async fn reload_from_store_in_fresh_instance() {
        let temp = TempDir::new().unwrap();
        let ctx = CancellationToken::new();
        {
            let provider = HybridProvider::new(temp.path(), None).unwrap();
            provider
                .build(&ctx, vec![chunk("a.md", 1, "rate limiting API")], info(1))
                .await
                .unwrap();
        }
        let provider = HybridProvider::new(temp.path(), None).unwrap();
        let result = provider
            .search(&ctx, "rate limiting", opts(SearchMode::KeywordOnly))
            .await
            .unwrap();
        assert_eq!(result.hits.len(), 1);
        let fetched = provider.fetch_chunk("a.md", 1).await.unwrap();
        assert_eq!(fetched.text, "rate limiting API");
    }

    #[tokio::test]
    async fn dirty_store_blocks_search_until_rebuild() {
        let temp = TempDir::new().unwrap();
        let ctx = CancellationToken::new();
        {
            let provider = HybridProvider::new(temp.path(), None).unwrap();
            provider
                .build_in_memory(&ctx, vec![chunk("a.md", 1, "fresh edit")], info(1))
                .await
                .unwrap();
            assert!(FlushableProvider::is_dirty(&provider));
            // Searches against the live provider still work from memory.
            let result = provider
                .search(&ctx, "fresh", opts(SearchMode::KeywordOnly))
                .await
                .unwrap();
            assert_eq!(result.hits.len(), 1);
            // Simulated crash: no flush before drop.
        }

        let provider = HybridProvider::new(temp.path(), None).unwrap();
        let err = provider
            .search(&ctx, "fresh", opts(SearchMode::KeywordOnly))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::DirtyIndex));

        // A full build recovers.
        provider
            .build(&ctx, vec![chunk("a.md", 1, "fresh edit")], info(1))
            .await
            .unwrap();
        let result = provider
            .search(&ctx, "fresh", opts(SearchMode::KeywordOnly))
            .await
            .unwrap();
        assert_eq!(result.hits.len(), 1);
    }

    #[tokio::test]
    async fn flush_persists_and_releases_buffers() {
        let temp = TempDir::new().unwrap();
        let ctx = CancellationToken::new();
        {
            let provider = HybridProvider::new(temp.path(), None).unwrap();
            provider
                .build_in_memory(&ctx, vec![chunk("a.md", 1, "deferred write")], info(1))
                .await
                .unwrap();
            provider.flush().await.unwrap();
            assert!(!FlushableProvider::is_dirty(&provider));
            // Flush is idempotent when clean.
            provider.flush().await.unwrap();
        }

        let provider = HybridProvider::new(temp.path(), None).unwrap();
        let result = provider
            .search(&ctx, "deferred", opts(SearchMode::KeywordOnly))
            .await
            .unwrap();
        assert_eq!(result.hits.len(), 1);
    }

    #[tokio::test]
    async fn hybrid_search_carries_semantic_scores() {
        let temp = TempDir::new().unwrap();
        let embedder = Arc::new(HashEmbedder::new(32));
        let provider = HybridProvider::new(temp.path(), Some(embedder)).unwrap();
        let ctx = CancellationToken::new();

        provider
            .build(
                &ctx,
                vec![
                    chunk("a.md", 1, "cache invalidation strategy"),
                    chunk("b.md", 1, "completely different topic"),
                ],
                info(2),
            )
            .await
            .unwrap();

        let result = provider
            .search(&ctx, "cache invalidation", opts(SearchMode::Hybrid))
            .await
            .unwrap();
        let top = result
            .hits
            .iter()
            .find(|h| h.chunk.source_path == "a.md")
            .unwrap();
        assert!(top.lexical_score > 0.0);
        assert!(top.semantic_score > 0.0);
    }

    #[tokio::test]
    async fn incremental_embedding_reuses_cached_vectors() {
        let temp = TempDir::new().unwrap();
        let embedder = Arc::new(HashEmbedder::new(16));
        let provider = HybridProvider::new(temp.path(), Some(embedder.clone())).unwrap();
        let ctx = CancellationToken::new();

        let chunks = vec![
            chunk("a.md", 1, "first paragraph"),
            chunk("a.md", 2, "second paragraph"),
        ];
        provider.build(&ctx, chunks.clone(), info(2)).await.unwrap();
        assert_eq!(embedder.embedded_texts.load(Ordering::SeqCst), 2);

        // Unchanged rebuild embeds nothing new.
        provider.build(&ctx, chunks.clone(), info(2)).await.unwrap();
        assert_eq!(embedder.embedded_texts.load(Ordering::SeqCst), 2);

        // One new paragraph embeds exactly one text.
        let mut extended = chunks;
        extended.push(chunk("a.md", 3, "third paragraph"));
        provider.build(&ctx, extended, info(3)).await.unwrap();
        assert_eq!(embedder.embedded_texts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn dim_mismatch_forces_rebuild() {
        let temp = TempDir::new().unwrap();
        let ctx = CancellationToken::new();
        {
            let embedder = Arc::new(HashEmbedder::new(8));
            let provider = HybridProvider::new(temp.path(), Some(embedder)).unwrap();
            provider
                .build(&ctx, vec![chunk("a.md", 1, "some text")], info(1))
                .await
                .unwrap();
        }

        let embedder = Arc::new(HashEmbedder::new(16));
        let provider = HybridProvider::new(temp.path(), Some(embedder)).unwrap();
        let err = provider
            .search(&ctx, "some text", opts(SearchMode::Hybrid))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::EmbeddingDimMismatch { stored: 8, embedder: 16 }));
    }

    #[tokio::test]
    async fn invalidate_discards_resident_state() {
        let temp = TempDir::new().unwrap();
        let provider = HybridProvider::new(temp.path(), None).unwrap();
        let ctx = CancellationToken::new();

        provider
            .build(&ctx, vec![chunk("a.md", 1, "resident text")], info(1))
            .await
            .unwrap();
        provider.invalidate();

        // Next search reloads from the store transparently.
        let result = provider
            .search(&ctx, "resident", opts(SearchMode::KeywordOnly))
            .await
            .unwrap();
        assert_eq!(result.hits.len(), 1);
    }

    #[tokio::test]
    async fn empty_build_yields_empty_results() {
        let temp = TempDir::new().unwrap();
        let provider = HybridProvider::new(temp.path(), None).unwrap();
        let ctx = CancellationToken::new();

        provider.build(&ctx, Vec::new(), info(0)).await.unwrap();
        let result = provider
            .search(&ctx, "anything", opts(SearchMode::KeywordOnly))
            .await
            .unwrap();
        assert!(result.hits.is_empty());
        assert_eq!(result.index_info.total_chunks, 0);
    }
}
