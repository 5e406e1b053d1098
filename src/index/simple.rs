//! Simple JSON-file provider: keyword-only retrieval over a single
//! `index.json` snapshot. No dirty flag and no flushable extension; the
//! snapshot write is the whole persistence story, which keeps this backend
//! easy to inspect and debug.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{RagError, Result};
use crate::search::{lexical_score, tokenize};
use crate::types::{IndexInfo, IndexSnapshot, IndexedChunk};

use super::{
    IndexProvider, ProviderCapabilities, ProviderHit, ProviderSearchOptions, ProviderSearchResult,
};

pub struct SimpleProvider {
    index_file: PathBuf,
}

impl SimpleProvider {
    pub fn new(index_root: &Path) -> Self {
        Self {
            index_file: index_root.join("state").join("index.json"),
        }
    }

    fn load_snapshot(&self) -> Result<IndexSnapshot> {
        let data = match std::fs::read(&self.index_file) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RagError::NotBuilt);
            }
            Err(e) => return Err(RagError::io(e, "read index.json")),
        };
        serde_json::from_slice(&data).map_err(|e| RagError::json(e, "parse index.json"))
    }
}

#[async_trait]
impl IndexProvider for SimpleProvider {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities { semantic: false }
    }

    async fn build(
        &self,
        _ctx: &CancellationToken,
        chunks: Vec<IndexedChunk>,
        info: IndexInfo,
    ) -> Result<()> {
        let parent = self
            .index_file
            .parent()
            .expect("index file always has a parent");
        std::fs::create_dir_all(parent)
            .map_err(|e| RagError::io(e, format!("create {}", parent.display())))?;

        let snapshot = IndexSnapshot { info, chunks };
        let data = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| RagError::json(e, "serialize index.json"))?;
        std::fs::write(&self.index_file, data).map_err(|e| RagError::io(e, "write index.json"))
    }

    async fn search(
        &self,
        _ctx: &CancellationToken,
        query: &str,
        opts: ProviderSearchOptions,
    ) -> Result<ProviderSearchResult> {
        let snapshot = self.load_snapshot()?;
        let query_tokens = tokenize(query);

        let mut hits: Vec<ProviderHit> = snapshot
            .chunks
            .into_iter()
            .filter_map(|chunk| {
                let score = lexical_score(&query_tokens, &chunk.text);
                if score <= 0.0 {
                    return None;
                }
                Some(ProviderHit {
                    chunk,
                    lexical_score: score,
                    semantic_score: 0.0,
                    fused_score: 0.0,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.lexical_score
                .partial_cmp(&a.lexical_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.source_path.cmp(&b.chunk.source_path))
                .then_with(|| a.chunk.chunk_ordinal.cmp(&b.chunk.chunk_ordinal))
        });

        if opts.limit > 0 {
            hits.truncate(opts.limit);
        }

        Ok(ProviderSearchResult {
            index_info: snapshot.info,
            hits,
        })
    }

    async fn fetch_chunk(&self, source_path: &str, chunk_ordinal: u32) -> Result<IndexedChunk> {
        let snapshot = self.load_snapshot()?;
        let norm = source_path.trim().replace('\\', "/");
        snapshot
            .chunks
            .into_iter()
            .find(|c| c.source_path == norm && c.chunk_ordinal == chunk_ordinal)
            .ok_or(RagError::NotFound)
    }

    fn load_index_info(&self) -> Result<IndexInfo> {
        Ok(self.load_snapshot()?.info)
    }
}
