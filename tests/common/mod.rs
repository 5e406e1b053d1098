//! Shared fixtures for integration tests: a deterministic local embedder
//! and knowledge-base builders.
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use mdrag::config::Config;
use mdrag::embedding::Embedder;
use mdrag::error::Result;
use mdrag::search::tokenize;

/// Deterministic embedder: token hashes bucketed into a fixed-size vector.
/// Texts sharing tokens land measurably closer in cosine space, which is all
/// the ranking tests need.
pub struct HashEmbedder {
    dims: u32,
    pub embed_calls: AtomicUsize,
    pub embedded_texts: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dims: u32) -> Arc<Self> {
        Arc::new(Self {
            dims,
            embed_calls: AtomicUsize::new(0),
            embedded_texts: AtomicUsize::new(0),
        })
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dims as usize];
        for token in tokenize(text) {
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
    async fn embed(&self, _ctx: &CancellationToken, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
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

/// Write one KB file, creating parent directories as needed.
pub fn write_kb_file(workspace: &Path, rel: &str, content: &str) {
    let path = workspace.join("kb").join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// Default config with the hybrid provider and external embeddings enabled
/// (tests inject their own embedder, nothing leaves the machine).
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.embedding.allow_external = true;
    config
}
