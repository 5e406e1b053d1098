//! HTTP embedder against an OpenAI-compatible `/embeddings` endpoint.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{RagError, Result};

use super::Embedder;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    index: usize,
}

/// Calls `POST {api_base}/embeddings` with bearer auth. Dimensionality is
/// pre-set from the provider table when known, otherwise discovered from the
/// first response and pinned.
pub struct HttpEmbedder {
    api_base: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
    dims: AtomicU32,
}

impl HttpEmbedder {
    pub fn new(api_base: &str, api_key: &str, model: &str, dims: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RagError::Embedding(format!("build http client: {e}")))?;
        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
            dims: AtomicU32::new(dims),
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut req = self
            .client
            .post(format!("{}/embeddings", self.api_base))
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            });
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| RagError::Embedding(format!("embedding request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let body: String = body.chars().take(512).collect();
            return Err(RagError::Embedding(format!(
                "embedding API returned {status}: {body}"
            )));
        }

        let result: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| RagError::Embedding(format!("decode embedding response: {e}")))?;

        if result.data.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "embedding response has {} vectors for {} inputs",
                result.data.len(),
                texts.len()
            )));
        }

        let mut vecs: Vec<Vec<f32>> = vec![Vec::new(); texts.len()];
        for datum in result.data {
            if datum.index >= texts.len() {
                return Err(RagError::Embedding(format!(
                    "embedding response index {} out of range",
                    datum.index
                )));
            }
            vecs[datum.index] = datum.embedding;
        }

        if let Some(first) = vecs.first() {
            if !first.is_empty() {
                // Pin dims on first successful response; later responses
                // never change it.
                let _ = self.dims.compare_exchange(
                    0,
                    first.len() as u32,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
            }
        }

        Ok(vecs)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, ctx: &CancellationToken, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        tokio::select! {
            result = self.request(texts) => result,
            _ = ctx.cancelled() => Err(RagError::Embedding("embedding request cancelled".to_string())),
        }
    }

    fn dims(&self) -> u32 {
        self.dims.load(Ordering::SeqCst)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
