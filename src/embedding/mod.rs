//! Embedding provider abstraction: an opaque `embed`/`dims` contract plus
//! the HTTP implementation and the provider preset table.

mod http;

pub use http::HttpEmbedder;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Computes dense vector representations for text chunks.
/// Implementations must be safe for concurrent use.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts; the result is positionally aligned with the
    /// input.
    async fn embed(&self, ctx: &CancellationToken, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Vector dimensionality. May be 0 until the first response, after
    /// which it is fixed.
    fn dims(&self) -> u32;

    /// Model identifier recorded in index metadata.
    fn model_id(&self) -> &str;
}

/// Defaults for each supported embedding provider.
///
/// Model choices balance quality vs size for local-first setups:
///
///   openai  text-embedding-3-small  1536d  best quality/$ ratio
///   ollama  nomic-embed-text         768d  runs local, no key
///   nvidia  NV-Embed-QA             1024d  hosted, free tier
///   zhipu   embedding-3             2048d  hosted, free tier for low volume
///   vllm    (user picks model)          -   self-hosted, any HF model
struct ProviderInfo {
    base_url: &'static str,
    default_model: &'static str,
    dims: u32,
    needs_key: bool,
}

fn provider_info(name: &str) -> Option<ProviderInfo> {
    match name {
        "openai" => Some(ProviderInfo {
            base_url: "https://api.openai.com/v1",
            default_model: "text-embedding-3-small",
            dims: 1536,
            needs_key: true,
        }),
        "ollama" => Some(ProviderInfo {
            base_url: "http://localhost:11434/v1",
            default_model: "nomic-embed-text",
            dims: 768,
            needs_key: false,
        }),
        "nvidia" => Some(ProviderInfo {
            base_url: "https://integrate.api.nvidia.com/v1",
            default_model: "NV-Embed-QA",
            dims: 1024,
            needs_key: true,
        }),
        "zhipu" => Some(ProviderInfo {
            base_url: "https://open.bigmodel.cn/api/paas/v4",
            default_model: "embedding-3",
            dims: 2048,
            needs_key: true,
        }),
        "vllm" => Some(ProviderInfo {
            base_url: "",
            default_model: "",
            dims: 0,
            needs_key: false,
        }),
        _ => None,
    }
}

/// Construct an embedder from config fields. Returns `None` with a logged
/// warning when the provider is unsupported or unconfigured; callers must
/// fall back to keyword-only search.
pub fn new_embedder(
    provider: &str,
    model: &str,
    api_base: &str,
    api_key: &str,
    allow_external: bool,
) -> Option<Arc<dyn Embedder>> {
    let provider = provider.trim().to_lowercase();
    if provider.is_empty() {
        return None;
    }

    if !allow_external {
        tracing::info!("embedder disabled: allow_external_embeddings=false");
        return None;
    }

    let Some(info) = provider_info(&provider) else {
        tracing::warn!("embedding provider {provider:?} unsupported; falling back to keyword-only");
        return None;
    };

    let api_base = if api_base.is_empty() {
        info.base_url
    } else {
        api_base
    };
    if api_base.is_empty() {
        tracing::warn!(
            "embedding provider {provider:?} requires api_base; falling back to keyword-only"
        );
        return None;
    }

    if api_key.is_empty() && info.needs_key {
        tracing::warn!(
            "embedding provider {provider:?} requires an API key; falling back to keyword-only"
        );
        return None;
    }

    let model = if model.is_empty() {
        info.default_model
    } else {
        model
    };
    if model.is_empty() {
        tracing::warn!(
            "embedding provider {provider:?} requires embedding_model_id; falling back to keyword-only"
        );
        return None;
    }

    match HttpEmbedder::new(api_base, api_key, model, info.dims) {
        Ok(embedder) => Some(Arc::new(embedder)),
        Err(e) => {
            tracing::warn!("embedder init failed: {e}; falling back to keyword-only");
            None
        }
    }
}
