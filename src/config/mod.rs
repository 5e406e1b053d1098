//! Configuration loading and defaults.
//!
//! Config is a TOML file with one section per concern. Values resolve in
//! order: file, then `MDRAG_SECTION__KEY` environment overrides, then the
//! built-in defaults for anything unset.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub watcher: WatcherConfig,
}

/// Core engine paths and admission limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Knowledge-base root, relative to the workspace unless absolute
    pub kb_root: PathBuf,
    /// Index artifact root, relative to the workspace unless absolute
    pub index_root: PathBuf,
    /// "hybrid" (default) or "simple"
    pub index_provider: String,
    pub default_profile_id: String,
    /// Maximum concurrent search requests admitted + in flight
    pub queue_size: usize,
    /// Maximum simultaneously executing searches
    pub concurrency: usize,
    /// Exact filenames, relative paths, or `dir/` prefixes to skip
    pub denylist_paths: Vec<String>,
}

/// Chunking limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub soft_limit_bytes: usize,
    pub hard_limit_bytes: usize,
    /// Documents above this size are skipped with a warning
    pub document_hard_bytes: usize,
    pub max_chunks_per_document: usize,
}

/// Embedding service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider preset: openai, ollama, nvidia, zhipu, vllm; empty disables
    pub provider: String,
    pub model_id: String,
    pub api_base: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Embeddings leave the machine; explicit opt-in required
    pub allow_external: bool,
}

/// Watcher debounce tiers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub reindex_debounce_ms: u64,
    pub flush_debounce_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            watcher: WatcherConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kb_root: PathBuf::from("kb"),
            index_root: PathBuf::from(".mdrag"),
            index_provider: "hybrid".to_string(),
            default_profile_id: "default_research".to_string(),
            queue_size: 16,
            concurrency: 3,
            denylist_paths: Vec::new(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            soft_limit_bytes: 4096,
            hard_limit_bytes: 8192,
            document_hard_bytes: 10 * 1024 * 1024,
            max_chunks_per_document: 2000,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: String::new(),
            model_id: String::new(),
            api_base: String::new(),
            api_key_env: "MDRAG_EMBEDDING_API_KEY".to_string(),
            allow_external: false,
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            reindex_debounce_ms: 2_000,
            flush_debounce_ms: 30_000,
        }
    }
}

impl Config {
    /// Load configuration from a file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RagError::io(e, format!("read config file {}", path.display())))?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| RagError::InvalidArgument(format!("parse config: {e}")))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RagError::InvalidArgument(format!("serialize config: {e}")))?;
        std::fs::write(path, content)
            .map_err(|e| RagError::io(e, format!("write config file {}", path.display())))
    }

    /// Default config file location.
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            RagError::InvalidArgument("cannot determine config directory".to_string())
        })?;
        Ok(config_dir.join("mdrag").join("config.toml"))
    }

    /// Environment overrides in the form `MDRAG_SECTION__KEY=value`.
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("MDRAG_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("failed to apply env override {key}: {e}");
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        let parse_bool = |v: &str| {
            v.parse::<bool>().map_err(|_| {
                RagError::InvalidArgument(format!("cannot parse {v:?} as boolean for {path}"))
            })
        };
        match path {
            "ENGINE__KB_ROOT" => self.engine.kb_root = PathBuf::from(value),
            "ENGINE__INDEX_ROOT" => self.engine.index_root = PathBuf::from(value),
            "ENGINE__INDEX_PROVIDER" => self.engine.index_provider = value.to_string(),
            "ENGINE__DEFAULT_PROFILE_ID" => self.engine.default_profile_id = value.to_string(),
            "EMBEDDING__PROVIDER" => self.embedding.provider = value.to_string(),
            "EMBEDDING__MODEL_ID" => self.embedding.model_id = value.to_string(),
            "EMBEDDING__API_BASE" => self.embedding.api_base = value.to_string(),
            "EMBEDDING__ALLOW_EXTERNAL" => {
                self.embedding.allow_external = parse_bool(value)?;
            }
            _ => {
                tracing::debug!("unknown env config key: {path}");
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.chunking.soft_limit_bytes > self.chunking.hard_limit_bytes {
            return Err(RagError::InvalidArgument(format!(
                "chunking.soft_limit_bytes ({}) exceeds hard_limit_bytes ({})",
                self.chunking.soft_limit_bytes, self.chunking.hard_limit_bytes
            )));
        }
        if self.engine.queue_size == 0 || self.engine.concurrency == 0 {
            return Err(RagError::InvalidArgument(
                "engine.queue_size and engine.concurrency must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// API key resolved from the configured environment variable.
    pub fn embedding_api_key(&self) -> String {
        if self.embedding.api_key_env.is_empty() {
            return String::new();
        }
        std::env::var(&self.embedding.api_key_env).unwrap_or_default()
    }
}

/// Resolve a configured path against the workspace root.
pub fn resolve_workspace_path(workspace: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        workspace.join(value)
    }
}
