use thiserror::Error;

/// Deterministic backoff hint returned alongside queue saturation so callers
/// can retry without guessing and creating bursty traffic.
pub const RETRY_AFTER_SECONDS: u32 = 3;

/// Main error type for the retrieval engine
#[derive(Error, Debug)]
pub enum RagError {
    /// Search admission rejected: too many requests queued or in flight
    #[error("search queue is full; retry after {retry_after_seconds}s")]
    QueueFull { retry_after_seconds: u32 },

    /// Invalid request: empty/untokenizable query or inconsistent filters
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No index artifacts on disk
    #[error("index not built")]
    NotBuilt,

    /// On-disk index was not cleanly flushed and must be rebuilt
    #[error("index is dirty (unclean shutdown); rebuild required")]
    DirtyIndex,

    /// Stored vector dimensionality differs from the active embedder's
    #[error("stored vectors have {stored} dims but embedder reports {embedder}; rebuild required")]
    EmbeddingDimMismatch { stored: u32, embedder: u32 },

    /// Vector file failed a magic/version/size/CRC check
    #[error("vector file corrupt: {0}")]
    Corrupt(String),

    /// Chunk lookup miss
    #[error("chunk not found")]
    NotFound,

    /// Operation cancelled via context token
    #[error("operation cancelled")]
    Cancelled,

    /// IO errors with call-site context
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// Embedding service failures
    #[error("embedding error: {0}")]
    Embedding(String),

    /// In-memory lexical/vector index failures
    #[error("index error: {0}")]
    Index(String),

    /// Embedded database errors
    #[error("index storage error: {0}")]
    Storage(#[from] redb::Error),

    /// Record (de)serialization errors
    #[error("serialization error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RagError {
    pub fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        RagError::Io {
            source,
            context: context.into(),
        }
    }

    pub fn json(source: serde_json::Error, context: impl Into<String>) -> Self {
        RagError::Json {
            source,
            context: context.into(),
        }
    }

    /// Typed check for overload so retry logic stays stable across error
    /// wording changes.
    pub fn is_queue_full(&self) -> bool {
        matches!(self, RagError::QueueFull { .. })
    }
}

impl From<redb::DatabaseError> for RagError {
    fn from(e: redb::DatabaseError) -> Self {
        RagError::Storage(e.into())
    }
}

impl From<redb::TransactionError> for RagError {
    fn from(e: redb::TransactionError) -> Self {
        RagError::Storage(e.into())
    }
}

impl From<redb::TableError> for RagError {
    fn from(e: redb::TableError) -> Self {
        RagError::Storage(e.into())
    }
}

impl From<redb::StorageError> for RagError {
    fn from(e: redb::StorageError) -> Self {
        RagError::Storage(e.into())
    }
}

impl From<redb::CommitError> for RagError {
    fn from(e: redb::CommitError) -> Self {
        RagError::Storage(e.into())
    }
}

/// Result type for retrieval engine operations
pub type Result<T> = std::result::Result<T, RagError>;
