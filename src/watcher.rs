//! Filesystem watcher keeping the index fresh against on-disk edits while
//! batching disk writes.
//!
//! Two debounce tiers with reset-on-event semantics:
//!   - reindex (default 2 s): reload chunks from disk and rebuild the
//!     in-memory indexes via the provider's `build_in_memory`
//!   - flush (default 30 s): persist the dirty in-memory state via `flush`
//!
//! If the process exits between reindex and flush, the persistent dirty
//! flag forces a full rebuild on next startup. Providers without the
//! flushable extension are driven by full builds instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::service::Service;

pub const DEFAULT_REINDEX_DEBOUNCE: Duration = Duration::from_secs(2);
pub const DEFAULT_FLUSH_DEBOUNCE: Duration = Duration::from_secs(30);

const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct KbWatcher {
    svc: Arc<Service>,
    reindex_debounce: Duration,
    flush_debounce: Duration,
    token: CancellationToken,
    loop_handle: Option<JoinHandle<()>>,
    fs_thread: Option<std::thread::JoinHandle<()>>,
}

impl KbWatcher {
    pub fn new(svc: Arc<Service>) -> Self {
        Self::with_debounce(svc, DEFAULT_REINDEX_DEBOUNCE, DEFAULT_FLUSH_DEBOUNCE)
    }

    pub fn with_debounce(
        svc: Arc<Service>,
        reindex_debounce: Duration,
        flush_debounce: Duration,
    ) -> Self {
        Self {
            svc,
            reindex_debounce,
            flush_debounce,
            token: CancellationToken::new(),
            loop_handle: None,
            fs_thread: None,
        }
    }

    /// Begin observing the KB root recursively and drive the debounce loop
    /// in the background.
    pub fn start(&mut self) -> crate::error::Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        let kb_root = self.svc.kb_root().to_path_buf();
        let token = self.token.clone();

        // notify's callback API is synchronous; bridge it to tokio through a
        // dedicated thread that also owns the watcher's lifetime.
        let fs_token = token.clone();
        let fs_thread = std::thread::Builder::new()
            .name("mdrag-fswatch".to_string())
            .spawn(move || {
                if let Err(e) = watch_filesystem(&kb_root, tx, fs_token) {
                    tracing::warn!("kb watcher stopped: {e}");
                }
            })
            .map_err(|e| crate::error::RagError::io(e, "spawn watcher thread"))?;

        let svc = Arc::clone(&self.svc);
        let reindex_debounce = self.reindex_debounce;
        let flush_debounce = self.flush_debounce;
        let loop_handle = tokio::spawn(async move {
            run_loop(svc, rx, token, reindex_debounce, flush_debounce).await;
        });

        self.fs_thread = Some(fs_thread);
        self.loop_handle = Some(loop_handle);
        Ok(())
    }

    /// Cancel the watcher, run a best-effort flush if dirty, and join
    /// background work.
    pub async fn stop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.loop_handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!("watcher loop join failed: {e}");
            }
        }
        if let Some(thread) = self.fs_thread.take() {
            // The thread polls its channel at a short interval and exits on
            // cancellation, so this join is bounded.
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }
    }
}

/// Dedicated thread: owns the notify watcher, filters events, forwards
/// relevant ones into the async loop.
fn watch_filesystem(
    kb_root: &Path,
    tx: mpsc::UnboundedSender<Vec<PathBuf>>,
    token: CancellationToken,
) -> notify::Result<()> {
    let (fs_tx, fs_rx) = std::sync::mpsc::channel();
    let mut watcher = RecommendedWatcher::new(fs_tx, notify::Config::default())?;
    watcher.watch(kb_root, RecursiveMode::Recursive)?;

    loop {
        if token.is_cancelled() {
            return Ok(());
        }
        match fs_rx.recv_timeout(EVENT_POLL_INTERVAL) {
            Ok(Ok(event)) => {
                if is_relevant_event(&event) && tx.send(event.paths).is_err() {
                    return Ok(());
                }
            }
            Ok(Err(e)) => tracing::warn!("kb watcher error: {e}"),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
}

/// Only `.md` events are relevant; metadata-only (chmod) events are ignored.
fn is_relevant_event(event: &Event) -> bool {
    match event.kind {
        EventKind::Create(_) | EventKind::Remove(_) => {}
        EventKind::Modify(notify::event::ModifyKind::Metadata(_)) => return false,
        EventKind::Modify(_) => {}
        _ => return false,
    }
    event.paths.iter().any(|p| {
        p.extension()
            .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("md"))
            .unwrap_or(false)
    })
}

async fn run_loop(
    svc: Arc<Service>,
    mut rx: mpsc::UnboundedReceiver<Vec<PathBuf>>,
    token: CancellationToken,
    reindex_debounce: Duration,
    flush_debounce: Duration,
) {
    // A dirty flag at startup means a previous process died between rebuild
    // and flush; the on-disk index cannot be trusted until a full rebuild.
    if svc
        .provider()
        .as_flushable()
        .map(|fp| fp.is_dirty())
        .unwrap_or(false)
    {
        tracing::info!("kb watcher: dirty index at startup, rebuilding");
        if let Err(e) = svc.build_index(&token).await {
            tracing::warn!("kb watcher startup rebuild: {e}");
        }
    }

    let mut reindex_deadline: Option<tokio::time::Instant> = None;
    let mut flush_deadline: Option<tokio::time::Instant> = None;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                flush_if_dirty(&svc).await;
                return;
            }

            event = rx.recv() => {
                match event {
                    Some(paths) => {
                        tracing::debug!(count = paths.len(), "kb change observed");
                        let now = tokio::time::Instant::now();
                        reindex_deadline = Some(now + reindex_debounce);
                        flush_deadline = Some(now + flush_debounce);
                    }
                    None => return,
                }
            }

            _ = sleep_until_deadline(reindex_deadline), if reindex_deadline.is_some() => {
                reindex_deadline = None;
                reindex(&svc, &token).await;
            }

            _ = sleep_until_deadline(flush_deadline), if flush_deadline.is_some() => {
                flush_deadline = None;
                flush_if_dirty(&svc).await;
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn reindex(svc: &Arc<Service>, token: &CancellationToken) {
    if svc.provider().as_flushable().is_none() {
        // No flushable extension: fall back to a full build.
        if let Err(e) = svc.build_index(token).await {
            tracing::warn!("kb watcher reindex: {e}");
        }
        return;
    }

    // Chunking is stateless IO; only the in-memory index mutation below
    // needs a concurrency slot, which also keeps rebuilds from running
    // alongside a search that would observe a partially built index.
    let (chunks, info) = match svc.build_chunks_and_info(token) {
        Ok(out) => out,
        Err(e) => {
            tracing::warn!("kb watcher build chunks: {e}");
            return;
        }
    };

    let _slot = match svc.acquire_slot(token).await {
        Ok(slot) => slot,
        Err(e) => {
            tracing::warn!("kb watcher reindex: {e}");
            return;
        }
    };

    let count = chunks.len();
    let fp = svc
        .provider()
        .as_flushable()
        .expect("checked flushable above");
    if let Err(e) = fp.build_in_memory(token, chunks, info).await {
        tracing::warn!("kb watcher reindex in-memory: {e}");
        return;
    }
    tracing::info!("kb watcher: reindexed {count} chunks (dirty, flush pending)");
}

/// Flush on a worker task with a bounded wait so a slow disk can never hang
/// shutdown; the worker finishes the write in the background either way.
async fn flush_if_dirty(svc: &Arc<Service>) {
    let Some(fp) = svc.provider().as_flushable() else {
        return;
    };
    if !fp.is_dirty() {
        return;
    }

    let svc2 = Arc::clone(svc);
    let worker = tokio::spawn(async move {
        match svc2.provider().as_flushable() {
            Some(fp) => fp.flush().await,
            None => Ok(()),
        }
    });

    match tokio::time::timeout(SHUTDOWN_FLUSH_TIMEOUT, worker).await {
        Ok(Ok(Ok(()))) => tracing::info!("kb watcher: flushed index to disk"),
        Ok(Ok(Err(e))) => tracing::warn!("kb watcher flush: {e}"),
        Ok(Err(e)) => tracing::warn!("kb watcher flush worker: {e}"),
        Err(_) => tracing::warn!("kb watcher flush: timed out"),
    }
}
