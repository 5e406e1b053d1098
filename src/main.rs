use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use mdrag::cli::{Cli, Commands, ConfigAction};
use mdrag::config::Config;
use mdrag::error::RagError;
use mdrag::types::{SearchFilters, SearchMode, SearchRequest};
use mdrag::watcher::KbWatcher;
use mdrag::Service;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();
    let workspace = match &cli.workspace {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };

    match cli.command {
        Commands::Index => cmd_index(&workspace, cli.config).await,
        Commands::Search {
            query,
            profile,
            mode,
            top_k,
            json,
            compact,
            tags,
            tag_mode,
            projects,
            doc_types,
            date_from,
            date_to,
            confidentiality,
            allow_restricted,
        } => {
            let filters = SearchFilters {
                tags,
                tag_mode: tag_mode.unwrap_or_default(),
                project: projects,
                doc_type: doc_types,
                date_from: date_from.unwrap_or_default(),
                date_to: date_to.unwrap_or_default(),
                confidentiality_allow: confidentiality,
                allow_restricted,
            };
            cmd_search(
                &workspace, cli.config, query, profile, mode, top_k, filters, json, compact,
            )
            .await
        }
        Commands::Fetch {
            source_path,
            ordinal,
            json,
        } => cmd_fetch(&workspace, cli.config, &source_path, ordinal, json).await,
        Commands::Watch => cmd_watch(&workspace, cli.config).await,
        Commands::Status => cmd_status(&workspace, cli.config),
        Commands::Config { action } => cmd_config(cli.config, action),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mdrag=info"));
    fmt().with_env_filter(filter).with_target(false).init();
}

fn load_config(config_path: Option<PathBuf>) -> anyhow::Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };
    if !path.exists() {
        tracing::warn!(
            "config file not found at {}, using defaults; run 'mdrag config init' to create one",
            path.display()
        );
        return Ok(Config::default());
    }
    Ok(Config::load(&path)?)
}

fn build_service(workspace: &std::path::Path, config_path: Option<PathBuf>) -> anyhow::Result<Service> {
    let config = load_config(config_path)?;
    Ok(Service::new(workspace, &config)?)
}

/// Map engine errors to actionable CLI messages; everything else is
/// reported verbatim.
fn user_error(err: RagError) -> anyhow::Error {
    match err {
        RagError::QueueFull {
            retry_after_seconds,
        } => anyhow::anyhow!("busy: search queue is full, retry after {retry_after_seconds}s"),
        RagError::NotBuilt => anyhow::anyhow!("index not built; run 'mdrag index' first"),
        RagError::DirtyIndex => {
            anyhow::anyhow!("index was not cleanly flushed; run 'mdrag index' first")
        }
        other => anyhow::Error::new(other),
    }
}

async fn cmd_index(workspace: &std::path::Path, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let svc = build_service(workspace, config_path)?;
    let ctx = CancellationToken::new();

    let info = svc.build_index(&ctx).await.map_err(user_error)?;
    println!("✓ Index built");
    println!("  Version:   {}", info.index_version);
    println!("  Documents: {}", info.total_documents);
    println!("  Chunks:    {}", info.total_chunks);
    if !info.embedding_model_id.is_empty() {
        println!("  Embedder:  {}", info.embedding_model_id);
    }
    if !info.warnings.is_empty() {
        println!("  Warnings:  {}", info.warnings.len());
        for warning in &info.warnings {
            println!("    - {warning}");
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_search(
    workspace: &std::path::Path,
    config_path: Option<PathBuf>,
    query: String,
    profile: Option<String>,
    mode: Option<String>,
    top_k: u32,
    filters: SearchFilters,
    json: bool,
    compact: bool,
) -> anyhow::Result<()> {
    let mode = match mode {
        Some(raw) => Some(
            SearchMode::parse(&raw)
                .ok_or_else(|| anyhow::anyhow!("invalid mode {raw:?}; expected keyword-only, semantic-only, or hybrid"))?,
        ),
        None => None,
    };

    let svc = build_service(workspace, config_path)?;
    let ctx = CancellationToken::new();
    let req = SearchRequest {
        query,
        profile_id: profile.unwrap_or_default(),
        mode,
        top_k,
        filters,
    };

    let result = svc.search(&ctx, req).await.map_err(user_error)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result.full)?);
        return Ok(());
    }
    if compact {
        println!("{}", serde_json::to_string_pretty(&result.llm)?);
        return Ok(());
    }

    let pack = &result.full;
    for note in &pack.notes {
        println!("note: {note}");
    }
    if pack.items.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, item) in pack.items.iter().enumerate() {
        println!(
            "{:2}. {}#{}  score={:.3}",
            i + 1,
            item.source_path,
            item.chunk_ref.chunk_ordinal,
            item.score
        );
        if !item.title.is_empty() || !item.date.is_empty() {
            println!("    {} {}", item.title, item.date);
        }
        let mut snippet = item.snippet.replace('\n', " ");
        if snippet.chars().count() > 160 {
            snippet = snippet.chars().take(160).collect::<String>() + "...";
        }
        println!("    {snippet}");
    }
    println!(
        "\n{} results from {} sources (index {})",
        pack.items.len(),
        pack.coverage.unique_sources,
        pack.index_info.index_version
    );
    Ok(())
}

async fn cmd_fetch(
    workspace: &std::path::Path,
    config_path: Option<PathBuf>,
    source_path: &str,
    ordinal: u32,
    json: bool,
) -> anyhow::Result<()> {
    let svc = build_service(workspace, config_path)?;

    let chunk = svc
        .fetch_chunk(source_path, ordinal)
        .await
        .map_err(user_error)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&chunk)?);
    } else {
        println!("{}#{}", chunk.source_path, chunk.chunk_ordinal);
        if !chunk.chunk_loc.heading_path.is_empty() {
            println!("# {}", chunk.chunk_loc.heading_path);
        }
        println!("{}", chunk.text);
    }
    Ok(())
}

async fn cmd_watch(workspace: &std::path::Path, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let svc = Arc::new(Service::new(workspace, &config)?);

    let mut watcher = KbWatcher::with_debounce(
        Arc::clone(&svc),
        std::time::Duration::from_millis(config.watcher.reindex_debounce_ms),
        std::time::Duration::from_millis(config.watcher.flush_debounce_ms),
    );
    watcher.start()?;
    println!("Watching {} (Ctrl-C to stop)", svc.kb_root().display());

    tokio::signal::ctrl_c().await?;
    println!("\nStopping watcher...");
    watcher.stop().await;
    Ok(())
}

fn cmd_status(workspace: &std::path::Path, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let svc = build_service(workspace, config_path)?;
    let info = svc.index_info().map_err(user_error)?;

    println!("Index status");
    println!("  Version:   {}", info.index_version);
    println!("  State:     {}", info.index_state);
    println!("  Provider:  {}", info.index_provider);
    println!("  Built at:  {}", info.built_at);
    println!("  Documents: {}", info.total_documents);
    println!("  Chunks:    {}", info.total_chunks);
    if !info.embedding_model_id.is_empty() {
        println!("  Embedder:  {}", info.embedding_model_id);
    }
    if !info.warnings.is_empty() {
        println!("  Warnings:");
        for warning in &info.warnings {
            println!("    - {warning}");
        }
    }
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };
            if path.exists() && !force {
                println!("Config file already exists at {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Config::default().save(&path)?;
            println!("✓ Configuration written to {}", path.display());
        }
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            Config::load(&path)?;
            println!("✓ Configuration is valid: {}", path.display());
        }
    }
    Ok(())
}
