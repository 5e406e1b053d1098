//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "mdrag",
    version,
    about = "Local retrieval engine for Markdown knowledge bases",
    long_about = "mdrag ingests the Markdown files under a knowledge-base root, builds a hybrid \
                  BM25 + vector index, and serves ranked, policy-filtered evidence packs. A live \
                  watcher keeps the index in sync with on-disk edits."
)]
pub struct Cli {
    /// Config file path (defaults to ~/.config/mdrag/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Workspace root; KB and index paths resolve against it (defaults to
    /// the current directory)
    #[arg(short, long, global = true, value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build (or rebuild) the search index from the knowledge base
    Index,

    /// Search the knowledge base
    Search {
        /// Query text
        query: String,

        /// Profile: default_research, decisions_recent, templates_lookup
        #[arg(short, long)]
        profile: Option<String>,

        /// Retrieval mode: keyword-only, semantic-only, hybrid
        #[arg(short, long)]
        mode: Option<String>,

        /// Number of results
        #[arg(short = 'k', long, default_value = "20")]
        top_k: u32,

        /// Print the full evidence pack as JSON
        #[arg(long)]
        json: bool,

        /// Print the compact (LLM) evidence pack as JSON
        #[arg(long, conflicts_with = "json")]
        compact: bool,

        /// Require these tags (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Tag match mode: any (default) or all
        #[arg(long)]
        tag_mode: Option<String>,

        /// Filter by project (repeatable)
        #[arg(long = "project")]
        projects: Vec<String>,

        /// Filter by doc type: note, paper, template, policy, glossary
        #[arg(long = "doc-type")]
        doc_types: Vec<String>,

        /// Only chunks dated on/after this ISO date
        #[arg(long)]
        date_from: Option<String>,

        /// Only chunks dated on/before this ISO date
        #[arg(long)]
        date_to: Option<String>,

        /// Allowed confidentiality levels (repeatable)
        #[arg(long = "confidentiality")]
        confidentiality: Vec<String>,

        /// Include restricted material
        #[arg(long)]
        allow_restricted: bool,
    },

    /// Fetch the full text of one chunk by source path and ordinal
    Fetch {
        /// KB-relative source path, e.g. notes/meeting.md
        source_path: String,

        /// 1-based chunk ordinal within the document
        ordinal: u32,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Watch the knowledge base and keep the index in sync until Ctrl-C
    Watch,

    /// Show stored index metadata
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,

    /// Validate a configuration file
    Validate {
        /// Path to config file (defaults to the standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
