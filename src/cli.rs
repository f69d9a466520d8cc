use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use hybridseek::{
    EmbedderKind,
    Overrides,
    SearchParams,
    fusion::DEFAULT_RRF_BETA,
    retriever::{DEFAULT_K, DEFAULT_K_KEYWORD, DEFAULT_K_SEMANTIC},
};

#[derive(Debug, Parser)]
#[command(
    name = "hybridseek",
    version,
    about = "Hybrid dense-vector and BM25 retrieval with reciprocal rank fusion"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Embedding backend
    #[arg(long, global = true, value_enum, env = "HYBRIDSEEK_EMBEDDER")]
    pub embedder: Option<EmbedderKind>,

    /// Embedding model name (Ollama backend)
    #[arg(long, global = true, env = "HYBRIDSEEK_MODEL")]
    pub model: Option<String>,

    /// Base URL of the Ollama server
    #[arg(long, global = true, env = "HYBRIDSEEK_OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Timeout for a single embedding request, in seconds
    #[arg(
        long,
        global = true,
        env = "HYBRIDSEEK_EMBED_TIMEOUT",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub embed_timeout: Option<u64>,

    /// Maximum concurrent embedding requests while building
    #[arg(long, global = true, env = "HYBRIDSEEK_MAX_IN_FLIGHT")]
    pub max_in_flight: Option<usize>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            embedder: self.embedder,
            embedding_model: self.model.clone(),
            ollama_url: self.ollama_url.clone(),
            embed_timeout_secs: self.embed_timeout,
            max_in_flight: self.max_in_flight,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build and publish a new index from a JSONL record file
    Build(BuildArgs),
    /// Run a hybrid query against the active index
    Search(SearchArgs),
    /// Show the active index and resolved settings
    Status(StatusArgs),
    /// Manage persistent settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Build --

#[derive(Debug, Parser)]
pub struct BuildArgs {
    /// Newline-delimited JSON records, one chunk per line
    pub records: PathBuf,

    /// Do not draw a progress bar
    #[arg(long)]
    pub no_progress: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value_t = DEFAULT_K)]
    pub count: usize,

    /// Only return chunks from this source_id
    #[arg(short = 's', long)]
    pub source: Option<String>,

    /// Candidates taken from the vector index
    #[arg(long, env = "K_SEMANTIC", default_value_t = DEFAULT_K_SEMANTIC)]
    pub k_semantic: usize,

    /// Candidates taken from the keyword index
    #[arg(long, env = "K_KEYWORD", default_value_t = DEFAULT_K_KEYWORD)]
    pub k_keyword: usize,

    /// Drop semantic candidates below this cosine similarity
    #[arg(long, env = "SIMILARITY_THRESHOLD", default_value_t = 0.0)]
    pub similarity_threshold: f32,

    /// Weight of the semantic list in fusion (0.0 to 1.0)
    #[arg(long, env = "RRF_BETA", default_value_t = DEFAULT_RRF_BETA)]
    pub rrf_beta: f64,

    /// Fall back to keyword results if the embedding service fails
    #[arg(long)]
    pub keyword_fallback: bool,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

impl SearchArgs {
    pub fn params(&self) -> SearchParams {
        SearchParams {
            k: self.count,
            filter_source_id: self.source.clone(),
            k_semantic: self.k_semantic,
            k_keyword: self.k_keyword,
            similarity_threshold: self.similarity_threshold,
            rrf_beta: self.rrf_beta,
            keyword_fallback: self.keyword_fallback,
        }
    }
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show the resolved settings and where stored values override defaults
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a setting in config.redb
    Set {
        /// Setting name (embedder, embedding_model, ollama_url,
        /// embed_timeout_secs, max_in_flight, hash_dimension)
        key: String,
        /// New value
        value: String,
    },
    /// Remove a stored setting, or all of them
    Clear {
        /// Setting name; clears everything when omitted
        key: Option<String>,
    },
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "hybridseek",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn zero_embed_timeout_is_rejected() {
        assert!(
            Cli::try_parse_from(["hybridseek", "--embed-timeout", "0", "status"])
                .is_err()
        );
        let cli =
            Cli::try_parse_from(["hybridseek", "--embed-timeout", "5", "status"])
                .unwrap();
        assert_eq!(cli.embed_timeout, Some(5));
    }

    #[test]
    fn parse_search_flags() {
        let cli = Cli::parse_from([
            "hybridseek",
            "search",
            "credit report dispute",
            "-n",
            "3",
            "--source",
            "credit.pdf",
            "--k-semantic",
            "20",
            "--k-keyword",
            "15",
            "--similarity-threshold",
            "0.25",
            "--rrf-beta",
            "0.5",
            "--keyword-fallback",
        ]);
        match cli.command {
            Command::Search(args) => {
                let params = args.params();
                assert_eq!(params.k, 3);
                assert_eq!(params.filter_source_id.as_deref(), Some("credit.pdf"));
                assert_eq!(params.k_semantic, 20);
                assert_eq!(params.k_keyword, 15);
                assert_eq!(params.similarity_threshold, 0.25);
                assert_eq!(params.rrf_beta, 0.5);
                assert!(params.keyword_fallback);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_global_overrides() {
        let cli = Cli::parse_from([
            "hybridseek",
            "--embedder",
            "hash",
            "--model",
            "m",
            "status",
        ]);
        let overrides = cli.overrides();
        assert_eq!(overrides.embedder, Some(EmbedderKind::Hash));
        assert_eq!(overrides.embedding_model.as_deref(), Some("m"));
    }

    #[test]
    fn parse_config_clear_all() {
        let cli = Cli::parse_from(["hybridseek", "config", "clear"]);
        assert!(matches!(
            cli.command,
            Command::Config {
                action: ConfigAction::Clear { key: None }
            }
        ));
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
