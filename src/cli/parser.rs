//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros. The default
//! invocation (no subcommand) runs a research loop for the positional
//! query; `search`, `fetch` and `profiles` expose the building blocks
//! directly.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// lira-rs: autonomous literature research agent.
///
/// Drives an expanding exploration of the citation graph from a natural
/// language query, producing groundedness-gated summaries and research
/// hypotheses.
#[derive(Parser, Debug)]
#[command(name = "lira-rs")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(args_conflicts_with_subcommands = true)]
#[command(after_help = r#"Examples:
  lira-rs "transformer attention mechanisms"        # Run a research loop
  lira-rs "protein folding" --iterations 5 --use-managing-agent
  lira-rs search "quantum error correction" --source arxiv --limit 5
  lira-rs fetch 649def34f8be52c8b66281af98ae884c09aef38b --with-text
  lira-rs profiles
"#)]
pub struct Cli {
    /// Profiles file path.
    ///
    /// Defaults to `profiles.yaml` in the working directory; environment
    /// variables configure the run when the file is absent.
    #[arg(short, long, env = "LIRA_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Profile to load from the profiles file.
    #[arg(short, long, env = "LIRA_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// Research query; runs the full loop when no subcommand is given.
    pub query: Option<String>,

    /// Maximum total iterations across all branches.
    #[arg(short, long, default_value = "10")]
    pub iterations: usize,

    /// Drive branch decisions with the managing agent.
    #[arg(long)]
    pub use_managing_agent: bool,

    /// Run the query planner before the first iteration.
    #[arg(long)]
    pub plan: bool,

    /// Stop once this many hypotheses exist (0 = disabled).
    #[arg(long, default_value = "0")]
    pub stop_on_hypotheses: usize,

    /// Publication year range filter (e.g. "2019-2023").
    #[arg(long)]
    pub year: Option<String>,

    /// ISO partial start date filter (e.g. "2020-06").
    #[arg(long)]
    pub start_date: Option<String>,

    /// ISO partial end date filter.
    #[arg(long)]
    pub end_date: Option<String>,

    /// Paper sources to use (repeatable; overrides the profile).
    #[arg(long = "source")]
    pub sources: Vec<String>,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search paper providers without running a loop.
    #[command(after_help = r#"Examples:
  lira-rs search "graph neural networks"                     # Profile sources
  lira-rs search "diffusion models" --source arxiv --limit 5
  lira-rs search "causal inference" --source semantic_scholar --source arxiv --strategy parallel
  lira-rs --format json search "bayesian optimization" | jq '.[].paper_id'
"#)]
    Search {
        /// Search query text.
        query: String,

        /// Paper sources to query (repeatable).
        #[arg(long = "source")]
        sources: Vec<String>,

        /// Composition strategy (single, parallel, fallback).
        #[arg(long, default_value = "single")]
        strategy: String,

        /// Maximum results.
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Earliest publication year.
        #[arg(long)]
        year_start: Option<i32>,

        /// Latest publication year.
        #[arg(long)]
        year_end: Option<i32>,
    },

    /// Fetch detail records for specific papers.
    Fetch {
        /// Paper IDs (provider IDs or arxiv:<id>).
        #[arg(required = true)]
        paper_ids: Vec<String>,

        /// Also download and extract full text.
        #[arg(long)]
        with_text: bool,
    },

    /// List profiles defined in the profiles file.
    Profiles,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_top_level_run_parse() {
        let cli = Cli::try_parse_from([
            "lira-rs",
            "transformer attention",
            "--iterations",
            "5",
            "--use-managing-agent",
            "--year",
            "2019-2023",
        ])
        .unwrap_or_else(|e| panic!("parse: {e}"));
        assert_eq!(cli.query.as_deref(), Some("transformer attention"));
        assert_eq!(cli.iterations, 5);
        assert!(cli.use_managing_agent);
        assert_eq!(cli.year.as_deref(), Some("2019-2023"));
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_search_subcommand_parse() {
        let cli = Cli::try_parse_from([
            "lira-rs",
            "search",
            "quantum computing",
            "--source",
            "arxiv",
            "--source",
            "semantic_scholar",
            "--strategy",
            "parallel",
            "--limit",
            "5",
        ])
        .unwrap_or_else(|e| panic!("parse: {e}"));
        match cli.command {
            Some(Commands::Search {
                query,
                sources,
                strategy,
                limit,
                ..
            }) => {
                assert_eq!(query, "quantum computing");
                assert_eq!(sources, vec!["arxiv", "semantic_scholar"]);
                assert_eq!(strategy, "parallel");
                assert_eq!(limit, 5);
            }
            other => panic!("expected search, got {other:?}"),
        }
    }

    #[test]
    fn test_fetch_requires_ids() {
        assert!(Cli::try_parse_from(["lira-rs", "fetch"]).is_err());
        let cli = Cli::try_parse_from(["lira-rs", "fetch", "abc123", "--with-text"])
            .unwrap_or_else(|e| panic!("parse: {e}"));
        match cli.command {
            Some(Commands::Fetch {
                paper_ids,
                with_text,
            }) => {
                assert_eq!(paper_ids, vec!["abc123"]);
                assert!(with_text);
            }
            other => panic!("expected fetch, got {other:?}"),
        }
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["lira-rs", "--format", "json", "profiles"])
            .unwrap_or_else(|e| panic!("parse: {e}"));
        assert_eq!(cli.format, "json");
        assert!(matches!(cli.command, Some(Commands::Profiles)));
    }
}
