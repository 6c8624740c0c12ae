//! CLI command implementations.
//!
//! Commands build their output as a string; the binary prints it once
//! and maps the outcome to an exit code (0 success, 1 error, 130 when a
//! run was interrupted).

#![allow(clippy::uninlined_format_args)]
#![allow(clippy::format_push_string)]

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use crate::cli::parser::{Cli, Commands};
use crate::config::{self, PaperSourcesConfig, ProfileConfig};
use crate::core::paper::{PaperDetails, PaperRef, SearchFilters};
use crate::error::{ConfigError, Error};
use crate::orchestration::{ResearchSession, SessionOptions};
use crate::sources::PaperSource;

/// Exit code for interrupted runs.
pub const EXIT_INTERRUPTED: i32 = 130;

/// A command's rendered output plus the process exit code.
#[derive(Debug)]
pub struct CommandOutput {
    /// Text to print on stdout.
    pub text: String,
    /// Process exit code.
    pub exit_code: i32,
}

impl CommandOutput {
    fn ok(text: String) -> Self {
        Self { text, exit_code: 0 }
    }
}

/// Output rendering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(raw: &str) -> Result<Self, Error> {
        match raw {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(Error::Config(ConfigError::Invalid {
                message: format!("unknown output format: {other} (expected text or json)"),
            })),
        }
    }
}

/// Executes the parsed CLI invocation.
///
/// # Errors
///
/// Returns [`Error`] for configuration problems and remote failures
/// that survive the clients' retries.
pub async fn execute(cli: Cli) -> Result<CommandOutput, Error> {
    let format = OutputFormat::parse(&cli.format)?;
    let profile = config::load_config(cli.profile.as_deref(), cli.config.as_deref())?;

    match &cli.command {
        Some(Commands::Search {
            query,
            sources,
            strategy,
            limit,
            year_start,
            year_end,
        }) => {
            cmd_search(
                &profile, query, sources, strategy, *limit, *year_start, *year_end, format,
            )
            .await
        }
        Some(Commands::Fetch {
            paper_ids,
            with_text,
        }) => cmd_fetch(&profile, paper_ids, *with_text, format).await,
        Some(Commands::Profiles) => cmd_profiles(cli.config.as_deref(), format),
        None => {
            let Some(query) = cli.query.clone() else {
                return Err(Error::Config(ConfigError::Invalid {
                    message: "a research query or subcommand is required (see --help)"
                        .to_string(),
                }));
            };
            cmd_run(&profile, &query, &cli, format).await
        }
    }
}

/// Builds a paper source from the profile with CLI overrides applied.
fn build_source(
    profile: &ProfileConfig,
    sources: &[String],
    strategy: Option<&str>,
) -> Result<Arc<dyn PaperSource>, Error> {
    let mut sources_config: PaperSourcesConfig = profile.paper_sources.clone();
    if !sources.is_empty() {
        sources_config.providers = sources.to_vec();
    }
    if let Some(strategy) = strategy {
        sources_config.strategy = strategy.to_string();
    }
    Ok(config::create_paper_source(&sources_config)?)
}

#[allow(clippy::too_many_arguments)]
async fn cmd_search(
    profile: &ProfileConfig,
    query: &str,
    sources: &[String],
    strategy: &str,
    limit: usize,
    year_start: Option<i32>,
    year_end: Option<i32>,
    format: OutputFormat,
) -> Result<CommandOutput, Error> {
    let source = build_source(profile, sources, Some(strategy))?;

    let filters = match (year_start, year_end) {
        (None, None) => None,
        (start, end) => Some(SearchFilters {
            year: Some(format!(
                "{}-{}",
                start.map_or_else(String::new, |y| y.to_string()),
                end.map_or_else(String::new, |y| y.to_string())
            )),
            ..SearchFilters::default()
        }),
    };

    let papers = source.search_papers(query, filters.as_ref(), limit).await?;

    let text = match format {
        OutputFormat::Json => serde_json::to_string_pretty(&papers).unwrap_or_default(),
        OutputFormat::Text => {
            let mut out = format!("Found {} papers for '{query}'\n\n", papers.len());
            for (i, paper) in papers.iter().enumerate() {
                out.push_str(&render_paper_ref(i + 1, paper));
            }
            out
        }
    };
    Ok(CommandOutput::ok(text))
}

async fn cmd_fetch(
    profile: &ProfileConfig,
    paper_ids: &[String],
    with_text: bool,
    format: OutputFormat,
) -> Result<CommandOutput, Error> {
    let source = build_source(profile, &[], None)?;

    let papers = if with_text {
        source.fetch_papers_with_text(paper_ids).await?
    } else {
        source.fetch_papers(paper_ids).await?
    };

    let text = match format {
        OutputFormat::Json => serde_json::to_string_pretty(&papers).unwrap_or_default(),
        OutputFormat::Text => {
            let mut out = format!("Fetched {}/{} papers\n\n", papers.len(), paper_ids.len());
            for paper in &papers {
                out.push_str(&render_paper_details(paper));
            }
            out
        }
    };
    Ok(CommandOutput::ok(text))
}

fn cmd_profiles(config_path: Option<&Path>, format: OutputFormat) -> Result<CommandOutput, Error> {
    let path: PathBuf = config_path
        .map_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_FILE), Path::to_path_buf);

    if !path.exists() {
        let text = match format {
            OutputFormat::Json => serde_json::json!({"profiles": []}).to_string(),
            OutputFormat::Text => format!(
                "No profiles file at {}; configuration comes from the environment.\n",
                path.display()
            ),
        };
        return Ok(CommandOutput::ok(text));
    }

    let names = config::list_profiles(&path)?;
    let text = match format {
        OutputFormat::Json => serde_json::json!({"profiles": names}).to_string(),
        OutputFormat::Text => {
            let mut out = format!("Profiles in {}:\n", path.display());
            for name in &names {
                let _ = writeln!(out, "  {name}");
            }
            out
        }
    };
    Ok(CommandOutput::ok(text))
}

async fn cmd_run(
    profile: &ProfileConfig,
    query: &str,
    cli: &Cli,
    format: OutputFormat,
) -> Result<CommandOutput, Error> {
    let filters = build_run_filters(cli);
    let options = SessionOptions {
        use_managing_agent: cli.use_managing_agent,
        filters,
        plan_query: cli.plan,
        sources: (!cli.sources.is_empty()).then(|| cli.sources.clone()),
    };

    let mut session = ResearchSession::start(profile, query, options).await?;

    // Ctrl-C quiesces the scheduler between iterations
    let cancel = session.cancellation_handle();
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_flag = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing the current iteration");
            interrupted_flag.store(true, Ordering::SeqCst);
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let status = session.run(cli.iterations, cli.stop_on_hypotheses).await?;
    let hypotheses = session.hypotheses(10, 0.5);

    let text = match format {
        OutputFormat::Json => serde_json::json!({
            "status": status,
            "hypotheses": hypotheses,
        })
        .to_string(),
        OutputFormat::Text => {
            let mut out = String::new();
            let _ = writeln!(out, "Loop {} (#{})", status.loop_id, status.loop_number);
            let _ = writeln!(
                out,
                "Branches: {} total, {} active, {} completed, {} pruned",
                status.total_branches,
                status.active_branches,
                status.completed_branches,
                status.pruned_branches
            );
            let _ = writeln!(
                out,
                "Papers: {}  Summaries: {}  Hypotheses: {}  Context tokens: {}",
                status.total_papers,
                status.total_summaries,
                status.total_hypotheses,
                status.total_context_used
            );
            if !hypotheses.is_empty() {
                out.push_str("\nTop hypotheses:\n");
                for hypothesis in &hypotheses {
                    let _ = writeln!(
                        out,
                        "  [{:.2}] {} (papers: {})",
                        hypothesis.confidence,
                        hypothesis.text,
                        hypothesis.supporting_paper_ids.join(", ")
                    );
                }
            }
            out
        }
    };

    let exit_code = if interrupted.load(Ordering::SeqCst) {
        EXIT_INTERRUPTED
    } else {
        0
    };
    Ok(CommandOutput { text, exit_code })
}

/// Folds the run flags into search filters.
fn build_run_filters(cli: &Cli) -> Option<SearchFilters> {
    if cli.year.is_none() && cli.start_date.is_none() && cli.end_date.is_none() {
        return None;
    }
    Some(SearchFilters {
        year: cli.year.clone(),
        start_date: cli.start_date.clone(),
        end_date: cli.end_date.clone(),
        ..SearchFilters::default()
    })
}

fn render_paper_ref(number: usize, paper: &PaperRef) -> String {
    let year = paper
        .year
        .map_or_else(|| "n.d.".to_string(), |y| y.to_string());
    let mut out = format!(
        "{number}. {} ({year}) [{}]\n",
        paper.display_title(),
        paper.paper_id
    );
    let authors: Vec<&str> = paper
        .authors
        .iter()
        .filter_map(|a| a.name.as_deref())
        .take(3)
        .collect();
    if !authors.is_empty() {
        let _ = writeln!(out, "   {}", authors.join(", "));
    }
    let _ = writeln!(
        out,
        "   citations: {}  fields: [{}]",
        paper.citation_count.unwrap_or(0),
        paper.fields_of_study.join(", ")
    );
    out
}

fn render_paper_details(paper: &PaperDetails) -> String {
    let mut out = render_paper_ref(0, &paper.meta);
    // Drop the "0. " numbering prefix from the shared renderer
    out = out.trim_start_matches("0. ").to_string();
    if let Some(ref venue) = paper.venue {
        let _ = writeln!(out, "   venue: {venue}");
    }
    if let Some(ref text) = paper.full_text {
        let excerpt: String = text.chars().take(200).collect();
        let _ = writeln!(out, "   full text: {} chars ({excerpt}...)", text.len());
    }
    out.push('\n');
    out
}
