//! Configuration: YAML profiles with environment-variable expansion.
//!
//! A profiles file maps profile names to backend selections and numeric
//! knobs. `${VAR}` references anywhere in the file are expanded from the
//! environment before parsing; unset variables are left verbatim so the
//! error points at the real problem. When no profiles file exists,
//! configuration falls back to environment variables alone.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agent::providers::{AnthropicProvider, MockProvider, OpenRouterProvider};
use crate::agent::LlmProvider;
use crate::error::ConfigError;
use crate::events::{EventSink, HttpEventSink, NullEventSink};
use crate::halugate::{HaluGate, HttpHaluGate, MockHaluGate};
use crate::sources::{
    ArxivSource, CompositeSource, PaperSource, PreferredProvider, SemanticScholarSource,
    SourceStrategy,
};

/// Default profile name when none is selected.
pub const DEFAULT_PROFILE: &str = "default";
/// Environment variable selecting the profile.
pub const PROFILE_ENV_VAR: &str = "LIRA_PROFILE";
/// Default profiles file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "profiles.yaml";

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Summarizer LLM backend selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    /// OpenRouter (or any OpenAI-compatible endpoint).
    #[default]
    OpenRouter,
    /// Anthropic Messages API.
    Anthropic,
    /// Scripted mock (tests, offline runs).
    Mock,
}

/// Configuration for an LLM backend (summarizer or reasoner).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Which backend to use.
    pub backend: LlmBackend,
    /// Model identifier; backend-specific default when unset.
    pub model: Option<String>,
    /// API key (usually `${VAR}`-expanded from the profiles file).
    pub api_key: Option<String>,
    /// Base URL override.
    pub base_url: Option<String>,
}

impl LlmConfig {
    /// Model name, falling back to the backend default.
    #[must_use]
    pub fn model_name(&self) -> String {
        self.model.clone().unwrap_or_else(|| {
            match self.backend {
                LlmBackend::OpenRouter => "upstage/solar-pro-3:free",
                LlmBackend::Anthropic => "claude-opus-4-5",
                LlmBackend::Mock => "mock",
            }
            .to_string()
        })
    }
}

/// Hallucination gate backend selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HaluGateBackend {
    /// In-process detector models (not available in this build).
    Local,
    /// Remote validation service.
    #[default]
    Http,
    /// Scripted mock.
    Mock,
}

/// Hallucination gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HaluGateConfig {
    /// Which backend to use.
    pub backend: HaluGateBackend,
    /// Validation endpoint for the HTTP backend.
    pub url: Option<String>,
}

impl Default for HaluGateConfig {
    fn default() -> Self {
        Self {
            backend: HaluGateBackend::Http,
            url: None,
        }
    }
}

/// Stand-alone overseer knobs (generate-validate-retry outside the
/// research loop, which carries its own stricter threshold).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverseerConfig {
    /// Retry attempts per summary.
    pub max_retries: u32,
    /// Acceptance threshold.
    pub groundedness_threshold: f64,
}

impl Default for OverseerConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            groundedness_threshold: 0.8,
        }
    }
}

/// Paper source selection and composition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperSourcesConfig {
    /// Backends, in priority order (`semantic_scholar`, `arxiv`).
    pub providers: Vec<String>,
    /// Composition strategy (`single`, `parallel`, `fallback`).
    pub strategy: String,
    /// Which provider's record wins on duplicates.
    pub prefer: String,
    /// arXiv category restriction (e.g. `cs.LG`).
    pub arxiv_categories: Vec<String>,
    /// Semantic Scholar API key.
    pub semantic_scholar_api_key: Option<String>,
}

impl Default for PaperSourcesConfig {
    fn default() -> Self {
        Self {
            providers: vec!["semantic_scholar".to_string()],
            strategy: "single".to_string(),
            prefer: "semantic_scholar".to_string(),
            arxiv_categories: Vec::new(),
            semantic_scholar_api_key: None,
        }
    }
}

/// Inner loop knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct InnerLoopConfig {
    /// Candidates requested from the provider per search.
    pub candidate_fetch_limit: usize,
    /// Working-set cap per iteration.
    pub max_papers_per_iteration: usize,
    /// Bounded summarization fan-out.
    pub max_summarization_concurrency: usize,
    /// Whether to download and extract PDFs.
    pub fetch_full_text: bool,
    /// Strict acceptance threshold (with zero contradictions).
    pub strict_threshold: f64,
    /// Loose acceptance floor for best-of-two salvage.
    pub loose_threshold: f64,
}

impl Default for InnerLoopConfig {
    fn default() -> Self {
        Self {
            candidate_fetch_limit: 50,
            max_papers_per_iteration: 20,
            max_summarization_concurrency: 5,
            fetch_full_text: false,
            strict_threshold: 0.95,
            loose_threshold: 0.70,
        }
    }
}

/// Iteration loop knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct IterationLoopConfig {
    /// Hard cap on iterations per branch.
    pub max_iterations_per_branch: usize,
    /// Citations fetched per frontier paper.
    pub max_citations_per_paper: usize,
    /// References fetched per frontier paper.
    pub max_references_per_paper: usize,
    /// Whether references join the frontier alongside citations.
    pub include_references: bool,
}

impl Default for IterationLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations_per_branch: 10,
            max_citations_per_paper: 20,
            max_references_per_paper: 10,
            include_references: true,
        }
    }
}

/// Branch lifecycle knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchConfig {
    /// Context budget per branch, in tokens.
    pub max_context_window: u64,
    /// Utilization at which `should_split` fires.
    pub context_split_threshold: f64,
    /// Paper count that enables hypothesis mode.
    pub min_papers_for_hypothesis: usize,
    /// Cap on concurrent active branches.
    pub max_branches: usize,
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            max_context_window: crate::core::DEFAULT_MAX_CONTEXT_WINDOW,
            context_split_threshold: 0.80,
            min_papers_for_hypothesis: 10,
            max_branches: 10,
        }
    }
}

/// Managing agent knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagingAgentConfig {
    /// Minimum papers before any evaluation.
    pub min_papers_before_evaluation: usize,
    /// Evaluate every N iterations once eligible.
    pub evaluation_interval: usize,
    /// Tool-loop turn budget.
    pub max_turns: usize,
    /// Sampling temperature for decisions.
    pub temperature: f32,
    /// Response token budget.
    pub max_tokens: u32,
}

impl Default for ManagingAgentConfig {
    fn default() -> Self {
        Self {
            min_papers_before_evaluation: 5,
            evaluation_interval: 2,
            max_turns: 5,
            temperature: 0.3,
            max_tokens: 4096,
        }
    }
}

/// Master agent knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterAgentConfig {
    /// Fall back to threshold splitting when no managing agent is set.
    pub auto_split: bool,
    /// Switch to hypothesis mode automatically at the paper threshold.
    pub auto_hypothesis: bool,
    /// Managing agent knobs.
    pub managing_agent: ManagingAgentConfig,
}

impl Default for MasterAgentConfig {
    fn default() -> Self {
        Self {
            auto_split: true,
            auto_hypothesis: true,
            managing_agent: ManagingAgentConfig::default(),
        }
    }
}

/// All research-loop knobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchLoopConfig {
    /// Inner loop knobs.
    pub inner_loop: InnerLoopConfig,
    /// Iteration loop knobs.
    pub iteration_loop: IterationLoopConfig,
    /// Branch lifecycle knobs.
    pub branch: BranchConfig,
    /// Master agent knobs.
    pub master_agent: MasterAgentConfig,
}

/// Realtime event sink configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Sink base URL; unset disables streaming.
    pub url: Option<String>,
}

/// One named profile: backend selections plus knobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Summarizer LLM.
    pub summarizer: LlmConfig,
    /// Reasoning LLM for the managing agent.
    pub reasoner: LlmConfig,
    /// Hallucination gate.
    pub halugate: HaluGateConfig,
    /// Stand-alone overseer knobs.
    pub overseer: OverseerConfig,
    /// Paper sources.
    pub paper_sources: PaperSourcesConfig,
    /// Research-loop knobs.
    pub research_loop: ResearchLoopConfig,
    /// Event sink.
    pub events: EventsConfig,
}

/// Root structure of the profiles file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Profiles by name.
    pub profiles: HashMap<String, ProfileConfig>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Expands `${VAR}` references from the environment. Unset variables are
/// left verbatim.
#[must_use]
pub fn expand_env_vars(raw: &str) -> String {
    let Ok(pattern) = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}") else {
        return raw.to_string();
    };
    pattern
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            let var = &caps[1];
            std::env::var(var).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

/// Loads a profile from a YAML profiles file.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file is unreadable, malformed, or
/// does not contain the requested profile.
pub fn load_profile_from_yaml(path: &Path, profile: &str) -> Result<ProfileConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    let expanded = expand_env_vars(&raw);
    let parsed: ConfigFile =
        serde_yaml::from_str(&expanded).map_err(|e| ConfigError::Invalid {
            message: e.to_string(),
        })?;

    parsed.profiles.get(profile).cloned().ok_or_else(|| {
        let mut available: Vec<&str> = parsed.profiles.keys().map(String::as_str).collect();
        available.sort_unstable();
        ConfigError::UnknownProfile {
            name: profile.to_string(),
            available: available.join(", "),
        }
    })
}

/// Builds a profile purely from environment variables (no profiles file).
#[must_use]
pub fn load_profile_from_env() -> ProfileConfig {
    let mut profile = ProfileConfig {
        summarizer: LlmConfig {
            backend: LlmBackend::OpenRouter,
            model: std::env::var("OPENROUTER_MODEL").ok(),
            api_key: std::env::var("OPENROUTER_API_KEY").ok(),
            base_url: std::env::var("OPENROUTER_BASE_URL").ok(),
        },
        reasoner: LlmConfig {
            backend: LlmBackend::Anthropic,
            model: std::env::var("LIRA_REASONER_MODEL").ok(),
            api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            base_url: None,
        },
        ..ProfileConfig::default()
    };
    profile.halugate.url = std::env::var("HALUGATE_URL").ok();
    if profile.halugate.url.is_none() {
        profile.halugate.backend = HaluGateBackend::Mock;
    }
    profile.paper_sources.semantic_scholar_api_key =
        std::env::var("SEMANTIC_SCHOLAR_API_KEY").ok();
    profile.events.url = std::env::var("LIRA_EVENTS_URL").ok();
    profile
}

/// Main configuration entry point: profiles file when present, else
/// environment variables.
///
/// # Errors
///
/// Returns [`ConfigError`] for malformed files or unknown profiles. A
/// missing file is not an error unless its path was given explicitly.
pub fn load_config(
    profile: Option<&str>,
    config_path: Option<&Path>,
) -> Result<ProfileConfig, ConfigError> {
    let profile_name = profile.map_or_else(
        || std::env::var(PROFILE_ENV_VAR).unwrap_or_else(|_| DEFAULT_PROFILE.to_string()),
        ToString::to_string,
    );

    match config_path {
        Some(path) => load_profile_from_yaml(path, &profile_name),
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                load_profile_from_yaml(default_path, &profile_name)
            } else {
                info!("no profiles file found, configuring from environment");
                Ok(load_profile_from_env())
            }
        }
    }
}

/// Lists profile names defined in a profiles file.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file is unreadable or malformed.
pub fn list_profiles(path: &Path) -> Result<Vec<String>, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    let expanded = expand_env_vars(&raw);
    let parsed: ConfigFile =
        serde_yaml::from_str(&expanded).map_err(|e| ConfigError::Invalid {
            message: e.to_string(),
        })?;
    let mut names: Vec<String> = parsed.profiles.into_keys().collect();
    names.sort_unstable();
    Ok(names)
}

// ---------------------------------------------------------------------------
// Backend factories
// ---------------------------------------------------------------------------

/// Builds the summarizer (or any) LLM provider from its config.
///
/// # Errors
///
/// Returns [`ConfigError::ApiKeyMissing`] when the selected backend
/// needs a key that is absent.
pub fn create_llm_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, ConfigError> {
    match config.backend {
        LlmBackend::OpenRouter => {
            let key = config
                .api_key
                .as_deref()
                .filter(|k| !k.is_empty() && !k.starts_with("${"))
                .ok_or_else(|| ConfigError::ApiKeyMissing {
                    backend: "openrouter".to_string(),
                    env_var: "OPENROUTER_API_KEY".to_string(),
                })?;
            Ok(Arc::new(OpenRouterProvider::new(
                key,
                config.base_url.as_deref(),
            )))
        }
        LlmBackend::Anthropic => {
            let key = config
                .api_key
                .as_deref()
                .filter(|k| !k.is_empty() && !k.starts_with("${"))
                .ok_or_else(|| ConfigError::ApiKeyMissing {
                    backend: "anthropic".to_string(),
                    env_var: "ANTHROPIC_API_KEY".to_string(),
                })?;
            let provider = AnthropicProvider::new(key, config.base_url.as_deref())
                .map_err(|e| ConfigError::Invalid {
                    message: e.to_string(),
                })?;
            Ok(Arc::new(provider))
        }
        LlmBackend::Mock => Ok(Arc::new(MockProvider::with_fallback(
            "mock completion output",
        ))),
    }
}

/// Builds the hallucination gate from its config.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] for the unavailable `local` backend
/// or a missing HTTP URL.
pub fn create_halugate(config: &HaluGateConfig) -> Result<Arc<dyn HaluGate>, ConfigError> {
    match config.backend {
        HaluGateBackend::Local => Err(ConfigError::Invalid {
            message: "halugate backend 'local' requires in-process detector models; \
                      use 'http' or 'mock'"
                .to_string(),
        }),
        HaluGateBackend::Http => {
            let url = config.url.as_deref().ok_or_else(|| ConfigError::Invalid {
                message: "halugate backend 'http' requires a url".to_string(),
            })?;
            let gate = HttpHaluGate::new(url).map_err(|e| ConfigError::Invalid {
                message: e.to_string(),
            })?;
            Ok(Arc::new(gate))
        }
        HaluGateBackend::Mock => Ok(Arc::new(MockHaluGate::default())),
    }
}

/// Builds the paper provider stack from its config.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] for unknown provider or strategy
/// names, or when client construction fails.
pub fn create_paper_source(
    config: &PaperSourcesConfig,
) -> Result<Arc<dyn PaperSource>, ConfigError> {
    let mut sources: Vec<Arc<dyn PaperSource>> = Vec::new();
    for name in &config.providers {
        match name.as_str() {
            "semantic_scholar" => {
                let source =
                    SemanticScholarSource::new(config.semantic_scholar_api_key.clone())
                        .map_err(|e| ConfigError::Invalid {
                            message: e.to_string(),
                        })?;
                sources.push(Arc::new(source));
            }
            "arxiv" => {
                let source = ArxivSource::new(config.arxiv_categories.clone()).map_err(|e| {
                    ConfigError::Invalid {
                        message: e.to_string(),
                    }
                })?;
                sources.push(Arc::new(source));
            }
            other => {
                return Err(ConfigError::Invalid {
                    message: format!("unknown paper provider: {other}"),
                });
            }
        }
    }

    if sources.is_empty() {
        return Err(ConfigError::Invalid {
            message: "paper_sources.providers must not be empty".to_string(),
        });
    }
    if sources.len() == 1 {
        return Ok(sources.remove(0));
    }

    let strategy: SourceStrategy =
        config
            .strategy
            .parse()
            .map_err(|e: String| ConfigError::Invalid { message: e })?;
    let prefer = if config.prefer == "arxiv" {
        PreferredProvider::Arxiv
    } else {
        PreferredProvider::SemanticScholar
    };
    let composite =
        CompositeSource::new(sources, strategy, prefer).map_err(|e| ConfigError::Invalid {
            message: e.to_string(),
        })?;
    Ok(Arc::new(composite))
}

/// Builds the event sink from its config; unset URL disables streaming.
#[must_use]
pub fn create_event_sink(config: &EventsConfig) -> Arc<dyn EventSink> {
    match config.url.as_deref() {
        Some(url) if !url.is_empty() => match HttpEventSink::new(url) {
            Ok(sink) => Arc::new(sink),
            Err(e) => {
                warn!(error = %e, "event sink disabled");
                Arc::new(NullEventSink)
            }
        },
        _ => Arc::new(NullEventSink),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::io::Write as _;

    const SAMPLE_CONFIG: &str = r#"
profiles:
  default:
    summarizer:
      backend: openrouter
      model: "upstage/solar-pro-3:free"
      api_key: "${LIRA_TEST_OPENROUTER_KEY}"
    halugate:
      backend: mock
    paper_sources:
      providers: [semantic_scholar, arxiv]
      strategy: parallel
    research_loop:
      inner_loop:
        max_papers_per_iteration: 5
        strict_threshold: 0.9
      branch:
        max_branches: 4
  offline:
    summarizer:
      backend: mock
    halugate:
      backend: mock
"#;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap_or_else(|e| panic!("tmp: {e}"));
        file.write_all(content.as_bytes())
            .unwrap_or_else(|e| panic!("write: {e}"));
        file
    }

    #[test]
    fn test_load_profile_with_overrides_and_defaults() {
        let file = write_config(SAMPLE_CONFIG);
        let profile = load_profile_from_yaml(file.path(), "default")
            .unwrap_or_else(|e| panic!("load: {e}"));

        // Overridden knobs
        assert_eq!(profile.research_loop.inner_loop.max_papers_per_iteration, 5);
        assert!((profile.research_loop.inner_loop.strict_threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(profile.research_loop.branch.max_branches, 4);
        // Untouched knobs keep defaults
        assert_eq!(profile.research_loop.inner_loop.candidate_fetch_limit, 50);
        assert_eq!(profile.research_loop.branch.min_papers_for_hypothesis, 10);
        assert_eq!(profile.paper_sources.providers.len(), 2);
    }

    #[test]
    fn test_unknown_profile_lists_available() {
        let file = write_config(SAMPLE_CONFIG);
        let err = load_profile_from_yaml(file.path(), "nope")
            .map(|_| ())
            .map_err(|e| e.to_string())
            .unwrap_err();
        assert!(err.contains("default, offline"), "got: {err}");
    }

    #[test]
    fn test_env_var_expansion() {
        // SAFETY: test-scoped env mutation; key name is unique to this test
        unsafe { std::env::set_var("LIRA_TEST_OPENROUTER_KEY", "sk-test-123") };
        let file = write_config(SAMPLE_CONFIG);
        let profile = load_profile_from_yaml(file.path(), "default")
            .unwrap_or_else(|e| panic!("load: {e}"));
        assert_eq!(profile.summarizer.api_key.as_deref(), Some("sk-test-123"));
    }

    #[test]
    fn test_unset_env_vars_left_verbatim() {
        let expanded = expand_env_vars("key: ${LIRA_TEST_DEFINITELY_UNSET_VAR}");
        assert_eq!(expanded, "key: ${LIRA_TEST_DEFINITELY_UNSET_VAR}");
    }

    #[test]
    fn test_list_profiles_sorted() {
        let file = write_config(SAMPLE_CONFIG);
        let names = list_profiles(file.path()).unwrap_or_else(|e| panic!("list: {e}"));
        assert_eq!(names, vec!["default", "offline"]);
    }

    #[test]
    fn test_malformed_yaml_rejected() {
        let file = write_config("profiles: [not, a, map]");
        assert!(load_profile_from_yaml(file.path(), "default").is_err());
    }

    #[test]
    fn test_create_llm_provider_requires_key() {
        let config = LlmConfig {
            backend: LlmBackend::OpenRouter,
            ..LlmConfig::default()
        };
        assert!(matches!(
            create_llm_provider(&config),
            Err(ConfigError::ApiKeyMissing { .. })
        ));

        // Unexpanded ${VAR} placeholder counts as missing
        let unexpanded = LlmConfig {
            backend: LlmBackend::OpenRouter,
            api_key: Some("${OPENROUTER_API_KEY}".to_string()),
            ..LlmConfig::default()
        };
        assert!(create_llm_provider(&unexpanded).is_err());
    }

    #[test]
    fn test_create_mock_backends() {
        let llm = create_llm_provider(&LlmConfig {
            backend: LlmBackend::Mock,
            ..LlmConfig::default()
        });
        assert!(llm.is_ok());

        let gate = create_halugate(&HaluGateConfig {
            backend: HaluGateBackend::Mock,
            url: None,
        });
        assert!(gate.is_ok());
    }

    #[test]
    fn test_local_halugate_rejected() {
        let result = create_halugate(&HaluGateConfig {
            backend: HaluGateBackend::Local,
            url: None,
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_paper_provider_rejected() {
        let config = PaperSourcesConfig {
            providers: vec!["crossref".to_string()],
            ..PaperSourcesConfig::default()
        };
        assert!(create_paper_source(&config).is_err());
    }

    #[test]
    fn test_model_name_defaults() {
        assert_eq!(
            LlmConfig::default().model_name(),
            "upstage/solar-pro-3:free"
        );
        let anthropic = LlmConfig {
            backend: LlmBackend::Anthropic,
            ..LlmConfig::default()
        };
        assert_eq!(anthropic.model_name(), "claude-opus-4-5");
    }
}
