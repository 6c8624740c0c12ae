//! Error types for all subsystems.
//!
//! Each subsystem gets its own `thiserror` enum; the crate-level [`Error`]
//! umbrella wraps them for callers that cross subsystem boundaries.
//! Transient remote failures are retried inside the clients and only
//! surface here once retries are exhausted.

use thiserror::Error;

/// Result alias using the crate-level [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Configuration loading and validation errors. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid YAML or fails schema validation.
    #[error("invalid config: {message}")]
    Invalid {
        /// What was wrong with the config.
        message: String,
    },

    /// Requested profile does not exist in the config file.
    #[error("profile '{name}' not found (available: {available})")]
    UnknownProfile {
        /// Profile name that was requested.
        name: String,
        /// Comma-separated list of profiles that do exist.
        available: String,
    },

    /// The selected backend requires an API key that was not provided.
    #[error("missing API key for backend '{backend}' (set {env_var})")]
    ApiKeyMissing {
        /// Backend name (e.g. `"openrouter"`, `"anthropic"`).
        backend: String,
        /// Environment variable that would supply the key.
        env_var: String,
    },
}

/// Errors from remote paper providers.
#[derive(Debug, Error)]
pub enum SourceError {
    /// HTTP error response (4xx other than 429 is permanent).
    #[error("provider returned HTTP {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body excerpt or reason phrase.
        message: String,
    },

    /// Connection-level failure (DNS, TLS, reset).
    #[error("connection failed: {message}")]
    Connection {
        /// Underlying error description.
        message: String,
    },

    /// Retry budget exhausted on a transient error.
    #[error("request failed after {attempts} attempts: {message}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Last observed error.
        message: String,
    },

    /// Response payload could not be parsed.
    #[error("failed to parse provider response: {message}")]
    Parse {
        /// What failed to parse.
        message: String,
    },

    /// Requested paper does not exist at the provider.
    #[error("paper not found: {id}")]
    NotFound {
        /// Paper ID that was requested.
        id: String,
    },

    /// PDF download or text extraction failed.
    #[error("pdf extraction failed: {message}")]
    Pdf {
        /// What went wrong during download or extraction.
        message: String,
    },
}

impl SourceError {
    /// Returns `true` for errors worth retrying (429, 5xx, connection).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Connection { .. } => true,
            _ => false,
        }
    }
}

/// Errors from LLM providers and the agentic tool loop.
#[derive(Debug, Error)]
pub enum AgentError {
    /// No API key available for the provider.
    #[error("no API key found for LLM provider")]
    ApiKeyMissing,

    /// The provider API call failed.
    #[error("LLM API request failed: {message}")]
    ApiRequest {
        /// Error description from the SDK or HTTP layer.
        message: String,
        /// HTTP status if one was observed.
        status: Option<u16>,
    },

    /// The model's response could not be parsed into the expected shape.
    #[error("failed to parse model response: {message}")]
    ResponseParse {
        /// What failed to parse.
        message: String,
        /// Raw response content for diagnostics.
        content: String,
    },

    /// The tool-calling loop did not terminate within its turn budget.
    #[error("tool loop exceeded {max_turns} turns without a decision")]
    ToolLoopExceeded {
        /// The turn budget that was exhausted.
        max_turns: usize,
    },
}

/// Errors from the hallucination gate backend.
#[derive(Debug, Error)]
pub enum HaluGateError {
    /// HTTP backend returned an error response.
    #[error("halugate returned HTTP {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body excerpt.
        message: String,
    },

    /// Validation response could not be parsed.
    #[error("failed to parse halugate response: {message}")]
    Parse {
        /// What failed to parse.
        message: String,
    },

    /// Backend is unreachable.
    #[error("halugate unavailable: {message}")]
    Unavailable {
        /// Underlying error description.
        message: String,
    },
}

/// Errors from the realtime event sink.
#[derive(Debug, Error)]
pub enum EventError {
    /// Mutation was rejected by the sink.
    #[error("event sink returned HTTP {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body excerpt.
        message: String,
    },

    /// Sink is unreachable.
    #[error("event sink unreachable: {message}")]
    Unreachable {
        /// Underlying error description.
        message: String,
    },
}

/// Orchestration-layer errors.
///
/// The structural variants (`InvalidTransition`, `InvalidModeTransition`,
/// `UnknownPaperIds`, `InvalidSplit`) indicate programmer errors and abort
/// the current iteration rather than being swallowed.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// An operation requires a started loop.
    #[error("no active loop; call start_loop first")]
    NoActiveLoop,

    /// Branch lookup failed.
    #[error("branch not found: {id}")]
    BranchNotFound {
        /// Branch ID that was requested.
        id: String,
    },

    /// Hypothesis lookup failed.
    #[error("hypothesis not found: {id}")]
    HypothesisNotFound {
        /// Hypothesis ID that was requested.
        id: String,
    },

    /// Illegal branch status transition.
    #[error("illegal status transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Illegal mode transition (only search_summarize -> hypothesis is allowed).
    #[error("illegal mode transition: {from} -> {to}")]
    InvalidModeTransition {
        /// Current mode.
        from: String,
        /// Requested mode.
        to: String,
    },

    /// A split recommendation referenced papers the branch does not hold.
    #[error("split references unknown paper ids: {ids:?}")]
    UnknownPaperIds {
        /// The offending IDs.
        ids: Vec<String>,
    },

    /// A split recommendation is structurally inconsistent.
    #[error("invalid split: {message}")]
    InvalidSplit {
        /// What was inconsistent.
        message: String,
    },

    /// Iteration appended out of sequence or onto a terminal branch.
    #[error("invalid iteration append on branch {branch_id}: {message}")]
    InvalidIteration {
        /// Branch the append targeted.
        branch_id: String,
        /// What was wrong.
        message: String,
    },

    /// Search stage failed after the provider exhausted its retries.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// LLM plumbing failed in a non-recoverable way.
    #[error(transparent)]
    Agent(#[from] AgentError),
}

/// Crate-level error umbrella.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (fatal).
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Paper provider error.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// LLM provider or agent error.
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// Hallucination gate error.
    #[error(transparent)]
    HaluGate(#[from] HaluGateError),

    /// Event sink error.
    #[error(transparent)]
    Event(#[from] EventError),

    /// Orchestration error.
    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),

    /// I/O error outside of config loading.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
