//! Branch and loop state: the central entities of the research loop.
//!
//! A [`Branch`] accumulates iterations, papers, summaries and hypotheses
//! for one research direction; a [`LoopState`] holds all branches of one
//! top-level loop. Status and mode are explicit state machines: illegal
//! transitions are programmer errors, not recoverable conditions.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::paper::{PaperDetails, SearchFilters};
use crate::error::OrchestrationError;

/// Default per-branch context budget in tokens.
pub const DEFAULT_MAX_CONTEXT_WINDOW: u64 = 128_000;

/// Generates a short opaque ID unique within a loop.
#[must_use]
pub fn short_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id.chars().take(8).collect()
}

/// Status of a research branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    /// Created, not yet scheduled.
    Pending,
    /// Currently being advanced by the scheduler.
    Running,
    /// Suspended with recoverable state (outer budget expired).
    Paused,
    /// Finished normally (wrapped up, split, or stalled).
    Completed,
    /// Abandoned; receives no further work.
    Pruned,
}

impl BranchStatus {
    /// Terminal states receive no further iterations.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Pruned)
    }

    /// Active states count against the branch budget.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Whether a transition to `to` is legal.
    #[must_use]
    pub const fn can_transition(self, to: Self) -> bool {
        !self.is_terminal() || matches!((self, to), (Self::Completed, Self::Completed) | (Self::Pruned, Self::Pruned))
    }
}

impl std::fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Pruned => "pruned",
        };
        write!(f, "{s}")
    }
}

/// Mode of the inner loop on a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    /// Search, summarize, validate.
    SearchSummarize,
    /// Same, plus hypothesis generation over accepted summaries.
    Hypothesis,
}

impl LoopMode {
    /// Mode only moves forward: `search_summarize -> hypothesis`.
    #[must_use]
    pub const fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::SearchSummarize, Self::Hypothesis)
                | (Self::SearchSummarize, Self::SearchSummarize)
                | (Self::Hypothesis, Self::Hypothesis)
        )
    }
}

impl std::fmt::Display for LoopMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SearchSummarize => "search_summarize",
            Self::Hypothesis => "hypothesis",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for LoopMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "search_summarize" => Ok(Self::SearchSummarize),
            "hypothesis" => Ok(Self::Hypothesis),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

/// A summary that passed the groundedness gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedSummary {
    /// Paper this summarizes.
    pub paper_id: String,
    /// Title at summarization time.
    pub paper_title: String,
    /// The summary text.
    pub summary: String,
    /// Groundedness score in `[0, 1]` at acceptance.
    pub groundedness: f64,
    /// `true` when accepted at the strict threshold with zero
    /// contradictions; `false` for loose-floor acceptances.
    #[serde(default)]
    pub strict: bool,
    /// Acceptance instant.
    pub timestamp: DateTime<Utc>,
}

/// A research hypothesis grounded in validated summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchHypothesis {
    /// Short opaque ID.
    pub id: String,
    /// The hypothesis or research question.
    pub text: String,
    /// Papers supporting this hypothesis (at least one).
    pub supporting_paper_ids: Vec<String>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Branch that generated it.
    pub source_branch_id: String,
    /// Generation instant.
    pub timestamp: DateTime<Utc>,
}

impl ResearchHypothesis {
    /// Builds a hypothesis, clamping confidence into `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns an error message when `supporting_paper_ids` is empty.
    pub fn new(
        text: impl Into<String>,
        supporting_paper_ids: Vec<String>,
        confidence: f64,
        source_branch_id: impl Into<String>,
    ) -> Result<Self, String> {
        if supporting_paper_ids.is_empty() {
            return Err("hypothesis requires at least one supporting paper".to_string());
        }
        Ok(Self {
            id: short_id(),
            text: text.into(),
            supporting_paper_ids,
            confidence: confidence.clamp(0.0, 1.0),
            source_branch_id: source_branch_id.into(),
            timestamp: Utc::now(),
        })
    }
}

/// One cycle's output on a branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationResult {
    /// 1-based iteration number, contiguous per branch.
    pub iteration_number: usize,
    /// Papers found this iteration (new to the branch).
    pub papers_found: Vec<PaperDetails>,
    /// Summaries accepted this iteration.
    pub summaries: Vec<ValidatedSummary>,
    /// Hypotheses, present only in hypothesis mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypotheses: Option<Vec<ResearchHypothesis>>,
    /// Estimated tokens consumed by this iteration.
    pub context_tokens_used: u64,
    /// Completion instant.
    pub timestamp: DateTime<Utc>,
}

impl IterationResult {
    /// An empty result for a frontier that produced nothing.
    #[must_use]
    pub fn empty(iteration_number: usize, hypothesis_mode: bool) -> Self {
        Self {
            iteration_number,
            papers_found: Vec::new(),
            summaries: Vec::new(),
            hypotheses: if hypothesis_mode { Some(Vec::new()) } else { None },
            context_tokens_used: 0,
            timestamp: Utc::now(),
        }
    }

    /// Whether this iteration found any new papers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.papers_found.is_empty()
    }
}

/// A research branch: one root or subdivided research direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    /// Short opaque ID, unique within the loop.
    pub id: String,
    /// Search query driving this branch.
    pub query: String,
    /// Inner-loop mode.
    pub mode: LoopMode,
    /// Lifecycle status.
    pub status: BranchStatus,
    /// Parent branch when created by a split.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_branch_id: Option<String>,
    /// Search filters inherited by every iteration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<SearchFilters>,
    /// Completed iterations in order.
    #[serde(default)]
    pub iterations: Vec<IterationResult>,
    /// All papers seen, keyed by ID (insertion idempotent).
    #[serde(default)]
    pub accumulated_papers: IndexMap<String, PaperDetails>,
    /// All accepted summaries, keyed by paper ID.
    #[serde(default)]
    pub accumulated_summaries: IndexMap<String, ValidatedSummary>,
    /// Running token total (monotone lower bound on true consumption).
    pub context_window_used: u64,
    /// Context budget for this branch.
    pub max_context_window: u64,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}

impl Branch {
    /// Creates a fresh pending branch.
    #[must_use]
    pub fn new(
        query: impl Into<String>,
        mode: LoopMode,
        parent_branch_id: Option<String>,
        filters: Option<SearchFilters>,
        max_context_window: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: short_id(),
            query: query.into(),
            mode,
            status: BranchStatus::Pending,
            parent_branch_id,
            filters,
            iterations: Vec::new(),
            accumulated_papers: IndexMap::new(),
            accumulated_summaries: IndexMap::new(),
            context_window_used: 0,
            max_context_window,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fraction of the context budget consumed.
    #[must_use]
    pub fn context_utilization(&self) -> f64 {
        if self.max_context_window == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = self.context_window_used as f64 / self.max_context_window as f64;
        ratio
    }

    /// Number of completed iterations.
    #[must_use]
    pub fn iteration_count(&self) -> usize {
        self.iterations.len()
    }

    /// Number of unique papers accumulated.
    #[must_use]
    pub fn total_papers(&self) -> usize {
        self.accumulated_papers.len()
    }

    /// Number of accepted summaries accumulated.
    #[must_use]
    pub fn total_summaries(&self) -> usize {
        self.accumulated_summaries.len()
    }

    /// Appends an iteration and folds its output into the accumulators.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrationError::InvalidIteration`] when the branch is
    /// terminal or the iteration number is out of sequence.
    pub fn add_iteration(&mut self, result: IterationResult) -> Result<(), OrchestrationError> {
        if self.status.is_terminal() {
            return Err(OrchestrationError::InvalidIteration {
                branch_id: self.id.clone(),
                message: format!("branch is {} and accepts no iterations", self.status),
            });
        }
        let expected = self.iterations.len() + 1;
        if result.iteration_number != expected {
            return Err(OrchestrationError::InvalidIteration {
                branch_id: self.id.clone(),
                message: format!(
                    "iteration {} out of sequence (expected {expected})",
                    result.iteration_number
                ),
            });
        }

        self.context_window_used += result.context_tokens_used;
        for paper in &result.papers_found {
            self.accumulated_papers
                .insert(paper.paper_id().to_string(), paper.clone());
        }
        for summary in &result.summaries {
            self.accumulated_summaries
                .insert(summary.paper_id.clone(), summary.clone());
        }
        self.iterations.push(result);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Transitions the branch status.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrationError::InvalidTransition`] when the current
    /// status is terminal and differs from the target.
    pub fn set_status(&mut self, status: BranchStatus) -> Result<(), OrchestrationError> {
        if !self.status.can_transition(status) {
            return Err(OrchestrationError::InvalidTransition {
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }
        self.status = status;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Transitions the branch mode.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrationError::InvalidModeTransition`] for
    /// `hypothesis -> search_summarize`.
    pub fn set_mode(&mut self, mode: LoopMode) -> Result<(), OrchestrationError> {
        if !self.mode.can_transition(mode) {
            return Err(OrchestrationError::InvalidModeTransition {
                from: self.mode.to_string(),
                to: mode.to_string(),
            });
        }
        self.mode = mode;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// All hypotheses generated across iterations.
    #[must_use]
    pub fn hypotheses(&self) -> Vec<&ResearchHypothesis> {
        self.iterations
            .iter()
            .filter_map(|it| it.hypotheses.as_ref())
            .flatten()
            .collect()
    }

    /// `true` when at least two of the last three iterations were empty.
    #[must_use]
    pub fn is_stalling(&self) -> bool {
        let recent = self.iterations.iter().rev().take(3);
        recent.filter(|it| it.is_empty()).count() >= 2
    }
}

/// State of one top-level research loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopState {
    /// Short opaque loop ID.
    pub loop_id: String,
    /// 1 for the initial loop, 2+ for hypothesis-seeded loops.
    pub loop_number: u32,
    /// Filters applied to every branch in the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_filters: Option<SearchFilters>,
    /// Branches keyed by ID, in creation order.
    #[serde(default)]
    pub branches: IndexMap<String, Branch>,
    /// Loop-level hypotheses (rarely used; branches carry their own).
    #[serde(default)]
    pub hypotheses: Vec<ResearchHypothesis>,
    /// Hypotheses that seeded this loop (loops 2+).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seeding_hypotheses: Option<Vec<ResearchHypothesis>>,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}

impl LoopState {
    /// Creates an empty loop state.
    #[must_use]
    pub fn new(
        loop_number: u32,
        session_filters: Option<SearchFilters>,
        seeding_hypotheses: Option<Vec<ResearchHypothesis>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            loop_id: short_id(),
            loop_number,
            session_filters,
            branches: IndexMap::new(),
            hypotheses: Vec::new(),
            seeding_hypotheses,
            created_at: now,
            updated_at: now,
        }
    }

    /// Adds a branch.
    pub fn add_branch(&mut self, branch: Branch) {
        self.branches.insert(branch.id.clone(), branch);
        self.updated_at = Utc::now();
    }

    /// Looks up a branch.
    #[must_use]
    pub fn branch(&self, id: &str) -> Option<&Branch> {
        self.branches.get(id)
    }

    /// Looks up a branch mutably.
    #[must_use]
    pub fn branch_mut(&mut self, id: &str) -> Option<&mut Branch> {
        self.branches.get_mut(id)
    }

    /// Branches that are pending or running.
    #[must_use]
    pub fn active_branches(&self) -> Vec<&Branch> {
        self.branches
            .values()
            .filter(|b| b.status.is_active())
            .collect()
    }

    /// Unique papers across all branches.
    #[must_use]
    pub fn total_papers(&self) -> usize {
        let mut ids = std::collections::HashSet::new();
        for branch in self.branches.values() {
            ids.extend(branch.accumulated_papers.keys());
        }
        ids.len()
    }

    /// Unique summaries across all branches.
    #[must_use]
    pub fn total_summaries(&self) -> usize {
        let mut ids = std::collections::HashSet::new();
        for branch in self.branches.values() {
            ids.extend(branch.accumulated_summaries.keys());
        }
        ids.len()
    }

    /// All hypotheses: loop-level plus per-branch.
    #[must_use]
    pub fn collect_hypotheses(&self) -> Vec<ResearchHypothesis> {
        let mut all = self.hypotheses.clone();
        for branch in self.branches.values() {
            all.extend(branch.hypotheses().into_iter().cloned());
        }
        all
    }
}

/// Status summary for monitoring. Pure projection of a [`LoopState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStatus {
    /// Loop ID.
    pub loop_id: String,
    /// Loop number.
    pub loop_number: u32,
    /// Total branches in the loop.
    pub total_branches: usize,
    /// Pending + running branches.
    pub active_branches: usize,
    /// Completed branches.
    pub completed_branches: usize,
    /// Pruned branches.
    pub pruned_branches: usize,
    /// Unique papers across branches.
    pub total_papers: usize,
    /// Unique summaries across branches.
    pub total_summaries: usize,
    /// All hypotheses across branches.
    pub total_hypotheses: usize,
    /// Sum of per-branch context usage.
    pub total_context_used: u64,
}

impl LoopStatus {
    /// Builds the status snapshot.
    #[must_use]
    pub fn from_state(state: &LoopState) -> Self {
        let mut completed = 0;
        let mut pruned = 0;
        let mut active = 0;
        let mut context = 0;
        for branch in state.branches.values() {
            match branch.status {
                BranchStatus::Completed => completed += 1,
                BranchStatus::Pruned => pruned += 1,
                BranchStatus::Pending | BranchStatus::Running => active += 1,
                BranchStatus::Paused => {}
            }
            context += branch.context_window_used;
        }
        Self {
            loop_id: state.loop_id.clone(),
            loop_number: state.loop_number,
            total_branches: state.branches.len(),
            active_branches: active,
            completed_branches: completed,
            pruned_branches: pruned,
            total_papers: state.total_papers(),
            total_summaries: state.total_summaries(),
            total_hypotheses: state.collect_hypotheses().len(),
            total_context_used: context,
        }
    }
}

/// What the managing agent decided for a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchAction {
    /// Keep iterating as-is.
    Continue,
    /// Split into child branches.
    Split,
    /// Mark the branch completed.
    WrapUp,
}

impl std::fmt::Display for BranchAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Continue => "continue",
            Self::Split => "split",
            Self::WrapUp => "wrap_up",
        };
        write!(f, "{s}")
    }
}

/// Criteria the managing agent may split along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitCriteria {
    /// Distinct research themes.
    ByTopic,
    /// Distinct methodologies.
    ByMethodology,
    /// Distinct time periods.
    ByTimePeriod,
    /// Distinct application domains.
    ByApplication,
    /// Distinct theoretical framings.
    ByTheoreticalFramework,
    /// Distinct data modalities.
    ByDataType,
    /// Agent-defined grouping.
    Custom,
}

/// Recommendation from the managing agent about a branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitRecommendation {
    /// Decided action.
    pub action: BranchAction,
    /// Number of child branches (0 unless splitting).
    pub num_branches: usize,
    /// Paper IDs per child branch.
    pub paper_groups: Vec<Vec<String>>,
    /// Refined query per child branch.
    pub group_queries: Vec<String>,
    /// Human-readable label per child branch.
    pub group_labels: Vec<String>,
    /// Criteria used when splitting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<SplitCriteria>,
    /// Why this decision was made.
    pub reasoning: String,
    /// Context warning carried through from the evaluation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_warning: Option<String>,
}

impl SplitRecommendation {
    /// A CONTINUE recommendation.
    #[must_use]
    pub fn continue_branch(reasoning: impl Into<String>, context_warning: Option<String>) -> Self {
        Self {
            action: BranchAction::Continue,
            num_branches: 0,
            paper_groups: Vec::new(),
            group_queries: Vec::new(),
            group_labels: Vec::new(),
            criteria: None,
            reasoning: reasoning.into(),
            context_warning,
        }
    }

    /// A WRAP_UP recommendation.
    #[must_use]
    pub fn wrap_up(reasoning: impl Into<String>, context_warning: Option<String>) -> Self {
        Self {
            action: BranchAction::WrapUp,
            num_branches: 0,
            paper_groups: Vec::new(),
            group_queries: Vec::new(),
            group_labels: Vec::new(),
            criteria: None,
            reasoning: reasoning.into(),
            context_warning,
        }
    }

    /// Checks structural consistency of a SPLIT recommendation.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrationError::InvalidSplit`] when the group lists do
    /// not match `num_branches` or fewer than two groups are present.
    pub fn validate(&self) -> Result<(), OrchestrationError> {
        if self.action != BranchAction::Split {
            return Ok(());
        }
        if self.num_branches < 2 {
            return Err(OrchestrationError::InvalidSplit {
                message: format!("split requires at least 2 branches, got {}", self.num_branches),
            });
        }
        if self.paper_groups.len() != self.num_branches
            || self.group_queries.len() != self.num_branches
            || self.group_labels.len() != self.num_branches
        {
            return Err(OrchestrationError::InvalidSplit {
                message: format!(
                    "group lists must all have length {} (got {}/{}/{})",
                    self.num_branches,
                    self.paper_groups.len(),
                    self.group_queries.len(),
                    self.group_labels.len()
                ),
            });
        }
        Ok(())
    }
}
