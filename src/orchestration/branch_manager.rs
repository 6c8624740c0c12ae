//! Branch lifecycle: creation, splitting, pruning, status transitions.
//!
//! A pure state operator: no I/O, no LLM calls. The managing agent and
//! master agent decide *when* to act; this module performs the act and
//! enforces the structural rules.

use tracing::{debug, info};

use super::splitter::{BranchSplitter, SplitGroup, SplitStrategy};
use crate::config::BranchConfig;
use crate::core::branch::{Branch, BranchStatus, LoopMode, LoopState};
use crate::core::paper::SearchFilters;
use crate::error::OrchestrationError;

/// Context-warning tiers, matching the qualitative labels shown to the
/// managing agent.
const WARN_TIERS: [(f64, &str); 3] = [
    (0.90, "critical: context nearly exhausted; split or wrap up now"),
    (0.80, "high: context window over 80% used; consider splitting"),
    (0.70, "moderate: context window over 70% used"),
];

/// Pure state operator over branches.
#[derive(Debug, Clone, Copy)]
pub struct BranchManager {
    config: BranchConfig,
}

impl BranchManager {
    /// Creates a manager with the given knobs.
    #[must_use]
    pub const fn new(config: BranchConfig) -> Self {
        Self { config }
    }

    /// The configured branch knobs.
    #[must_use]
    pub const fn config(&self) -> &BranchConfig {
        &self.config
    }

    /// Creates a fresh pending branch.
    #[must_use]
    pub fn create_branch(
        &self,
        query: impl Into<String>,
        mode: LoopMode,
        parent_branch_id: Option<String>,
        filters: Option<SearchFilters>,
        max_context: Option<u64>,
    ) -> Branch {
        let branch = Branch::new(
            query,
            mode,
            parent_branch_id,
            filters,
            max_context.unwrap_or(self.config.max_context_window),
        );
        info!(
            branch_id = branch.id,
            query = branch.query,
            mode = %branch.mode,
            parent = branch.parent_branch_id.as_deref().unwrap_or("-"),
            "created branch"
        );
        branch
    }

    /// Splits `branch` along `strategy` into up to `num_splits` children.
    ///
    /// Children inherit mode and filters; papers and summaries in each
    /// group are copied into the corresponding child. The parent
    /// transitions to COMPLETED.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrationError::InvalidSplit`] when the branch has
    /// no papers to divide, or a transition error when the parent is
    /// already terminal.
    pub fn split_branch(
        &self,
        branch: &mut Branch,
        strategy: Option<SplitStrategy>,
        num_splits: usize,
    ) -> Result<Vec<Branch>, OrchestrationError> {
        let strategy = strategy.unwrap_or_else(|| BranchSplitter::suggest_strategy(branch));
        info!(branch_id = branch.id, %strategy, num_splits, "splitting branch");

        let groups = BranchSplitter::split(branch, strategy, num_splits);
        if groups.len() < 2 {
            return Err(OrchestrationError::InvalidSplit {
                message: format!(
                    "branch {} cannot be divided into {num_splits} groups",
                    branch.id
                ),
            });
        }
        self.materialize_split(branch, &groups)
    }

    /// Splits `branch` into explicitly given groups (the managed-split
    /// path). Overlapping groups resolve by order: the earliest group
    /// wins a contested paper.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrationError::UnknownPaperIds`] when a group
    /// references papers the branch does not hold, or a transition
    /// error when the parent is already terminal.
    pub fn split_branch_with_groups(
        &self,
        branch: &mut Branch,
        groups: &[SplitGroup],
    ) -> Result<Vec<Branch>, OrchestrationError> {
        let unknown: Vec<String> = groups
            .iter()
            .flat_map(|g| g.paper_ids.iter())
            .filter(|id| !branch.accumulated_papers.contains_key(*id))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(OrchestrationError::UnknownPaperIds { ids: unknown });
        }
        self.materialize_split(branch, groups)
    }

    /// Creates children for the groups and completes the parent.
    fn materialize_split(
        &self,
        branch: &mut Branch,
        groups: &[SplitGroup],
    ) -> Result<Vec<Branch>, OrchestrationError> {
        // Earlier group wins a paper claimed twice
        let mut assigned: std::collections::HashSet<&str> = std::collections::HashSet::new();
        let mut children = Vec::with_capacity(groups.len());

        for group in groups {
            let mut child = self.create_branch(
                group.query.clone(),
                branch.mode,
                Some(branch.id.clone()),
                branch.filters.clone(),
                Some(branch.max_context_window),
            );
            for paper_id in &group.paper_ids {
                if !assigned.insert(paper_id.as_str()) {
                    continue;
                }
                if let Some(paper) = branch.accumulated_papers.get(paper_id) {
                    child
                        .accumulated_papers
                        .insert(paper_id.clone(), paper.clone());
                }
                if let Some(summary) = branch.accumulated_summaries.get(paper_id) {
                    child
                        .accumulated_summaries
                        .insert(paper_id.clone(), summary.clone());
                }
            }
            info!(
                child_id = child.id,
                label = group.label,
                papers = child.total_papers(),
                "created child branch"
            );
            children.push(child);
        }

        branch.set_status(BranchStatus::Completed)?;
        Ok(children)
    }

    /// Prunes a branch (stops exploration).
    ///
    /// # Errors
    ///
    /// Returns a transition error when the branch is already completed.
    pub fn prune_branch(
        &self,
        branch: &mut Branch,
        reason: &str,
    ) -> Result<(), OrchestrationError> {
        branch.set_status(BranchStatus::Pruned)?;
        info!(
            branch_id = branch.id,
            reason = if reason.is_empty() { "unspecified" } else { reason },
            "pruned branch"
        );
        Ok(())
    }

    /// Transitions a branch's status.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrationError::InvalidTransition`] for moves out
    /// of a terminal state.
    pub fn update_status(
        &self,
        branch: &mut Branch,
        status: BranchStatus,
    ) -> Result<(), OrchestrationError> {
        let old = branch.status;
        branch.set_status(status)?;
        debug!(branch_id = branch.id, from = %old, to = %status, "status change");
        Ok(())
    }

    /// Whether the context-threshold split should fire.
    #[must_use]
    pub fn should_split(&self, branch: &Branch) -> bool {
        branch.context_utilization() >= self.config.context_split_threshold
    }

    /// Human-readable context warning for the current utilization tier,
    /// `None` below the lowest tier.
    #[must_use]
    pub fn get_context_warning(&self, branch: &Branch) -> Option<String> {
        let utilization = branch.context_utilization();
        WARN_TIERS
            .iter()
            .find(|(threshold, _)| utilization >= *threshold)
            .map(|(_, message)| format!("{message} ({:.0}%)", utilization * 100.0))
    }

    /// Whether the branch has accumulated enough papers to switch into
    /// hypothesis mode.
    #[must_use]
    pub fn should_enable_hypothesis_mode(&self, branch: &Branch) -> bool {
        branch.mode == LoopMode::SearchSummarize
            && branch.total_papers() >= self.config.min_papers_for_hypothesis
    }

    /// Whether the loop is below its active-branch budget.
    #[must_use]
    pub fn can_create_more_branches(&self, state: &LoopState) -> bool {
        state.active_branches().len() < self.config.max_branches
    }

    /// Next branch to schedule: first RUNNING, else first PENDING.
    #[must_use]
    pub fn get_next_branch(state: &LoopState) -> Option<String> {
        state
            .branches
            .values()
            .find(|b| b.status == BranchStatus::Running)
            .or_else(|| {
                state
                    .branches
                    .values()
                    .find(|b| b.status == BranchStatus::Pending)
            })
            .map(|b| b.id.clone())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::core::branch::IterationResult;
    use crate::core::paper::{PaperDetails, PaperRef};
    use chrono::Utc;

    fn manager() -> BranchManager {
        BranchManager::new(BranchConfig::default())
    }

    fn branch_with_papers(ids: &[&str]) -> Branch {
        let mut branch = Branch::new("q", LoopMode::SearchSummarize, None, None, 1000);
        let result = IterationResult {
            iteration_number: 1,
            papers_found: ids
                .iter()
                .map(|id| {
                    PaperDetails::from(PaperRef {
                        paper_id: (*id).to_string(),
                        title: Some(format!("Title {id}")),
                        fields_of_study: vec!["CS".to_string()],
                        ..PaperRef::default()
                    })
                })
                .collect(),
            summaries: vec![crate::core::branch::ValidatedSummary {
                paper_id: ids[0].to_string(),
                paper_title: "t".to_string(),
                summary: "s".to_string(),
                groundedness: 0.96,
                strict: true,
                timestamp: Utc::now(),
            }],
            hypotheses: None,
            context_tokens_used: 100,
            timestamp: Utc::now(),
        };
        branch
            .add_iteration(result)
            .unwrap_or_else(|e| panic!("add: {e}"));
        branch
    }

    fn groups(specs: &[(&str, &[&str])]) -> Vec<SplitGroup> {
        specs
            .iter()
            .map(|(label, ids)| SplitGroup {
                label: (*label).to_string(),
                query: format!("q {label}"),
                paper_ids: ids.iter().map(ToString::to_string).collect(),
            })
            .collect()
    }

    #[test]
    fn test_create_branch_uses_config_budget() {
        let branch = manager().create_branch("q", LoopMode::SearchSummarize, None, None, None);
        assert_eq!(branch.max_context_window, BranchConfig::default().max_context_window);
        assert_eq!(branch.status, BranchStatus::Pending);
    }

    #[test]
    fn test_managed_split_copies_papers_and_summaries() {
        let manager = manager();
        let mut parent = branch_with_papers(&["p1", "p2", "p3", "p4"]);
        let children = manager
            .split_branch_with_groups(
                &mut parent,
                &groups(&[("theory", &["p1", "p2"]), ("empirical", &["p3", "p4"])]),
            )
            .unwrap_or_else(|e| panic!("split: {e}"));

        assert_eq!(children.len(), 2);
        assert_eq!(parent.status, BranchStatus::Completed);
        assert_eq!(children[0].total_papers(), 2);
        assert_eq!(children[1].total_papers(), 2);
        // Summary for p1 follows p1's group
        assert_eq!(children[0].total_summaries(), 1);
        assert_eq!(children[1].total_summaries(), 0);
        // Parent retains its copy (split copies, not moves)
        assert_eq!(parent.total_papers(), 4);
        for child in &children {
            assert_eq!(child.parent_branch_id.as_deref(), Some(parent.id.as_str()));
            assert_eq!(child.status, BranchStatus::Pending);
        }
    }

    #[test]
    fn test_managed_split_rejects_unknown_ids() {
        let manager = manager();
        let mut parent = branch_with_papers(&["p1", "p2"]);
        let result = manager.split_branch_with_groups(
            &mut parent,
            &groups(&[("a", &["p1"]), ("b", &["p2", "ghost"])]),
        );
        assert!(matches!(
            result,
            Err(OrchestrationError::UnknownPaperIds { .. })
        ));
        // Parent untouched on failure
        assert_eq!(parent.status, BranchStatus::Pending);
    }

    #[test]
    fn test_overlapping_groups_resolved_by_order() {
        let manager = manager();
        let mut parent = branch_with_papers(&["p1", "p2", "p3"]);
        let children = manager
            .split_branch_with_groups(
                &mut parent,
                &groups(&[("first", &["p1", "p2"]), ("second", &["p2", "p3"])]),
            )
            .unwrap_or_else(|e| panic!("split: {e}"));
        // p2 contested: earlier group wins
        assert_eq!(children[0].total_papers(), 2);
        assert_eq!(children[1].total_papers(), 1);
        assert!(children[1].accumulated_papers.contains_key("p3"));
        assert!(!children[1].accumulated_papers.contains_key("p2"));
    }

    #[test]
    fn test_strategy_split_produces_children() {
        let manager = manager();
        let mut parent = branch_with_papers(&["p1", "p2", "p3", "p4"]);
        let children = manager
            .split_branch(&mut parent, Some(SplitStrategy::Random), 2)
            .unwrap_or_else(|e| panic!("split: {e}"));
        assert_eq!(children.len(), 2);
        let total: usize = children.iter().map(Branch::total_papers).sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn test_split_empty_branch_rejected() {
        let manager = manager();
        let mut empty = Branch::new("q", LoopMode::SearchSummarize, None, None, 1000);
        assert!(manager
            .split_branch(&mut empty, Some(SplitStrategy::Random), 2)
            .is_err());
    }

    #[test]
    fn test_context_warning_tiers() {
        let manager = manager();
        let mut branch = Branch::new("q", LoopMode::SearchSummarize, None, None, 100);

        branch.context_window_used = 50;
        assert!(manager.get_context_warning(&branch).is_none());

        branch.context_window_used = 72;
        let warning = manager.get_context_warning(&branch).unwrap_or_default();
        assert!(warning.starts_with("moderate"));

        branch.context_window_used = 85;
        let warning = manager.get_context_warning(&branch).unwrap_or_default();
        assert!(warning.starts_with("high"));

        branch.context_window_used = 95;
        let warning = manager.get_context_warning(&branch).unwrap_or_default();
        assert!(warning.starts_with("critical"));
    }

    #[test]
    fn test_should_split_threshold() {
        let manager = manager();
        let mut branch = Branch::new("q", LoopMode::SearchSummarize, None, None, 100);
        branch.context_window_used = 79;
        assert!(!manager.should_split(&branch));
        branch.context_window_used = 80;
        assert!(manager.should_split(&branch));
    }

    #[test]
    fn test_hypothesis_mode_eligibility() {
        let config = BranchConfig {
            min_papers_for_hypothesis: 2,
            ..BranchConfig::default()
        };
        let manager = BranchManager::new(config);

        let mut branch = branch_with_papers(&["p1", "p2"]);
        assert!(manager.should_enable_hypothesis_mode(&branch));

        branch
            .set_mode(LoopMode::Hypothesis)
            .unwrap_or_else(|e| panic!("mode: {e}"));
        // Already in hypothesis mode
        assert!(!manager.should_enable_hypothesis_mode(&branch));
    }

    #[test]
    fn test_branch_budget() {
        let config = BranchConfig {
            max_branches: 2,
            ..BranchConfig::default()
        };
        let manager = BranchManager::new(config);
        let mut state = LoopState::new(1, None, None);
        assert!(manager.can_create_more_branches(&state));

        state.add_branch(Branch::new("a", LoopMode::SearchSummarize, None, None, 1000));
        state.add_branch(Branch::new("b", LoopMode::SearchSummarize, None, None, 1000));
        assert!(!manager.can_create_more_branches(&state));
    }

    #[test]
    fn test_get_next_branch_priority() {
        let mut state = LoopState::new(1, None, None);
        assert!(BranchManager::get_next_branch(&state).is_none());

        let pending = Branch::new("a", LoopMode::SearchSummarize, None, None, 1000);
        let pending_id = pending.id.clone();
        state.add_branch(pending);

        let mut running = Branch::new("b", LoopMode::SearchSummarize, None, None, 1000);
        running
            .set_status(BranchStatus::Running)
            .unwrap_or_else(|e| panic!("status: {e}"));
        let running_id = running.id.clone();
        state.add_branch(running);

        // Running beats pending even though pending was added first
        assert_eq!(BranchManager::get_next_branch(&state), Some(running_id.clone()));

        if let Some(branch) = state.branch_mut(&running_id) {
            branch
                .set_status(BranchStatus::Completed)
                .unwrap_or_else(|e| panic!("status: {e}"));
        }
        assert_eq!(BranchManager::get_next_branch(&state), Some(pending_id));
    }

    #[test]
    fn test_prune_sets_terminal_state() {
        let manager = manager();
        let mut branch = branch_with_papers(&["p1"]);
        manager
            .prune_branch(&mut branch, "low value")
            .unwrap_or_else(|e| panic!("prune: {e}"));
        assert_eq!(branch.status, BranchStatus::Pruned);
        assert!(branch.add_iteration(IterationResult::empty(2, false)).is_err());
    }
}
