//! Master agent: supervises one research loop end to end.
//!
//! Owns the loop state, advances branches through the iteration loop,
//! executes managing-agent decisions (or threshold-based fallbacks),
//! chains hypothesis-seeded follow-up loops, and emits every observable
//! transition to the event sink. The scheduler is strictly serial:
//! parallelism lives inside an iteration, never across branches, so the
//! state is never shared between concurrent mutators.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Value, json};
use tracing::{error, info, warn};

use super::branch_manager::BranchManager;
use super::iteration_loop::IterationLoop;
use super::managing_agent::{ManagingAgent, SiblingBrief};
use super::splitter::{SplitGroup, SplitStrategy};
use super::state_store::StateStore;
use crate::config::MasterAgentConfig;
use crate::core::branch::{
    Branch, BranchAction, BranchStatus, IterationResult, LoopMode, LoopState, LoopStatus,
    ResearchHypothesis, SplitRecommendation,
};
use crate::core::paper::SearchFilters;
use crate::error::OrchestrationError;
use crate::events::{EventEmitter, EventSink};

/// The master agent over one loop at a time.
pub struct MasterAgent {
    iteration_loop: Arc<IterationLoop>,
    branch_manager: BranchManager,
    state_store: StateStore,
    managing_agent: Option<Arc<ManagingAgent>>,
    sink: Option<Arc<dyn EventSink>>,
    emitter: Option<EventEmitter>,
    config: MasterAgentConfig,
    cancel: Arc<AtomicBool>,
    current: Option<LoopState>,
}

impl MasterAgent {
    /// Wires a master agent over its collaborators.
    #[must_use]
    pub fn new(
        iteration_loop: Arc<IterationLoop>,
        branch_manager: BranchManager,
        config: MasterAgentConfig,
    ) -> Self {
        Self {
            iteration_loop,
            branch_manager,
            state_store: StateStore::new(),
            managing_agent: None,
            sink: None,
            emitter: None,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
            current: None,
        }
    }

    /// Enables the managing agent for branch decisions.
    pub fn set_managing_agent(&mut self, agent: Arc<ManagingAgent>) {
        info!("managing agent enabled for branch decisions");
        self.managing_agent = Some(agent);
    }

    /// Enables realtime event streaming.
    pub fn set_event_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sink = Some(sink);
    }

    /// Flag that, once set, stops the scheduler between iterations.
    #[must_use]
    pub fn cancellation_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// The current loop state, if a loop has been started.
    #[must_use]
    pub const fn current_state(&self) -> Option<&LoopState> {
        self.current.as_ref()
    }

    /// The state store (snapshots, past loops).
    pub fn state_store_mut(&mut self) -> &mut StateStore {
        &mut self.state_store
    }

    /// Starts a new loop with an initial pending branch.
    ///
    /// Emits `sessions:create` and the initial `branch_created`.
    pub async fn start_loop(
        &mut self,
        query: &str,
        loop_number: u32,
        seeding_hypotheses: Option<Vec<ResearchHypothesis>>,
        filters: Option<SearchFilters>,
    ) -> String {
        let mut state = LoopState::new(loop_number, filters.clone(), seeding_hypotheses);
        let loop_id = state.loop_id.clone();

        let branch =
            self.branch_manager
                .create_branch(query, LoopMode::SearchSummarize, None, filters, None);
        let branch_snapshot = branch.clone();
        state.add_branch(branch);

        self.emitter = self
            .sink
            .as_ref()
            .map(|sink| EventEmitter::new(Arc::clone(sink), loop_id.clone()));
        if let Some(ref emitter) = self.emitter {
            emitter
                .session_created(query, Some(json!({"loop_number": loop_number})))
                .await;
            emitter.branch_created(&branch_snapshot).await;
        }

        info!(loop_id, loop_number, query, "started research loop");
        self.current = Some(state.clone());
        self.state_store.save_state(state);
        loop_id
    }

    /// Runs one iteration on a branch, then performs auto-management.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrationError`] when no loop is active, the branch
    /// is unknown, the iteration itself fails, or a structural invariant
    /// is violated while applying a decision.
    pub async fn run_iteration(
        &mut self,
        branch_id: &str,
        mode_override: Option<LoopMode>,
    ) -> Result<IterationResult, OrchestrationError> {
        let snapshot = {
            let state = self.current.as_mut().ok_or(OrchestrationError::NoActiveLoop)?;
            let branch = state
                .branch_mut(branch_id)
                .ok_or_else(|| OrchestrationError::BranchNotFound {
                    id: branch_id.to_string(),
                })?;
            if let Some(mode) = mode_override {
                branch.set_mode(mode)?;
            }
            branch.set_status(BranchStatus::Running)?;
            branch.clone()
        };

        let iteration_loop = Arc::clone(&self.iteration_loop);
        let result = iteration_loop.run_iteration(&snapshot).await?;

        {
            let state = self.current.as_mut().ok_or(OrchestrationError::NoActiveLoop)?;
            let branch = state
                .branch_mut(branch_id)
                .ok_or_else(|| OrchestrationError::BranchNotFound {
                    id: branch_id.to_string(),
                })?;
            branch.add_iteration(result.clone())?;
        }
        if let Some(ref emitter) = self.emitter {
            emitter.iteration_results(branch_id, &result).await;
        }

        self.auto_manage(branch_id, &result).await?;
        self.emit_branch_status(branch_id).await;
        self.persist();
        Ok(result)
    }

    /// Auto-management after an iteration: managing-agent decision,
    /// threshold split fallback, hypothesis-mode hand-off.
    async fn auto_manage(
        &mut self,
        branch_id: &str,
        result: &IterationResult,
    ) -> Result<(), OrchestrationError> {
        let Some(branch) = self.lookup(branch_id) else {
            return Ok(());
        };
        if branch.status.is_terminal() {
            return Ok(());
        }
        let warning = self.branch_manager.get_context_warning(&branch);

        if let Some(agent) = self.managing_agent.clone() {
            let force = result.is_empty() && branch.iteration_count() > 1;
            if force {
                info!(branch_id, "empty iteration, forcing managing agent evaluation");
            }
            let siblings = self.sibling_briefs(branch_id);
            if let Some(recommendation) = agent
                .evaluate_branch(&branch, &siblings, force, warning)
                .await
            {
                self.execute_decision(branch_id, recommendation).await?;
            }
        } else if self.config.auto_split {
            if let Some(ref warning) = warning {
                info!(branch_id, warning, "context warning");
            }
            if self.branch_manager.should_split(&branch) {
                info!(branch_id, "context threshold reached, auto-splitting");
                match self.split_branch(branch_id, "by_field").await {
                    Ok(children) => info!(branch_id, children = children.len(), "auto-split done"),
                    Err(e) => warn!(branch_id, error = %e, "auto-split failed"),
                }
            }
        }

        // Hypothesis hand-off: switch mode and immediately run one more
        // iteration so hypotheses exist before the outer budget expires.
        if self.config.auto_hypothesis
            && let Some(branch) = self.lookup(branch_id)
            && !branch.status.is_terminal()
            && self.branch_manager.should_enable_hypothesis_mode(&branch)
        {
            info!(branch_id, "enabling hypothesis mode");
            self.switch_mode(branch_id, LoopMode::Hypothesis)?;
            self.run_plain_iteration(branch_id).await?;
        }

        Ok(())
    }

    /// One iteration without auto-management (the hypothesis hand-off).
    async fn run_plain_iteration(&mut self, branch_id: &str) -> Result<(), OrchestrationError> {
        let Some(snapshot) = self.lookup(branch_id) else {
            return Ok(());
        };
        let iteration_loop = Arc::clone(&self.iteration_loop);
        let result = iteration_loop.run_iteration(&snapshot).await?;

        let state = self.current.as_mut().ok_or(OrchestrationError::NoActiveLoop)?;
        if let Some(branch) = state.branch_mut(branch_id) {
            branch.add_iteration(result.clone())?;
        }
        if let Some(ref emitter) = self.emitter {
            emitter.iteration_results(branch_id, &result).await;
        }
        info!(
            branch_id,
            hypotheses = result.hypotheses.as_ref().map_or(0, Vec::len),
            "hypothesis iteration complete"
        );
        Ok(())
    }

    /// Applies a managing-agent recommendation.
    async fn execute_decision(
        &mut self,
        branch_id: &str,
        recommendation: SplitRecommendation,
    ) -> Result<(), OrchestrationError> {
        if let Some(ref warning) = recommendation.context_warning {
            info!(branch_id, warning, "context warning");
        }

        match recommendation.action {
            BranchAction::Continue => {
                info!(branch_id, reasoning = recommendation.reasoning, "decision: continue");
                Ok(())
            }
            BranchAction::Split => {
                info!(
                    branch_id,
                    branches = recommendation.num_branches,
                    reasoning = recommendation.reasoning,
                    "decision: split"
                );
                recommendation.validate()?;
                let groups: Vec<SplitGroup> = recommendation
                    .group_labels
                    .iter()
                    .zip(&recommendation.group_queries)
                    .zip(&recommendation.paper_groups)
                    .map(|((label, query), paper_ids)| SplitGroup {
                        label: label.clone(),
                        query: query.clone(),
                        paper_ids: paper_ids.clone(),
                    })
                    .collect();
                self.apply_split(branch_id, &groups).await.map(|_| ())
            }
            BranchAction::WrapUp => {
                info!(branch_id, reasoning = recommendation.reasoning, "decision: wrap up");
                self.complete_branch(branch_id).await
            }
        }
    }

    /// Splits a branch into explicit groups, registering children and
    /// emitting their events (children before the parent's status
    /// change).
    async fn apply_split(
        &mut self,
        branch_id: &str,
        groups: &[SplitGroup],
    ) -> Result<Vec<String>, OrchestrationError> {
        {
            let state = self.current.as_ref().ok_or(OrchestrationError::NoActiveLoop)?;
            if !self.branch_manager.can_create_more_branches(state) {
                warn!(branch_id, "branch budget exhausted, skipping split");
                return Ok(Vec::new());
            }
        }

        let children = {
            let state = self.current.as_mut().ok_or(OrchestrationError::NoActiveLoop)?;
            let branch = state
                .branch_mut(branch_id)
                .ok_or_else(|| OrchestrationError::BranchNotFound {
                    id: branch_id.to_string(),
                })?;
            self.branch_manager.split_branch_with_groups(branch, groups)?
        };

        let child_ids: Vec<String> = children.iter().map(|c| c.id.clone()).collect();
        for child in children {
            if let Some(ref emitter) = self.emitter {
                emitter.branch_created(&child).await;
            }
            if let Some(state) = self.current.as_mut() {
                state.add_branch(child);
            }
        }
        self.emit_branch_status(branch_id).await;
        self.persist();
        Ok(child_ids)
    }

    /// Splits a branch by a named strategy (the external tool form).
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrationError::InvalidSplit`] for unknown criteria
    /// or an indivisible branch.
    pub async fn split_branch(
        &mut self,
        branch_id: &str,
        criteria: &str,
    ) -> Result<Vec<String>, OrchestrationError> {
        let strategy: SplitStrategy =
            criteria
                .parse()
                .map_err(|message: String| OrchestrationError::InvalidSplit { message })?;

        let groups = {
            let state = self.current.as_ref().ok_or(OrchestrationError::NoActiveLoop)?;
            let branch = state
                .branch(branch_id)
                .ok_or_else(|| OrchestrationError::BranchNotFound {
                    id: branch_id.to_string(),
                })?;
            let groups = super::splitter::BranchSplitter::split(branch, strategy, 2);
            if groups.len() < 2 {
                return Err(OrchestrationError::InvalidSplit {
                    message: format!("branch {branch_id} cannot be divided"),
                });
            }
            groups
        };
        self.apply_split(branch_id, &groups).await
    }

    /// Switches a branch's mode (validated, one-way).
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrationError::InvalidModeTransition`] for a
    /// backwards transition.
    pub fn switch_mode(
        &mut self,
        branch_id: &str,
        mode: LoopMode,
    ) -> Result<(), OrchestrationError> {
        let state = self.current.as_mut().ok_or(OrchestrationError::NoActiveLoop)?;
        let branch = state
            .branch_mut(branch_id)
            .ok_or_else(|| OrchestrationError::BranchNotFound {
                id: branch_id.to_string(),
            })?;
        let old = branch.mode;
        branch.set_mode(mode)?;
        info!(branch_id, from = %old, to = %mode, "switched mode");
        self.persist();
        Ok(())
    }

    /// Prunes a branch.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrationError::BranchNotFound`] or a transition
    /// error when the branch is already completed.
    pub async fn prune_branch(
        &mut self,
        branch_id: &str,
        reason: &str,
    ) -> Result<(), OrchestrationError> {
        {
            let state = self.current.as_mut().ok_or(OrchestrationError::NoActiveLoop)?;
            let branch = state
                .branch_mut(branch_id)
                .ok_or_else(|| OrchestrationError::BranchNotFound {
                    id: branch_id.to_string(),
                })?;
            self.branch_manager.prune_branch(branch, reason)?;
        }
        self.emit_branch_status(branch_id).await;
        self.persist();
        Ok(())
    }

    /// Marks a branch completed and emits the status change.
    async fn complete_branch(&mut self, branch_id: &str) -> Result<(), OrchestrationError> {
        {
            let state = self.current.as_mut().ok_or(OrchestrationError::NoActiveLoop)?;
            let branch = state
                .branch_mut(branch_id)
                .ok_or_else(|| OrchestrationError::BranchNotFound {
                    id: branch_id.to_string(),
                })?;
            branch.set_status(BranchStatus::Completed)?;
        }
        self.emit_branch_status(branch_id).await;
        self.persist();
        Ok(())
    }

    /// Launches a follow-up loop seeded by hypotheses from the current
    /// loop. Returns the new loop ID.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrationError::HypothesisNotFound`] when any
    /// referenced hypothesis cannot be resolved, or `InvalidSplit`-class
    /// errors when the list is empty.
    pub async fn launch_research_loop(
        &mut self,
        hypothesis_ids: &[String],
    ) -> Result<String, OrchestrationError> {
        let state = self.current.as_ref().ok_or(OrchestrationError::NoActiveLoop)?;
        if hypothesis_ids.is_empty() {
            return Err(OrchestrationError::HypothesisNotFound {
                id: "<empty selection>".to_string(),
            });
        }

        let all: HashMap<String, ResearchHypothesis> = state
            .collect_hypotheses()
            .into_iter()
            .map(|h| (h.id.clone(), h))
            .collect();

        let mut seeding = Vec::with_capacity(hypothesis_ids.len());
        for id in hypothesis_ids {
            let hypothesis =
                all.get(id)
                    .cloned()
                    .ok_or_else(|| OrchestrationError::HypothesisNotFound {
                        id: id.clone(),
                    })?;
            seeding.push(hypothesis);
        }

        let combined_query = seeding
            .iter()
            .take(3)
            .map(|h| h.text.chars().take(100).collect::<String>())
            .collect::<Vec<_>>()
            .join(" AND ");
        let next_number = state.loop_number + 1;
        let filters = state.session_filters.clone();

        let loop_id = self
            .start_loop(&combined_query, next_number, Some(seeding), filters)
            .await;
        info!(loop_id, loop_number = next_number, "launched seeded research loop");
        Ok(loop_id)
    }

    /// Pure status snapshot: the whole loop, or one branch.
    #[must_use]
    pub fn get_status(&self, branch_id: Option<&str>) -> Value {
        let Some(state) = self.current.as_ref() else {
            return json!({"error": "no active loop"});
        };

        match branch_id {
            Some(id) => state.branch(id).map_or_else(
                || json!({"error": format!("branch not found: {id}")}),
                |branch| {
                    json!({
                        "id": branch.id,
                        "query": branch.query,
                        "mode": branch.mode.to_string(),
                        "status": branch.status.to_string(),
                        "iterations": branch.iteration_count(),
                        "papers": branch.total_papers(),
                        "summaries": branch.total_summaries(),
                        "hypotheses": branch.hypotheses().len(),
                        "context_used": branch.context_window_used,
                        "context_max": branch.max_context_window,
                        "context_utilization": branch.context_utilization(),
                        "parent": branch.parent_branch_id,
                    })
                },
            ),
            None => serde_json::to_value(LoopStatus::from_state(state))
                .unwrap_or_else(|_| json!({"error": "status serialization failed"})),
        }
    }

    /// All hypotheses from the current loop.
    #[must_use]
    pub fn get_all_hypotheses(&self) -> Vec<ResearchHypothesis> {
        self.current
            .as_ref()
            .map(LoopState::collect_hypotheses)
            .unwrap_or_default()
    }

    /// Top hypotheses by confidence, filtered at `min_confidence`.
    #[must_use]
    pub fn get_top_hypotheses(&self, n: usize, min_confidence: f64) -> Vec<ResearchHypothesis> {
        let mut hypotheses: Vec<ResearchHypothesis> = self
            .get_all_hypotheses()
            .into_iter()
            .filter(|h| h.confidence >= min_confidence)
            .collect();
        hypotheses.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hypotheses.truncate(n);
        hypotheses
    }

    /// Runs the serial scheduler until the budget or a stop condition.
    ///
    /// Picks the next branch (RUNNING before PENDING), advances it one
    /// iteration, applies stall detection, and continues. A branch error
    /// prunes that branch and the loop moves on. Remaining PENDING
    /// branches are PAUSED when the budget expires. Cancellation is
    /// observed between iterations only.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrationError::NoActiveLoop`] when no loop is
    /// started; per-branch failures never abort the schedule.
    pub async fn run_auto(
        &mut self,
        max_iterations: usize,
        stop_on_hypotheses: usize,
        max_consecutive_empty: usize,
    ) -> Result<LoopStatus, OrchestrationError> {
        if self.current.is_none() {
            return Err(OrchestrationError::NoActiveLoop);
        }

        let mut total_iterations = 0usize;
        let mut empty_counts: HashMap<String, usize> = HashMap::new();

        while total_iterations < max_iterations {
            if self.cancel.load(Ordering::SeqCst) {
                info!("cancellation requested, quiescing scheduler");
                break;
            }

            let Some(branch_id) = self
                .current
                .as_ref()
                .and_then(BranchManager::get_next_branch)
            else {
                info!("no schedulable branches remain");
                break;
            };

            match self.run_iteration(&branch_id, None).await {
                Ok(result) => {
                    total_iterations += 1;
                    info!(
                        total_iterations,
                        branch_id,
                        papers = result.papers_found.len(),
                        summaries = result.summaries.len(),
                        "scheduler advanced branch"
                    );

                    if result.is_empty() {
                        let count = empty_counts.entry(branch_id.clone()).or_insert(0);
                        *count += 1;
                        if *count >= max_consecutive_empty
                            && self
                                .lookup(&branch_id)
                                .is_some_and(|b| !b.status.is_terminal())
                        {
                            info!(
                                branch_id,
                                consecutive_empty = *count,
                                "branch stalled, marking completed"
                            );
                            self.complete_branch(&branch_id).await?;
                        }
                    } else {
                        empty_counts.insert(branch_id.clone(), 0);
                    }
                }
                Err(e) => {
                    error!(branch_id, error = %e, "iteration failed, pruning branch");
                    if let Err(prune_error) =
                        self.prune_branch(&branch_id, &format!("error: {e}")).await
                    {
                        warn!(branch_id, error = %prune_error, "prune after failure failed");
                    }
                }
            }

            if stop_on_hypotheses > 0 && self.get_all_hypotheses().len() >= stop_on_hypotheses {
                info!(target = stop_on_hypotheses, "hypothesis target reached, stopping");
                break;
            }
        }

        // Budget expired: pending branches become recoverable
        let paused_ids: Vec<String> = self
            .current
            .as_ref()
            .map(|state| {
                state
                    .branches
                    .values()
                    .filter(|b| b.status == BranchStatus::Pending)
                    .map(|b| b.id.clone())
                    .collect()
            })
            .unwrap_or_default();
        for branch_id in paused_ids {
            if let Some(state) = self.current.as_mut()
                && let Some(branch) = state.branch_mut(&branch_id)
            {
                branch.set_status(BranchStatus::Paused)?;
            }
            self.emit_branch_status(&branch_id).await;
        }

        self.persist();
        let state = self.current.as_ref().ok_or(OrchestrationError::NoActiveLoop)?;
        Ok(LoopStatus::from_state(state))
    }

    /// Snapshot of one branch by ID.
    fn lookup(&self, branch_id: &str) -> Option<Branch> {
        self.current
            .as_ref()
            .and_then(|state| state.branch(branch_id))
            .cloned()
    }

    /// Compact briefs of every other non-terminal branch.
    fn sibling_briefs(&self, branch_id: &str) -> Vec<SiblingBrief> {
        self.current
            .as_ref()
            .map(|state| {
                state
                    .branches
                    .values()
                    .filter(|b| b.id != branch_id && !b.status.is_terminal())
                    .map(|b| SiblingBrief {
                        id: b.id.clone(),
                        query: b.query.clone(),
                        status: b.status.to_string(),
                        paper_count: b.total_papers(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Emits a session status transition (`pending`, `running`,
    /// `completed`, `failed`) to the sink.
    pub async fn emit_session_status(&self, status: &str) {
        if let Some(ref emitter) = self.emitter {
            emitter.session_status(status).await;
        }
    }

    /// Emits the branch's current status to the sink.
    async fn emit_branch_status(&self, branch_id: &str) {
        if let (Some(emitter), Some(branch)) = (
            self.emitter.as_ref(),
            self.current.as_ref().and_then(|s| s.branch(branch_id)),
        ) {
            emitter.branch_status_changed(branch).await;
        }
    }

    /// Saves the current state into the store.
    fn persist(&mut self) {
        if let Some(state) = self.current.clone() {
            self.state_store.save_state(state);
        }
    }
}

impl std::fmt::Debug for MasterAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterAgent")
            .field("config", &self.config)
            .field("has_managing_agent", &self.managing_agent.is_some())
            .field(
                "loop_id",
                &self.current.as_ref().map(|s| s.loop_id.as_str()),
            )
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::agent::message::ChatResponse;
    use crate::agent::providers::MockProvider;
    use crate::agent::tool::ToolCall;
    use crate::agent::LlmProvider;
    use crate::config::{
        BranchConfig, InnerLoopConfig, IterationLoopConfig, ManagingAgentConfig,
    };
    use crate::core::estimator::ContextEstimator;
    use crate::core::paper::PaperRef;
    use crate::halugate::MockHaluGate;
    use crate::events::MemoryEventSink;
    use crate::orchestration::inner_loop::InnerLoop;
    use crate::orchestration::summarize::Overseer;
    use crate::orchestration::testutil::{ScriptedSource, paper_ref};
    use crate::sources::PaperSource;

    fn summary_text() -> String {
        "A grounded summary of the paper's findings. ".repeat(3)
    }

    struct Harness {
        master: MasterAgent,
        sink: Arc<MemoryEventSink>,
        provider: Arc<MockProvider>,
    }

    fn harness(
        source: ScriptedSource,
        provider: MockProvider,
        gate: MockHaluGate,
        master_config: MasterAgentConfig,
        inner_config: InnerLoopConfig,
        branch_config: BranchConfig,
    ) -> Harness {
        let source: Arc<dyn PaperSource> = Arc::new(source);
        let provider = Arc::new(provider);
        let overseer = Arc::new(Overseer::new(
            Arc::clone(&provider) as Arc<dyn LlmProvider>,
            "summarizer-model",
            Arc::new(gate),
            inner_config.strict_threshold,
            inner_config.loose_threshold,
            2,
        ));
        let inner = Arc::new(InnerLoop::new(
            Arc::clone(&source),
            Arc::clone(&provider) as Arc<dyn LlmProvider>,
            "summarizer-model",
            overseer,
            inner_config,
        ));
        let iteration_loop = Arc::new(IterationLoop::new(
            inner,
            source,
            ContextEstimator::default(),
            IterationLoopConfig::default(),
        ));
        let mut master = MasterAgent::new(
            iteration_loop,
            BranchManager::new(branch_config),
            master_config,
        );
        let sink = Arc::new(MemoryEventSink::default());
        master.set_event_sink(Arc::clone(&sink) as Arc<dyn crate::events::EventSink>);
        Harness {
            master,
            sink,
            provider,
        }
    }

    fn no_auto() -> MasterAgentConfig {
        MasterAgentConfig {
            auto_split: false,
            auto_hypothesis: false,
            managing_agent: ManagingAgentConfig::default(),
        }
    }

    fn initial_branch_id(master: &MasterAgent) -> String {
        master
            .current_state()
            .and_then(|s| s.branches.values().next())
            .map(|b| b.id.clone())
            .unwrap_or_else(|| panic!("no initial branch"))
    }

    /// Scenario: happy path. Five candidates, selection picks three,
    /// two strict + one loose summary, one iteration_completed event.
    #[tokio::test]
    async fn test_happy_path_iteration() {
        let candidates: Vec<PaperRef> = (1..=5)
            .map(|i| paper_ref(&format!("p{i}"), &format!("Paper {i}"), 2020, 10, "CS"))
            .collect();
        let mut responses = vec![ChatResponse::text(r#"{"selected": [1, 2, 4]}"#)];
        responses.extend((0..4).map(|_| ChatResponse::text(summary_text())));

        let inner_config = InnerLoopConfig {
            max_papers_per_iteration: 3,
            ..InnerLoopConfig::default()
        };
        // p2 misses the strict bar twice (0.82 best, salvaged loose);
        // p1 and p4 pass strictly on the first attempt
        let mut h = harness(
            ScriptedSource::with_searches(vec![candidates]),
            MockProvider::with_responses(responses),
            MockHaluGate::with_outcomes(vec![(0.97, 0), (0.82, 0), (0.80, 0), (0.96, 0)]),
            no_auto(),
            inner_config,
            BranchConfig::default(),
        );

        h.master
            .start_loop("transformer attention mechanisms", 1, None, None)
            .await;
        let branch_id = initial_branch_id(&h.master);
        let result = h
            .master
            .run_iteration(&branch_id, None)
            .await
            .unwrap_or_else(|e| panic!("iteration: {e}"));

        assert_eq!(result.papers_found.len(), 3);
        assert_eq!(result.summaries.len(), 3);
        let strict_count = result.summaries.iter().filter(|s| s.strict).count();
        assert_eq!(strict_count, 2);

        let branch = h
            .master
            .current_state()
            .and_then(|s| s.branch(&branch_id))
            .cloned()
            .unwrap_or_else(|| panic!("branch missing"));
        assert_eq!(branch.total_summaries(), 3);

        let events = h.sink.event_types();
        let completed = events.iter().filter(|e| *e == "iteration_completed").count();
        assert_eq!(completed, 1);
        // branch_created precedes everything else for this branch
        assert_eq!(events.first().map(String::as_str), Some("branch_created"));
    }

    /// Scenario: stall. Empty iteration 2 plus max_consecutive_empty=1
    /// marks the branch completed (managing agent disabled).
    #[tokio::test]
    async fn test_stall_marks_branch_completed() {
        let source = ScriptedSource::with_searches(vec![vec![
            paper_ref("p1", "Seed A", 2020, 5, "CS"),
            paper_ref("p2", "Seed B", 2021, 3, "CS"),
            paper_ref("p3", "Seed C", 2019, 8, "CS"),
        ]]);
        let mut h = harness(
            source,
            MockProvider::with_fallback(summary_text()),
            MockHaluGate::default(),
            no_auto(),
            InnerLoopConfig::default(),
            BranchConfig::default(),
        );

        h.master.start_loop("stalling query", 1, None, None).await;
        let branch_id = initial_branch_id(&h.master);
        let status = h
            .master
            .run_auto(10, 0, 1)
            .await
            .unwrap_or_else(|e| panic!("run_auto: {e}"));

        let branch = h
            .master
            .current_state()
            .and_then(|s| s.branch(&branch_id))
            .cloned()
            .unwrap_or_else(|| panic!("branch missing"));
        assert_eq!(branch.status, BranchStatus::Completed);
        assert_eq!(branch.iteration_count(), 2);
        assert!(branch.iterations[1].is_empty());
        assert_eq!(status.completed_branches, 1);
    }

    /// Scenario: managed split. The agent's SPLIT decision produces two
    /// pending children carrying their groups; the parent completes.
    #[tokio::test]
    async fn test_managed_split() {
        let candidates: Vec<PaperRef> = (1..=12)
            .map(|i| paper_ref(&format!("p{i}"), &format!("Paper {i}"), 2020, 10, "CS"))
            .collect();
        let source = ScriptedSource::with_searches(vec![candidates]);
        let mut h = harness(
            source,
            MockProvider::with_fallback(summary_text()),
            MockHaluGate::default(),
            no_auto(),
            InnerLoopConfig {
                max_papers_per_iteration: 12,
                ..InnerLoopConfig::default()
            },
            BranchConfig::default(),
        );

        let split_args = serde_json::json!({
            "action": "split",
            "reasoning": "two clear themes",
            "split_config": {
                "num_branches": 2,
                "criteria": "by_topic",
                "branches": [
                    {"label": "theory", "query": "q theory",
                     "paper_ids": ["p1", "p2", "p3", "p4", "p5", "p6"]},
                    {"label": "empirical", "query": "q empirical",
                     "paper_ids": ["p7", "p8", "p9", "p10", "p11", "p12"]}
                ]
            }
        });
        let reasoner = MockProvider::with_responses(vec![ChatResponse::with_tool_calls(vec![
            ToolCall {
                id: "c1".to_string(),
                name: "make_branch_decision".to_string(),
                arguments: split_args.to_string(),
            },
        ])]);
        h.master.set_managing_agent(Arc::new(ManagingAgent::new(
            Arc::new(reasoner),
            "reasoner-model",
            ManagingAgentConfig {
                min_papers_before_evaluation: 5,
                evaluation_interval: 1,
                ..ManagingAgentConfig::default()
            },
        )));

        h.master.start_loop("q", 1, None, None).await;
        let parent_id = initial_branch_id(&h.master);
        h.master
            .run_iteration(&parent_id, None)
            .await
            .unwrap_or_else(|e| panic!("iteration: {e}"));

        let state = h
            .master
            .current_state()
            .cloned()
            .unwrap_or_else(|| panic!("state missing"));
        assert_eq!(state.branches.len(), 3);

        let parent = state
            .branch(&parent_id)
            .unwrap_or_else(|| panic!("parent missing"));
        assert_eq!(parent.status, BranchStatus::Completed);

        let children: Vec<&Branch> = state
            .branches
            .values()
            .filter(|b| b.parent_branch_id.as_deref() == Some(parent_id.as_str()))
            .collect();
        assert_eq!(children.len(), 2);
        for child in &children {
            assert_eq!(child.status, BranchStatus::Pending);
            assert_eq!(child.total_papers(), 6);
            assert_eq!(child.total_summaries(), 6);
        }

        // Child branch_created events precede the parent's final status event
        let paths: Vec<String> = h.sink.mutations().into_iter().map(|m| m.path).collect();
        let last_create = paths
            .iter()
            .rposition(|p| p == "branches:create")
            .unwrap_or(0);
        let last_update = paths
            .iter()
            .rposition(|p| p == "branches:update")
            .unwrap_or(0);
        assert!(last_create < last_update);
    }

    /// Scenario: hypothesis hand-off. Crossing the paper threshold
    /// switches the mode and immediately runs a hypothesis iteration;
    /// seeded follow-up loops increment the loop number.
    #[tokio::test]
    async fn test_hypothesis_handoff_and_seeded_loop() {
        let candidates: Vec<PaperRef> = (1..=10)
            .map(|i| paper_ref(&format!("p{i}"), &format!("Paper {i}"), 2020, 10, "CS"))
            .collect();
        let mut source = ScriptedSource::with_searches(vec![candidates]);
        // The hypothesis iteration expands from iteration 1's papers
        source.citations.insert(
            "p1".to_string(),
            vec![paper_ref("p11", "Citing", 2022, 2, "CS")],
        );

        // 10 summaries, then the hypothesis iteration: 1 summary + 1
        // hypothesis generation call
        let mut responses: Vec<ChatResponse> =
            (0..11).map(|_| ChatResponse::text(summary_text())).collect();
        responses.push(ChatResponse::text(
            r#"{"hypotheses": [
                {"text": "X generalizes Y", "supporting_paper_ids": ["p11"], "confidence": 0.8}
            ]}"#,
        ));

        let master_config = MasterAgentConfig {
            auto_split: false,
            auto_hypothesis: true,
            managing_agent: ManagingAgentConfig::default(),
        };
        let mut h = harness(
            source,
            MockProvider::with_responses(responses),
            MockHaluGate::default(),
            master_config,
            InnerLoopConfig {
                max_papers_per_iteration: 10,
                ..InnerLoopConfig::default()
            },
            BranchConfig::default(),
        );

        h.master.start_loop("seed query", 1, None, None).await;
        let branch_id = initial_branch_id(&h.master);
        h.master
            .run_iteration(&branch_id, None)
            .await
            .unwrap_or_else(|e| panic!("iteration: {e}"));

        let branch = h
            .master
            .current_state()
            .and_then(|s| s.branch(&branch_id))
            .cloned()
            .unwrap_or_else(|| panic!("branch missing"));
        assert_eq!(branch.mode, LoopMode::Hypothesis);
        // The hand-off ran one extra iteration with hypotheses
        assert_eq!(branch.iteration_count(), 2);
        let hypotheses = branch.hypotheses();
        assert_eq!(hypotheses.len(), 1);

        // Seeded follow-up loop
        let hypothesis_ids: Vec<String> =
            hypotheses.iter().map(|hyp| hyp.id.clone()).collect();
        let seeded = h.master.get_all_hypotheses();
        let new_loop = h
            .master
            .launch_research_loop(&hypothesis_ids)
            .await
            .unwrap_or_else(|e| panic!("launch: {e}"));

        let state = h
            .master
            .current_state()
            .cloned()
            .unwrap_or_else(|| panic!("state missing"));
        assert_eq!(state.loop_id, new_loop);
        assert_eq!(state.loop_number, 2);
        assert_eq!(
            state.seeding_hypotheses.as_ref().map(Vec::len),
            Some(seeded.len())
        );
        assert!(state.branches.len() == 1);
    }

    #[tokio::test]
    async fn test_budget_expiry_pauses_pending_branches() {
        // Two searches scripted: scheduler will only get to run one
        // iteration before the budget expires
        let source = ScriptedSource::with_searches(vec![
            vec![paper_ref("p1", "A", 2020, 1, "CS")],
            vec![paper_ref("p2", "B", 2020, 1, "CS")],
        ]);
        let mut h = harness(
            source,
            MockProvider::with_fallback(summary_text()),
            MockHaluGate::default(),
            no_auto(),
            InnerLoopConfig::default(),
            BranchConfig::default(),
        );

        h.master.start_loop("q", 1, None, None).await;
        // Add a second pending branch manually
        let extra = h.master.branch_manager.create_branch(
            "q2",
            LoopMode::SearchSummarize,
            None,
            None,
            None,
        );
        let extra_id = extra.id.clone();
        if let Some(state) = h.master.current.as_mut() {
            state.add_branch(extra);
        }

        h.master
            .run_auto(1, 0, 3)
            .await
            .unwrap_or_else(|e| panic!("run_auto: {e}"));

        let state = h
            .master
            .current_state()
            .cloned()
            .unwrap_or_else(|| panic!("state missing"));
        let extra_branch = state
            .branch(&extra_id)
            .unwrap_or_else(|| panic!("extra branch missing"));
        assert_eq!(extra_branch.status, BranchStatus::Paused);
    }

    #[tokio::test]
    async fn test_branch_error_prunes_and_continues() {
        let mut source = ScriptedSource::default();
        source.fail_search = true;
        let mut h = harness(
            source,
            MockProvider::with_fallback(summary_text()),
            MockHaluGate::default(),
            no_auto(),
            InnerLoopConfig::default(),
            BranchConfig::default(),
        );

        h.master.start_loop("q", 1, None, None).await;
        let branch_id = initial_branch_id(&h.master);
        let status = h
            .master
            .run_auto(5, 0, 3)
            .await
            .unwrap_or_else(|e| panic!("run_auto: {e}"));

        let branch = h
            .master
            .current_state()
            .and_then(|s| s.branch(&branch_id))
            .cloned()
            .unwrap_or_else(|| panic!("branch missing"));
        assert_eq!(branch.status, BranchStatus::Pruned);
        assert_eq!(status.pruned_branches, 1);
        assert_eq!(status.active_branches, 0);
    }

    #[tokio::test]
    async fn test_cancellation_quiesces_between_iterations() {
        let source = ScriptedSource::with_searches(vec![
            vec![paper_ref("p1", "A", 2020, 1, "CS")],
        ]);
        let mut h = harness(
            source,
            MockProvider::with_fallback(summary_text()),
            MockHaluGate::default(),
            no_auto(),
            InnerLoopConfig::default(),
            BranchConfig::default(),
        );

        h.master.start_loop("q", 1, None, None).await;
        h.master.cancellation_handle().store(true, Ordering::SeqCst);
        h.master
            .run_auto(10, 0, 3)
            .await
            .unwrap_or_else(|e| panic!("run_auto: {e}"));

        // Nothing ran: cancellation observed before the first iteration
        let state = h
            .master
            .current_state()
            .cloned()
            .unwrap_or_else(|| panic!("state missing"));
        let branch = state
            .branches
            .values()
            .next()
            .unwrap_or_else(|| panic!("branch missing"));
        assert_eq!(branch.iteration_count(), 0);
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_get_status_is_pure() {
        let source = ScriptedSource::with_searches(vec![
            vec![paper_ref("p1", "A", 2020, 1, "CS")],
        ]);
        let mut h = harness(
            source,
            MockProvider::with_fallback(summary_text()),
            MockHaluGate::default(),
            no_auto(),
            InnerLoopConfig::default(),
            BranchConfig::default(),
        );
        h.master.start_loop("q", 1, None, None).await;
        let branch_id = initial_branch_id(&h.master);
        h.master
            .run_iteration(&branch_id, None)
            .await
            .unwrap_or_else(|e| panic!("iteration: {e}"));

        let first = h.master.get_status(None);
        let second = h.master.get_status(None);
        assert_eq!(first, second);

        let branch_status = h.master.get_status(Some(&branch_id));
        assert_eq!(branch_status["papers"], 1);
        assert_eq!(branch_status["iterations"], 1);
    }

    #[tokio::test]
    async fn test_operations_require_active_loop() {
        let source = ScriptedSource::default();
        let mut h = harness(
            source,
            MockProvider::with_fallback("x"),
            MockHaluGate::default(),
            no_auto(),
            InnerLoopConfig::default(),
            BranchConfig::default(),
        );

        assert!(matches!(
            h.master.run_iteration("b", None).await,
            Err(OrchestrationError::NoActiveLoop)
        ));
        assert!(matches!(
            h.master.run_auto(1, 0, 3).await,
            Err(OrchestrationError::NoActiveLoop)
        ));
    }

    #[tokio::test]
    async fn test_launch_requires_resolvable_hypotheses() {
        let source = ScriptedSource::default();
        let mut h = harness(
            source,
            MockProvider::with_fallback("x"),
            MockHaluGate::default(),
            no_auto(),
            InnerLoopConfig::default(),
            BranchConfig::default(),
        );
        h.master.start_loop("q", 1, None, None).await;

        assert!(matches!(
            h.master.launch_research_loop(&[]).await,
            Err(OrchestrationError::HypothesisNotFound { .. })
        ));
        assert!(matches!(
            h.master
                .launch_research_loop(&["ghost".to_string()])
                .await,
            Err(OrchestrationError::HypothesisNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_mode_override_is_validated() {
        let source = ScriptedSource::with_searches(vec![
            vec![paper_ref("p1", "A", 2020, 1, "CS")],
        ]);
        let mut h = harness(
            source,
            MockProvider::with_fallback(summary_text()),
            MockHaluGate::default(),
            no_auto(),
            InnerLoopConfig::default(),
            BranchConfig::default(),
        );
        h.master.start_loop("q", 1, None, None).await;
        let branch_id = initial_branch_id(&h.master);

        h.master
            .switch_mode(&branch_id, LoopMode::Hypothesis)
            .unwrap_or_else(|e| panic!("switch: {e}"));
        // Backwards transition rejected
        assert!(matches!(
            h.master.switch_mode(&branch_id, LoopMode::SearchSummarize),
            Err(OrchestrationError::InvalidModeTransition { .. })
        ));
    }
}
