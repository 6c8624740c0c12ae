//! Research session: a whole run wired from a config profile.
//!
//! Builds the provider stack (paper sources, summarizer, reasoner,
//! hallucination gate, event sink) from a [`ProfileConfig`], starts the
//! loop, runs the scheduler, and closes the session out on the sink
//! with a `completed`/`failed` status.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tracing::{info, warn};

use super::branch_manager::BranchManager;
use super::inner_loop::InnerLoop;
use super::iteration_loop::IterationLoop;
use super::managing_agent::ManagingAgent;
use super::master_agent::MasterAgent;
use super::query_planner::QueryPlanner;
use super::summarize::Overseer;
use crate::config::{
    ProfileConfig, create_event_sink, create_halugate, create_llm_provider, create_paper_source,
};
use crate::core::branch::{LoopStatus, ResearchHypothesis};
use crate::core::estimator::ContextEstimator;
use crate::core::paper::SearchFilters;
use crate::error::{Error, OrchestrationError};

/// Options for one session run.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Enable the managing agent (requires the reasoner backend's key).
    pub use_managing_agent: bool,
    /// Search filters applied to every branch.
    pub filters: Option<SearchFilters>,
    /// Run the query planner before the first iteration.
    pub plan_query: bool,
    /// Override the profile's paper source list.
    pub sources: Option<Vec<String>>,
}

/// One research session over a master agent built from a profile.
pub struct ResearchSession {
    master: MasterAgent,
    initial_query: String,
}

impl ResearchSession {
    /// Builds the full stack from `profile` and starts the loop for
    /// `query`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a selected backend is missing its
    /// key or the profile is inconsistent. Surfaced immediately; nothing
    /// has run yet.
    pub async fn start(
        profile: &ProfileConfig,
        query: &str,
        options: SessionOptions,
    ) -> Result<Self, Error> {
        let mut sources_config = profile.paper_sources.clone();
        if let Some(sources) = options.sources {
            sources_config.strategy = if sources.len() > 1 {
                "parallel".to_string()
            } else {
                "single".to_string()
            };
            sources_config.providers = sources;
        }

        let source = create_paper_source(&sources_config)?;
        let summarizer = create_llm_provider(&profile.summarizer)?;
        let summarizer_model = profile.summarizer.model_name();
        let halugate = create_halugate(&profile.halugate)?;
        let sink = create_event_sink(&profile.events);

        let loop_config = &profile.research_loop;
        let overseer = Arc::new(Overseer::new(
            Arc::clone(&summarizer),
            summarizer_model.clone(),
            halugate,
            loop_config.inner_loop.strict_threshold,
            loop_config.inner_loop.loose_threshold,
            2,
        ));
        let inner = Arc::new(InnerLoop::new(
            Arc::clone(&source),
            Arc::clone(&summarizer),
            summarizer_model.clone(),
            overseer,
            loop_config.inner_loop,
        ));
        let iteration_loop = Arc::new(IterationLoop::new(
            inner,
            source,
            ContextEstimator::default(),
            loop_config.iteration_loop,
        ));

        let mut master = MasterAgent::new(
            iteration_loop,
            BranchManager::new(loop_config.branch),
            loop_config.master_agent.clone(),
        );
        master.set_event_sink(sink);

        if options.use_managing_agent {
            let reasoner = create_llm_provider(&profile.reasoner)?;
            master.set_managing_agent(Arc::new(ManagingAgent::new(
                reasoner,
                profile.reasoner.model_name(),
                loop_config.master_agent.managing_agent.clone(),
            )));
        }

        // Optional planning pass shapes the session filters
        let filters = if options.plan_query {
            let planner = QueryPlanner::new(Arc::clone(&summarizer), summarizer_model);
            match planner.plan(query).await {
                Ok(plan) => {
                    info!(concepts = plan.key_concepts.len(), "query planned");
                    plan.apply_to_filters(options.filters)
                }
                Err(e) => {
                    warn!(error = %e, "query planning failed, searching unplanned");
                    options.filters
                }
            }
        } else {
            options.filters
        };

        master.start_loop(query, 1, None, filters).await;
        Ok(Self {
            master,
            initial_query: query.to_string(),
        })
    }

    /// The query this session was started with.
    #[must_use]
    pub fn initial_query(&self) -> &str {
        &self.initial_query
    }

    /// The loop ID (doubles as the session ID on the event sink).
    #[must_use]
    pub fn loop_id(&self) -> Option<String> {
        self.master.current_state().map(|s| s.loop_id.clone())
    }

    /// Cancellation flag; setting it stops the scheduler between
    /// iterations.
    #[must_use]
    pub fn cancellation_handle(&self) -> Arc<AtomicBool> {
        self.master.cancellation_handle()
    }

    /// Direct access to the master agent.
    pub fn master(&mut self) -> &mut MasterAgent {
        &mut self.master
    }

    /// Runs the scheduler, reporting session status to the sink.
    ///
    /// # Errors
    ///
    /// Propagates [`OrchestrationError`] from the scheduler itself;
    /// per-branch failures are absorbed inside `run_auto`.
    pub async fn run(
        &mut self,
        max_iterations: usize,
        stop_on_hypotheses: usize,
    ) -> Result<LoopStatus, OrchestrationError> {
        self.master.emit_session_status("running").await;
        let outcome = self.master.run_auto(max_iterations, stop_on_hypotheses, 3).await;
        match &outcome {
            Ok(status) => {
                info!(
                    papers = status.total_papers,
                    summaries = status.total_summaries,
                    hypotheses = status.total_hypotheses,
                    "session complete"
                );
                self.master.emit_session_status("completed").await;
            }
            Err(_) => self.master.emit_session_status("failed").await,
        }
        outcome
    }

    /// Top hypotheses from the current loop.
    #[must_use]
    pub fn hypotheses(&self, n: usize, min_confidence: f64) -> Vec<ResearchHypothesis> {
        self.master.get_top_hypotheses(n, min_confidence)
    }

    /// Status snapshot.
    #[must_use]
    pub fn status(&self) -> serde_json::Value {
        self.master.get_status(None)
    }

}

impl std::fmt::Debug for ResearchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchSession")
            .field("initial_query", &self.initial_query)
            .finish_non_exhaustive()
    }
}
