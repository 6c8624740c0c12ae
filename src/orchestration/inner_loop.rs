//! Inner loop: one search -> select -> summarize -> validate cycle.
//!
//! The atomic unit of the research engine. Searches a paper provider,
//! prunes the candidate set with the selection agent when it exceeds the
//! working limit, fetches details (and full text when enabled) for the
//! working set, summarizes under the groundedness gate with bounded
//! parallelism, and optionally proposes hypotheses.

use std::sync::Arc;

use futures_util::StreamExt;
use tracing::{info, warn};

use super::hypothesis::HypothesisGenerator;
use super::selection::{build_existing_context, select_papers};
use super::summarize::Overseer;
use crate::agent::LlmProvider;
use crate::config::InnerLoopConfig;
use crate::core::branch::{ResearchHypothesis, ValidatedSummary};
use crate::core::paper::{PaperDetails, PaperRef, SearchFilters};
use crate::error::OrchestrationError;
use crate::sources::PaperSource;

/// Output of one inner-loop run.
pub type InnerLoopOutput = (
    Vec<PaperDetails>,
    Vec<ValidatedSummary>,
    Option<Vec<ResearchHypothesis>>,
);

/// The inner loop: search, select, summarize, validate, hypothesize.
pub struct InnerLoop {
    source: Arc<dyn PaperSource>,
    provider: Arc<dyn LlmProvider>,
    model: String,
    overseer: Arc<Overseer>,
    hypothesis_generator: HypothesisGenerator,
    config: InnerLoopConfig,
}

impl InnerLoop {
    /// Wires the inner loop over its collaborators.
    #[must_use]
    pub fn new(
        source: Arc<dyn PaperSource>,
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        overseer: Arc<Overseer>,
        config: InnerLoopConfig,
    ) -> Self {
        let model = model.into();
        let hypothesis_generator = HypothesisGenerator::new(Arc::clone(&provider), model.clone());
        Self {
            source,
            provider,
            model,
            overseer,
            hypothesis_generator,
            config,
        }
    }

    /// The configured inner-loop knobs.
    #[must_use]
    pub const fn config(&self) -> &InnerLoopConfig {
        &self.config
    }

    /// Runs one full cycle for `query` on behalf of `branch_id`.
    ///
    /// `paper_limit` overrides the per-iteration working cap;
    /// `existing_summaries` provides dedup context for the selection
    /// agent.
    ///
    /// # Errors
    ///
    /// Propagates a search-stage failure once the provider's retries are
    /// exhausted. Per-paper failures degrade instead of erroring.
    pub async fn run(
        &self,
        query: &str,
        branch_id: &str,
        filters: Option<&SearchFilters>,
        hypothesis_mode: bool,
        paper_limit: Option<usize>,
        existing_summaries: &[&ValidatedSummary],
    ) -> Result<InnerLoopOutput, OrchestrationError> {
        let working_limit = paper_limit.unwrap_or(self.config.max_papers_per_iteration);

        // Stage 1: search
        info!(branch_id, %query, "searching for candidates");
        let candidates = self
            .source
            .search_papers(query, filters, self.config.candidate_fetch_limit)
            .await?;
        info!(branch_id, found = candidates.len(), "search complete");

        if candidates.is_empty() {
            let hypotheses = hypothesis_mode.then(Vec::new);
            return Ok((Vec::new(), Vec::new(), hypotheses));
        }

        // Stage 2 + 3: detail fetch and agent selection. Selection is
        // skipped when the candidate set already fits the working limit.
        let working_set = if candidates.len() <= working_limit {
            self.fetch_details(&candidates, self.config.fetch_full_text)
                .await
        } else {
            let detailed = self.fetch_details(&candidates, false).await;
            let selected = self
                .select_working_set(query, &detailed, existing_summaries, working_limit)
                .await;
            if self.config.fetch_full_text {
                self.refetch_with_text(selected).await
            } else {
                selected
            }
        };

        // Stage 4: summarize and validate with bounded parallelism
        let summaries = self.summarize_all(&working_set).await;
        info!(
            branch_id,
            validated = summaries.len(),
            papers = working_set.len(),
            "summarization complete"
        );

        // Stage 5: hypothesis generation
        let hypotheses = if hypothesis_mode {
            Some(self.generate_hypotheses(&summaries, branch_id).await)
        } else {
            None
        };

        Ok((working_set, summaries, hypotheses))
    }

    /// Summarizes `papers` under the concurrency bound, keeping accepted
    /// summaries in paper order.
    pub async fn summarize_all(&self, papers: &[PaperDetails]) -> Vec<ValidatedSummary> {
        let concurrency = self.config.max_summarization_concurrency.max(1);
        futures_util::stream::iter(papers.iter())
            .map(|paper| {
                let overseer = Arc::clone(&self.overseer);
                async move { overseer.summarize_and_validate(paper).await }
            })
            .buffered(concurrency)
            .filter_map(|summary| async move { summary })
            .collect()
            .await
    }

    /// Generates hypotheses, degrading to an empty list on failure.
    pub async fn generate_hypotheses(
        &self,
        summaries: &[ValidatedSummary],
        branch_id: &str,
    ) -> Vec<ResearchHypothesis> {
        match self.hypothesis_generator.generate(summaries, branch_id).await {
            Ok(hypotheses) => hypotheses,
            Err(e) => {
                warn!(branch_id, error = %e, "hypothesis generation failed");
                Vec::new()
            }
        }
    }

    /// Fetches detail records, falling back to the search-result records
    /// when the detail endpoint fails or omits papers.
    pub(crate) async fn fetch_details(
        &self,
        candidates: &[PaperRef],
        with_text: bool,
    ) -> Vec<PaperDetails> {
        let ids: Vec<String> = candidates.iter().map(|p| p.paper_id.clone()).collect();
        let fetched = if with_text {
            self.source.fetch_papers_with_text(&ids).await
        } else {
            self.source.fetch_papers(&ids).await
        };

        match fetched {
            Ok(details) => {
                let mut by_id: indexmap::IndexMap<String, PaperDetails> = details
                    .into_iter()
                    .map(|d| (d.paper_id().to_string(), d))
                    .collect();
                // Preserve candidate order; backfill omitted IDs
                candidates
                    .iter()
                    .map(|candidate| {
                        by_id
                            .shift_remove(&candidate.paper_id)
                            .unwrap_or_else(|| PaperDetails::from(candidate.clone()))
                    })
                    .collect()
            }
            Err(e) => {
                warn!(error = %e, "detail fetch failed, using search records");
                candidates
                    .iter()
                    .cloned()
                    .map(PaperDetails::from)
                    .collect()
            }
        }
    }

    /// Runs the selection agent over detailed candidates.
    async fn select_working_set(
        &self,
        query: &str,
        detailed: &[PaperDetails],
        existing_summaries: &[&ValidatedSummary],
        working_limit: usize,
    ) -> Vec<PaperDetails> {
        let context = build_existing_context(existing_summaries);
        let context = (!context.is_empty()).then_some(context.as_str());

        let indices = match select_papers(
            self.provider.as_ref(),
            &self.model,
            query,
            detailed,
            context,
            working_limit,
        )
        .await
        {
            Ok(indices) => indices,
            Err(e) => {
                warn!(error = %e, "selection agent failed, using first candidates");
                (0..working_limit.min(detailed.len())).collect()
            }
        };

        indices
            .into_iter()
            .filter_map(|i| detailed.get(i).cloned())
            .collect()
    }

    /// Re-fetches the selected working set with full text attached.
    async fn refetch_with_text(&self, selected: Vec<PaperDetails>) -> Vec<PaperDetails> {
        let ids: Vec<String> = selected
            .iter()
            .map(|p| p.paper_id().to_string())
            .collect();
        match self.source.fetch_papers_with_text(&ids).await {
            Ok(with_text) => {
                let mut by_id: indexmap::IndexMap<String, PaperDetails> = with_text
                    .into_iter()
                    .map(|d| (d.paper_id().to_string(), d))
                    .collect();
                selected
                    .into_iter()
                    .map(|paper| {
                        by_id
                            .shift_remove(paper.paper_id())
                            .unwrap_or(paper)
                    })
                    .collect()
            }
            Err(e) => {
                warn!(error = %e, "full-text fetch failed, keeping detail records");
                selected
            }
        }
    }
}

impl std::fmt::Debug for InnerLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InnerLoop")
            .field("model", &self.model)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
