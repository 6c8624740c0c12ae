//! Iteration loop: depth expansion through the citation graph.
//!
//! The first iteration on a branch searches with the branch query; every
//! later iteration expands the frontier from the previous iteration's
//! papers (citations, and optionally references), drops papers the
//! branch already holds, and keeps the most-cited remainder. An empty
//! frontier produces an empty iteration, which feeds stall detection in
//! the scheduler.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use super::inner_loop::InnerLoop;
use crate::config::IterationLoopConfig;
use crate::core::branch::{Branch, IterationResult, LoopMode};
use crate::core::estimator::ContextEstimator;
use crate::core::paper::PaperRef;
use crate::error::OrchestrationError;
use crate::sources::PaperSource;

/// The iteration loop over one branch.
pub struct IterationLoop {
    inner: Arc<InnerLoop>,
    source: Arc<dyn PaperSource>,
    estimator: ContextEstimator,
    config: IterationLoopConfig,
}

impl IterationLoop {
    /// Wires the iteration loop over its collaborators.
    #[must_use]
    pub fn new(
        inner: Arc<InnerLoop>,
        source: Arc<dyn PaperSource>,
        estimator: ContextEstimator,
        config: IterationLoopConfig,
    ) -> Self {
        Self {
            inner,
            source,
            estimator,
            config,
        }
    }

    /// The configured iteration-loop knobs.
    #[must_use]
    pub const fn config(&self) -> &IterationLoopConfig {
        &self.config
    }

    /// Runs one iteration for `branch`, returning the result without
    /// mutating the branch (the caller appends it).
    ///
    /// # Errors
    ///
    /// Propagates search/graph failures once provider retries are
    /// exhausted; per-paper failures degrade.
    pub async fn run_iteration(&self, branch: &Branch) -> Result<IterationResult, OrchestrationError> {
        let iteration_number = branch.iteration_count() + 1;
        let hypothesis_mode = branch.mode == LoopMode::Hypothesis;
        info!(
            branch_id = branch.id,
            iteration_number, "running iteration"
        );

        let (papers, summaries, hypotheses) = if iteration_number == 1 {
            self.inner
                .run(
                    &branch.query,
                    &branch.id,
                    branch.filters.as_ref(),
                    hypothesis_mode,
                    None,
                    &[],
                )
                .await?
        } else {
            let frontier = self.expand_frontier(branch).await?;
            if frontier.is_empty() {
                info!(branch_id = branch.id, iteration_number, "frontier exhausted");
                return Ok(IterationResult::empty(iteration_number, hypothesis_mode));
            }

            let papers = self
                .inner
                .fetch_details(&frontier, self.inner.config().fetch_full_text)
                .await;
            let summaries = self.inner.summarize_all(&papers).await;
            let hypotheses = if hypothesis_mode {
                Some(self.inner.generate_hypotheses(&summaries, &branch.id).await)
            } else {
                None
            };
            (papers, summaries, hypotheses)
        };

        let context_tokens_used = self.estimator.estimate_iteration(&papers, &summaries);
        let result = IterationResult {
            iteration_number,
            papers_found: papers,
            summaries,
            hypotheses,
            context_tokens_used,
            timestamp: Utc::now(),
        };
        info!(
            branch_id = branch.id,
            iteration_number,
            papers = result.papers_found.len(),
            summaries = result.summaries.len(),
            hypotheses = result.hypotheses.as_ref().map_or(0, Vec::len),
            tokens = context_tokens_used,
            "iteration complete"
        );
        Ok(result)
    }

    /// Builds the next frontier from the previous iteration's papers:
    /// citations plus (optionally) references, minus everything already
    /// accumulated, top-N by citation count.
    async fn expand_frontier(&self, branch: &Branch) -> Result<Vec<PaperRef>, OrchestrationError> {
        let previous_ids: Vec<String> = branch
            .iterations
            .last()
            .map(|it| {
                it.papers_found
                    .iter()
                    .map(|p| p.paper_id().to_string())
                    .collect()
            })
            .unwrap_or_default();
        if previous_ids.is_empty() {
            return Ok(Vec::new());
        }

        let known: HashSet<&String> = branch.accumulated_papers.keys().collect();
        let mut frontier: indexmap::IndexMap<String, PaperRef> = indexmap::IndexMap::new();

        let citations = self
            .source
            .get_citations_batch(&previous_ids, self.config.max_citations_per_paper)
            .await?;
        for paper in citations {
            if !known.contains(&paper.paper_id) {
                frontier.entry(paper.paper_id.clone()).or_insert(paper);
            }
        }

        if self.config.include_references {
            let references = self
                .source
                .get_references_batch(&previous_ids, self.config.max_references_per_paper)
                .await?;
            for paper in references {
                if !known.contains(&paper.paper_id) {
                    frontier.entry(paper.paper_id.clone()).or_insert(paper);
                }
            }
        }

        let mut papers: Vec<PaperRef> = frontier.into_values().collect();
        let cap = self.inner.config().max_papers_per_iteration;
        if papers.len() > cap {
            papers.sort_by(|a, b| {
                b.citation_count
                    .unwrap_or(0)
                    .cmp(&a.citation_count.unwrap_or(0))
            });
            papers.truncate(cap);
            debug!(kept = cap, "frontier truncated to most-cited papers");
        }
        Ok(papers)
    }

    /// Runs iterations until the context threshold, an empty frontier,
    /// or the per-branch iteration cap, appending each result to the
    /// branch.
    ///
    /// # Errors
    ///
    /// Propagates iteration failures and invalid appends.
    pub async fn run_until_threshold(
        &self,
        branch: &mut Branch,
        context_threshold: f64,
    ) -> Result<Vec<IterationResult>, OrchestrationError> {
        let mut results = Vec::new();

        while branch.iteration_count() < self.config.max_iterations_per_branch {
            if branch.context_utilization() >= context_threshold {
                info!(
                    branch_id = branch.id,
                    utilization = branch.context_utilization(),
                    "context threshold reached"
                );
                break;
            }

            let result = self.run_iteration(branch).await?;
            let is_empty = result.is_empty();
            branch.add_iteration(result.clone())?;
            results.push(result);

            if is_empty {
                info!(branch_id = branch.id, "no new papers, stopping");
                break;
            }
        }

        Ok(results)
    }
}

impl std::fmt::Debug for IterationLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterationLoop")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
