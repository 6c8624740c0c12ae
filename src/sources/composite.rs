//! Composite paper provider over several backends.
//!
//! Strategies:
//! - `single`: first backend only.
//! - `parallel`: query all backends concurrently, merge, deduplicate.
//! - `fallback`: try backends in order until one returns results.
//!
//! Detail fetches and citation-graph walks route by ID shape: preprint
//! IDs go to the arXiv backend, everything else to the first backend
//! with a citation graph.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{debug, warn};

use super::dedup::{PreferredProvider, deduplicate_papers};
use super::{PaperSource, SourceError};
use crate::core::paper::{PaperDetails, PaperRef, SearchFilters};

/// How a composite spreads work over its backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStrategy {
    /// Use the first backend only.
    Single,
    /// Query all backends and merge.
    Parallel,
    /// Try backends in order until one yields results.
    Fallback,
}

impl std::str::FromStr for SourceStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(Self::Single),
            "parallel" => Ok(Self::Parallel),
            "fallback" => Ok(Self::Fallback),
            other => Err(format!("unknown source strategy: {other}")),
        }
    }
}

/// Paper provider composing several backends.
pub struct CompositeSource {
    sources: Vec<Arc<dyn PaperSource>>,
    strategy: SourceStrategy,
    prefer: PreferredProvider,
}

impl CompositeSource {
    /// Creates a composite. `sources` must be non-empty; order defines
    /// priority for `single`/`fallback` and routing preference.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Parse`] when no backends are supplied.
    pub fn new(
        sources: Vec<Arc<dyn PaperSource>>,
        strategy: SourceStrategy,
        prefer: PreferredProvider,
    ) -> Result<Self, SourceError> {
        if sources.is_empty() {
            return Err(SourceError::Parse {
                message: "composite source requires at least one backend".to_string(),
            });
        }
        Ok(Self {
            sources,
            strategy,
            prefer,
        })
    }

    /// First backend (priority order).
    fn primary(&self) -> &Arc<dyn PaperSource> {
        &self.sources[0]
    }

    /// The backend to use for the given paper ID, falling back to the
    /// primary when no backend claims the shape.
    fn route(&self, paper_id: &str) -> &Arc<dyn PaperSource> {
        let want_arxiv = paper_id.starts_with(crate::core::paper::ARXIV_ID_PREFIX);
        self.sources
            .iter()
            .find(|s| (s.name() == "arxiv") == want_arxiv)
            .unwrap_or_else(|| self.primary())
    }

    /// The backend that owns the citation graph (first non-arXiv one).
    fn graph_source(&self) -> &Arc<dyn PaperSource> {
        self.sources
            .iter()
            .find(|s| s.name() != "arxiv")
            .unwrap_or_else(|| self.primary())
    }

    /// Splits IDs by owning backend, fetches each group, and merges the
    /// results preserving the input order as far as possible.
    async fn fetch_routed<F, Fut>(
        &self,
        paper_ids: &[String],
        fetch: F,
    ) -> Result<Vec<PaperDetails>, SourceError>
    where
        F: Fn(Arc<dyn PaperSource>, Vec<String>) -> Fut,
        Fut: std::future::Future<Output = Result<Vec<PaperDetails>, SourceError>>,
    {
        let mut preprint_ids = Vec::new();
        let mut canonical_ids = Vec::new();
        for id in paper_ids {
            if id.starts_with(crate::core::paper::ARXIV_ID_PREFIX) {
                preprint_ids.push(id.clone());
            } else {
                canonical_ids.push(id.clone());
            }
        }

        let mut papers = Vec::with_capacity(paper_ids.len());
        if !canonical_ids.is_empty() {
            let source = Arc::clone(self.route(&canonical_ids[0]));
            papers.extend(fetch(source, canonical_ids).await?);
        }
        if !preprint_ids.is_empty() {
            let source = Arc::clone(self.route(&preprint_ids[0]));
            match fetch(source, preprint_ids).await {
                Ok(more) => papers.extend(more),
                Err(e) => warn!(error = %e, "preprint detail fetch failed"),
            }
        }
        Ok(papers)
    }
}

impl std::fmt::Debug for CompositeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.sources.iter().map(|s| s.name()).collect();
        f.debug_struct("CompositeSource")
            .field("sources", &names)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PaperSource for CompositeSource {
    fn name(&self) -> &'static str {
        "composite"
    }

    async fn search_papers(
        &self,
        query: &str,
        filters: Option<&SearchFilters>,
        limit: usize,
    ) -> Result<Vec<PaperRef>, SourceError> {
        match self.strategy {
            SourceStrategy::Single => self.primary().search_papers(query, filters, limit).await,
            SourceStrategy::Parallel => {
                let searches = self
                    .sources
                    .iter()
                    .map(|s| s.search_papers(query, filters, limit));
                let results = join_all(searches).await;

                let mut merged = Vec::new();
                let mut failures = 0usize;
                let mut last_error = None;
                for (source, result) in self.sources.iter().zip(results) {
                    match result {
                        Ok(papers) => {
                            debug!(source = source.name(), found = papers.len(), "merged");
                            merged.extend(papers);
                        }
                        Err(e) => {
                            warn!(source = source.name(), error = %e, "search failed");
                            failures += 1;
                            last_error = Some(e);
                        }
                    }
                }
                if failures == self.sources.len()
                    && let Some(e) = last_error
                {
                    return Err(e);
                }

                let mut deduped = deduplicate_papers(merged, self.prefer);
                deduped.truncate(limit);
                Ok(deduped)
            }
            SourceStrategy::Fallback => {
                let mut last_error = None;
                for source in &self.sources {
                    match source.search_papers(query, filters, limit).await {
                        Ok(papers) if !papers.is_empty() => return Ok(papers),
                        Ok(_) => debug!(source = source.name(), "no results, falling back"),
                        Err(e) => {
                            warn!(source = source.name(), error = %e, "search failed, falling back");
                            last_error = Some(e);
                        }
                    }
                }
                last_error.map_or_else(|| Ok(Vec::new()), Err)
            }
        }
    }

    async fn fetch_papers(&self, paper_ids: &[String]) -> Result<Vec<PaperDetails>, SourceError> {
        self.fetch_routed(paper_ids, |source, ids| async move {
            source.fetch_papers(&ids).await
        })
        .await
    }

    async fn fetch_papers_with_text(
        &self,
        paper_ids: &[String],
    ) -> Result<Vec<PaperDetails>, SourceError> {
        self.fetch_routed(paper_ids, |source, ids| async move {
            source.fetch_papers_with_text(&ids).await
        })
        .await
    }

    async fn get_citations(
        &self,
        paper_id: &str,
        limit: usize,
    ) -> Result<Vec<PaperRef>, SourceError> {
        self.graph_source().get_citations(paper_id, limit).await
    }

    async fn get_references(
        &self,
        paper_id: &str,
        limit: usize,
    ) -> Result<Vec<PaperRef>, SourceError> {
        self.graph_source().get_references(paper_id, limit).await
    }

    async fn extract_text(&self, pdf_url: &str) -> Result<String, SourceError> {
        self.primary().extract_text(pdf_url).await
    }
}
