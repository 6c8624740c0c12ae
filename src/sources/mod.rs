//! Paper providers: remote bibliographic APIs behind one trait.
//!
//! [`PaperSource`] is the interface the orchestration core consumes.
//! Concrete backends wrap the Semantic Scholar graph API and the arXiv
//! Atom API, each with its own rate limiter; [`composite::CompositeSource`]
//! merges several backends under a single/parallel/fallback strategy.

pub mod arxiv;
pub mod backoff;
pub mod composite;
pub mod dedup;
pub mod pdf;
pub mod semantic_scholar;

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::warn;

use crate::core::paper::{PaperDetails, PaperRef, SearchFilters};
use crate::error::SourceError;

/// Concurrent in-flight requests for batch citation/reference walks.
/// The per-provider rate limiter still serializes actual dispatch.
const BATCH_FANOUT: usize = 4;

/// Trait for remote paper providers.
#[async_trait]
pub trait PaperSource: Send + Sync {
    /// Provider name (e.g. `"semantic_scholar"`, `"arxiv"`).
    fn name(&self) -> &'static str;

    /// Searches for papers matching `query` under `filters`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] once the client's retries are exhausted or
    /// on permanent failures.
    async fn search_papers(
        &self,
        query: &str,
        filters: Option<&SearchFilters>,
        limit: usize,
    ) -> Result<Vec<PaperRef>, SourceError>;

    /// Fetches detail records for the given IDs.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] on request failure; IDs unknown to the
    /// provider are omitted from the result rather than failing the batch.
    async fn fetch_papers(&self, paper_ids: &[String]) -> Result<Vec<PaperDetails>, SourceError>;

    /// Fetches detail records with full text populated where accessible.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] on request failure. Per-paper extraction
    /// failures degrade to abstract-only records.
    async fn fetch_papers_with_text(
        &self,
        paper_ids: &[String],
    ) -> Result<Vec<PaperDetails>, SourceError>;

    /// Papers citing `paper_id`, up to `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] on request failure.
    async fn get_citations(
        &self,
        paper_id: &str,
        limit: usize,
    ) -> Result<Vec<PaperRef>, SourceError>;

    /// Papers referenced by `paper_id`, up to `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] on request failure.
    async fn get_references(
        &self,
        paper_id: &str,
        limit: usize,
    ) -> Result<Vec<PaperRef>, SourceError>;

    /// Extracts text from a PDF at `pdf_url`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Pdf`] when download or extraction fails.
    async fn extract_text(&self, pdf_url: &str) -> Result<String, SourceError>;

    /// Citations for many papers, deduplicated across the batch.
    ///
    /// Per-paper failures are logged and skipped; the batch fails only
    /// when every lookup fails.
    ///
    /// # Errors
    ///
    /// Returns the last error when no paper yielded citations
    /// successfully.
    async fn get_citations_batch(
        &self,
        paper_ids: &[String],
        limit_per_paper: usize,
    ) -> Result<Vec<PaperRef>, SourceError> {
        batch_walk(paper_ids, |id| {
            Box::pin(async move { self.get_citations(&id, limit_per_paper).await })
        })
        .await
    }

    /// References for many papers, deduplicated across the batch.
    ///
    /// # Errors
    ///
    /// Returns the last error when no paper yielded references
    /// successfully.
    async fn get_references_batch(
        &self,
        paper_ids: &[String],
        limit_per_paper: usize,
    ) -> Result<Vec<PaperRef>, SourceError> {
        batch_walk(paper_ids, |id| {
            Box::pin(async move { self.get_references(&id, limit_per_paper).await })
        })
        .await
    }
}

/// Fans a per-paper lookup across a batch with bounded concurrency,
/// merging results by paper ID and swallowing per-paper failures.
async fn batch_walk<'a, F>(paper_ids: &[String], lookup: F) -> Result<Vec<PaperRef>, SourceError>
where
    F: Fn(
        String,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Vec<PaperRef>, SourceError>> + Send + 'a>,
    >,
{
    if paper_ids.is_empty() {
        return Ok(Vec::new());
    }

    let lookup = &lookup;
    let results: Vec<(String, Result<Vec<PaperRef>, SourceError>)> =
        futures_util::stream::iter(paper_ids.to_vec().into_iter().map(move |id| {
            let lookup = lookup;
            async move {
                let id_for_result = id.clone();
                (id_for_result, lookup(id).await)
            }
        }))
        .buffer_unordered(BATCH_FANOUT)
        .collect()
        .await;

    let mut merged: indexmap::IndexMap<String, PaperRef> = indexmap::IndexMap::new();
    let mut failures = 0usize;
    let mut last_error = None;
    for (paper_id, result) in results {
        match result {
            Ok(papers) => {
                for paper in papers {
                    merged.entry(paper.paper_id.clone()).or_insert(paper);
                }
            }
            Err(e) => {
                warn!(paper_id, error = %e, "citation graph lookup failed");
                failures += 1;
                last_error = Some(e);
            }
        }
    }

    if failures == paper_ids.len()
        && let Some(e) = last_error
    {
        return Err(e);
    }
    Ok(merged.into_values().collect())
}

pub use arxiv::ArxivSource;
pub use composite::{CompositeSource, SourceStrategy};
pub use dedup::PreferredProvider;
pub use semantic_scholar::SemanticScholarSource;

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakySource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PaperSource for FlakySource {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn search_papers(
            &self,
            _query: &str,
            _filters: Option<&SearchFilters>,
            _limit: usize,
        ) -> Result<Vec<PaperRef>, SourceError> {
            Ok(Vec::new())
        }

        async fn fetch_papers(
            &self,
            _paper_ids: &[String],
        ) -> Result<Vec<PaperDetails>, SourceError> {
            Ok(Vec::new())
        }

        async fn fetch_papers_with_text(
            &self,
            _paper_ids: &[String],
        ) -> Result<Vec<PaperDetails>, SourceError> {
            Ok(Vec::new())
        }

        async fn get_citations(
            &self,
            paper_id: &str,
            _limit: usize,
        ) -> Result<Vec<PaperRef>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if paper_id == "bad" {
                return Err(SourceError::NotFound {
                    id: paper_id.to_string(),
                });
            }
            Ok(vec![
                PaperRef::new(format!("cite-of-{paper_id}")),
                PaperRef::new("shared"),
            ])
        }

        async fn get_references(
            &self,
            _paper_id: &str,
            _limit: usize,
        ) -> Result<Vec<PaperRef>, SourceError> {
            Err(SourceError::NotFound {
                id: "none".to_string(),
            })
        }

        async fn extract_text(&self, _pdf_url: &str) -> Result<String, SourceError> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn test_batch_walk_merges_and_skips_failures() {
        let source = FlakySource {
            calls: AtomicUsize::new(0),
        };
        let ids = vec!["p1".to_string(), "bad".to_string(), "p2".to_string()];
        let papers = source
            .get_citations_batch(&ids, 10)
            .await
            .unwrap_or_else(|e| panic!("batch: {e}"));

        let mut ids: Vec<&str> = papers.iter().map(|p| p.paper_id.as_str()).collect();
        ids.sort_unstable();
        // "shared" appears once despite being returned for both good papers
        assert_eq!(ids, vec!["cite-of-p1", "cite-of-p2", "shared"]);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_batch_walk_fails_when_all_fail() {
        let source = FlakySource {
            calls: AtomicUsize::new(0),
        };
        let ids = vec!["x".to_string()];
        assert!(source.get_references_batch(&ids, 10).await.is_err());
    }

    #[tokio::test]
    async fn test_batch_walk_empty_input() {
        let source = FlakySource {
            calls: AtomicUsize::new(0),
        };
        let papers = source
            .get_citations_batch(&[], 10)
            .await
            .unwrap_or_else(|e| panic!("batch: {e}"));
        assert!(papers.is_empty());
    }
}
