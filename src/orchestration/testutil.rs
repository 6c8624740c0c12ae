//! Shared test doubles for orchestration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::core::paper::{PaperDetails, PaperRef, SearchFilters};
use crate::error::SourceError;
use crate::sources::PaperSource;

/// Builds a search-result record with the fields the loops care about.
pub(crate) fn paper_ref(id: &str, title: &str, year: i32, citations: u32, field: &str) -> PaperRef {
    PaperRef {
        paper_id: id.to_string(),
        title: Some(title.to_string()),
        abstract_text: Some(format!("Abstract of {title}.")),
        year: Some(year),
        citation_count: Some(citations),
        fields_of_study: vec![field.to_string()],
        ..PaperRef::default()
    }
}

/// Paper source replaying scripted results.
///
/// Each `search_papers` call pops the next scripted result set (empty
/// once exhausted). Detail fetches echo the requested IDs back as
/// records unless `fail_details` is set. Citation and reference walks
/// read fixed per-paper maps.
#[derive(Default)]
pub(crate) struct ScriptedSource {
    pub searches: Mutex<VecDeque<Vec<PaperRef>>>,
    pub citations: HashMap<String, Vec<PaperRef>>,
    pub references: HashMap<String, Vec<PaperRef>>,
    pub fail_details: bool,
    pub fail_search: bool,
    pub search_calls: AtomicUsize,
}

impl ScriptedSource {
    pub(crate) fn with_searches(searches: Vec<Vec<PaperRef>>) -> Self {
        Self {
            searches: Mutex::new(searches.into()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl PaperSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn search_papers(
        &self,
        _query: &str,
        _filters: Option<&SearchFilters>,
        _limit: usize,
    ) -> Result<Vec<PaperRef>, SourceError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_search {
            return Err(SourceError::RetriesExhausted {
                attempts: 7,
                message: "scripted failure".to_string(),
            });
        }
        Ok(self
            .searches
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_default())
    }

    async fn fetch_papers(&self, paper_ids: &[String]) -> Result<Vec<PaperDetails>, SourceError> {
        if self.fail_details {
            return Err(SourceError::Http {
                status: 400,
                message: "details unavailable".to_string(),
            });
        }
        Ok(paper_ids
            .iter()
            .map(|id| {
                let mut details =
                    PaperDetails::from(paper_ref(id, &format!("Title {id}"), 2020, 10, "CS"));
                details.venue = Some("Test Venue".to_string());
                details
            })
            .collect())
    }

    async fn fetch_papers_with_text(
        &self,
        paper_ids: &[String],
    ) -> Result<Vec<PaperDetails>, SourceError> {
        let mut papers = self.fetch_papers(paper_ids).await?;
        for paper in &mut papers {
            paper.full_text = Some(format!("Full text of {}.", paper.paper_id()));
        }
        Ok(papers)
    }

    async fn get_citations(
        &self,
        paper_id: &str,
        limit: usize,
    ) -> Result<Vec<PaperRef>, SourceError> {
        let mut papers = self.citations.get(paper_id).cloned().unwrap_or_default();
        papers.truncate(limit);
        Ok(papers)
    }

    async fn get_references(
        &self,
        paper_id: &str,
        limit: usize,
    ) -> Result<Vec<PaperRef>, SourceError> {
        let mut papers = self.references.get(paper_id).cloned().unwrap_or_default();
        papers.truncate(limit);
        Ok(papers)
    }

    async fn extract_text(&self, _pdf_url: &str) -> Result<String, SourceError> {
        Ok("extracted text".to_string())
    }
}
