//! arXiv search client using the arXiv Atom API.
//!
//! API docs: <https://info.arxiv.org/help/api/index.html>
//! Rate limit: one request per 3 seconds.
//!
//! arXiv exposes no citation graph, so [`PaperSource::get_citations`] and
//! [`PaperSource::get_references`] return empty sets; the composite
//! provider routes graph walks to a provider that has one.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use regex::Regex;
use tracing::{debug, info, warn};

use super::pdf;
use crate::core::paper::{ARXIV_ID_PREFIX, Author, PaperDetails, PaperRef, SearchFilters};
use crate::error::SourceError;
use crate::sources::PaperSource;

const ARXIV_API_URL: &str = "http://export.arxiv.org/api/query";
/// Minimum interval between requests.
const REQUEST_INTERVAL: Duration = Duration::from_secs(3);
/// Per-request timeout for API calls.
const API_TIMEOUT: Duration = Duration::from_secs(30);

/// arXiv paper provider.
pub struct ArxivSource {
    client: reqwest::Client,
    pdf_client: reqwest::Client,
    limiter: Arc<DefaultDirectRateLimiter>,
    /// Optional category restriction (e.g. `cs.LG`), ANDed into queries.
    categories: Vec<String>,
}

impl ArxivSource {
    /// Creates a client with the mandated 3-second request interval.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Connection`] if the HTTP clients cannot be
    /// constructed.
    pub fn new(categories: Vec<String>) -> Result<Self, SourceError> {
        let quota = Quota::with_period(REQUEST_INTERVAL)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::MIN);

        let client = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .map_err(|e| SourceError::Connection {
                message: format!("failed to build http client: {e}"),
            })?;

        Ok(Self {
            client,
            pdf_client: pdf::download_client().map_err(|e| SourceError::Connection {
                message: e.to_string(),
            })?,
            limiter: Arc::new(RateLimiter::direct(quota)),
            categories,
        })
    }

    /// Builds the `search_query` expression: free text, optional category
    /// restriction, optional submission-date window from the filters.
    fn build_search_query(&self, query: &str, filters: Option<&SearchFilters>) -> String {
        let mut parts = vec![format!("all:{query}")];

        if !self.categories.is_empty() {
            let cats: Vec<String> = self
                .categories
                .iter()
                .map(|c| format!("cat:{c}"))
                .collect();
            parts.push(format!("({})", cats.join(" OR ")));
        }

        if let Some(filters) = filters
            && let Some(range) = filters.year_range()
        {
            let (start, end) = parse_year_range(&range);
            parts.push(format!(
                "submittedDate:[{start}01010000 TO {end}12312359]"
            ));
        }

        parts.join(" AND ")
    }

    /// Fetches and parses one Atom query.
    async fn query_feed(&self, params: &[(&str, String)]) -> Result<Vec<PaperRef>, SourceError> {
        self.limiter.until_ready().await;

        let response = self
            .client
            .get(ARXIV_API_URL)
            .query(params)
            .send()
            .await
            .map_err(|e| SourceError::Connection {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Http {
                status: status.as_u16(),
                message: format!("arxiv request failed with {status}"),
            });
        }

        let xml = response.text().await.map_err(|e| SourceError::Connection {
            message: e.to_string(),
        })?;
        parse_atom_feed(&xml)
    }
}

impl std::fmt::Debug for ArxivSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArxivSource")
            .field("categories", &self.categories)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PaperSource for ArxivSource {
    fn name(&self) -> &'static str {
        "arxiv"
    }

    async fn search_papers(
        &self,
        query: &str,
        filters: Option<&SearchFilters>,
        limit: usize,
    ) -> Result<Vec<PaperRef>, SourceError> {
        let search_query = self.build_search_query(query, filters);
        debug!(%search_query, "arxiv query");

        let papers = self
            .query_feed(&[
                ("search_query", search_query),
                ("start", "0".to_string()),
                ("max_results", limit.to_string()),
                ("sortBy", "relevance".to_string()),
                ("sortOrder", "descending".to_string()),
            ])
            .await?;

        info!(found = papers.len(), "arxiv search complete");
        Ok(papers)
    }

    async fn fetch_papers(&self, paper_ids: &[String]) -> Result<Vec<PaperDetails>, SourceError> {
        if paper_ids.is_empty() {
            return Ok(Vec::new());
        }
        let bare_ids: Vec<&str> = paper_ids
            .iter()
            .map(|id| id.strip_prefix(ARXIV_ID_PREFIX).unwrap_or(id))
            .collect();

        let papers = self
            .query_feed(&[
                ("id_list", bare_ids.join(",")),
                ("max_results", bare_ids.len().to_string()),
            ])
            .await?;

        Ok(papers.into_iter().map(PaperDetails::from).collect())
    }

    async fn fetch_papers_with_text(
        &self,
        paper_ids: &[String],
    ) -> Result<Vec<PaperDetails>, SourceError> {
        let mut papers = self.fetch_papers(paper_ids).await?;
        for paper in &mut papers {
            let Some(url) = paper.meta.open_access_pdf_url.clone() else {
                continue;
            };
            match pdf::download_and_extract(&self.pdf_client, &url).await {
                Ok(text) => paper.full_text = Some(text),
                Err(e) => {
                    warn!(paper_id = paper.paper_id(), error = %e, "full text unavailable");
                }
            }
        }
        Ok(papers)
    }

    async fn get_citations(
        &self,
        _paper_id: &str,
        _limit: usize,
    ) -> Result<Vec<PaperRef>, SourceError> {
        // arXiv has no citation endpoint
        Ok(Vec::new())
    }

    async fn get_references(
        &self,
        _paper_id: &str,
        _limit: usize,
    ) -> Result<Vec<PaperRef>, SourceError> {
        Ok(Vec::new())
    }

    async fn extract_text(&self, pdf_url: &str) -> Result<String, SourceError> {
        pdf::download_and_extract(&self.pdf_client, pdf_url).await
    }
}

// ---------------------------------------------------------------------------
// Atom feed parsing
// ---------------------------------------------------------------------------

/// Parses an arXiv Atom feed into paper references.
fn parse_atom_feed(xml: &str) -> Result<Vec<PaperRef>, SourceError> {
    let entry_pattern =
        Regex::new(r"(?s)<entry>(.*?)</entry>").map_err(|e| SourceError::Parse {
            message: e.to_string(),
        })?;

    let mut papers = Vec::new();
    for entry in entry_pattern.captures_iter(xml) {
        let Some(entry_xml) = entry.get(1).map(|m| m.as_str()) else {
            continue;
        };

        let id_url = extract_field(entry_xml, "id").unwrap_or_default();
        let bare_id = id_url
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        if bare_id.is_empty() {
            continue;
        }

        let title = extract_field(entry_xml, "title").map(collapse_whitespace);
        let abstract_text = extract_field(entry_xml, "summary").map(collapse_whitespace);
        let year = extract_field(entry_xml, "published")
            .and_then(|d| d.get(..4).and_then(|y| y.parse::<i32>().ok()));
        let categories = extract_categories(entry_xml);
        let doi = extract_field(entry_xml, "arxiv:doi");

        let mut external_ids = std::collections::BTreeMap::new();
        external_ids.insert("ArXiv".to_string(), bare_id.clone());
        if let Some(doi) = doi {
            external_ids.insert("DOI".to_string(), doi);
        }

        papers.push(PaperRef {
            paper_id: format!("{ARXIV_ID_PREFIX}{bare_id}"),
            title,
            abstract_text,
            authors: extract_authors(entry_xml),
            year,
            citation_count: None,
            fields_of_study: categories,
            publication_types: vec!["Preprint".to_string()],
            external_ids: Some(external_ids),
            open_access_pdf_url: Some(format!("https://arxiv.org/pdf/{bare_id}.pdf")),
        });
    }

    if papers.is_empty()
        && !xml.contains("<entry>")
        && let Some(title) = extract_field(xml, "title")
        && title.contains("Error")
    {
        return Err(SourceError::Http {
            status: 400,
            message: format!("arxiv error: {title}"),
        });
    }

    Ok(papers)
}

/// Extracts a single XML field, handling optional namespace prefixes.
fn extract_field(xml: &str, tag: &str) -> Option<String> {
    let pattern = format!(r"(?s)<{tag}[^>]*>(.*?)</{tag}>");
    Regex::new(&pattern)
        .ok()?
        .captures(xml)?
        .get(1)
        .map(|m| m.as_str().trim().to_string())
}

/// Extracts author display names from `<author><name>` elements.
fn extract_authors(xml: &str) -> Vec<Author> {
    let Ok(author_pattern) = Regex::new(r"(?s)<author>(.*?)</author>") else {
        return Vec::new();
    };
    author_pattern
        .captures_iter(xml)
        .filter_map(|cap| {
            let inner = cap.get(1)?.as_str();
            let name = extract_field(inner, "name")?;
            Some(Author {
                author_id: None,
                name: Some(name),
            })
        })
        .collect()
}

/// Extracts `<category term="...">` values.
fn extract_categories(xml: &str) -> Vec<String> {
    let Ok(pattern) = Regex::new(r#"<category term="([^"]+)""#) else {
        return Vec::new();
    };
    pattern
        .captures_iter(xml)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Collapses newlines and runs of spaces left by Atom pretty-printing.
fn collapse_whitespace(text: String) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits `"2019-2023"` / `"2021"` / `"-2020"` into a closed year window.
fn parse_year_range(range: &str) -> (String, String) {
    match range.split_once('-') {
        Some((start, end)) => (
            if start.is_empty() { "1900" } else { start }.to_string(),
            if end.is_empty() { "2100" } else { end }.to_string(),
        ),
        None => (range.to_string(), range.to_string()),
    }
}
