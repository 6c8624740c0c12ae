//! Semantic Scholar graph API client.
//!
//! API docs: <https://api.semanticscholar.org/api-docs/graph>
//! Rate limit: 10 req/s with an API key, one request per 20 s without.
//!
//! All requests go through a token-bucket limiter and an exponential
//! retry schedule; 429 responses additionally honor `Retry-After`.

use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::backoff::{MAX_RETRIES, rate_limit_delay, transient_delay};
use super::pdf;
use crate::core::paper::{Author, PaperDetails, PaperRef, SearchFilters};
use crate::error::SourceError;

const DEFAULT_BASE_URL: &str = "https://api.semanticscholar.org/graph/v1";
/// API-side maximum page size.
const MAX_PAGE_SIZE: usize = 100;
/// Per-request timeout for API calls.
const API_TIMEOUT: Duration = Duration::from_secs(30);

/// Fields requested for search results.
const SEARCH_FIELDS: &str =
    "paperId,title,abstract,authors,year,citationCount,fieldsOfStudy,publicationTypes,externalIds,openAccessPdf";
/// Fields requested for detail fetches (adds venue).
const DETAIL_FIELDS: &str =
    "paperId,title,abstract,authors,year,citationCount,fieldsOfStudy,publicationTypes,externalIds,openAccessPdf,venue";

/// Semantic Scholar paper provider.
pub struct SemanticScholarSource {
    client: reqwest::Client,
    pdf_client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl SemanticScholarSource {
    /// Creates a client. The rate limit depends on whether a key is
    /// supplied: 10 req/s with one, one request per 20 s without.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Connection`] if the HTTP clients cannot be
    /// constructed.
    pub fn new(api_key: Option<String>) -> Result<Self, SourceError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Creates a client against a custom base URL (tests, proxies).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Connection`] if the HTTP clients cannot be
    /// constructed.
    pub fn with_base_url(
        api_key: Option<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, SourceError> {
        let quota = if api_key.is_some() {
            info!("semantic scholar client using API key (10 req/s)");
            Quota::per_second(NonZeroU32::new(10).unwrap_or(NonZeroU32::MIN))
                .allow_burst(NonZeroU32::MIN)
        } else {
            warn!("no semantic scholar API key; rate limited to 1 request per 20s");
            Quota::with_period(Duration::from_secs(20)).unwrap_or_else(|| {
                Quota::per_second(NonZeroU32::MIN)
            })
        };

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
            api_key,
            base_url: base_url.into(),
            limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    /// Sends a request built by `build`, retrying transient failures.
    ///
    /// 429 waits `max(Retry-After, 10 * 2^attempt)`; 5xx and connection
    /// errors wait `2^attempt`. Other 4xx are permanent.
    async fn request_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder + Send + Sync,
    ) -> Result<reqwest::Response, SourceError> {
        let mut last_error: Option<SourceError> = None;

        for attempt in 0..MAX_RETRIES {
            self.limiter.until_ready().await;
            debug!(attempt, "semantic scholar request");

            let mut request = build();
            if let Some(ref key) = self.api_key {
                request = request.header("x-api-key", key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.as_u16() == 429 {
                        let retry_after = response
                            .headers()
                            .get(reqwest::header::RETRY_AFTER)
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .map(Duration::from_secs);
                        let delay = rate_limit_delay(attempt, retry_after);
                        warn!(attempt, delay_secs = delay.as_secs(), "rate limited (429)");
                        last_error = Some(SourceError::Http {
                            status: 429,
                            message: "rate limited".to_string(),
                        });
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    if status.is_server_error() {
                        let delay = transient_delay(attempt);
                        warn!(attempt, status = status.as_u16(), "server error, backing off");
                        last_error = Some(SourceError::Http {
                            status: status.as_u16(),
                            message: "server error".to_string(),
                        });
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(SourceError::Http {
                            status: status.as_u16(),
                            message: body.chars().take(300).collect(),
                        });
                    }
                    return Ok(response);
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    let delay = transient_delay(attempt);
                    warn!(attempt, error = %e, "connection error, backing off");
                    last_error = Some(SourceError::Connection {
                        message: e.to_string(),
                    });
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(SourceError::Connection {
                        message: e.to_string(),
                    });
                }
            }
        }

        Err(SourceError::RetriesExhausted {
            attempts: MAX_RETRIES,
            message: last_error.map_or_else(|| "unknown".to_string(), |e| e.to_string()),
        })
    }

    /// Builds filter query parameters in provider syntax.
    fn filter_params(filters: Option<&SearchFilters>) -> Vec<(String, String)> {
        let mut params = Vec::new();
        let Some(filters) = filters else {
            return params;
        };
        if let Some(year) = filters.year_range() {
            params.push(("year".to_string(), year));
        }
        if !filters.fields_of_study.is_empty() {
            params.push((
                "fieldsOfStudy".to_string(),
                filters.fields_of_study.join(","),
            ));
        }
        if let Some(min) = filters.min_citation_count {
            params.push(("minCitationCount".to_string(), min.to_string()));
        }
        if !filters.publication_types.is_empty() {
            params.push((
                "publicationTypes".to_string(),
                filters.publication_types.join(","),
            ));
        }
        if filters.open_access_only {
            params.push(("openAccessPdf".to_string(), String::new()));
        }
        params
    }

    /// Attempts full-text extraction for one record, degrading silently.
    async fn attach_full_text(&self, paper: &mut PaperDetails) {
        let Some(url) = paper.meta.open_access_pdf_url.clone() else {
            return;
        };
        match pdf::download_and_extract(&self.pdf_client, &url).await {
            Ok(text) => paper.full_text = Some(text),
            Err(e) => {
                warn!(paper_id = paper.paper_id(), error = %e, "full text unavailable");
            }
        }
    }
}

impl std::fmt::Debug for SemanticScholarSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticScholarSource")
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl super::PaperSource for SemanticScholarSource {
    fn name(&self) -> &'static str {
        "semantic_scholar"
    }

    async fn search_papers(
        &self,
        query: &str,
        filters: Option<&SearchFilters>,
        limit: usize,
    ) -> Result<Vec<PaperRef>, SourceError> {
        let limit = limit.min(MAX_PAGE_SIZE);
        let extra = Self::filter_params(filters);
        let url = format!("{}/paper/search", self.base_url);
        let query = query.to_string();

        info!(%query, limit, "searching semantic scholar");
        let response = self
            .request_with_retry(|| {
                self.client
                    .get(&url)
                    .query(&[
                        ("query", query.as_str()),
                        ("fields", SEARCH_FIELDS),
                        ("limit", &limit.to_string()),
                    ])
                    .query(&extra)
            })
            .await?;

        let parsed: SearchResponse = response.json().await.map_err(|e| SourceError::Parse {
            message: format!("search response: {e}"),
        })?;

        let papers: Vec<PaperRef> = parsed
            .data
            .unwrap_or_default()
            .into_iter()
            .filter_map(ApiPaper::into_ref)
            .collect();
        info!(
            found = papers.len(),
            total = parsed.total.unwrap_or_default(),
            "search complete"
        );
        Ok(papers)
    }

    async fn fetch_papers(&self, paper_ids: &[String]) -> Result<Vec<PaperDetails>, SourceError> {
        if paper_ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/paper/batch", self.base_url);
        let body = serde_json::json!({ "ids": paper_ids });

        let response = self
            .request_with_retry(|| {
                self.client
                    .post(&url)
                    .query(&[("fields", DETAIL_FIELDS)])
                    .json(&body)
            })
            .await?;

        // The batch endpoint returns null entries for unknown IDs.
        let parsed: Vec<Option<ApiPaper>> =
            response.json().await.map_err(|e| SourceError::Parse {
                message: format!("batch response: {e}"),
            })?;

        Ok(parsed
            .into_iter()
            .flatten()
            .filter_map(ApiPaper::into_details)
            .collect())
    }

    async fn fetch_papers_with_text(
        &self,
        paper_ids: &[String],
    ) -> Result<Vec<PaperDetails>, SourceError> {
        let mut papers = self.fetch_papers(paper_ids).await?;
        for paper in &mut papers {
            self.attach_full_text(paper).await;
        }
        Ok(papers)
    }

    async fn get_citations(
        &self,
        paper_id: &str,
        limit: usize,
    ) -> Result<Vec<PaperRef>, SourceError> {
        let url = format!("{}/paper/{}/citations", self.base_url, paper_id);
        let limit = limit.min(MAX_PAGE_SIZE);

        let response = self
            .request_with_retry(|| {
                self.client.get(&url).query(&[
                    ("fields", SEARCH_FIELDS),
                    ("limit", &limit.to_string()),
                ])
            })
            .await?;

        let parsed: GraphEdgesResponse =
            response.json().await.map_err(|e| SourceError::Parse {
                message: format!("citations response: {e}"),
            })?;

        Ok(parsed
            .data
            .unwrap_or_default()
            .into_iter()
            .filter_map(|edge| edge.citing_paper.and_then(ApiPaper::into_ref))
            .collect())
    }

    async fn get_references(
        &self,
        paper_id: &str,
        limit: usize,
    ) -> Result<Vec<PaperRef>, SourceError> {
        let url = format!("{}/paper/{}/references", self.base_url, paper_id);
        let limit = limit.min(MAX_PAGE_SIZE);

        let response = self
            .request_with_retry(|| {
                self.client.get(&url).query(&[
                    ("fields", SEARCH_FIELDS),
                    ("limit", &limit.to_string()),
                ])
            })
            .await?;

        let parsed: GraphEdgesResponse =
            response.json().await.map_err(|e| SourceError::Parse {
                message: format!("references response: {e}"),
            })?;

        Ok(parsed
            .data
            .unwrap_or_default()
            .into_iter()
            .filter_map(|edge| edge.cited_paper.and_then(ApiPaper::into_ref))
            .collect())
    }

    async fn extract_text(&self, pdf_url: &str) -> Result<String, SourceError> {
        pdf::download_and_extract(&self.pdf_client, pdf_url).await
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchResponse {
    total: Option<u64>,
    data: Option<Vec<ApiPaper>>,
}

#[derive(Debug, Deserialize)]
struct GraphEdgesResponse {
    data: Option<Vec<GraphEdge>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphEdge {
    citing_paper: Option<ApiPaper>,
    cited_paper: Option<ApiPaper>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPaper {
    paper_id: Option<String>,
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    authors: Option<Vec<ApiAuthor>>,
    year: Option<i32>,
    citation_count: Option<i64>,
    fields_of_study: Option<Vec<String>>,
    publication_types: Option<Vec<String>>,
    external_ids: Option<BTreeMap<String, serde_json::Value>>,
    open_access_pdf: Option<ApiOpenAccessPdf>,
    venue: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiAuthor {
    author_id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiOpenAccessPdf {
    url: Option<String>,
}

impl ApiPaper {
    /// Maps into a [`PaperRef`], dropping records without an ID.
    fn into_ref(self) -> Option<PaperRef> {
        let paper_id = self.paper_id.filter(|id| !id.is_empty())?;
        let external_ids = self.external_ids.map(|ids| {
            ids.into_iter()
                .map(|(k, v)| {
                    let value = v
                        .as_str()
                        .map_or_else(|| v.to_string(), ToString::to_string);
                    (k, value)
                })
                .collect()
        });
        Some(PaperRef {
            paper_id,
            title: self.title,
            abstract_text: self.abstract_text,
            authors: self
                .authors
                .unwrap_or_default()
                .into_iter()
                .map(|a| Author {
                    author_id: a.author_id,
                    name: a.name,
                })
                .collect(),
            year: self.year,
            citation_count: self
                .citation_count
                .and_then(|c| u32::try_from(c.max(0)).ok()),
            fields_of_study: self.fields_of_study.unwrap_or_default(),
            publication_types: self.publication_types.unwrap_or_default(),
            external_ids,
            open_access_pdf_url: self.open_access_pdf.and_then(|p| p.url),
        })
    }

    /// Maps into a [`PaperDetails`] (venue preserved).
    fn into_details(self) -> Option<PaperDetails> {
        let venue = self.venue.clone();
        let meta = self.into_ref()?;
        Some(PaperDetails {
            meta,
            venue,
            full_text: None,
        })
    }
}
