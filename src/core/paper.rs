//! Paper metadata types shared by all providers.
//!
//! [`PaperRef`] is the lightweight search-result record; [`PaperDetails`]
//! additionally carries extracted full text and venue. IDs prefixed with
//! `arxiv:` identify preprints that were not resolved to a canonical
//! provider ID.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Prefix distinguishing preprint IDs from canonical provider IDs.
pub const ARXIV_ID_PREFIX: &str = "arxiv:";

/// A paper author (provider ID plus display name, both optional).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Provider-assigned author ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Lightweight search result for a paper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaperRef {
    /// Provider paper ID. Non-empty; `arxiv:`-prefixed for preprints.
    pub paper_id: String,
    /// Paper title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Abstract text.
    #[serde(default, rename = "abstract", skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    /// Authors in listed order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<Author>,
    /// Publication year.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    /// Citation count as reported by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_count: Option<u32>,
    /// Fields of study (e.g. `"Computer Science"`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields_of_study: Vec<String>,
    /// Publication types (e.g. `"JournalArticle"`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub publication_types: Vec<String>,
    /// External identifier map (e.g. `{"DOI": ..., "ArXiv": ...}`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ids: Option<BTreeMap<String, String>>,
    /// Open-access PDF URL when the provider exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_access_pdf_url: Option<String>,
}

impl PaperRef {
    /// Creates a reference with just an ID. Callers must supply a non-empty
    /// ID; an empty one is a provider mapping bug.
    #[must_use]
    pub fn new(paper_id: impl Into<String>) -> Self {
        Self {
            paper_id: paper_id.into(),
            ..Self::default()
        }
    }

    /// Returns `true` if this ID identifies an unresolved preprint.
    #[must_use]
    pub fn is_preprint(&self) -> bool {
        self.paper_id.starts_with(ARXIV_ID_PREFIX)
    }

    /// Returns the arXiv ID from either the ID prefix or `external_ids`.
    #[must_use]
    pub fn arxiv_id(&self) -> Option<&str> {
        if let Some(stripped) = self.paper_id.strip_prefix(ARXIV_ID_PREFIX) {
            return Some(stripped);
        }
        self.external_ids
            .as_ref()
            .and_then(|ids| ids.get("ArXiv"))
            .map(String::as_str)
    }

    /// Returns the DOI from `external_ids` if present.
    #[must_use]
    pub fn doi(&self) -> Option<&str> {
        self.external_ids
            .as_ref()
            .and_then(|ids| ids.get("DOI"))
            .map(String::as_str)
    }

    /// Title or a placeholder for display.
    #[must_use]
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("Untitled")
    }
}

/// A paper with full detail: the search-result fields plus venue and,
/// when extraction succeeded, full text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaperDetails {
    /// Search-result metadata.
    #[serde(flatten)]
    pub meta: PaperRef,
    /// Publication venue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    /// Extracted full text (PDF or provider-supplied).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_text: Option<String>,
}

impl PaperDetails {
    /// The provider paper ID.
    #[must_use]
    pub fn paper_id(&self) -> &str {
        &self.meta.paper_id
    }

    /// Best available content for summarization: full text, else abstract.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.full_text
            .as_deref()
            .or(self.meta.abstract_text.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

impl From<PaperRef> for PaperDetails {
    fn from(meta: PaperRef) -> Self {
        Self {
            meta,
            venue: None,
            full_text: None,
        }
    }
}

/// Search filters recognized by the paper providers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Year range string (e.g. `"2019-2023"` or `"2021"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    /// ISO partial start date (e.g. `"2020-06"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    /// ISO partial end date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    /// Restrict to these fields of study.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields_of_study: Vec<String>,
    /// Minimum citation count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_citation_count: Option<u32>,
    /// Restrict to these publication types.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub publication_types: Vec<String>,
    /// Only return papers with an open-access PDF.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub open_access_only: bool,
}

impl SearchFilters {
    /// Year range parameter in provider syntax, derived from `year` or the
    /// start/end dates (year component only).
    #[must_use]
    pub fn year_range(&self) -> Option<String> {
        if let Some(ref year) = self.year {
            return Some(year.clone());
        }
        let start = self.start_date.as_deref().map(date_year);
        let end = self.end_date.as_deref().map(date_year);
        match (start, end) {
            (Some(s), Some(e)) => Some(format!("{s}-{e}")),
            (Some(s), None) => Some(format!("{s}-")),
            (None, Some(e)) => Some(format!("-{e}")),
            (None, None) => None,
        }
    }

    /// Returns `true` when no filter is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Extracts the year component from an ISO partial date.
fn date_year(date: &str) -> &str {
    date.split('-').next().unwrap_or(date)
}
