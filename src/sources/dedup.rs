//! Duplicate detection for multi-provider search results.
//!
//! Two records are the same paper when any rule matches, in order:
//! same normalized arXiv ID, same DOI, or title similarity above 0.9
//! with matching year and overlapping author set.

use std::collections::HashSet;

use tracing::debug;

use crate::core::paper::PaperRef;

/// Title similarity threshold for the fuzzy rule.
const TITLE_SIMILARITY_THRESHOLD: f64 = 0.9;

/// Which provider's record wins when duplicates collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferredProvider {
    /// Prefer canonical records (citation counts, graph access).
    SemanticScholar,
    /// Prefer preprints (guaranteed PDF).
    Arxiv,
}

/// Normalizes a title for comparison.
fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Similarity ratio between two titles via character-bigram Dice
/// coefficient on the normalized forms.
#[must_use]
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_title(a);
    let b = normalize_title(b);
    if a == b {
        return 1.0;
    }

    let bigrams = |s: &str| -> Vec<(char, char)> {
        let chars: Vec<char> = s.chars().collect();
        chars.windows(2).map(|w| (w[0], w[1])).collect()
    };
    let a_grams = bigrams(&a);
    let b_grams = bigrams(&b);
    if a_grams.is_empty() || b_grams.is_empty() {
        return 0.0;
    }

    let mut b_pool = b_grams.clone();
    let mut matches = 0usize;
    for gram in &a_grams {
        if let Some(pos) = b_pool.iter().position(|g| g == gram) {
            b_pool.swap_remove(pos);
            matches += 1;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let similarity = 2.0 * matches as f64 / (a_grams.len() + b_grams.len()) as f64;
    similarity
}

/// Whether two papers share at least one author name.
///
/// Unknown author sets are treated as overlapping so the fuzzy rule can
/// still fire on title + year alone.
fn authors_overlap(a: &PaperRef, b: &PaperRef) -> bool {
    let names = |p: &PaperRef| -> HashSet<String> {
        p.authors
            .iter()
            .filter_map(|a| a.name.as_ref())
            .map(|n| n.to_lowercase())
            .collect()
    };
    let a_names = names(a);
    let b_names = names(b);
    if a_names.is_empty() || b_names.is_empty() {
        return true;
    }
    !a_names.is_disjoint(&b_names)
}

/// Determines whether two records describe the same paper.
#[must_use]
pub fn is_duplicate(a: &PaperRef, b: &PaperRef) -> bool {
    if let (Some(arxiv_a), Some(arxiv_b)) = (a.arxiv_id(), b.arxiv_id())
        && normalize_arxiv_id(arxiv_a) == normalize_arxiv_id(arxiv_b)
    {
        return true;
    }

    if let (Some(doi_a), Some(doi_b)) = (a.doi(), b.doi())
        && doi_a.eq_ignore_ascii_case(doi_b)
    {
        return true;
    }

    if let (Some(title_a), Some(title_b)) = (a.title.as_deref(), b.title.as_deref()) {
        return title_similarity(title_a, title_b) > TITLE_SIMILARITY_THRESHOLD
            && a.year == b.year
            && a.year.is_some()
            && authors_overlap(a, b);
    }

    false
}

/// Strips the version suffix (`1706.03762v7` -> `1706.03762`).
fn normalize_arxiv_id(id: &str) -> &str {
    id.split_once('v').map_or(id, |(base, rest)| {
        if rest.chars().all(|c| c.is_ascii_digit()) {
            base
        } else {
            id
        }
    })
}

/// Whether `new` should replace `existing` under the preference.
const fn should_prefer(new_is_preprint: bool, existing_is_preprint: bool, prefer: PreferredProvider) -> bool {
    match prefer {
        PreferredProvider::SemanticScholar => !new_is_preprint && existing_is_preprint,
        PreferredProvider::Arxiv => new_is_preprint && !existing_is_preprint,
    }
}

/// Deduplicates merged multi-provider results, keeping the preferred
/// provider's record when duplicates collide.
#[must_use]
pub fn deduplicate_papers(papers: Vec<PaperRef>, prefer: PreferredProvider) -> Vec<PaperRef> {
    let input_len = papers.len();
    let mut unique: Vec<PaperRef> = Vec::with_capacity(input_len);

    for paper in papers {
        let duplicate_of = unique.iter().position(|existing| is_duplicate(&paper, existing));
        match duplicate_of {
            Some(index) => {
                if should_prefer(paper.is_preprint(), unique[index].is_preprint(), prefer) {
                    debug!(
                        kept = paper.paper_id,
                        dropped = unique[index].paper_id,
                        "replaced duplicate with preferred provider record"
                    );
                    unique[index] = paper;
                }
            }
            None => unique.push(paper),
        }
    }

    debug!(before = input_len, after = unique.len(), "deduplicated papers");
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::paper::Author;
    use std::collections::BTreeMap;

    fn with_arxiv(paper_id: &str, arxiv: &str) -> PaperRef {
        let mut p = PaperRef::new(paper_id);
        let mut ids = BTreeMap::new();
        ids.insert("ArXiv".to_string(), arxiv.to_string());
        p.external_ids = Some(ids);
        p
    }

    fn titled(paper_id: &str, title: &str, year: i32, author: &str) -> PaperRef {
        PaperRef {
            paper_id: paper_id.to_string(),
            title: Some(title.to_string()),
            year: Some(year),
            authors: vec![Author {
                author_id: None,
                name: Some(author.to_string()),
            }],
            ..PaperRef::default()
        }
    }

    #[test]
    fn test_duplicate_by_arxiv_id_with_version() {
        let canonical = with_arxiv("ss-id", "1706.03762");
        let preprint = PaperRef::new("arxiv:1706.03762v7");
        assert!(is_duplicate(&canonical, &preprint));
    }

    #[test]
    fn test_duplicate_by_doi() {
        let mut a = PaperRef::new("a");
        let mut b = PaperRef::new("b");
        let mut ids = BTreeMap::new();
        ids.insert("DOI".to_string(), "10.1000/XYZ".to_string());
        a.external_ids = Some(ids.clone());
        ids.insert("DOI".to_string(), "10.1000/xyz".to_string());
        b.external_ids = Some(ids);
        assert!(is_duplicate(&a, &b));
    }

    #[test]
    fn test_duplicate_by_title_year_authors() {
        let a = titled("a", "Attention Is All You Need", 2017, "Ashish Vaswani");
        let b = titled("b", "Attention is all you  need", 2017, "ashish vaswani");
        assert!(is_duplicate(&a, &b));

        let different_year = titled("c", "Attention Is All You Need", 2018, "Ashish Vaswani");
        assert!(!is_duplicate(&a, &different_year));

        let different_title = titled("d", "Convolutional Sequence Learning", 2017, "Ashish Vaswani");
        assert!(!is_duplicate(&a, &different_title));
    }

    #[test]
    fn test_title_similarity_bounds() {
        assert!((title_similarity("same title", "same title") - 1.0).abs() < f64::EPSILON);
        assert!(title_similarity("abc", "xyz") < 0.1);
        let near = title_similarity(
            "Attention Is All You Need",
            "Attention Is All You Need!",
        );
        assert!(near > 0.9, "got {near}");
    }

    #[test]
    fn test_dedup_prefers_canonical() {
        let canonical = with_arxiv("ss-id", "2101.00001");
        let preprint = PaperRef::new("arxiv:2101.00001");
        let out = deduplicate_papers(
            vec![preprint.clone(), canonical.clone()],
            PreferredProvider::SemanticScholar,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].paper_id, "ss-id");

        let out = deduplicate_papers(
            vec![canonical, preprint],
            PreferredProvider::Arxiv,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].paper_id, "arxiv:2101.00001");
    }

    #[test]
    fn test_dedup_keeps_distinct_papers() {
        let out = deduplicate_papers(
            vec![
                titled("a", "Graph Networks", 2020, "A"),
                titled("b", "Diffusion Models", 2021, "B"),
            ],
            PreferredProvider::SemanticScholar,
        );
        assert_eq!(out.len(), 2);
    }
}
