//! Approximate token accounting for branch context budgets.
//!
//! Without an exact tokenizer the estimator falls back to a fixed
//! characters-per-token ratio. The resulting totals are a monotone lower
//! bound on true consumption, which is all the split/stop thresholds need.

use super::branch::ValidatedSummary;
use super::paper::PaperDetails;

/// Default characters-per-token ratio for the fallback estimate.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 4.0;

/// Upper bound on paper content considered per estimate, matching the
/// truncation applied when content is presented to the summarizer.
const MAX_CONTENT_CHARS: usize = 30_000;

/// Token estimator with a configurable characters-per-token ratio.
#[derive(Debug, Clone, Copy)]
pub struct ContextEstimator {
    chars_per_token: f64,
}

impl Default for ContextEstimator {
    fn default() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

impl ContextEstimator {
    /// Creates an estimator with a custom ratio. Ratios at or below zero
    /// fall back to the default.
    #[must_use]
    pub fn new(chars_per_token: f64) -> Self {
        Self {
            chars_per_token: if chars_per_token > 0.0 {
                chars_per_token
            } else {
                DEFAULT_CHARS_PER_TOKEN
            },
        }
    }

    /// Estimates tokens for a text span.
    #[must_use]
    pub fn estimate_text(&self, text: &str) -> u64 {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let tokens = (text.len() as f64 / self.chars_per_token).ceil() as u64;
        tokens
    }

    /// Estimates tokens for the content of a paper as presented to the
    /// summarizer: title, abstract, and the truncated full-text view.
    #[must_use]
    pub fn estimate_paper(&self, paper: &PaperDetails) -> u64 {
        let mut chars = paper.meta.title.as_deref().map_or(0, str::len);
        chars += paper.meta.abstract_text.as_deref().map_or(0, str::len);
        if let Some(ref text) = paper.full_text {
            chars += text.len().min(MAX_CONTENT_CHARS);
        }
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let tokens = (chars as f64 / self.chars_per_token).ceil() as u64;
        tokens
    }

    /// Estimates tokens for an accepted summary.
    #[must_use]
    pub fn estimate_summary(&self, summary: &ValidatedSummary) -> u64 {
        self.estimate_text(&summary.summary)
    }

    /// Total estimate for one iteration's papers and summaries.
    #[must_use]
    pub fn estimate_iteration(
        &self,
        papers: &[PaperDetails],
        summaries: &[ValidatedSummary],
    ) -> u64 {
        let papers_total: u64 = papers.iter().map(|p| self.estimate_paper(p)).sum();
        let summaries_total: u64 = summaries.iter().map(|s| self.estimate_summary(s)).sum();
        papers_total + summaries_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::paper::PaperRef;
    use chrono::Utc;

    #[test]
    fn test_estimate_text_rounds_up() {
        let est = ContextEstimator::default();
        assert_eq!(est.estimate_text(""), 0);
        assert_eq!(est.estimate_text("abcd"), 1);
        assert_eq!(est.estimate_text("abcde"), 2);
    }

    #[test]
    fn test_estimate_paper_truncates_full_text() {
        let est = ContextEstimator::default();
        let mut paper = PaperDetails::from(PaperRef::new("p1"));
        paper.full_text = Some("x".repeat(100_000));
        // 30_000 chars cap / 4.0 ratio
        assert_eq!(est.estimate_paper(&paper), 7_500);
    }

    #[test]
    fn test_custom_ratio() {
        let est = ContextEstimator::new(2.0);
        assert_eq!(est.estimate_text("abcd"), 2);
        // Invalid ratio falls back to default
        let fallback = ContextEstimator::new(0.0);
        assert_eq!(fallback.estimate_text("abcd"), 1);
    }

    #[test]
    fn test_estimate_iteration_sums() {
        let est = ContextEstimator::default();
        let paper = PaperDetails::from(PaperRef {
            paper_id: "p1".to_string(),
            title: Some("abcd".to_string()),
            ..PaperRef::default()
        });
        let summary = ValidatedSummary {
            paper_id: "p1".to_string(),
            paper_title: "t".to_string(),
            summary: "abcdefgh".to_string(),
            groundedness: 0.96,
            strict: true,
            timestamp: Utc::now(),
        };
        assert_eq!(est.estimate_iteration(&[paper], &[summary]), 1 + 2);
    }
}
