//! Summarize-and-validate: generate a summary, gate it on groundedness.
//!
//! The overseer runs up to two attempts per paper, prepending stricter
//! guidance on the retry, and accepts at two thresholds: the strict bar
//! (with zero NLI contradictions) ends the loop early; otherwise the
//! best attempt is salvaged at a looser floor. Papers whose best attempt
//! stays under the floor are dropped, which is a validation outcome,
//! not an error.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::agent::{LlmProvider, complete};
use crate::config::OverseerConfig;
use crate::core::branch::ValidatedSummary;
use crate::core::paper::PaperDetails;
use crate::halugate::HaluGate;

/// Content cap presented to the summarizer.
const MAX_CONTENT_CHARS: usize = 30_000;

/// Summarizer sampling temperature.
const SUMMARY_TEMPERATURE: f32 = 0.3;

const SUMMARY_SYSTEM_PROMPT: &str = "You are a research assistant. Summarize the given academic \
paper concisely. Focus on: main contribution, methodology, key findings, and limitations. Be \
precise and technical. Output 3-5 sentences.";

const RETRY_GUIDANCE: &str = "Only include claims directly supported by the provided paper \
content. Prefer omission over speculation. Be precise and factual.";

/// Generate-validate-retry engine over one summarizer and one gate.
pub struct Overseer {
    provider: Arc<dyn LlmProvider>,
    model: String,
    halugate: Arc<dyn HaluGate>,
    strict_threshold: f64,
    loose_threshold: f64,
    max_attempts: u32,
}

impl Overseer {
    /// Creates an overseer with explicit thresholds.
    #[must_use]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        halugate: Arc<dyn HaluGate>,
        strict_threshold: f64,
        loose_threshold: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            halugate,
            strict_threshold,
            loose_threshold,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Creates a stand-alone overseer from its config section. The
    /// research loop uses [`Overseer::new`] with its own stricter bar.
    #[must_use]
    pub fn from_config(
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        halugate: Arc<dyn HaluGate>,
        config: &OverseerConfig,
    ) -> Self {
        Self::new(
            provider,
            model,
            halugate,
            config.groundedness_threshold,
            0.70,
            config.max_retries,
        )
    }

    /// Summarizes one paper, returning `None` when no attempt reached
    /// the loose floor or the paper has no content.
    ///
    /// Per-attempt provider and gate failures are logged and treated as
    /// failed attempts rather than propagated.
    pub async fn summarize_and_validate(&self, paper: &PaperDetails) -> Option<ValidatedSummary> {
        let Some(context) = paper.content() else {
            warn!(paper_id = paper.paper_id(), "no content to summarize");
            return None;
        };
        let question = format!("Summarize the paper: {}", paper.meta.display_title());

        let mut best: Option<(String, f64)> = None;

        for attempt in 1..=self.max_attempts {
            let guidance = (attempt > 1).then_some(RETRY_GUIDANCE);
            let prompt = build_summary_prompt(paper, guidance);

            let summary_text = match complete(
                self.provider.as_ref(),
                &self.model,
                SUMMARY_SYSTEM_PROMPT,
                &prompt,
                SUMMARY_TEMPERATURE,
                None,
            )
            .await
            {
                Ok(text) if !text.trim().is_empty() => text,
                Ok(_) => {
                    warn!(paper_id = paper.paper_id(), attempt, "empty summary");
                    continue;
                }
                Err(e) => {
                    warn!(paper_id = paper.paper_id(), attempt, error = %e, "summarization failed");
                    continue;
                }
            };

            let report = match self
                .halugate
                .validate(context, &question, &summary_text)
                .await
            {
                Ok(report) => report,
                Err(e) => {
                    warn!(paper_id = paper.paper_id(), attempt, error = %e, "validation failed");
                    continue;
                }
            };
            let groundedness = self.halugate.compute_groundedness(&report, &summary_text);
            debug!(
                paper_id = paper.paper_id(),
                attempt,
                groundedness,
                contradictions = report.nli_contradictions,
                "summary validated"
            );

            if best.as_ref().is_none_or(|(_, g)| groundedness > *g) {
                best = Some((summary_text.clone(), groundedness));
            }

            if groundedness >= self.strict_threshold && report.nli_contradictions == 0 {
                return Some(ValidatedSummary {
                    paper_id: paper.paper_id().to_string(),
                    paper_title: paper.meta.display_title().to_string(),
                    summary: summary_text,
                    groundedness,
                    strict: true,
                    timestamp: Utc::now(),
                });
            }
        }

        // Salvage the best attempt at the looser floor
        match best {
            Some((summary, groundedness)) if groundedness >= self.loose_threshold => {
                warn!(
                    paper_id = paper.paper_id(),
                    groundedness,
                    strict_threshold = self.strict_threshold,
                    "accepting summary below the strict threshold"
                );
                Some(ValidatedSummary {
                    paper_id: paper.paper_id().to_string(),
                    paper_title: paper.meta.display_title().to_string(),
                    summary,
                    groundedness,
                    strict: false,
                    timestamp: Utc::now(),
                })
            }
            Some((_, groundedness)) => {
                warn!(
                    paper_id = paper.paper_id(),
                    best_groundedness = groundedness,
                    "summary failed validation on every attempt"
                );
                None
            }
            None => None,
        }
    }
}

impl std::fmt::Debug for Overseer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Overseer")
            .field("model", &self.model)
            .field("strict_threshold", &self.strict_threshold)
            .field("loose_threshold", &self.loose_threshold)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

/// Builds the summarization prompt: metadata, truncated content, and
/// optional retry guidance.
#[must_use]
pub fn build_summary_prompt(paper: &PaperDetails, guidance: Option<&str>) -> String {
    let content = paper.content().unwrap_or_default();
    let truncated: String = content.chars().take(MAX_CONTENT_CHARS).collect();
    let truncation_note = if content.chars().count() > MAX_CONTENT_CHARS {
        "\n\n[Content truncated...]"
    } else {
        ""
    };

    let authors: Vec<&str> = paper
        .meta
        .authors
        .iter()
        .take(5)
        .map(|a| a.name.as_deref().unwrap_or("Unknown"))
        .collect();
    let year = paper
        .meta
        .year
        .map_or_else(|| "n.d.".to_string(), |y| y.to_string());
    let guidance_section = guidance.map_or_else(String::new, |g| format!("\n\nGuidance: {g}"));

    format!(
        "Paper: {}\nAuthors: {}\nYear: {year}\n\nContent:\n{truncated}{truncation_note}{guidance_section}\n\nProvide a concise summary.",
        paper.meta.display_title(),
        authors.join(", "),
    )
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::agent::message::ChatResponse;
    use crate::agent::providers::MockProvider;
    use crate::core::paper::PaperRef;
    use crate::halugate::MockHaluGate;

    fn paper_with_abstract() -> PaperDetails {
        PaperDetails::from(PaperRef {
            paper_id: "p1".to_string(),
            title: Some("A Study".to_string()),
            abstract_text: Some("We study the thing in depth.".to_string()),
            ..PaperRef::default()
        })
    }

    fn summary_text() -> String {
        "The paper studies the thing and finds results. ".repeat(4)
    }

    fn overseer(
        provider: MockProvider,
        gate: MockHaluGate,
    ) -> (Overseer, Arc<MockProvider>) {
        let provider = Arc::new(provider);
        let overseer = Overseer::new(
            Arc::clone(&provider) as Arc<dyn LlmProvider>,
            "summarizer-model",
            Arc::new(gate),
            0.95,
            0.70,
            2,
        );
        (overseer, provider)
    }

    #[tokio::test]
    async fn test_strict_acceptance_on_first_attempt() {
        let (overseer, provider) = overseer(
            MockProvider::with_responses(vec![ChatResponse::text(summary_text())]),
            MockHaluGate::with_outcomes(vec![(0.97, 0)]),
        );

        let summary = overseer
            .summarize_and_validate(&paper_with_abstract())
            .await
            .unwrap_or_else(|| panic!("expected acceptance"));
        assert!(summary.strict);
        assert!(summary.groundedness >= 0.95);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_with_guidance_then_strict() {
        let (overseer, provider) = overseer(
            MockProvider::with_responses(vec![
                ChatResponse::text(summary_text()),
                ChatResponse::text(summary_text()),
            ]),
            MockHaluGate::with_outcomes(vec![(0.50, 2), (0.96, 0)]),
        );

        let summary = overseer
            .summarize_and_validate(&paper_with_abstract())
            .await
            .unwrap_or_else(|| panic!("expected acceptance"));
        assert!(summary.strict);
        assert_eq!(provider.call_count(), 2);

        // Second attempt carries the stricter guidance
        let requests = provider.requests();
        let second_prompt = &requests[1].messages[1].content;
        assert!(second_prompt.contains("omission over speculation"));
        assert!(!requests[0].messages[1].content.contains("omission"));
    }

    #[tokio::test]
    async fn test_loose_salvage_of_best_attempt() {
        let (overseer, provider) = overseer(
            MockProvider::with_responses(vec![
                ChatResponse::text(summary_text()),
                ChatResponse::text(summary_text()),
            ]),
            MockHaluGate::with_outcomes(vec![(0.82, 0), (0.75, 0)]),
        );

        let summary = overseer
            .summarize_and_validate(&paper_with_abstract())
            .await
            .unwrap_or_else(|| panic!("expected loose acceptance"));
        assert!(!summary.strict);
        assert!((summary.groundedness - 0.82).abs() < 0.02);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_contradictions_block_strict_acceptance() {
        let (overseer, _) = overseer(
            MockProvider::with_fallback(summary_text()),
            MockHaluGate::with_outcomes(vec![(0.96, 1), (0.96, 2)]),
        );

        let summary = overseer
            .summarize_and_validate(&paper_with_abstract())
            .await
            .unwrap_or_else(|| panic!("expected loose acceptance"));
        // High groundedness but contradictions: salvaged loose, not strict
        assert!(!summary.strict);
    }

    #[tokio::test]
    async fn test_rejection_below_loose_floor() {
        let (overseer, _) = overseer(
            MockProvider::with_fallback(summary_text()),
            MockHaluGate::with_outcomes(vec![(0.40, 3), (0.55, 1)]),
        );
        assert!(
            overseer
                .summarize_and_validate(&paper_with_abstract())
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_no_content_short_circuits() {
        let (overseer, provider) = overseer(
            MockProvider::with_fallback(summary_text()),
            MockHaluGate::default(),
        );
        let empty = PaperDetails::from(PaperRef::new("empty"));
        assert!(overseer.summarize_and_validate(&empty).await.is_none());
        assert_eq!(provider.call_count(), 0);
    }

    #[test]
    fn test_prompt_truncation_note() {
        let mut paper = paper_with_abstract();
        paper.full_text = Some("y".repeat(40_000));
        let prompt = build_summary_prompt(&paper, None);
        assert!(prompt.contains("[Content truncated...]"));

        let short = paper_with_abstract();
        assert!(!build_summary_prompt(&short, None).contains("[Content truncated...]"));
    }

    #[test]
    fn test_from_config_uses_overseer_threshold() {
        let config = OverseerConfig::default();
        let overseer = Overseer::from_config(
            Arc::new(MockProvider::with_fallback("s")),
            "m",
            Arc::new(MockHaluGate::default()),
            &config,
        );
        assert!((overseer.strict_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(overseer.max_attempts, 2);
    }
}
