//! Hypothesis generation from validated summaries.
//!
//! In hypothesis mode, the iteration's accepted summaries are presented
//! to the summarizer model, which proposes research hypotheses each tied
//! to its supporting papers. Parsing is best-effort; hypotheses that
//! cannot be tied to at least one known paper are dropped.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::agent::{LlmProvider, complete};
use crate::core::branch::{ResearchHypothesis, ValidatedSummary};
use crate::error::AgentError;

const HYPOTHESIS_SYSTEM_PROMPT: &str = "You are a research strategist. Given validated paper \
summaries, propose concrete, testable research hypotheses that connect or extend the findings. \
Every hypothesis must cite the supporting papers by their IDs. Respond with a JSON object: \
{\"hypotheses\": [{\"text\": \"...\", \"supporting_paper_ids\": [\"...\"], \"confidence\": 0.0}]}.";

/// Generates hypotheses for a branch from its accepted summaries.
pub struct HypothesisGenerator {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl HypothesisGenerator {
    /// Creates a generator over the summarizer model.
    #[must_use]
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Proposes hypotheses grounded in `summaries`.
    ///
    /// Returns an empty list when there are no summaries to reason over.
    ///
    /// # Errors
    ///
    /// Propagates provider errors; parse failures yield an empty list.
    pub async fn generate(
        &self,
        summaries: &[ValidatedSummary],
        branch_id: &str,
    ) -> Result<Vec<ResearchHypothesis>, AgentError> {
        if summaries.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = build_hypothesis_prompt(summaries);
        let response = complete(
            self.provider.as_ref(),
            &self.model,
            HYPOTHESIS_SYSTEM_PROMPT,
            &prompt,
            0.5,
            Some(2048),
        )
        .await?;

        let known_ids: HashSet<&str> = summaries.iter().map(|s| s.paper_id.as_str()).collect();
        let hypotheses = parse_hypotheses(&response, &known_ids, branch_id);
        debug!(
            branch_id,
            count = hypotheses.len(),
            "hypotheses generated"
        );
        Ok(hypotheses)
    }
}

impl std::fmt::Debug for HypothesisGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HypothesisGenerator")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Builds the prompt listing every summary with its paper ID.
fn build_hypothesis_prompt(summaries: &[ValidatedSummary]) -> String {
    use std::fmt::Write as _;
    let mut prompt = String::from(
        "Propose research hypotheses connecting or extending these validated summaries.\n\n",
    );
    for summary in summaries {
        let _ = writeln!(
            prompt,
            "[{}] {}\n{}\n",
            summary.paper_id, summary.paper_title, summary.summary
        );
    }
    prompt
}

#[derive(Debug, Deserialize)]
struct HypothesisPayload {
    hypotheses: Vec<RawHypothesis>,
}

#[derive(Debug, Deserialize)]
struct RawHypothesis {
    text: String,
    #[serde(default)]
    supporting_paper_ids: Vec<String>,
    #[serde(default)]
    confidence: f64,
}

/// Parses the model's hypothesis list, keeping only hypotheses that cite
/// at least one known paper ID.
fn parse_hypotheses(
    content: &str,
    known_ids: &HashSet<&str>,
    branch_id: &str,
) -> Vec<ResearchHypothesis> {
    let raw = extract_raw_hypotheses(content);
    let mut hypotheses = Vec::with_capacity(raw.len());
    for candidate in raw {
        let supporting: Vec<String> = candidate
            .supporting_paper_ids
            .into_iter()
            .filter(|id| known_ids.contains(id.as_str()))
            .collect();
        if candidate.text.trim().is_empty() || supporting.is_empty() {
            warn!(branch_id, "dropping hypothesis without known supporting papers");
            continue;
        }
        if let Ok(hypothesis) =
            ResearchHypothesis::new(candidate.text, supporting, candidate.confidence, branch_id)
        {
            hypotheses.push(hypothesis);
        }
    }
    hypotheses
}

/// Best-effort extraction: fenced JSON, wrapper object, or bare array.
fn extract_raw_hypotheses(content: &str) -> Vec<RawHypothesis> {
    let trimmed = content.trim();
    let json_str = if trimmed.starts_with("```") {
        trimmed
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
    } else {
        trimmed
    };

    if let Ok(payload) = serde_json::from_str::<HypothesisPayload>(json_str) {
        return payload.hypotheses;
    }
    if let Ok(list) = serde_json::from_str::<Vec<RawHypothesis>>(json_str) {
        return list;
    }
    if let (Some(start), Some(end)) = (json_str.find('{'), json_str.rfind('}'))
        && start < end
        && let Ok(payload) = serde_json::from_str::<HypothesisPayload>(&json_str[start..=end])
    {
        return payload.hypotheses;
    }
    warn!("failed to parse hypothesis response");
    Vec::new()
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::agent::message::ChatResponse;
    use crate::agent::providers::MockProvider;
    use chrono::Utc;

    fn summaries() -> Vec<ValidatedSummary> {
        ["p1", "p2"]
            .iter()
            .map(|id| ValidatedSummary {
                paper_id: (*id).to_string(),
                paper_title: format!("Title {id}"),
                summary: format!("Summary of {id}."),
                groundedness: 0.96,
                strict: true,
                timestamp: Utc::now(),
            })
            .collect()
    }

    fn generator(response: &str) -> HypothesisGenerator {
        HypothesisGenerator::new(
            Arc::new(MockProvider::with_responses(vec![ChatResponse::text(
                response,
            )])),
            "summarizer-model",
        )
    }

    #[tokio::test]
    async fn test_generates_from_wrapper_object() {
        let response = r#"{"hypotheses": [
            {"text": "X causes Y", "supporting_paper_ids": ["p1", "p2"], "confidence": 0.8},
            {"text": "Z moderates X", "supporting_paper_ids": ["p2"], "confidence": 0.6}
        ]}"#;
        let hypotheses = generator(response)
            .generate(&summaries(), "b1")
            .await
            .unwrap_or_else(|e| panic!("generate: {e}"));

        assert_eq!(hypotheses.len(), 2);
        assert_eq!(hypotheses[0].supporting_paper_ids, vec!["p1", "p2"]);
        assert_eq!(hypotheses[0].source_branch_id, "b1");
        assert!((hypotheses[1].confidence - 0.6).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_unknown_supporting_ids_filtered() {
        let response = r#"{"hypotheses": [
            {"text": "Good", "supporting_paper_ids": ["p1", "bogus"], "confidence": 0.7},
            {"text": "All unknown", "supporting_paper_ids": ["bogus"], "confidence": 0.9}
        ]}"#;
        let hypotheses = generator(response)
            .generate(&summaries(), "b1")
            .await
            .unwrap_or_else(|e| panic!("generate: {e}"));

        assert_eq!(hypotheses.len(), 1);
        assert_eq!(hypotheses[0].supporting_paper_ids, vec!["p1"]);
    }

    #[tokio::test]
    async fn test_fenced_array_accepted() {
        let response = "```json\n[{\"text\": \"H\", \"supporting_paper_ids\": [\"p2\"], \"confidence\": 1.4}]\n```";
        let hypotheses = generator(response)
            .generate(&summaries(), "b1")
            .await
            .unwrap_or_else(|e| panic!("generate: {e}"));
        assert_eq!(hypotheses.len(), 1);
        // Confidence clamped into range
        assert!((hypotheses[0].confidence - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_garbage_yields_empty() {
        let hypotheses = generator("I have no ideas.")
            .generate(&summaries(), "b1")
            .await
            .unwrap_or_else(|e| panic!("generate: {e}"));
        assert!(hypotheses.is_empty());
    }

    #[tokio::test]
    async fn test_no_summaries_short_circuits() {
        let provider = Arc::new(MockProvider::with_fallback("unused"));
        let generator = HypothesisGenerator::new(
            Arc::clone(&provider) as Arc<dyn LlmProvider>,
            "m",
        );
        let hypotheses = generator
            .generate(&[], "b1")
            .await
            .unwrap_or_else(|e| panic!("generate: {e}"));
        assert!(hypotheses.is_empty());
        assert_eq!(provider.call_count(), 0);
    }
}
