//! Query planning: turn a raw research query into a search plan.
//!
//! An optional LLM pass extracts key concepts, a time window, paper
//! targets and alternative phrasings before the first iteration runs.
//! The plan only shapes search inputs; parse failures degrade to a
//! heuristic plan built from the query text itself.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::agent::{LlmProvider, complete};
use crate::core::paper::SearchFilters;
use crate::error::AgentError;

const PLANNER_SYSTEM_PROMPT: &str = "You are a research librarian planning a literature search. \
Extract the key concepts, a sensible publication window, and useful alternative phrasings for \
the query. Respond with a JSON object matching: {\"key_concepts\": [\"...\"], \
\"time_range_start\": null, \"time_range_end\": null, \"initial_paper_target\": 20, \
\"diversity_dimensions\": [\"...\"], \"saturation_threshold\": 0.8, \
\"alternative_queries\": [\"...\"], \"exclusion_terms\": [\"...\"], \
\"required_fields_of_study\": [\"...\"]}.";

/// A search plan for one research loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchPlan {
    /// Key concepts driving the search (at least one).
    pub key_concepts: Vec<String>,
    /// Earliest publication year to consider.
    pub time_range_start: Option<i32>,
    /// Latest publication year to consider.
    pub time_range_end: Option<i32>,
    /// How many papers the first iteration should target.
    pub initial_paper_target: usize,
    /// Dimensions along which coverage should stay diverse.
    pub diversity_dimensions: Vec<String>,
    /// What counts as saturation for this query.
    pub saturation_criteria: Vec<String>,
    /// Saturation threshold in `[0, 1]`.
    pub saturation_threshold: f64,
    /// Alternative query phrasings worth trying.
    pub alternative_queries: Vec<String>,
    /// Terms that indicate an irrelevant result.
    pub exclusion_terms: Vec<String>,
    /// Fields of study the search should be restricted to.
    pub required_fields_of_study: Vec<String>,
}

impl Default for SearchPlan {
    fn default() -> Self {
        Self {
            key_concepts: Vec::new(),
            time_range_start: None,
            time_range_end: None,
            initial_paper_target: 20,
            diversity_dimensions: Vec::new(),
            saturation_criteria: Vec::new(),
            saturation_threshold: 0.8,
            alternative_queries: Vec::new(),
            exclusion_terms: Vec::new(),
            required_fields_of_study: Vec::new(),
        }
    }
}

impl SearchPlan {
    /// A heuristic plan derived from the query text alone.
    #[must_use]
    pub fn heuristic(query: &str) -> Self {
        let key_concepts: Vec<String> = query
            .split_whitespace()
            .filter(|w| w.len() > 3)
            .take(6)
            .map(str::to_lowercase)
            .collect();
        Self {
            key_concepts: if key_concepts.is_empty() {
                vec![query.to_lowercase()]
            } else {
                key_concepts
            },
            ..Self::default()
        }
    }

    /// Folds the plan's time window into search filters, leaving
    /// explicitly-set filter fields alone.
    #[must_use]
    pub fn apply_to_filters(&self, filters: Option<SearchFilters>) -> Option<SearchFilters> {
        let (Some(start), Some(end)) = (self.time_range_start, self.time_range_end) else {
            return filters;
        };
        let mut filters = filters.unwrap_or_default();
        if filters.year.is_none() && filters.start_date.is_none() && filters.end_date.is_none() {
            filters.year = Some(format!("{start}-{end}"));
        }
        if filters.fields_of_study.is_empty() {
            filters.fields_of_study = self.required_fields_of_study.clone();
        }
        Some(filters)
    }

    /// Plan invariants: at least one concept, threshold in range,
    /// target at least one paper.
    fn sanitize(mut self, query: &str) -> Self {
        if self.key_concepts.is_empty() {
            self.key_concepts = Self::heuristic(query).key_concepts;
        }
        self.initial_paper_target = self.initial_paper_target.max(1);
        self.saturation_threshold = self.saturation_threshold.clamp(0.0, 1.0);
        self
    }
}

/// LLM-backed query planner.
pub struct QueryPlanner {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl QueryPlanner {
    /// Creates a planner over the summarizer model.
    #[must_use]
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Plans a search for `query`, degrading to the heuristic plan when
    /// the model's output cannot be parsed.
    ///
    /// # Errors
    ///
    /// Propagates provider errors ([`AgentError`]); callers that prefer
    /// a plan at any cost can fall back to [`SearchPlan::heuristic`].
    pub async fn plan(&self, query: &str) -> Result<SearchPlan, AgentError> {
        let prompt = format!("Plan a literature search for this query:\n\n{query}");
        let response = complete(
            self.provider.as_ref(),
            &self.model,
            PLANNER_SYSTEM_PROMPT,
            &prompt,
            0.2,
            Some(1024),
        )
        .await?;

        Ok(parse_plan(&response).map_or_else(
            || {
                warn!("query planner output unparseable, using heuristic plan");
                SearchPlan::heuristic(query)
            },
            |plan| plan.sanitize(query),
        ))
    }
}

impl std::fmt::Debug for QueryPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryPlanner")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Best-effort plan extraction: fenced or bare JSON, embedded object.
fn parse_plan(content: &str) -> Option<SearchPlan> {
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

    if let Ok(plan) = serde_json::from_str::<SearchPlan>(json_str) {
        return Some(plan);
    }
    let start = json_str.find('{')?;
    let end = json_str.rfind('}')?;
    (start < end)
        .then(|| serde_json::from_str::<SearchPlan>(&json_str[start..=end]).ok())
        .flatten()
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::agent::message::ChatResponse;
    use crate::agent::providers::MockProvider;

    fn planner(response: &str) -> QueryPlanner {
        QueryPlanner::new(
            Arc::new(MockProvider::with_responses(vec![ChatResponse::text(
                response,
            )])),
            "summarizer-model",
        )
    }

    #[tokio::test]
    async fn test_plan_parses_model_output() {
        let response = r#"{
            "key_concepts": ["attention", "transformers"],
            "time_range_start": 2017,
            "time_range_end": 2024,
            "initial_paper_target": 15,
            "alternative_queries": ["self-attention architectures"],
            "saturation_threshold": 0.75
        }"#;
        let plan = planner(response)
            .plan("transformer attention mechanisms")
            .await
            .unwrap_or_else(|e| panic!("plan: {e}"));

        assert_eq!(plan.key_concepts, vec!["attention", "transformers"]);
        assert_eq!(plan.time_range_start, Some(2017));
        assert_eq!(plan.initial_paper_target, 15);
        assert_eq!(plan.alternative_queries.len(), 1);
    }

    #[tokio::test]
    async fn test_garbage_degrades_to_heuristic() {
        let plan = planner("I cannot plan this.")
            .plan("graph neural network robustness")
            .await
            .unwrap_or_else(|e| panic!("plan: {e}"));
        assert!(plan.key_concepts.contains(&"graph".to_string()));
        assert!(plan.key_concepts.contains(&"robustness".to_string()));
        assert_eq!(plan.initial_paper_target, 20);
    }

    #[tokio::test]
    async fn test_sanitize_clamps_bad_values() {
        let response = r#"{"key_concepts": [], "initial_paper_target": 0, "saturation_threshold": 3.0}"#;
        let plan = planner(response)
            .plan("quantum error correction")
            .await
            .unwrap_or_else(|e| panic!("plan: {e}"));
        assert!(!plan.key_concepts.is_empty());
        assert_eq!(plan.initial_paper_target, 1);
        assert!((plan.saturation_threshold - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_apply_to_filters_respects_explicit_settings() {
        let plan = SearchPlan {
            time_range_start: Some(2015),
            time_range_end: Some(2020),
            required_fields_of_study: vec!["Computer Science".to_string()],
            ..SearchPlan::default()
        };

        // No filters: plan supplies the window
        let filters = plan.apply_to_filters(None).unwrap_or_default();
        assert_eq!(filters.year.as_deref(), Some("2015-2020"));
        assert_eq!(filters.fields_of_study, vec!["Computer Science"]);

        // Explicit year wins over the plan
        let explicit = SearchFilters {
            year: Some("2022".to_string()),
            ..SearchFilters::default()
        };
        let filters = plan.apply_to_filters(Some(explicit)).unwrap_or_default();
        assert_eq!(filters.year.as_deref(), Some("2022"));
    }

    #[test]
    fn test_no_window_passes_filters_through() {
        let plan = SearchPlan::default();
        assert!(plan.apply_to_filters(None).is_none());
    }
}
