//! Hallucination gate: groundedness scoring for candidate summaries.
//!
//! The detector models themselves live behind a remote service; this
//! module defines the [`HaluGate`] trait the orchestration core consumes,
//! an HTTP backend, and a scripted mock for tests and offline runs.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HaluGateError;

/// Severity of a hallucinated span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Minor embellishment.
    Low,
    /// Unsupported claim.
    Medium,
    /// Contradicts the source.
    High,
}

/// A span of the answer flagged as unsupported by the context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HallucinatedSpan {
    /// The flagged text.
    pub text: String,
    /// How severe the detector judged it.
    pub severity: Severity,
}

/// Detector output for one (context, question, answer) triple.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Whether the detector recommends a fact-check pass.
    #[serde(default)]
    pub fact_check_needed: bool,
    /// Whether any hallucination was detected.
    #[serde(default)]
    pub hallucination_detected: bool,
    /// Flagged spans.
    #[serde(default)]
    pub hallucinated_spans: Vec<HallucinatedSpan>,
    /// Highest severity across spans.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_severity: Option<Severity>,
    /// Number of NLI contradictions between answer and context.
    #[serde(default)]
    pub nli_contradictions: u32,
}

/// Trait for hallucination gate backends.
///
/// Stateless across summarization workers; implementations must be safe
/// to share without locking.
#[async_trait]
pub trait HaluGate: Send + Sync {
    /// Validates `answer` against `context` for `question`.
    ///
    /// # Errors
    ///
    /// Returns [`HaluGateError`] when the backend is unreachable or its
    /// response cannot be parsed.
    async fn validate(
        &self,
        context: &str,
        question: &str,
        answer: &str,
    ) -> Result<ValidationReport, HaluGateError>;

    /// Computes a groundedness score in `[0, 1]` from a report.
    ///
    /// The default scores by unflagged coverage: the fraction of the
    /// answer not covered by hallucinated spans.
    fn compute_groundedness(&self, report: &ValidationReport, answer: &str) -> f64 {
        if answer.is_empty() {
            return 0.0;
        }
        let flagged: usize = report.hallucinated_spans.iter().map(|s| s.text.len()).sum();
        #[allow(clippy::cast_precision_loss)]
        let score = 1.0 - (flagged.min(answer.len()) as f64 / answer.len() as f64);
        score.clamp(0.0, 1.0)
    }
}

/// HTTP backend posting to a validation service.
#[derive(Debug)]
pub struct HttpHaluGate {
    client: reqwest::Client,
    url: String,
}

impl HttpHaluGate {
    /// Creates a gate pointing at `url` (the service's validate endpoint).
    ///
    /// # Errors
    ///
    /// Returns [`HaluGateError::Unavailable`] if the HTTP client cannot
    /// be constructed.
    pub fn new(url: impl Into<String>) -> Result<Self, HaluGateError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| HaluGateError::Unavailable {
                message: format!("failed to build http client: {e}"),
            })?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[derive(Debug, Serialize)]
struct ValidateBody<'a> {
    context: &'a str,
    question: &'a str,
    answer: &'a str,
}

#[async_trait]
impl HaluGate for HttpHaluGate {
    async fn validate(
        &self,
        context: &str,
        question: &str,
        answer: &str,
    ) -> Result<ValidationReport, HaluGateError> {
        let response = self
            .client
            .post(&self.url)
            .json(&ValidateBody {
                context,
                question,
                answer,
            })
            .send()
            .await
            .map_err(|e| HaluGateError::Unavailable {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HaluGateError::Http {
                status: status.as_u16(),
                message: body.chars().take(300).collect(),
            });
        }

        response
            .json::<ValidationReport>()
            .await
            .map_err(|e| HaluGateError::Parse {
                message: e.to_string(),
            })
    }
}

/// Scripted mock gate.
///
/// Each call pops a `(groundedness, nli_contradictions)` outcome and
/// fabricates a report whose default groundedness computation recovers
/// the requested score (one flagged span covering the right fraction of
/// the answer). After the script is exhausted every answer validates
/// perfectly.
#[derive(Debug, Default)]
pub struct MockHaluGate {
    outcomes: Mutex<VecDeque<(f64, u32)>>,
}

impl MockHaluGate {
    /// A gate replaying the given `(groundedness, contradictions)` script.
    #[must_use]
    pub fn with_outcomes(outcomes: Vec<(f64, u32)>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
        }
    }
}

#[async_trait]
impl HaluGate for MockHaluGate {
    async fn validate(
        &self,
        _context: &str,
        _question: &str,
        answer: &str,
    ) -> Result<ValidationReport, HaluGateError> {
        let outcome = self
            .outcomes
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front());
        let (groundedness, contradictions) = outcome.unwrap_or((1.0, 0));

        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let flagged_len = ((1.0 - groundedness.clamp(0.0, 1.0)) * answer.len() as f64).round() as usize;

        let hallucinated_spans = if flagged_len == 0 {
            Vec::new()
        } else {
            vec![HallucinatedSpan {
                text: answer.chars().take(flagged_len).collect(),
                severity: if groundedness < 0.7 {
                    Severity::High
                } else {
                    Severity::Medium
                },
            }]
        };

        Ok(ValidationReport {
            fact_check_needed: !hallucinated_spans.is_empty(),
            hallucination_detected: !hallucinated_spans.is_empty(),
            max_severity: hallucinated_spans.iter().map(|s| s.severity).max(),
            hallucinated_spans,
            nli_contradictions: contradictions,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_gate_recovers_scores() {
        let gate = MockHaluGate::with_outcomes(vec![(0.97, 0), (0.82, 1)]);
        let answer = "a".repeat(200);

        let first = gate
            .validate("ctx", "q", &answer)
            .await
            .unwrap_or_else(|e| panic!("validate: {e}"));
        let g1 = gate.compute_groundedness(&first, &answer);
        assert!((g1 - 0.97).abs() < 0.01, "got {g1}");
        assert_eq!(first.nli_contradictions, 0);

        let second = gate
            .validate("ctx", "q", &answer)
            .await
            .unwrap_or_else(|e| panic!("validate: {e}"));
        let g2 = gate.compute_groundedness(&second, &answer);
        assert!((g2 - 0.82).abs() < 0.01, "got {g2}");
        assert_eq!(second.nli_contradictions, 1);

        // Script exhausted: perfect validation
        let third = gate
            .validate("ctx", "q", &answer)
            .await
            .unwrap_or_else(|e| panic!("validate: {e}"));
        assert!((gate.compute_groundedness(&third, &answer) - 1.0).abs() < f64::EPSILON);
        assert!(!third.hallucination_detected);
    }

    #[tokio::test]
    async fn test_groundedness_of_empty_answer_is_zero() {
        let gate = MockHaluGate::default();
        let report = gate
            .validate("ctx", "q", "")
            .await
            .unwrap_or_else(|e| panic!("validate: {e}"));
        assert!((gate.compute_groundedness(&report, "") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_report_deserializes_with_defaults() {
        let report: ValidationReport = serde_json::from_str("{}")
            .unwrap_or_else(|e| panic!("deserialize: {e}"));
        assert!(!report.hallucination_detected);
        assert_eq!(report.nli_contradictions, 0);
        assert!(report.hallucinated_spans.is_empty());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
    }
}
