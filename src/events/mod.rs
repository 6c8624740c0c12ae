//! Realtime event emission to an external key/value sink.
//!
//! The sink is reached through HTTP mutations at stable paths
//! (`sessions:*`, `branches:*`, `papers:*`, `summaries:*`,
//! `hypotheses:*`, `events:emit`). Emission is best-effort: a sink
//! failure is logged and the iteration proceeds.

pub mod sink;

use serde_json::{Value, json};
use tracing::warn;

use crate::core::branch::{Branch, IterationResult, ResearchHypothesis, ValidatedSummary};
use crate::core::paper::PaperDetails;
pub use sink::{EventSink, HttpEventSink, MemoryEventSink, Mutation, NullEventSink};

/// Emits research-loop events to a sink, scoped to one session.
///
/// Wraps the raw mutation interface with typed helpers that mirror the
/// loop's observable transitions. All helpers swallow sink errors after
/// logging them; event delivery never gates progress.
pub struct EventEmitter {
    sink: std::sync::Arc<dyn EventSink>,
    session_id: String,
}

impl EventEmitter {
    /// Creates an emitter for `session_id` over `sink`.
    #[must_use]
    pub fn new(sink: std::sync::Arc<dyn EventSink>, session_id: impl Into<String>) -> Self {
        Self {
            sink,
            session_id: session_id.into(),
        }
    }

    /// The session this emitter is scoped to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Fires one mutation, logging failures at warn.
    async fn mutate(&self, path: &str, args: Value) {
        if let Err(e) = self.sink.mutate(path, args).await {
            warn!(path, error = %e, "event sink mutation failed");
        }
    }

    /// Fires an `events:emit` mutation.
    async fn emit_event(&self, event_type: &str, payload: Value, branch_id: Option<&str>) {
        let mut args = json!({
            "session_id": self.session_id,
            "event_type": event_type,
            "payload": payload,
        });
        if let Some(branch_id) = branch_id {
            args["branch_id"] = Value::String(branch_id.to_string());
        }
        self.mutate("events:emit", args).await;
    }

    /// `sessions:create` at loop start.
    pub async fn session_created(&self, initial_query: &str, parameters: Option<Value>) {
        let mut args = json!({
            "session_id": self.session_id,
            "initial_query": initial_query,
        });
        if let Some(parameters) = parameters {
            args["parameters"] = parameters;
        }
        self.mutate("sessions:create", args).await;
    }

    /// `sessions:updateStatus` (`pending`, `running`, `completed`, `failed`).
    pub async fn session_status(&self, status: &str) {
        self.mutate(
            "sessions:updateStatus",
            json!({"session_id": self.session_id, "status": status}),
        )
        .await;
    }

    /// `branches:create` plus the `branch_created` event.
    pub async fn branch_created(&self, branch: &Branch) {
        let mut args = json!({
            "session_id": self.session_id,
            "branch_id": branch.id,
            "query": branch.query,
            "mode": branch.mode.to_string(),
        });
        if let Some(ref parent) = branch.parent_branch_id {
            args["parent_branch_id"] = Value::String(parent.clone());
        }
        self.mutate("branches:create", args).await;
        self.emit_event(
            "branch_created",
            json!({"query": branch.query, "mode": branch.mode.to_string()}),
            Some(&branch.id),
        )
        .await;
    }

    /// `branches:update` plus the `branch_status_changed` event.
    pub async fn branch_status_changed(&self, branch: &Branch) {
        self.mutate(
            "branches:update",
            json!({
                "branch_id": branch.id,
                "status": branch.status.to_string(),
                "context_window_used": branch.context_window_used,
                "paper_count": branch.total_papers(),
                "summary_count": branch.total_summaries(),
            }),
        )
        .await;
        self.emit_event(
            "branch_status_changed",
            json!({"status": branch.status.to_string()}),
            Some(&branch.id),
        )
        .await;
    }

    /// `papers:createBatch` plus the `papers_found` event.
    pub async fn papers_found(&self, branch_id: &str, papers: &[PaperDetails]) {
        if papers.is_empty() {
            return;
        }
        let records: Vec<Value> = papers
            .iter()
            .map(|p| {
                json!({
                    "paper_id": p.paper_id(),
                    "title": p.meta.title,
                    "year": p.meta.year,
                    "citation_count": p.meta.citation_count,
                })
            })
            .collect();
        self.mutate(
            "papers:createBatch",
            json!({"session_id": self.session_id, "branch_id": branch_id, "papers": records}),
        )
        .await;
        self.emit_event(
            "papers_found",
            json!({"count": papers.len()}),
            Some(branch_id),
        )
        .await;
    }

    /// `summaries:createBatch` plus the `summaries_validated` event.
    pub async fn summaries_validated(&self, branch_id: &str, summaries: &[ValidatedSummary]) {
        if summaries.is_empty() {
            return;
        }
        let records: Vec<Value> = summaries
            .iter()
            .map(|s| {
                json!({
                    "paper_id": s.paper_id,
                    "paper_title": s.paper_title,
                    "summary": s.summary,
                    "groundedness": s.groundedness,
                })
            })
            .collect();
        self.mutate(
            "summaries:createBatch",
            json!({"session_id": self.session_id, "branch_id": branch_id, "summaries": records}),
        )
        .await;
        self.emit_event(
            "summaries_validated",
            json!({"count": summaries.len()}),
            Some(branch_id),
        )
        .await;
    }

    /// `hypotheses:createBatch` plus the matching event (singular for one
    /// hypothesis, plural otherwise).
    pub async fn hypotheses_generated(&self, branch_id: &str, hypotheses: &[ResearchHypothesis]) {
        if hypotheses.is_empty() {
            return;
        }
        let records: Vec<Value> = hypotheses
            .iter()
            .map(|h| {
                json!({
                    "hypothesis_id": h.id,
                    "text": h.text,
                    "confidence": h.confidence,
                    "supporting_paper_ids": h.supporting_paper_ids,
                })
            })
            .collect();
        self.mutate(
            "hypotheses:createBatch",
            json!({"session_id": self.session_id, "branch_id": branch_id, "hypotheses": records}),
        )
        .await;
        let event_type = if hypotheses.len() == 1 {
            "hypothesis_generated"
        } else {
            "hypotheses_generated"
        };
        self.emit_event(
            event_type,
            json!({"count": hypotheses.len()}),
            Some(branch_id),
        )
        .await;
    }

    /// The `iteration_completed` event.
    pub async fn iteration_completed(&self, branch_id: &str, result: &IterationResult) {
        self.emit_event(
            "iteration_completed",
            json!({
                "iteration_number": result.iteration_number,
                "papers_found": result.papers_found.len(),
                "summaries": result.summaries.len(),
                "context_tokens_used": result.context_tokens_used,
            }),
            Some(branch_id),
        )
        .await;
    }

    /// Emits the full per-iteration sequence in contract order:
    /// `papers_found`, `summaries_validated`, `hypotheses_generated`,
    /// `iteration_completed`.
    pub async fn iteration_results(&self, branch_id: &str, result: &IterationResult) {
        self.papers_found(branch_id, &result.papers_found).await;
        self.summaries_validated(branch_id, &result.summaries).await;
        if let Some(ref hypotheses) = result.hypotheses {
            self.hypotheses_generated(branch_id, hypotheses).await;
        }
        self.iteration_completed(branch_id, result).await;
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}
