//! Managing agent: autonomous continue/split/wrap-up decisions.
//!
//! A reasoning model is shown a summarized branch snapshot and driven
//! through a fixed tool protocol: it may call `cluster_papers` and
//! `get_branch_context` to inspect the branch, and must terminate with
//! `make_branch_decision`. Invalid tool input is fed back as a tool
//! error so the model can correct itself within its turn budget. Every
//! failure mode (provider error, malformed input, exhausted turns)
//! degrades to a CONTINUE recommendation; the agent never crashes the
//! scheduler.
//!
//! Thresholds shown to the agent are advisory context, not forced
//! actions; only the branch manager's `should_split` forces a split,
//! and only when this agent is disabled.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::agent::dispatch::{ToolDispatcher, agentic_loop};
use crate::agent::message::{ChatRequest, system_message, user_message};
use crate::agent::tool::{ToolCall, ToolResult, ToolSet};
use crate::agent::LlmProvider;
use crate::config::ManagingAgentConfig;
use crate::core::branch::{
    Branch, BranchAction, SplitCriteria, SplitRecommendation,
};

const SYSTEM_PROMPT: &str = "You are an expert research manager supervising an automated \
literature exploration. Decide whether the branch should continue as-is, split into focused \
sub-branches, or wrap up. Inspect the branch with cluster_papers and get_branch_context as \
needed, then commit exactly one decision with make_branch_decision. Be conservative with \
splitting: recommend it only when papers cluster into 2-4 coherent directions with at least \
3 papers each. Wrap up when the direction is exhausted or context is nearly spent.";

/// A compact view of a sibling branch, shown on request.
#[derive(Debug, Clone)]
pub struct SiblingBrief {
    /// Branch ID.
    pub id: String,
    /// Branch query.
    pub query: String,
    /// Lifecycle status.
    pub status: String,
    /// Accumulated paper count.
    pub paper_count: usize,
}

/// The managing agent over one reasoning provider.
pub struct ManagingAgent {
    provider: Arc<dyn LlmProvider>,
    model: String,
    config: ManagingAgentConfig,
    evaluation_counts: Mutex<HashMap<String, usize>>,
}

impl ManagingAgent {
    /// Creates a managing agent.
    #[must_use]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        config: ManagingAgentConfig,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            config,
            evaluation_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the branch is due for a scheduled evaluation.
    ///
    /// Requires the paper floor, then one evaluation per
    /// `evaluation_interval` iterations.
    #[must_use]
    pub fn should_evaluate(&self, branch: &Branch) -> bool {
        if branch.total_papers() < self.config.min_papers_before_evaluation {
            return false;
        }
        let evaluations = self
            .evaluation_counts
            .lock()
            .map_or(0, |counts| counts.get(&branch.id).copied().unwrap_or(0));
        let since_last = branch
            .iteration_count()
            .saturating_sub(evaluations * self.config.evaluation_interval);
        since_last >= self.config.evaluation_interval
    }

    /// Evaluates a branch, returning `None` when it is not eligible.
    ///
    /// `force` bypasses the evaluation interval (used after empty
    /// iterations and on master request) but never the paper floor.
    /// `context_warning` is carried through onto the recommendation.
    pub async fn evaluate_branch(
        &self,
        branch: &Branch,
        siblings: &[SiblingBrief],
        force: bool,
        context_warning: Option<String>,
    ) -> Option<SplitRecommendation> {
        if branch.total_papers() < self.config.min_papers_before_evaluation {
            return None;
        }
        if !force && !self.should_evaluate(branch) {
            return None;
        }

        info!(branch_id = branch.id, force, "managing agent evaluating branch");
        if let Ok(mut counts) = self.evaluation_counts.lock() {
            *counts.entry(branch.id.clone()).or_insert(0) += 1;
        }

        let snapshot = BranchSnapshot::of(branch);
        let mut dispatcher = BranchToolDispatcher {
            snapshot: &snapshot,
            siblings,
            decision: None,
        };

        let mut request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                system_message(SYSTEM_PROMPT),
                user_message(&build_evaluation_prompt(&snapshot, context_warning.as_deref())),
            ],
            temperature: Some(self.config.temperature),
            max_tokens: Some(self.config.max_tokens),
            json_mode: false,
            tools: ToolSet::managing_agent_tools().definitions().to_vec(),
        };

        let outcome = agentic_loop(
            self.provider.as_ref(),
            &mut request,
            &mut dispatcher,
            self.config.max_turns,
        )
        .await;

        match (outcome, dispatcher.decision) {
            (Ok(_), Some(decision)) => {
                Some(decision.into_recommendation(context_warning))
            }
            (Ok(_), None) => {
                warn!(
                    branch_id = branch.id,
                    "managing agent answered without a decision; continuing"
                );
                Some(SplitRecommendation::continue_branch(
                    "agent returned no decision",
                    context_warning,
                ))
            }
            (Err(e), _) => {
                warn!(branch_id = branch.id, error = %e, "managing agent failed; continuing");
                Some(SplitRecommendation::continue_branch(
                    format!("agent protocol failure: {e}"),
                    context_warning,
                ))
            }
        }
    }
}

impl std::fmt::Debug for ManagingAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagingAgent")
            .field("model", &self.model)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Branch snapshot
// ---------------------------------------------------------------------------

/// Per-paper mini-record shown to the agent.
#[derive(Debug, Clone)]
struct PaperBrief {
    id: String,
    title: String,
    year: Option<i32>,
    citations: u32,
    fields: Vec<String>,
    summary_excerpt: Option<String>,
}

/// Summarized branch state the tools and prompt are built from.
#[derive(Debug, Clone)]
struct BranchSnapshot {
    branch_id: String,
    query: String,
    parent_branch_id: Option<String>,
    iteration_count: usize,
    paper_count: usize,
    context_utilization: f64,
    stalling: bool,
    field_histogram: BTreeMap<String, usize>,
    year_range: Option<(i32, i32)>,
    papers: Vec<PaperBrief>,
}

impl BranchSnapshot {
    fn of(branch: &Branch) -> Self {
        const SUMMARY_EXCERPT_CHARS: usize = 200;

        let mut field_histogram: BTreeMap<String, usize> = BTreeMap::new();
        let mut years: Vec<i32> = Vec::new();
        let mut papers = Vec::with_capacity(branch.accumulated_papers.len());

        for (id, paper) in &branch.accumulated_papers {
            if let Some(field) = paper.meta.fields_of_study.first() {
                *field_histogram.entry(field.clone()).or_insert(0) += 1;
            }
            if let Some(year) = paper.meta.year {
                years.push(year);
            }
            let summary_excerpt = branch.accumulated_summaries.get(id).map(|s| {
                s.summary.chars().take(SUMMARY_EXCERPT_CHARS).collect()
            });
            papers.push(PaperBrief {
                id: id.clone(),
                title: paper.meta.display_title().to_string(),
                year: paper.meta.year,
                citations: paper.meta.citation_count.unwrap_or(0),
                fields: paper.meta.fields_of_study.iter().take(3).cloned().collect(),
                summary_excerpt,
            });
        }

        let year_range = match (years.iter().min(), years.iter().max()) {
            (Some(&min), Some(&max)) => Some((min, max)),
            _ => None,
        };

        Self {
            branch_id: branch.id.clone(),
            query: branch.query.clone(),
            parent_branch_id: branch.parent_branch_id.clone(),
            iteration_count: branch.iteration_count(),
            paper_count: branch.total_papers(),
            context_utilization: branch.context_utilization(),
            stalling: branch.is_stalling(),
            field_histogram,
            year_range,
            papers,
        }
    }

    /// Qualitative utilization label shown alongside the ratio.
    fn utilization_label(&self) -> &'static str {
        match self.context_utilization {
            u if u >= 0.90 => "Critical",
            u if u >= 0.80 => "High",
            u if u >= 0.70 => "Moderate",
            _ => "Low",
        }
    }

    fn has_paper(&self, id: &str) -> bool {
        self.papers.iter().any(|p| p.id == id)
    }

    fn to_json(&self) -> Value {
        json!({
            "branch_id": self.branch_id,
            "query": self.query,
            "parent_branch_id": self.parent_branch_id,
            "iteration_count": self.iteration_count,
            "paper_count": self.paper_count,
            "context_utilization": self.context_utilization,
            "context_status": self.utilization_label(),
            "stalling": self.stalling,
            "field_histogram": self.field_histogram,
            "year_range": self.year_range.map(|(min, max)| json!({"min": min, "max": max})),
        })
    }
}

/// Renders the evaluation prompt from the snapshot.
fn build_evaluation_prompt(snapshot: &BranchSnapshot, context_warning: Option<&str>) -> String {
    use std::fmt::Write as _;

    let mut prompt = format!(
        "Evaluate this research branch and decide its fate.\n\n\
         ## Branch\n\
         - Query: \"{}\"\n\
         - Papers collected: {}\n\
         - Iterations completed: {}\n\
         - Context: {:.1}% used ({})\n",
        snapshot.query,
        snapshot.paper_count,
        snapshot.iteration_count,
        snapshot.context_utilization * 100.0,
        snapshot.utilization_label(),
    );
    if snapshot.stalling {
        prompt.push_str("- The frontier is stalling: recent iterations found no new papers\n");
    }
    if let Some(ref parent) = snapshot.parent_branch_id {
        let _ = writeln!(prompt, "- Parent branch: {parent}");
    }
    if let Some(warning) = context_warning {
        let _ = writeln!(prompt, "- Warning: {warning}");
    }

    let fields: Vec<String> = snapshot
        .field_histogram
        .iter()
        .map(|(field, count)| format!("{field} ({count})"))
        .collect();
    if !fields.is_empty() {
        let _ = writeln!(prompt, "- Fields: {}", fields.join(", "));
    }
    if let Some((min, max)) = snapshot.year_range {
        let _ = writeln!(prompt, "- Year range: {min}-{max}");
    }

    prompt.push_str("\n## Papers\n");
    for paper in &snapshot.papers {
        let year = paper
            .year
            .map_or_else(|| "n.d.".to_string(), |y| y.to_string());
        let _ = writeln!(
            prompt,
            "- [{}] {} ({year}) - citations: {}, fields: [{}]",
            paper.id,
            paper.title,
            paper.citations,
            paper.fields.join(", ")
        );
        if let Some(ref excerpt) = paper.summary_excerpt {
            let _ = writeln!(prompt, "  Summary: {excerpt}");
        }
    }

    prompt.push_str(
        "\nUse the tools to inspect the branch, then call make_branch_decision exactly once.",
    );
    prompt
}

// ---------------------------------------------------------------------------
// Tool dispatch
// ---------------------------------------------------------------------------

/// Dispatcher exposing the branch snapshot to the three agent tools.
struct BranchToolDispatcher<'a> {
    snapshot: &'a BranchSnapshot,
    siblings: &'a [SiblingBrief],
    decision: Option<DecisionInput>,
}

impl ToolDispatcher for BranchToolDispatcher<'_> {
    fn execute(&mut self, call: &ToolCall) -> ToolResult {
        match call.name.as_str() {
            "cluster_papers" => self.cluster_papers(call),
            "get_branch_context" => self.get_branch_context(call),
            "make_branch_decision" => self.make_branch_decision(call),
            other => ToolResult::error(&call.id, format!("unknown tool: {other}")),
        }
    }

    fn is_complete(&self) -> bool {
        self.decision.is_some()
    }
}

impl BranchToolDispatcher<'_> {
    /// `cluster_papers`: deterministic local grouping.
    fn cluster_papers(&self, call: &ToolCall) -> ToolResult {
        #[derive(Deserialize)]
        struct Args {
            criterion: String,
        }
        let args: Args = match serde_json::from_str(&call.arguments) {
            Ok(args) => args,
            Err(e) => return ToolResult::error(&call.id, format!("invalid arguments: {e}")),
        };

        let clusters = match args.criterion.as_str() {
            // Primary field of study
            "topic" => cluster_by(&self.snapshot.papers, |p| {
                p.fields.first().cloned().unwrap_or_else(|| "general".to_string())
            }),
            // Title keyword heuristic
            "methodology" => cluster_by(&self.snapshot.papers, |p| methodology_of(&p.title)),
            // Publication decade
            "time_period" => cluster_by(&self.snapshot.papers, |p| {
                p.year.map_or_else(
                    || "undated".to_string(),
                    |y| format!("{}s", (y / 10) * 10),
                )
            }),
            // Secondary field of study
            "application" => cluster_by(&self.snapshot.papers, |p| {
                p.fields
                    .get(1)
                    .or_else(|| p.fields.first())
                    .cloned()
                    .unwrap_or_else(|| "general".to_string())
            }),
            "citation_network" => {
                // Co-citation clustering needs edge data the snapshot
                // does not carry; report that rather than fabricate.
                return ToolResult::ok(
                    &call.id,
                    json!({
                        "criterion": "citation_network",
                        "clusters": [],
                        "note": "citation co-occurrence data not available; try another criterion"
                    })
                    .to_string(),
                );
            }
            other => {
                return ToolResult::error(&call.id, format!("unknown criterion: {other}"));
            }
        };

        ToolResult::ok(
            &call.id,
            json!({"criterion": args.criterion, "clusters": clusters}).to_string(),
        )
    }

    /// `get_branch_context`: local info plus optional sibling briefs.
    fn get_branch_context(&self, call: &ToolCall) -> ToolResult {
        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct Args {
            include_siblings: bool,
        }
        let args: Args = serde_json::from_str(&call.arguments).unwrap_or_default();

        let mut context = self.snapshot.to_json();
        if args.include_siblings {
            let siblings: Vec<Value> = self
                .siblings
                .iter()
                .map(|s| {
                    json!({
                        "branch_id": s.id,
                        "query": s.query,
                        "status": s.status,
                        "paper_count": s.paper_count,
                    })
                })
                .collect();
            context["siblings"] = Value::Array(siblings);
        }
        ToolResult::ok(&call.id, context.to_string())
    }

    /// `make_branch_decision`: validates and captures the terminal call.
    fn make_branch_decision(&mut self, call: &ToolCall) -> ToolResult {
        let decision: DecisionInput = match serde_json::from_str(&call.arguments) {
            Ok(decision) => decision,
            Err(e) => return ToolResult::error(&call.id, format!("invalid decision: {e}")),
        };

        if let Err(message) = decision.check(self.snapshot) {
            return ToolResult::error(&call.id, message);
        }

        self.decision = Some(decision);
        ToolResult::ok(&call.id, json!({"status": "decision recorded"}).to_string())
    }
}

/// Groups paper briefs under a key.
fn cluster_by<F>(papers: &[PaperBrief], key_of: F) -> Vec<Value>
where
    F: Fn(&PaperBrief) -> String,
{
    let mut groups: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for paper in papers {
        groups.entry(key_of(paper)).or_default().push(&paper.id);
    }
    groups
        .into_iter()
        .map(|(label, ids)| json!({"label": label, "paper_ids": ids}))
        .collect()
}

/// Title keyword heuristic for the methodology criterion.
fn methodology_of(title: &str) -> String {
    let lower = title.to_lowercase();
    for (needles, label) in [
        (&["survey", "review"][..], "survey"),
        (&["theory", "theoretical", "proof"][..], "theoretical"),
        (&["empirical", "experiment", "evaluation", "study"][..], "empirical"),
    ] {
        if needles.iter().any(|n| lower.contains(n)) {
            return label.to_string();
        }
    }
    "other".to_string()
}

// ---------------------------------------------------------------------------
// Decision payload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DecisionInput {
    action: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    split_config: Option<SplitConfigInput>,
}

#[derive(Debug, Deserialize)]
struct SplitConfigInput {
    num_branches: usize,
    #[serde(default)]
    criteria: Option<String>,
    branches: Vec<SplitBranchInput>,
}

#[derive(Debug, Deserialize)]
struct SplitBranchInput {
    label: String,
    query: String,
    #[serde(default)]
    #[allow(dead_code)]
    focus: Option<String>,
    paper_ids: Vec<String>,
}

impl DecisionInput {
    /// Validates the decision against the snapshot; the error string is
    /// fed back to the model as a tool error.
    fn check(&self, snapshot: &BranchSnapshot) -> Result<(), String> {
        match self.action.as_str() {
            "continue" | "wrap_up" => Ok(()),
            "split" => {
                let Some(ref config) = self.split_config else {
                    return Err("action 'split' requires split_config".to_string());
                };
                if config.num_branches < 2 {
                    return Err("split_config.num_branches must be at least 2".to_string());
                }
                if config.branches.len() != config.num_branches {
                    return Err(format!(
                        "split_config.branches has {} entries, expected {}",
                        config.branches.len(),
                        config.num_branches
                    ));
                }
                let unknown: Vec<&str> = config
                    .branches
                    .iter()
                    .flat_map(|b| b.paper_ids.iter())
                    .filter(|id| !snapshot.has_paper(id))
                    .map(String::as_str)
                    .collect();
                if unknown.is_empty() {
                    Ok(())
                } else {
                    Err(format!(
                        "unknown paper ids in split_config: {}",
                        unknown.join(", ")
                    ))
                }
            }
            other => Err(format!(
                "unknown action '{other}' (expected continue, split, or wrap_up)"
            )),
        }
    }

    fn into_recommendation(self, context_warning: Option<String>) -> SplitRecommendation {
        match self.action.as_str() {
            "split" => {
                let config = self.split_config.unwrap_or(SplitConfigInput {
                    num_branches: 0,
                    criteria: None,
                    branches: Vec::new(),
                });
                SplitRecommendation {
                    action: BranchAction::Split,
                    num_branches: config.num_branches,
                    paper_groups: config
                        .branches
                        .iter()
                        .map(|b| b.paper_ids.clone())
                        .collect(),
                    group_queries: config.branches.iter().map(|b| b.query.clone()).collect(),
                    group_labels: config.branches.iter().map(|b| b.label.clone()).collect(),
                    criteria: config.criteria.as_deref().map(parse_criteria),
                    reasoning: self.reasoning,
                    context_warning,
                }
            }
            "wrap_up" => SplitRecommendation::wrap_up(self.reasoning, context_warning),
            _ => SplitRecommendation::continue_branch(self.reasoning, context_warning),
        }
    }
}

/// Maps the tool-schema criteria strings onto [`SplitCriteria`].
fn parse_criteria(raw: &str) -> SplitCriteria {
    match raw {
        "by_topic" => SplitCriteria::ByTopic,
        "by_methodology" => SplitCriteria::ByMethodology,
        "by_time_period" => SplitCriteria::ByTimePeriod,
        "by_application" => SplitCriteria::ByApplication,
        "by_theoretical_framework" => SplitCriteria::ByTheoreticalFramework,
        "by_data_type" => SplitCriteria::ByDataType,
        _ => SplitCriteria::Custom,
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::agent::message::{ChatRequest as Req, ChatResponse};
    use crate::agent::providers::MockProvider;
    use crate::core::branch::{IterationResult, LoopMode};
    use crate::core::paper::{PaperDetails, PaperRef};
    use crate::error::AgentError;
    use async_trait::async_trait;
    use chrono::Utc;

    fn branch_with_papers(count: usize, iterations: usize) -> Branch {
        let mut branch = Branch::new("base query", LoopMode::SearchSummarize, None, None, 100_000);
        let per_iteration = count.div_ceil(iterations.max(1));
        let mut next = 0usize;
        for iteration in 1..=iterations.max(1) {
            let papers: Vec<PaperDetails> = (0..per_iteration)
                .filter_map(|_| {
                    if next >= count {
                        return None;
                    }
                    let i = next;
                    next += 1;
                    Some(PaperDetails::from(PaperRef {
                        paper_id: format!("p{i}"),
                        title: Some(format!("Paper {i}")),
                        year: Some(2015 + (i % 10) as i32),
                        citation_count: Some(10),
                        fields_of_study: vec![
                            if i % 2 == 0 { "Computer Science" } else { "Biology" }.to_string(),
                        ],
                        ..PaperRef::default()
                    }))
                })
                .collect();
            branch
                .add_iteration(IterationResult {
                    iteration_number: iteration,
                    papers_found: papers,
                    summaries: Vec::new(),
                    hypotheses: None,
                    context_tokens_used: 100,
                    timestamp: Utc::now(),
                })
                .unwrap_or_else(|e| panic!("add: {e}"));
        }
        branch
    }

    fn decision_call(id: &str, args: Value) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "make_branch_decision".to_string(),
            arguments: args.to_string(),
        }
    }

    fn agent(provider: MockProvider) -> ManagingAgent {
        ManagingAgent::new(
            Arc::new(provider),
            "reasoner-model",
            ManagingAgentConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_below_paper_floor_returns_none() {
        let provider = Arc::new(MockProvider::with_fallback("unused"));
        let managing = ManagingAgent::new(
            Arc::clone(&provider) as Arc<dyn LlmProvider>,
            "m",
            ManagingAgentConfig::default(),
        );
        let branch = branch_with_papers(3, 2);

        // Even forced, the paper floor holds
        let result = managing.evaluate_branch(&branch, &[], true, None).await;
        assert!(result.is_none());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_evaluation_interval() {
        let managing = agent(MockProvider::with_responses(vec![
            ChatResponse::with_tool_calls(vec![decision_call(
                "c1",
                json!({"action": "continue", "reasoning": "coherent"}),
            )]),
        ]));

        let branch = branch_with_papers(8, 2);
        assert!(managing.should_evaluate(&branch));

        let rec = managing
            .evaluate_branch(&branch, &[], false, None)
            .await
            .unwrap_or_else(|| panic!("expected recommendation"));
        assert_eq!(rec.action, BranchAction::Continue);

        // Interval not yet elapsed after the first evaluation
        assert!(!managing.should_evaluate(&branch));
        let again = managing.evaluate_branch(&branch, &[], false, None).await;
        assert!(again.is_none());

        // Force bypasses the interval
        let forced = managing.evaluate_branch(&branch, &[], true, None).await;
        assert!(forced.is_some());
    }

    #[tokio::test]
    async fn test_split_decision_round_trip() {
        let split_args = json!({
            "action": "split",
            "reasoning": "two coherent themes",
            "split_config": {
                "num_branches": 2,
                "criteria": "by_topic",
                "branches": [
                    {"label": "theory", "query": "base theory", "paper_ids": ["p0", "p2", "p4"]},
                    {"label": "empirical", "query": "base empirical", "paper_ids": ["p1", "p3", "p5"]}
                ]
            }
        });
        let managing = agent(MockProvider::with_responses(vec![
            ChatResponse::with_tool_calls(vec![decision_call("c1", split_args)]),
        ]));
        let branch = branch_with_papers(6, 2);

        let rec = managing
            .evaluate_branch(&branch, &[], false, Some("high".to_string()))
            .await
            .unwrap_or_else(|| panic!("expected recommendation"));

        assert_eq!(rec.action, BranchAction::Split);
        assert_eq!(rec.num_branches, 2);
        assert_eq!(rec.group_labels, vec!["theory", "empirical"]);
        assert_eq!(rec.criteria, Some(SplitCriteria::ByTopic));
        assert_eq!(rec.context_warning.as_deref(), Some("high"));
        assert!(rec.validate().is_ok());
    }

    #[tokio::test]
    async fn test_invalid_split_fed_back_then_corrected() {
        let bad_args = json!({
            "action": "split",
            "reasoning": "bad ids",
            "split_config": {
                "num_branches": 2,
                "criteria": "by_topic",
                "branches": [
                    {"label": "a", "query": "qa", "paper_ids": ["ghost"]},
                    {"label": "b", "query": "qb", "paper_ids": ["p1"]}
                ]
            }
        });
        let managing = agent(MockProvider::with_responses(vec![
            ChatResponse::with_tool_calls(vec![decision_call("c1", bad_args)]),
            ChatResponse::with_tool_calls(vec![decision_call(
                "c2",
                json!({"action": "wrap_up", "reasoning": "never mind"}),
            )]),
        ]));
        let branch = branch_with_papers(6, 2);

        let rec = managing
            .evaluate_branch(&branch, &[], false, None)
            .await
            .unwrap_or_else(|| panic!("expected recommendation"));
        // First decision rejected as a tool error; the corrected second
        // call lands
        assert_eq!(rec.action, BranchAction::WrapUp);
    }

    #[tokio::test]
    async fn test_cluster_tool_round_trip() {
        let managing = agent(MockProvider::with_responses(vec![
            ChatResponse::with_tool_calls(vec![ToolCall {
                id: "c1".to_string(),
                name: "cluster_papers".to_string(),
                arguments: json!({"criterion": "topic"}).to_string(),
            }]),
            ChatResponse::with_tool_calls(vec![decision_call(
                "c2",
                json!({"action": "continue", "reasoning": "one theme"}),
            )]),
        ]));
        let branch = branch_with_papers(6, 2);

        let rec = managing
            .evaluate_branch(&branch, &[], false, None)
            .await
            .unwrap_or_else(|| panic!("expected recommendation"));
        assert_eq!(rec.action, BranchAction::Continue);
    }

    #[tokio::test]
    async fn test_exhausted_turns_degrade_to_continue() {
        // The model keeps inspecting and never decides
        let responses: Vec<ChatResponse> = (0..10)
            .map(|i| {
                ChatResponse::with_tool_calls(vec![ToolCall {
                    id: format!("c{i}"),
                    name: "get_branch_context".to_string(),
                    arguments: "{}".to_string(),
                }])
            })
            .collect();
        let managing = agent(MockProvider::with_responses(responses));
        let branch = branch_with_papers(6, 2);

        let rec = managing
            .evaluate_branch(&branch, &[], false, Some("critical".to_string()))
            .await
            .unwrap_or_else(|| panic!("expected recommendation"));
        assert_eq!(rec.action, BranchAction::Continue);
        assert_eq!(rec.context_warning.as_deref(), Some("critical"));
    }

    #[tokio::test]
    async fn test_provider_error_degrades_to_continue() {
        struct FailingProvider;

        #[async_trait]
        impl LlmProvider for FailingProvider {
            fn name(&self) -> &'static str {
                "failing"
            }
            async fn chat(&self, _request: &Req) -> Result<ChatResponse, AgentError> {
                Err(AgentError::ApiRequest {
                    message: "boom".to_string(),
                    status: Some(500),
                })
            }
        }

        let managing = ManagingAgent::new(
            Arc::new(FailingProvider),
            "m",
            ManagingAgentConfig::default(),
        );
        let branch = branch_with_papers(6, 2);
        let rec = managing
            .evaluate_branch(&branch, &[], false, None)
            .await
            .unwrap_or_else(|| panic!("expected recommendation"));
        assert_eq!(rec.action, BranchAction::Continue);
        assert!(rec.reasoning.contains("agent protocol failure"));
    }

    #[tokio::test]
    async fn test_plain_text_answer_degrades_to_continue() {
        let managing = agent(MockProvider::with_responses(vec![ChatResponse::text(
            "I think it should split, probably.",
        )]));
        let branch = branch_with_papers(6, 2);
        let rec = managing
            .evaluate_branch(&branch, &[], false, None)
            .await
            .unwrap_or_else(|| panic!("expected recommendation"));
        assert_eq!(rec.action, BranchAction::Continue);
    }

    #[test]
    fn test_snapshot_contents() {
        let branch = branch_with_papers(6, 3);
        let snapshot = BranchSnapshot::of(&branch);
        assert_eq!(snapshot.paper_count, 6);
        assert_eq!(snapshot.iteration_count, 3);
        assert_eq!(snapshot.field_histogram.get("Computer Science"), Some(&3));
        assert_eq!(snapshot.field_histogram.get("Biology"), Some(&3));
        assert!(snapshot.year_range.is_some());
        assert!(!snapshot.stalling);
        assert_eq!(snapshot.utilization_label(), "Low");
    }

    #[test]
    fn test_prompt_mentions_warning_and_papers() {
        let branch = branch_with_papers(5, 1);
        let snapshot = BranchSnapshot::of(&branch);
        let prompt = build_evaluation_prompt(&snapshot, Some("high: consider splitting"));
        assert!(prompt.contains("high: consider splitting"));
        assert!(prompt.contains("[p0] Paper 0"));
        assert!(prompt.contains("make_branch_decision"));
    }
}
