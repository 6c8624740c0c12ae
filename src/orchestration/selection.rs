//! Agent-driven candidate pruning.
//!
//! When search returns more candidates than the working limit, the
//! summarizer model is shown a numbered list and asked for a structured
//! selection. Model output is parsed best-effort: strict JSON first,
//! then loose references like "paper 3" or "#5". A parse failure never
//! kills the iteration; the earliest candidates stand in.

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::agent::{LlmProvider, complete};
use crate::core::paper::PaperDetails;
use crate::error::AgentError;

/// Minimum selection size the agent must produce.
pub const MIN_SELECTION: usize = 3;

/// Abstract excerpt length in the candidate listing.
const ABSTRACT_EXCERPT_CHARS: usize = 300;

/// Bound on the existing-context block appended to the prompt.
const MAX_CONTEXT_CHARS: usize = 4_000;

const SELECTION_SYSTEM_PROMPT: &str = "You are a research assistant choosing which papers to \
read in depth. Prefer papers that are relevant to the query, methodologically diverse, and not \
redundant with already-summarized work. Respond with a JSON object: \
{\"selected\": [<1-based paper numbers>], \"reasoning\": \"...\"}.";

/// Picks a working subset of `candidates` using the summarizer model.
///
/// Returns 0-based indices into `candidates`, between [`MIN_SELECTION`]
/// and `max_select` entries (bounded by the candidate count).
///
/// # Errors
///
/// Propagates provider errors; parse problems degrade to the first-N
/// fallback instead of erroring.
pub async fn select_papers(
    provider: &dyn LlmProvider,
    model: &str,
    query: &str,
    candidates: &[PaperDetails],
    existing_context: Option<&str>,
    max_select: usize,
) -> Result<Vec<usize>, AgentError> {
    let prompt = build_selection_prompt(query, candidates, existing_context, max_select);
    let response = complete(provider, model, SELECTION_SYSTEM_PROMPT, &prompt, 0.2, Some(1024)).await?;

    let indices = parse_selection(&response, candidates.len(), max_select);
    debug!(selected = indices.len(), candidates = candidates.len(), "paper selection");
    Ok(indices)
}

/// Builds the numbered candidate listing with optional prior context.
#[must_use]
pub fn build_selection_prompt(
    query: &str,
    candidates: &[PaperDetails],
    existing_context: Option<&str>,
    max_select: usize,
) -> String {
    use std::fmt::Write as _;

    let mut prompt = format!(
        "Research query: {query}\n\nSelect between {MIN_SELECTION} and {max_select} papers \
         from the candidates below.\n\n## Candidates\n"
    );

    for (i, paper) in candidates.iter().enumerate() {
        let number = i + 1;
        let title = paper.meta.display_title();
        let year = paper
            .meta
            .year
            .map_or_else(|| "n.d.".to_string(), |y| y.to_string());
        let citations = paper.meta.citation_count.unwrap_or(0);
        let fields = paper.meta.fields_of_study.join(", ");
        let _ = writeln!(
            prompt,
            "{number}. {title} ({year}) - citations: {citations}, fields: [{fields}]"
        );
        if let Some(abstract_text) = paper.meta.abstract_text.as_deref() {
            let excerpt: String = abstract_text.chars().take(ABSTRACT_EXCERPT_CHARS).collect();
            let _ = writeln!(prompt, "   {excerpt}");
        }
    }

    if let Some(context) = existing_context.filter(|c| !c.is_empty()) {
        let bounded: String = context.chars().take(MAX_CONTEXT_CHARS).collect();
        let _ = write!(
            prompt,
            "\n## Already summarized in this branch\n{bounded}\n\nAvoid papers redundant \
             with the above."
        );
    }

    prompt
}

#[derive(Debug, Deserialize)]
struct SelectionPayload {
    #[serde(alias = "papers", alias = "indices")]
    selected: Vec<usize>,
}

/// Parses a selection response into 0-based candidate indices.
///
/// Accepts (a) a JSON object with a `selected` array (fenced or bare),
/// (b) a bare JSON array, (c) loose textual references ("paper 3",
/// "#5"). Out-of-range and duplicate numbers are dropped. Fewer than
/// [`MIN_SELECTION`] parsed indices are padded with the earliest
/// unselected candidates; an empty parse falls back to the first
/// `max_select` candidates outright.
#[must_use]
pub fn parse_selection(content: &str, candidate_count: usize, max_select: usize) -> Vec<usize> {
    if candidate_count == 0 {
        return Vec::new();
    }
    let limit = max_select.min(candidate_count).max(1);

    let mut numbers = parse_json_selection(content)
        .unwrap_or_else(|| parse_loose_references(content));

    // 1-based -> 0-based, in range, deduplicated preserving order
    let mut seen = std::collections::HashSet::new();
    numbers.retain(|&n| n >= 1 && n <= candidate_count && seen.insert(n));
    let mut indices: Vec<usize> = numbers.into_iter().map(|n| n - 1).collect();
    indices.truncate(limit);

    if indices.is_empty() {
        warn!("selection parse produced no indices, using first candidates");
        return (0..limit).collect();
    }

    // Pad up to the minimum with the earliest unselected candidates
    let floor = MIN_SELECTION.min(limit);
    if indices.len() < floor {
        let chosen: std::collections::HashSet<usize> = indices.iter().copied().collect();
        for i in 0..candidate_count {
            if indices.len() >= floor {
                break;
            }
            if !chosen.contains(&i) {
                indices.push(i);
            }
        }
    }

    indices
}

/// Strict parse: fenced or bare JSON object/array of numbers.
fn parse_json_selection(content: &str) -> Option<Vec<usize>> {
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

    if let Ok(payload) = serde_json::from_str::<SelectionPayload>(json_str) {
        return Some(payload.selected);
    }
    if let Ok(numbers) = serde_json::from_str::<Vec<usize>>(json_str) {
        return Some(numbers);
    }
    // A JSON object may be embedded in surrounding prose
    let start = json_str.find('{')?;
    let end = json_str.rfind('}')?;
    if start < end {
        if let Ok(payload) = serde_json::from_str::<SelectionPayload>(&json_str[start..=end]) {
            return Some(payload.selected);
        }
    }
    None
}

/// Loose parse: "paper 3", "papers 2 and 4", "#5".
fn parse_loose_references(content: &str) -> Vec<usize> {
    let mut numbers = Vec::new();
    if let Ok(pattern) = Regex::new(r"(?i)papers?\s+#?(\d+)") {
        for cap in pattern.captures_iter(content) {
            if let Some(n) = cap.get(1).and_then(|m| m.as_str().parse().ok()) {
                numbers.push(n);
            }
        }
    }
    if let Ok(pattern) = Regex::new(r"#(\d+)") {
        for cap in pattern.captures_iter(content) {
            if let Some(n) = cap.get(1).and_then(|m| m.as_str().parse().ok()) {
                numbers.push(n);
            }
        }
    }
    // "papers 2 and 4": the conjunction-trailing number has no prefix
    if let Ok(pattern) = Regex::new(r"(?i)(?:and|,)\s+(\d+)\b") {
        for cap in pattern.captures_iter(content) {
            if let Some(n) = cap.get(1).and_then(|m| m.as_str().parse().ok()) {
                numbers.push(n);
            }
        }
    }
    numbers
}

/// Builds the bounded existing-context string from prior summaries.
#[must_use]
pub fn build_existing_context(summaries: &[&crate::core::branch::ValidatedSummary]) -> String {
    const EXCERPT_CHARS: usize = 400;
    let mut context = String::new();
    for summary in summaries {
        if context.len() >= MAX_CONTEXT_CHARS {
            break;
        }
        let excerpt: String = summary.summary.chars().take(EXCERPT_CHARS).collect();
        context.push_str(&format!("- {}: {excerpt}\n", summary.paper_title));
    }
    context
}
