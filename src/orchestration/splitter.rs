//! Branch splitting: partition accumulated papers into coherent groups.
//!
//! Each strategy buckets papers by metadata, merges buckets down to the
//! requested group count, and labels every group. Refined child queries
//! are the parent query narrowed by the group label. Strategies that
//! produce a single bucket fall back to round-robin so a requested split
//! always yields at least two groups (papers permitting).

use std::collections::BTreeMap;

use crate::core::branch::Branch;
use crate::core::paper::PaperDetails;

/// How to partition a branch's papers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitStrategy {
    /// Bucket by primary field of study.
    ByField,
    /// Bucket by publication decade.
    ByTime,
    /// Bands over citation count.
    ByCitationCount,
    /// Keyword heuristic over titles.
    ByTopic,
    /// Round-robin.
    Random,
}

impl std::str::FromStr for SplitStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "by_field" => Ok(Self::ByField),
            "by_time" => Ok(Self::ByTime),
            "by_citation_count" => Ok(Self::ByCitationCount),
            "by_topic" => Ok(Self::ByTopic),
            "random" => Ok(Self::Random),
            other => Err(format!("unknown split strategy: {other}")),
        }
    }
}

impl std::fmt::Display for SplitStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ByField => "by_field",
            Self::ByTime => "by_time",
            Self::ByCitationCount => "by_citation_count",
            Self::ByTopic => "by_topic",
            Self::Random => "random",
        };
        write!(f, "{s}")
    }
}

/// One group produced by a split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitGroup {
    /// Human-readable label.
    pub label: String,
    /// Refined query for the child branch.
    pub query: String,
    /// Paper IDs assigned to this group.
    pub paper_ids: Vec<String>,
}

/// Deterministic paper partitioner.
#[derive(Debug, Clone, Copy, Default)]
pub struct BranchSplitter;

impl BranchSplitter {
    /// Suggests a strategy from the branch's metadata diversity: fields
    /// when several are represented, decades when the year spread is
    /// wide, topics otherwise.
    #[must_use]
    pub fn suggest_strategy(branch: &Branch) -> SplitStrategy {
        let papers: Vec<&PaperDetails> = branch.accumulated_papers.values().collect();
        let distinct_fields = papers
            .iter()
            .filter_map(|p| p.meta.fields_of_study.first())
            .collect::<std::collections::HashSet<_>>()
            .len();
        if distinct_fields >= 2 {
            return SplitStrategy::ByField;
        }

        let years: Vec<i32> = papers.iter().filter_map(|p| p.meta.year).collect();
        if let (Some(min), Some(max)) = (years.iter().min(), years.iter().max())
            && max - min >= 20
        {
            return SplitStrategy::ByTime;
        }

        SplitStrategy::ByTopic
    }

    /// Partitions the branch's papers into up to `num_groups` groups.
    ///
    /// Every accumulated paper lands in exactly one group. Returns an
    /// empty list when the branch holds no papers.
    #[must_use]
    pub fn split(branch: &Branch, strategy: SplitStrategy, num_groups: usize) -> Vec<SplitGroup> {
        let papers: Vec<&PaperDetails> = branch.accumulated_papers.values().collect();
        if papers.is_empty() {
            return Vec::new();
        }
        let num_groups = num_groups.clamp(2, papers.len().max(2));

        let buckets = match strategy {
            SplitStrategy::ByField => bucket_by_key(&papers, |p| {
                p.meta
                    .fields_of_study
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "General".to_string())
            }),
            SplitStrategy::ByTime => bucket_by_key(&papers, |p| {
                p.meta.year.map_or_else(
                    || "undated".to_string(),
                    |y| format!("{}s", (y / 10) * 10),
                )
            }),
            SplitStrategy::ByCitationCount => citation_bands(&papers, num_groups),
            SplitStrategy::ByTopic => bucket_by_key(&papers, |p| {
                topic_of(p.meta.title.as_deref().unwrap_or_default())
            }),
            SplitStrategy::Random => round_robin(&papers, num_groups),
        };

        let mut groups = merge_to_count(buckets, num_groups);
        if groups.len() < 2 {
            groups = merge_to_count(round_robin(&papers, num_groups), num_groups);
        }

        groups
            .into_iter()
            .map(|(label, paper_ids)| SplitGroup {
                query: format!("{} {label}", branch.query),
                label,
                paper_ids,
            })
            .collect()
    }
}

/// Buckets papers under a string key, preserving key order.
fn bucket_by_key<F>(papers: &[&PaperDetails], key_of: F) -> Vec<(String, Vec<String>)>
where
    F: Fn(&PaperDetails) -> String,
{
    let mut buckets: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for paper in papers {
        buckets
            .entry(key_of(paper))
            .or_default()
            .push(paper.paper_id().to_string());
    }
    buckets.into_iter().collect()
}

/// Top-K bands over citation count (descending).
fn citation_bands(papers: &[&PaperDetails], num_groups: usize) -> Vec<(String, Vec<String>)> {
    let mut sorted: Vec<&&PaperDetails> = papers.iter().collect();
    sorted.sort_by(|a, b| {
        b.meta
            .citation_count
            .unwrap_or(0)
            .cmp(&a.meta.citation_count.unwrap_or(0))
    });

    let band_size = sorted.len().div_ceil(num_groups.max(1));
    sorted
        .chunks(band_size.max(1))
        .enumerate()
        .map(|(i, band)| {
            let label = match i {
                0 => "highly cited".to_string(),
                _ => format!("citation band {}", i + 1),
            };
            (
                label,
                band.iter().map(|p| p.paper_id().to_string()).collect(),
            )
        })
        .collect()
}

/// Round-robin assignment.
fn round_robin(papers: &[&PaperDetails], num_groups: usize) -> Vec<(String, Vec<String>)> {
    let num_groups = num_groups.max(1).min(papers.len());
    let mut groups: Vec<(String, Vec<String>)> = (0..num_groups)
        .map(|i| (format!("subset {}", i + 1), Vec::new()))
        .collect();
    for (i, paper) in papers.iter().enumerate() {
        groups[i % num_groups].1.push(paper.paper_id().to_string());
    }
    groups
}

/// Keyword heuristic for title topics.
fn topic_of(title: &str) -> String {
    let lower = title.to_lowercase();
    for (needles, topic) in [
        (&["survey", "review", "overview"][..], "surveys"),
        (&["theory", "theoretical", "framework", "formal"][..], "theory"),
        (
            &["experiment", "empirical", "evaluation", "benchmark"][..],
            "empirical",
        ),
        (&["application", "applied", "system", "deployment"][..], "applications"),
    ] {
        if needles.iter().any(|n| lower.contains(n)) {
            return topic.to_string();
        }
    }
    "general".to_string()
}

/// Merges the smallest buckets until at most `target` remain.
fn merge_to_count(
    mut buckets: Vec<(String, Vec<String>)>,
    target: usize,
) -> Vec<(String, Vec<String>)> {
    let target = target.max(1);
    while buckets.len() > target {
        buckets.sort_by_key(|(_, papers)| papers.len());
        let (small_label, small_papers) = buckets.remove(0);
        if let Some((label, papers)) = buckets.first_mut() {
            papers.extend(small_papers);
            if !label.contains(&small_label) {
                *label = format!("{label} / {small_label}");
            }
        }
    }
    buckets.retain(|(_, papers)| !papers.is_empty());
    buckets
}
