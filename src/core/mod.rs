//! Core data model: papers, branches, loop state, token estimation.

pub mod branch;
pub mod estimator;
pub mod paper;

pub use branch::{
    Branch, BranchAction, BranchStatus, IterationResult, LoopMode, LoopState, LoopStatus,
    ResearchHypothesis, SplitCriteria, SplitRecommendation, ValidatedSummary,
    DEFAULT_MAX_CONTEXT_WINDOW, short_id,
};
pub use estimator::ContextEstimator;
pub use paper::{Author, PaperDetails, PaperRef, SearchFilters, ARXIV_ID_PREFIX};
