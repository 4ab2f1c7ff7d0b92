use crate::models::criteria::ExtractedRequirement;
use crate::models::job::{JobPosting, ScoredJob, SourceFailure};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Single-shot request body for `POST /search_jobs`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct JobSearchRequest {
    #[validate(length(min = 1, max = 2000))]
    pub message: String,
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,
    pub chat_id: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSearchResponse {
    pub response: String,
    pub jobs: Vec<JobPosting>,
    pub matched_jobs: Vec<ScoredJob>,
    pub requirements_extracted: ExtractedRequirement,
    pub total_jobs_found: usize,
    pub total_matched_jobs: usize,
    pub source_errors: Vec<SourceFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearHistoryResponse {
    pub deleted_count: u64,
}
