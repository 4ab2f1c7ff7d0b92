use crate::error::Result;
use crate::models::criteria::{ExperienceLevel, ExtractedRequirement};
use crate::models::job::{JobPosting, ScoredJob, SourceFailure};
use crate::services::aggregator_service::AggregatorService;
use crate::services::extractor_service::ExtractorService;
use crate::services::scoring_service::ScoringService;

/// Everything one search produced: the criteria, the deduplicated union,
/// the ranked list capped at the display count, and failure metadata.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub response: String,
    pub criteria: ExtractedRequirement,
    pub jobs: Vec<JobPosting>,
    pub matched: Vec<ScoredJob>,
    pub total_jobs_found: usize,
    pub total_matched_jobs: usize,
    pub source_errors: Vec<SourceFailure>,
}

/// Runs the extract → aggregate → score pipeline for one request.
/// The only fatal outcome is AggregationFailed; extraction degradation
/// and per-source failures ride along as data.
#[derive(Clone)]
pub struct SearchService {
    extractor: ExtractorService,
    aggregator: AggregatorService,
    scoring: ScoringService,
}

impl SearchService {
    pub fn new(
        extractor: ExtractorService,
        aggregator: AggregatorService,
        scoring: ScoringService,
    ) -> Self {
        Self {
            extractor,
            aggregator,
            scoring,
        }
    }

    pub async fn run(&self, message: &str, language: Option<&str>) -> Result<SearchOutcome> {
        let criteria = self.extractor.extract(message, language).await;
        tracing::debug!(keyword = %criteria.keyword, mode = ?criteria.mode, "criteria extracted");

        let aggregation = self.aggregator.search(&criteria).await?;
        let total_jobs_found = aggregation.postings.len();

        let ranked = self
            .scoring
            .rank(&criteria, &aggregation.postings, self.aggregator.registry());
        let total_matched_jobs = ranked.len();

        let mut matched = ranked;
        matched.truncate(self.scoring.max_results());

        let response = Self::response_text(&criteria, total_matched_jobs);

        Ok(SearchOutcome {
            response,
            criteria,
            jobs: aggregation.postings,
            matched,
            total_jobs_found,
            total_matched_jobs,
            source_errors: aggregation.source_errors,
        })
    }

    /// Short natural-language summary of what was found, built from the
    /// criteria rather than any model call.
    fn response_text(criteria: &ExtractedRequirement, matched: usize) -> String {
        if matched == 0 {
            return "I searched for jobs based on your criteria but didn't find any good \
                    matches. You might want to broaden your search terms or try a different \
                    location."
                .to_string();
        }

        let mut parts: Vec<String> = Vec::new();
        if !criteria.keyword.is_empty() {
            parts.push(format!("skills: {}", criteria.keyword));
        }
        if let Some(location) = &criteria.location {
            parts.push(format!("location: {}", location));
        }
        if criteria.experience != ExperienceLevel::Any {
            let level = match criteria.experience {
                ExperienceLevel::Entry => "entry",
                ExperienceLevel::Mid => "mid",
                ExperienceLevel::Senior => "senior",
                ExperienceLevel::Any => unreachable!(),
            };
            parts.push(format!("experience: {}", level));
        }

        let summary = if parts.is_empty() {
            String::new()
        } else {
            format!(" with {}", parts.join(" and "))
        };
        let plural = if matched == 1 { "" } else { "s" };
        format!(
            "I found {} job{} matching your search{}. Here are the best matches:",
            matched, plural, summary
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::criteria::ExtractionMode;
    use std::collections::BTreeSet;

    fn criteria(keyword: &str, location: Option<&str>) -> ExtractedRequirement {
        ExtractedRequirement {
            keyword: keyword.into(),
            location: location.map(Into::into),
            skills: BTreeSet::new(),
            experience: ExperienceLevel::Any,
            confidence: 1.0,
            mode: ExtractionMode::Fallback,
        }
    }

    #[test]
    fn empty_result_suggests_broadening() {
        let text = SearchService::response_text(&criteria("python", None), 0);
        assert!(text.contains("broaden"));
    }

    #[test]
    fn summary_lists_criteria() {
        let text = SearchService::response_text(&criteria("python developer", Some("Tbilisi")), 3);
        assert!(text.contains("3 jobs"));
        assert!(text.contains("skills: python developer"));
        assert!(text.contains("location: Tbilisi"));
    }

    #[test]
    fn singular_job_has_no_plural_s() {
        let text = SearchService::response_text(&criteria("python", None), 1);
        assert!(text.contains("1 job matching"));
    }
}
