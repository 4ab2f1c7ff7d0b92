use crate::error::Result;
use crate::models::criteria::{ExperienceLevel, ExtractedRequirement, ExtractionMode};
use crate::services::aggregator_service::AggregatorService;
use crate::services::history_service::ChatStore;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Periodically pulls a broad snapshot from every source and upserts it
/// into the job cache, so the store carries fresh postings even between
/// user searches. Disabled entirely when no interval is configured.
#[derive(Clone)]
pub struct RefreshService {
    aggregator: AggregatorService,
    store: Arc<dyn ChatStore>,
}

impl RefreshService {
    pub fn new(aggregator: AggregatorService, store: Arc<dyn ChatStore>) -> Self {
        Self { aggregator, store }
    }

    /// Unconstrained criteria: every source returns its current listing
    /// page rather than a filtered search.
    fn broad_criteria() -> ExtractedRequirement {
        ExtractedRequirement {
            keyword: String::new(),
            location: None,
            skills: BTreeSet::new(),
            experience: ExperienceLevel::Any,
            confidence: 1.0,
            mode: ExtractionMode::Fallback,
        }
    }

    /// One refresh pass. Source failures are already metadata inside the
    /// aggregation; a fully failed pass surfaces as an error for the
    /// worker loop to log and retry next tick.
    pub async fn run_once(&self) -> Result<u64> {
        let aggregation = self.aggregator.search(&Self::broad_criteria()).await?;
        let written = self.store.upsert_postings(&aggregation.postings).await?;
        tracing::info!(
            written,
            failed_sources = aggregation.source_errors.len(),
            "job cache refreshed"
        );
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobPosting;
    use crate::services::history_service::MemoryChatStore;
    use crate::services::source_service::{MockJobSource, SourceRegistry};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    fn posting(url: &str) -> JobPosting {
        JobPosting {
            title: "Dev".into(),
            company: "Acme".into(),
            location: None,
            description: String::new(),
            skills: BTreeSet::new(),
            source: "linkedin".into(),
            url: Some(url.into()),
            posted_at: None,
        }
    }

    #[tokio::test]
    async fn refresh_upserts_deduplicated_snapshot() {
        let mut mock = MockJobSource::new();
        mock.expect_id().return_const("linkedin".to_string());
        mock.expect_search()
            .returning(|_| Ok(vec![posting("https://a/1"), posting("https://a/1?ref=x")]));

        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(mock));
        let aggregator = AggregatorService::new(
            registry,
            Arc::new(Semaphore::new(2)),
            Duration::from_millis(200),
            Duration::from_millis(500),
        );
        let store = Arc::new(MemoryChatStore::new());
        let refresh = RefreshService::new(aggregator, store);

        // The two URLs canonicalize to one identity key.
        assert_eq!(refresh.run_once().await.unwrap(), 1);
    }
}
