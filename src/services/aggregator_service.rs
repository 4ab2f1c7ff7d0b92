use crate::error::{Error, Result};
use crate::models::criteria::ExtractedRequirement;
use crate::models::job::{JobPosting, SourceFailure};
use crate::services::source_service::SourceRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

/// Outcome of one fan-out: the deduplicated union of successful sources
/// plus failure metadata for the rest.
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub postings: Vec<JobPosting>,
    pub source_errors: Vec<SourceFailure>,
}

/// Fans one search out to every registered source concurrently, bounded
/// by a global semaphore shared across all sessions so a single request
/// cannot starve others.
#[derive(Clone)]
pub struct AggregatorService {
    registry: SourceRegistry,
    limiter: Arc<Semaphore>,
    source_timeout: Duration,
    request_deadline: Duration,
}

impl AggregatorService {
    pub fn new(
        registry: SourceRegistry,
        limiter: Arc<Semaphore>,
        source_timeout: Duration,
        request_deadline: Duration,
    ) -> Self {
        Self {
            registry,
            limiter,
            source_timeout,
            request_deadline,
        }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Partial-failure policy: one success is enough for `Ok`; failed
    /// sources become metadata. Zero successes is fatal for this request
    /// only. The overall deadline aborts stragglers, keeping whatever
    /// already arrived.
    pub async fn search(&self, criteria: &ExtractedRequirement) -> Result<Aggregation> {
        let sources = self.registry.sources();
        if sources.is_empty() {
            return Err(Error::AggregationFailed("no sources registered".into()));
        }

        let (tx, mut rx) = mpsc::channel(sources.len());
        let mut handles = HashMap::new();

        for source in sources {
            let source = Arc::clone(source);
            let criteria = criteria.clone();
            let limiter = Arc::clone(&self.limiter);
            let per_source = self.source_timeout;
            let tx = tx.clone();
            let id = source.id().to_string();

            let handle = tokio::spawn(async move {
                let Ok(_permit) = limiter.acquire().await else {
                    return;
                };
                let outcome =
                    match tokio::time::timeout(per_source, source.search(&criteria)).await {
                        Ok(Ok(postings)) => Ok(postings),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(_) => Err(format!("timed out after {:?}", per_source)),
                    };
                let _ = tx.send((source.id().to_string(), outcome)).await;
            });
            handles.insert(id, handle);
        }
        drop(tx);

        let mut raw: Vec<JobPosting> = Vec::new();
        let mut source_errors: Vec<SourceFailure> = Vec::new();
        let mut succeeded = 0usize;

        let deadline = tokio::time::sleep(self.request_deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some((id, Ok(postings))) => {
                        tracing::debug!(source = %id, count = postings.len(), "source succeeded");
                        handles.remove(&id);
                        succeeded += 1;
                        raw.extend(postings);
                    }
                    Some((id, Err(reason))) => {
                        tracing::warn!(source = %id, reason = %reason, "source failed");
                        handles.remove(&id);
                        source_errors.push(SourceFailure { source: id, reason });
                    }
                    None => break,
                },
                _ = &mut deadline => {
                    for (id, handle) in handles.drain() {
                        handle.abort();
                        source_errors.push(SourceFailure {
                            source: id,
                            reason: "request deadline exceeded".into(),
                        });
                    }
                    break;
                }
            }
        }

        if succeeded == 0 {
            let summary = source_errors
                .iter()
                .map(|f| format!("{}: {}", f.source, f.reason))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::AggregationFailed(summary));
        }

        source_errors.sort_by(|a, b| a.source.cmp(&b.source));

        Ok(Aggregation {
            postings: self.dedupe(raw),
            source_errors,
        })
    }

    /// Groups raw postings by identity key. The representative is chosen
    /// by (has posted date, fixed source priority), so the result never
    /// depends on arrival order; a source re-listing its own job keeps
    /// the last-seen fields.
    fn dedupe(&self, raw: Vec<JobPosting>) -> Vec<JobPosting> {
        let mut by_key: HashMap<String, JobPosting> = HashMap::new();
        for posting in raw {
            let key = posting.identity_key();
            match by_key.get(&key) {
                Some(champion) if !self.prefers(&posting, champion) => {}
                _ => {
                    by_key.insert(key, posting);
                }
            }
        }

        let mut deduped: Vec<JobPosting> = by_key.into_values().collect();
        deduped.sort_by(|a, b| {
            self.registry
                .priority(&a.source)
                .cmp(&self.registry.priority(&b.source))
                .then_with(|| a.identity_key().cmp(&b.identity_key()))
        });
        deduped
    }

    fn prefers(&self, candidate: &JobPosting, champion: &JobPosting) -> bool {
        match (candidate.posted_at.is_some(), champion.posted_at.is_some()) {
            (true, false) => return true,
            (false, true) => return false,
            _ => {}
        }
        let cand = self.registry.priority(&candidate.source);
        let champ = self.registry.priority(&champion.source);
        if cand != champ {
            return cand < champ;
        }
        // Same source re-listing the same job: last-seen wins.
        candidate.source == champion.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::criteria::{ExperienceLevel, ExtractionMode};
    use crate::services::source_service::{JobSource, MockJobSource};
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn criteria() -> ExtractedRequirement {
        ExtractedRequirement {
            keyword: "python developer".into(),
            location: None,
            skills: BTreeSet::new(),
            experience: ExperienceLevel::Any,
            confidence: 1.0,
            mode: ExtractionMode::Model,
        }
    }

    fn posting(source: &str, url: &str, dated: bool) -> JobPosting {
        JobPosting {
            title: "Python Developer".into(),
            company: "Acme".into(),
            location: None,
            description: String::new(),
            skills: BTreeSet::new(),
            source: source.into(),
            url: Some(url.into()),
            posted_at: dated.then(Utc::now),
        }
    }

    fn mock_source(id: &str, result: Result<Vec<JobPosting>>) -> Arc<dyn JobSource> {
        let mut mock = MockJobSource::new();
        mock.expect_id().return_const(id.to_string());
        let id = id.to_string();
        mock.expect_search().returning(move |_| match &result {
            Ok(postings) => Ok(postings.clone()),
            Err(_) => Err(Error::Internal(format!("{} unreachable", id))),
        });
        Arc::new(mock)
    }

    fn aggregator(sources: Vec<Arc<dyn JobSource>>) -> AggregatorService {
        let mut registry = SourceRegistry::new();
        for s in sources {
            registry.register(s);
        }
        AggregatorService::new(
            registry,
            Arc::new(Semaphore::new(4)),
            Duration::from_millis(200),
            Duration::from_millis(500),
        )
    }

    #[tokio::test]
    async fn partial_failure_keeps_successful_union() {
        let agg = aggregator(vec![
            mock_source("linkedin", Ok(vec![posting("linkedin", "https://a/1", true)])),
            mock_source("indeed", Err(Error::Internal("boom".into()))),
        ]);

        let result = agg.search(&criteria()).await.unwrap();
        assert_eq!(result.postings.len(), 1);
        assert_eq!(result.source_errors.len(), 1);
        assert_eq!(result.source_errors[0].source, "indeed");
    }

    #[tokio::test]
    async fn all_sources_failing_is_fatal_with_no_partials() {
        let agg = aggregator(vec![
            mock_source("linkedin", Err(Error::Internal("down".into()))),
            mock_source("indeed", Err(Error::Internal("down".into()))),
        ]);

        match agg.search(&criteria()).await {
            Err(Error::AggregationFailed(_)) => {}
            other => panic!("expected AggregationFailed, got {:?}", other.map(|a| a.postings)),
        }
    }

    #[tokio::test]
    async fn empty_registry_is_aggregation_failure() {
        let agg = aggregator(vec![]);
        assert!(matches!(
            agg.search(&criteria()).await,
            Err(Error::AggregationFailed(_))
        ));
    }

    #[tokio::test]
    async fn identical_urls_from_two_sources_keep_one_by_priority() {
        // Same canonical URL, both undated: the fixed priority order must
        // pick linkedin no matter which source answers first.
        let agg = aggregator(vec![
            mock_source(
                "linkedin",
                Ok(vec![posting("linkedin", "https://jobs.example/42", false)]),
            ),
            mock_source(
                "indeed",
                Ok(vec![posting("indeed", "https://jobs.example/42/", false)]),
            ),
        ]);

        for _ in 0..5 {
            let result = agg.search(&criteria()).await.unwrap();
            assert_eq!(result.postings.len(), 1);
            assert_eq!(result.postings[0].source, "linkedin");
        }
    }

    #[tokio::test]
    async fn dated_posting_beats_higher_priority_undated() {
        let agg = aggregator(vec![
            mock_source(
                "linkedin",
                Ok(vec![posting("linkedin", "https://jobs.example/7", false)]),
            ),
            mock_source(
                "indeed",
                Ok(vec![posting("indeed", "https://jobs.example/7", true)]),
            ),
        ]);

        let result = agg.search(&criteria()).await.unwrap();
        assert_eq!(result.postings.len(), 1);
        assert_eq!(result.postings[0].source, "indeed");
    }

    struct SlowSource;

    #[async_trait::async_trait]
    impl JobSource for SlowSource {
        fn id(&self) -> &str {
            "slow"
        }
        async fn search(&self, _c: &ExtractedRequirement) -> Result<Vec<JobPosting>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn timed_out_source_is_reported_as_metadata() {
        let agg = aggregator(vec![
            mock_source("linkedin", Ok(vec![posting("linkedin", "https://a/1", true)])),
            Arc::new(SlowSource),
        ]);

        let result = agg.search(&criteria()).await.unwrap();
        assert_eq!(result.postings.len(), 1);
        assert_eq!(result.source_errors.len(), 1);
        assert_eq!(result.source_errors[0].source, "slow");
        assert!(result.source_errors[0].reason.contains("timed out"));
    }

    #[tokio::test]
    async fn no_two_postings_share_an_identity_key() {
        let agg = aggregator(vec![
            mock_source(
                "linkedin",
                Ok(vec![
                    posting("linkedin", "https://a/1", true),
                    posting("linkedin", "https://a/1?utm=x", true),
                    posting("linkedin", "https://a/2", true),
                ]),
            ),
            mock_source("indeed", Ok(vec![posting("indeed", "https://a/2", false)])),
        ]);

        let result = agg.search(&criteria()).await.unwrap();
        let mut keys: Vec<String> = result.postings.iter().map(|p| p.identity_key()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), result.postings.len());
        assert_eq!(result.postings.len(), 2);
    }
}
