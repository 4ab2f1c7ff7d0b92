use crate::config::Config;
use crate::error::Result;
use crate::models::criteria::ExtractedRequirement;
use crate::models::job::JobPosting;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A job-source collaborator: accepts criteria, returns postings or a
/// typed error within the aggregator's timeout. Concrete implementations
/// are registered in the [`SourceRegistry`], never discovered dynamically.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobSource: Send + Sync {
    fn id(&self) -> &str;
    async fn search(&self, criteria: &ExtractedRequirement) -> Result<Vec<JobPosting>>;
}

#[derive(Debug, Deserialize)]
struct SourcePosting {
    title: String,
    company: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    skills: BTreeSet<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    posted_at: Option<DateTime<Utc>>,
}

/// HTTP-backed source collaborator. The scraping itself lives behind the
/// endpoint; this side only speaks its JSON listing format.
#[derive(Clone)]
pub struct HttpJobSource {
    id: String,
    client: Client,
    base_url: String,
    limit: usize,
}

impl HttpJobSource {
    pub fn new(id: String, client: Client, base_url: String, limit: usize) -> Self {
        Self {
            id,
            client,
            base_url,
            limit,
        }
    }
}

#[async_trait]
impl JobSource for HttpJobSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn search(&self, criteria: &ExtractedRequirement) -> Result<Vec<JobPosting>> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("keywords", criteria.keyword.as_str()),
                ("location", criteria.location.as_deref().unwrap_or("")),
                ("limit", &self.limit.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let raw = response.json::<Vec<SourcePosting>>().await?;
        Ok(raw
            .into_iter()
            .map(|p| JobPosting {
                title: p.title,
                company: p.company,
                location: p.location.filter(|l| !l.trim().is_empty()),
                description: p.description,
                skills: p.skills.into_iter().map(|s| s.to_lowercase()).collect(),
                source: self.id.clone(),
                url: p.url,
                posted_at: p.posted_at,
            })
            .collect())
    }
}

/// Lookup table of registered sources. Registration order is the fixed
/// priority order used for dedup and ranking tie-breaks.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn JobSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry from config: every enabled source with a
    /// configured endpoint, in `ENABLED_SOURCES` order.
    pub fn from_config(config: &Config, client: Client) -> Self {
        let mut registry = Self::new();
        for name in &config.enabled_sources {
            match config.source_endpoints.get(name) {
                Some(endpoint) => registry.register(Arc::new(HttpJobSource::new(
                    name.clone(),
                    client.clone(),
                    endpoint.clone(),
                    config.max_results.max(10),
                ))),
                None => {
                    tracing::warn!(source = %name, "enabled source has no endpoint, skipping")
                }
            }
        }
        registry
    }

    pub fn register(&mut self, source: Arc<dyn JobSource>) {
        self.sources.push(source);
    }

    pub fn sources(&self) -> &[Arc<dyn JobSource>] {
        &self.sources
    }

    /// Position in the fixed priority order; unknown sources sort last.
    pub fn priority(&self, source_id: &str) -> usize {
        self.sources
            .iter()
            .position(|s| s.id() == source_id)
            .unwrap_or(usize::MAX)
    }
}
