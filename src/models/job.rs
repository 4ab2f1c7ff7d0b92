use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use url::Url;

/// A single job listing as returned by one source collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPosting {
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub skills: BTreeSet<String>,
    pub source: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub posted_at: Option<DateTime<Utc>>,
}

impl JobPosting {
    /// Canonical string identifying one job across sources. Two postings
    /// with equal identity keys are the same entity.
    ///
    /// A parseable URL canonicalizes to scheme + lowercased host + path
    /// without query, fragment or trailing slash. Without one, the key is
    /// a fingerprint of title, company and location.
    pub fn identity_key(&self) -> String {
        if let Some(raw) = self.url.as_deref() {
            if let Ok(parsed) = Url::parse(raw) {
                if let Some(host) = parsed.host_str() {
                    let path = parsed.path().trim_end_matches('/');
                    return format!("{}://{}{}", parsed.scheme(), host.to_lowercase(), path);
                }
            }
        }

        let mut hasher = Sha256::new();
        hasher.update(self.title.trim().to_lowercase());
        hasher.update("|");
        hasher.update(self.company.trim().to_lowercase());
        hasher.update("|");
        hasher.update(
            self.location
                .as_deref()
                .unwrap_or("")
                .trim()
                .to_lowercase(),
        );
        format!("fp:{}", hex::encode(hasher.finalize()))
    }
}

/// Per-factor contributions behind a total score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub title: f64,
    pub location: f64,
    pub skills: f64,
    pub experience: f64,
}

/// A posting with its computed match score. Derived, never persisted
/// independently of the posting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredJob {
    #[serde(flatten)]
    pub posting: JobPosting,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    pub match_reasons: Vec<String>,
}

/// One source that failed or timed out during a fan-out. Surfaced as
/// metadata alongside the successful union, never as a request failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source: String,
    pub reason: String,
}
