use crate::error::Result;
use crate::models::criteria::{ExperienceLevel, ExtractedRequirement, ExtractionMode};
use crate::utils::text::tokens;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// External NLP capability turning free text into structured criteria.
/// Consumed as a black box; any failure degrades to the local heuristic.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NlpCapability: Send + Sync {
    async fn extract<'a>(&self, text: &str, language: Option<&'a str>)
        -> Result<ExtractedRequirement>;
}

#[derive(Debug, Deserialize)]
struct NlpExtraction {
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    skills: Vec<String>,
    #[serde(default)]
    experience_level: Option<ExperienceLevel>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// HTTP client for a model-backed extraction endpoint.
#[derive(Clone)]
pub struct HttpNlpCapability {
    client: Client,
    endpoint: String,
}

impl HttpNlpCapability {
    pub fn new(client: Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl NlpCapability for HttpNlpCapability {
    async fn extract<'a>(
        &self,
        text: &str,
        language: Option<&'a str>,
    ) -> Result<ExtractedRequirement> {
        let payload = serde_json::json!({
            "message": text,
            "language": language.unwrap_or("english"),
        });
        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        let raw: NlpExtraction = response.json().await?;

        Ok(ExtractedRequirement {
            keyword: raw.keywords.join(" "),
            location: raw.location.filter(|l| !l.trim().is_empty()),
            skills: raw.skills.into_iter().map(|s| s.to_lowercase()).collect(),
            experience: raw.experience_level.unwrap_or(ExperienceLevel::Any),
            confidence: raw.confidence.unwrap_or(0.9).clamp(0.0, 1.0),
            mode: ExtractionMode::Model,
        })
    }
}

const JOB_TITLE_WORDS: &[&str] = &[
    "developer",
    "engineer",
    "scientist",
    "analyst",
    "manager",
    "designer",
    "consultant",
    "programmer",
    "architect",
    "specialist",
];

const TECH_SKILLS: &[&str] = &[
    "python",
    "javascript",
    "typescript",
    "react",
    "node",
    "java",
    "rust",
    "go",
    "sql",
    "aws",
    "docker",
    "kubernetes",
    "frontend",
    "backend",
    "fullstack",
    "devops",
];

const KNOWN_CITIES: &[&str] = &[
    "tbilisi", "batumi", "kutaisi", "rustavi", "berlin", "london", "warsaw", "yerevan",
];

const LOCATION_INDICATORS: &[&str] = &["in", "at", "near", "from"];

/// Turns raw text into structured criteria. Never fails the pipeline:
/// the external capability is bounded by a timeout, and any error path
/// returns a low-confidence fallback extraction instead.
#[derive(Clone)]
pub struct ExtractorService {
    nlp: Option<Arc<dyn NlpCapability>>,
    timeout: Duration,
    fallback_confidence: f64,
}

impl ExtractorService {
    pub fn new(
        nlp: Option<Arc<dyn NlpCapability>>,
        timeout: Duration,
        fallback_confidence: f64,
    ) -> Self {
        Self {
            nlp,
            timeout,
            fallback_confidence,
        }
    }

    pub async fn extract(&self, text: &str, language: Option<&str>) -> ExtractedRequirement {
        if let Some(nlp) = &self.nlp {
            match tokio::time::timeout(self.timeout, nlp.extract(text, language)).await {
                Ok(Ok(extracted)) => return extracted,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "NLP extraction failed, using fallback");
                }
                Err(_) => {
                    tracing::warn!(timeout_ms = %self.timeout.as_millis(), "NLP extraction timed out, using fallback");
                }
            }
        }
        self.fallback(text)
    }

    /// Static-gazetteer heuristic used when the model is unavailable.
    fn fallback(&self, text: &str) -> ExtractedRequirement {
        let words = tokens(text);

        let mut keyword_parts: Vec<String> = Vec::new();
        let mut skills: BTreeSet<String> = BTreeSet::new();
        for word in &words {
            if TECH_SKILLS.contains(&word.as_str()) {
                skills.insert(word.clone());
                keyword_parts.push(word.clone());
            } else if JOB_TITLE_WORDS.contains(&word.as_str()) {
                keyword_parts.push(word.clone());
            }
        }

        let location = Self::detect_location(&words);

        let lower = text.to_lowercase();
        let experience = if ["senior", "lead", "principal"].iter().any(|w| lower.contains(w)) {
            ExperienceLevel::Senior
        } else if ["junior", "entry", "graduate", "intern"].iter().any(|w| lower.contains(w)) {
            ExperienceLevel::Entry
        } else if ["mid", "intermediate"].iter().any(|w| lower.contains(w)) {
            ExperienceLevel::Mid
        } else {
            ExperienceLevel::Any
        };

        ExtractedRequirement {
            keyword: keyword_parts.join(" "),
            location,
            skills,
            experience,
            confidence: self.fallback_confidence,
            mode: ExtractionMode::Fallback,
        }
    }

    fn detect_location(words: &[String]) -> Option<String> {
        if words.iter().any(|w| w == "remote") {
            return Some("remote".to_string());
        }
        if let Some(city) = words.iter().find(|w| KNOWN_CITIES.contains(&w.as_str())) {
            return Some(capitalize(city));
        }
        // "in <place>" style: take the word after an indicator, skipping
        // words the gazetteers already claimed.
        for (i, word) in words.iter().enumerate() {
            if LOCATION_INDICATORS.contains(&word.as_str()) {
                if let Some(next) = words.get(i + 1) {
                    if !TECH_SKILLS.contains(&next.as_str())
                        && !JOB_TITLE_WORDS.contains(&next.as_str())
                    {
                        return Some(capitalize(next));
                    }
                }
            }
        }
        None
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fallback_service() -> ExtractorService {
        ExtractorService::new(None, Duration::from_millis(50), 0.35)
    }

    #[tokio::test]
    async fn fallback_extracts_skills_experience_and_location() {
        let extracted = fallback_service()
            .extract("looking for a senior python developer in Tbilisi", None)
            .await;

        assert_eq!(extracted.mode, ExtractionMode::Fallback);
        assert_eq!(extracted.experience, ExperienceLevel::Senior);
        assert!(extracted.skills.contains("python"));
        assert_eq!(extracted.location.as_deref(), Some("Tbilisi"));
        assert!(extracted.keyword.contains("developer"));
        assert!((extracted.confidence - 0.35).abs() < 1e-9);
    }

    #[tokio::test]
    async fn fallback_detects_remote_preference() {
        let extracted = fallback_service()
            .extract("remote rust engineer", None)
            .await;
        assert_eq!(extracted.location.as_deref(), Some("remote"));
        assert!(extracted.wants_remote());
    }

    #[tokio::test]
    async fn nlp_error_degrades_to_fallback() {
        let mut mock = MockNlpCapability::new();
        mock.expect_extract()
            .returning(|_, _| Err(crate::error::Error::Internal("model offline".into())));

        let service =
            ExtractorService::new(Some(Arc::new(mock)), Duration::from_millis(100), 0.35);
        let extracted = service.extract("python developer", None).await;
        assert_eq!(extracted.mode, ExtractionMode::Fallback);
    }

    struct SlowNlp;

    #[async_trait]
    impl NlpCapability for SlowNlp {
        async fn extract<'a>(
            &self,
            _text: &str,
            _language: Option<&'a str>,
        ) -> crate::error::Result<ExtractedRequirement> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(crate::error::Error::Internal("unreachable".into()))
        }
    }

    #[tokio::test]
    async fn nlp_timeout_degrades_to_fallback() {
        let service = ExtractorService::new(Some(Arc::new(SlowNlp)), Duration::from_millis(10), 0.35);
        let extracted = service.extract("python developer", None).await;
        assert_eq!(extracted.mode, ExtractionMode::Fallback);
    }

    #[tokio::test]
    async fn model_result_passes_through() {
        let mut mock = MockNlpCapability::new();
        mock.expect_extract().returning(|_, _| {
            Ok(ExtractedRequirement {
                keyword: "data engineer".into(),
                location: Some("Berlin".into()),
                skills: BTreeSet::new(),
                experience: ExperienceLevel::Mid,
                confidence: 0.92,
                mode: ExtractionMode::Model,
            })
        });

        let service = ExtractorService::new(Some(Arc::new(mock)), Duration::from_secs(1), 0.35);
        let extracted = service.extract("anything", None).await;
        assert_eq!(extracted.mode, ExtractionMode::Model);
        assert_eq!(extracted.experience, ExperienceLevel::Mid);
    }
}
