use crate::models::criteria::{ExperienceLevel, ExtractedRequirement};
use crate::models::job::{JobPosting, ScoreBreakdown, ScoredJob};
use crate::services::source_service::SourceRegistry;
use crate::utils::text::{jaccard, normalize, token_overlap};
use std::cmp::Ordering;

/// Fixed factor weights. Sum to 1.0 so the weighted total stays in [0,1].
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub title: f64,
    pub location: f64,
    pub skills: f64,
    pub experience: f64,
}

pub const DEFAULT_WEIGHTS: ScoreWeights = ScoreWeights {
    title: 0.40,
    location: 0.20,
    skills: 0.25,
    experience: 0.15,
};

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.title + self.location + self.skills + self.experience
    }
}

/// Partial credit for locations that are compatible without matching:
/// unknown posting location, or a city inside a requested region.
const LOCATION_UNKNOWN: f64 = 0.7;
const LOCATION_ALIAS: f64 = 0.6;
/// Neutral skills factor when the criteria name no skills at all.
const SKILLS_NEUTRAL: f64 = 0.5;

/// Cities folded into the region they belong to for alias matching.
const LOCATION_ALIASES: &[(&str, &str)] = &[
    ("tbilisi", "georgia"),
    ("batumi", "georgia"),
    ("kutaisi", "georgia"),
    ("berlin", "germany"),
    ("munich", "germany"),
    ("london", "uk"),
    ("krakow", "poland"),
    ("warsaw", "poland"),
];

/// Pure deterministic scoring and ranking. No I/O: identical criteria and
/// postings always produce identical scores and order.
#[derive(Clone)]
pub struct ScoringService {
    weights: ScoreWeights,
    threshold: f64,
    max_results: usize,
}

impl ScoringService {
    pub fn new(weights: ScoreWeights, threshold: f64, max_results: usize) -> Self {
        Self {
            weights,
            threshold,
            max_results,
        }
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    pub fn score(&self, criteria: &ExtractedRequirement, posting: &JobPosting) -> ScoredJob {
        let breakdown = ScoreBreakdown {
            title: self.title_factor(criteria, posting),
            location: self.location_factor(criteria, posting),
            skills: self.skills_factor(criteria, posting),
            experience: self.experience_factor(criteria, posting),
        };

        let total = breakdown.title * self.weights.title
            + breakdown.location * self.weights.location
            + breakdown.skills * self.weights.skills
            + breakdown.experience * self.weights.experience;

        ScoredJob {
            posting: posting.clone(),
            score: total.clamp(0.0, 1.0),
            match_reasons: self.match_reasons(criteria, &breakdown),
            breakdown,
        }
    }

    /// Scores, filters below-threshold postings out entirely, and orders
    /// the rest: score desc, posted date desc with missing dates last,
    /// then fixed source priority, then identity key.
    pub fn rank(
        &self,
        criteria: &ExtractedRequirement,
        postings: &[JobPosting],
        registry: &SourceRegistry,
    ) -> Vec<ScoredJob> {
        let mut scored: Vec<ScoredJob> = postings
            .iter()
            .map(|p| self.score(criteria, p))
            .filter(|s| s.score >= self.threshold)
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| match (b.posting.posted_at, a.posting.posted_at) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => Ordering::Greater,
                    (None, Some(_)) => Ordering::Less,
                    (None, None) => Ordering::Equal,
                })
                .then_with(|| {
                    registry
                        .priority(&a.posting.source)
                        .cmp(&registry.priority(&b.posting.source))
                })
                .then_with(|| a.posting.identity_key().cmp(&b.posting.identity_key()))
        });

        scored
    }

    /// Normalized token overlap against the posting title; an exact
    /// substring match of the whole phrase is a full score.
    fn title_factor(&self, criteria: &ExtractedRequirement, posting: &JobPosting) -> f64 {
        let phrase = normalize(&criteria.keyword);
        if phrase.is_empty() {
            return 0.5;
        }
        let title = normalize(&posting.title);
        if title.contains(&phrase) {
            return 1.0;
        }
        token_overlap(&criteria.keyword, &posting.title)
    }

    fn location_factor(&self, criteria: &ExtractedRequirement, posting: &JobPosting) -> f64 {
        if criteria.location_unconstrained() {
            return 1.0;
        }

        let wanted = normalize(criteria.location.as_deref().unwrap_or(""));
        match posting.location.as_deref() {
            None => {
                if criteria.wants_remote() {
                    1.0
                } else {
                    LOCATION_UNKNOWN
                }
            }
            Some(actual) => {
                let actual = normalize(actual);
                if criteria.wants_remote() {
                    return if actual.contains("remote") { 1.0 } else { 0.0 };
                }
                if actual == wanted || actual.contains(&wanted) || wanted.contains(&actual) {
                    return 1.0;
                }
                if Self::alias_match(&actual, &wanted) {
                    return LOCATION_ALIAS;
                }
                0.0
            }
        }
    }

    fn alias_match(actual: &str, wanted: &str) -> bool {
        LOCATION_ALIASES.iter().any(|(city, region)| {
            (actual.contains(city) && wanted.contains(region))
                || (wanted.contains(city) && actual.contains(region))
        })
    }

    fn skills_factor(&self, criteria: &ExtractedRequirement, posting: &JobPosting) -> f64 {
        if criteria.skills.is_empty() {
            return SKILLS_NEUTRAL;
        }
        jaccard(&criteria.skills, &posting.skills)
    }

    fn experience_factor(&self, criteria: &ExtractedRequirement, posting: &JobPosting) -> f64 {
        let wanted = criteria.experience;
        let actual = Self::posting_experience(posting);
        match (wanted.ordinal(), actual.ordinal()) {
            (None, _) | (_, None) => 1.0,
            (Some(w), Some(a)) => match (w - a).abs() {
                0 => 1.0,
                1 => 0.5,
                _ => 0.0,
            },
        }
    }

    /// Level advertised by the posting, read from title and description.
    fn posting_experience(posting: &JobPosting) -> ExperienceLevel {
        let text = format!("{} {}", posting.title, posting.description).to_lowercase();
        if ["senior", "lead", "principal", "architect"]
            .iter()
            .any(|w| text.contains(w))
        {
            ExperienceLevel::Senior
        } else if ["junior", "entry", "graduate", "intern"]
            .iter()
            .any(|w| text.contains(w))
        {
            ExperienceLevel::Entry
        } else if ["mid", "intermediate"].iter().any(|w| text.contains(w)) {
            ExperienceLevel::Mid
        } else {
            ExperienceLevel::Any
        }
    }

    fn match_reasons(
        &self,
        criteria: &ExtractedRequirement,
        breakdown: &ScoreBreakdown,
    ) -> Vec<String> {
        let mut reasons = Vec::new();
        if breakdown.title > 0.7 && !criteria.keyword.is_empty() {
            reasons.push(format!("Title closely matches '{}'", criteria.keyword));
        } else if breakdown.title > 0.4 && !criteria.keyword.is_empty() {
            reasons.push(format!("Title partially matches '{}'", criteria.keyword));
        }
        if breakdown.location > 0.8 {
            if let Some(location) = &criteria.location {
                reasons.push(format!("Location matches '{}'", location));
            }
        }
        if breakdown.skills > SKILLS_NEUTRAL && !criteria.skills.is_empty() {
            let listed: Vec<&str> = criteria.skills.iter().map(String::as_str).collect();
            reasons.push(format!("Mentions required skills: {}", listed.join(", ")));
        }
        if breakdown.experience > 0.8 && criteria.experience != ExperienceLevel::Any {
            let level = match criteria.experience {
                ExperienceLevel::Entry => "entry",
                ExperienceLevel::Mid => "mid",
                ExperienceLevel::Senior => "senior",
                ExperienceLevel::Any => "any",
            };
            reasons.push(format!("Matches {} level experience", level));
        }
        if reasons.is_empty() {
            reasons.push("General match based on search criteria".to_string());
        }
        reasons
    }
}
