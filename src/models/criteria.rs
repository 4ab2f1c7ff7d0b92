use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperienceLevel {
    Entry,
    Mid,
    Senior,
    Any,
}

impl ExperienceLevel {
    /// Ordinal position on the entry/mid/senior ladder; `Any` has none.
    pub fn ordinal(self) -> Option<i32> {
        match self {
            ExperienceLevel::Entry => Some(0),
            ExperienceLevel::Mid => Some(1),
            ExperienceLevel::Senior => Some(2),
            ExperienceLevel::Any => None,
        }
    }
}

impl Default for ExperienceLevel {
    fn default() -> Self {
        ExperienceLevel::Any
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    Model,
    Fallback,
}

/// Structured search criteria derived from free text. Produced exactly once
/// per SearchRequest; extraction never fails, it degrades to `Fallback`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRequirement {
    pub keyword: String,
    pub location: Option<String>,
    pub skills: BTreeSet<String>,
    pub experience: ExperienceLevel,
    pub confidence: f64,
    pub mode: ExtractionMode,
}

impl ExtractedRequirement {
    pub fn wants_remote(&self) -> bool {
        self.location
            .as_deref()
            .map(|l| l.to_lowercase().contains("remote"))
            .unwrap_or(false)
    }

    /// No location preference expressed at all.
    pub fn location_unconstrained(&self) -> bool {
        self.location.as_deref().map(str::trim).unwrap_or("").is_empty()
    }
}
