//! Study-domain result shapes.
//!
//! Downstream consumers (the study-plan store, the practice-exam store) read a
//! succeeded job's `result` and depend on these shapes, so they serialize in
//! camelCase to match what the mobile client already renders.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::defaults;

// =============================================================================
// SOURCE MATERIAL
// =============================================================================

/// One uploaded file's extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDocument {
    pub filename: String,
    pub text: String,
    #[serde(default)]
    pub is_past_exam: bool,
}

// =============================================================================
// STUDY PLAN
// =============================================================================

/// Three-level priority classification for plan entries.
///
/// Ordering is the merge rank: `Core < HighYield < Stretch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ImportanceTier {
    #[serde(rename = "core")]
    Core,
    #[serde(rename = "high-yield")]
    HighYield,
    #[serde(rename = "stretch")]
    Stretch,
}

impl ImportanceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportanceTier::Core => "core",
            ImportanceTier::HighYield => "high-yield",
            ImportanceTier::Stretch => "stretch",
        }
    }
}

impl Default for ImportanceTier {
    fn default() -> Self {
        ImportanceTier::HighYield
    }
}

impl fmt::Display for ImportanceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportanceTier {
    type Err = String;

    /// Accepts the canonical names plus the spellings models tend to produce
    /// (`High_Yield`, `high yield`, `highyield`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match normalized.as_str() {
            "core" => Ok(ImportanceTier::Core),
            "highyield" => Ok(ImportanceTier::HighYield),
            "stretch" => Ok(ImportanceTier::Stretch),
            _ => Err(format!("unknown importance tier: {s}")),
        }
    }
}

impl<'de> Deserialize<'de> for ImportanceTier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.and_then(|s| s.parse().ok()).unwrap_or_default())
    }
}

fn default_priority_score() -> f64 {
    50.0
}

fn default_category() -> String {
    "General".to_string()
}

/// `null` reads as the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_default_category<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_category))
}

/// Accepts a number, a numeric string (`"85"`, `"85%"`) or `null`.
fn lenient_priority_score<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Score {
        Number(f64),
        Text(String),
    }

    let score = match Option::<Score>::deserialize(deserializer)? {
        Some(Score::Number(n)) => Some(n),
        Some(Score::Text(s)) => s.trim().trim_end_matches('%').trim().parse().ok(),
        None => None,
    };
    Ok(score.unwrap_or_else(default_priority_score))
}

/// A candidate entry as produced by one chunk's model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanCandidate {
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub key_concepts: Vec<String>,
    #[serde(default = "default_category", deserialize_with = "null_as_default_category")]
    pub category: String,
    #[serde(default)]
    pub importance_tier: ImportanceTier,
    #[serde(default = "default_priority_score", deserialize_with = "lenient_priority_score")]
    pub priority_score: f64,
}

impl PlanCandidate {
    /// The generic entry used when a chunk or a whole plan yields nothing.
    pub fn fallback() -> Self {
        Self {
            title: defaults::FALLBACK_PLAN_TITLE.to_string(),
            description: "Review the uploaded course material section by section.".to_string(),
            key_concepts: Vec::new(),
            category: default_category(),
            importance_tier: ImportanceTier::HighYield,
            priority_score: default_priority_score(),
        }
    }

    /// Trim text fields and clamp the score into `[0, 100]`.
    ///
    /// Returns `None` when the title is blank.
    pub fn normalized(mut self) -> Option<Self> {
        self.title = self.title.trim().to_string();
        if self.title.is_empty() {
            return None;
        }
        self.description = self.description.trim().to_string();
        self.category = self.category.trim().to_string();
        if self.category.is_empty() {
            self.category = default_category();
        }
        self.key_concepts.retain(|k| !k.trim().is_empty());
        self.priority_score = if self.priority_score.is_finite() {
            self.priority_score.clamp(0.0, 100.0)
        } else {
            default_priority_score()
        };
        Some(self)
    }

    /// Merge ordering: tier rank ascending, then score descending.
    ///
    /// Callers break remaining ties by insertion order with a stable sort.
    pub fn merge_cmp(&self, other: &Self) -> Ordering {
        self.importance_tier
            .cmp(&other.importance_tier)
            .then_with(|| other.priority_score.total_cmp(&self.priority_score))
    }
}

/// A merged, ordered plan entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyPlanEntry {
    pub order: usize,
    #[serde(flatten)]
    pub candidate: PlanCandidate,
}

// =============================================================================
// GRADING
// =============================================================================

/// Structured grading feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeFeedback {
    pub summary: String,
    pub correctness: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default)]
    pub improvements: Vec<String>,
}

impl GradeFeedback {
    /// Feedback built from unparseable model output.
    pub fn unparsed(raw: &str) -> Self {
        Self {
            summary: raw.trim().to_string(),
            correctness: "unknown".to_string(),
            score: None,
            improvements: Vec::new(),
        }
    }
}

// =============================================================================
// PRACTICE EXAMS
// =============================================================================

/// One generated practice-exam question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeQuestion {
    pub prompt: String,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_title: Option<String>,
    #[serde(default = "default_question_source")]
    pub source: String,
}

fn default_question_source() -> String {
    "generated".to_string()
}

// =============================================================================
// DOCUMENT METADATA
// =============================================================================

/// Metadata extracted from an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_code: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub summary: String,
}
