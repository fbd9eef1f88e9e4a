//! Study guides: domain types, content store, ownership, and the generation
//! coordinator.

pub mod coordinator;
pub mod locks;
pub mod ownership;
pub mod rate_limit;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::TokenCosts;
use crate::error::{Error, Result};

/// What kind of input the study guide was generated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Scripture,
    Topic,
}

impl InputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputKind::Scripture => "scripture",
            InputKind::Topic => "topic",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "scripture" => Ok(InputKind::Scripture),
            "topic" => Ok(InputKind::Topic),
            other => Err(Error::Validation(format!("unknown input_type {other:?}"))),
        }
    }
}

/// Output language for a generated guide. Exactly one per generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "en")]
    English,
    #[serde(rename = "hi")]
    Hindi,
    #[serde(rename = "ml")]
    Malayalam,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Hindi => "hi",
            Language::Malayalam => "ml",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "en" => Ok(Language::English),
            "hi" => Ok(Language::Hindi),
            "ml" => Ok(Language::Malayalam),
            other => Err(Error::Validation(format!("unknown language {other:?}"))),
        }
    }

    /// Full language name, used in prompts.
    pub fn display_name(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Hindi => "Hindi",
            Language::Malayalam => "Malayalam",
        }
    }

    /// Token cost of one generation in this language.
    pub fn cost(&self, costs: &TokenCosts) -> i64 {
        match self {
            Language::English => costs.en,
            Language::Hindi => costs.hi,
            Language::Malayalam => costs.ml,
        }
    }
}

/// The six-part body of a generated study guide. Every field is non-empty;
/// `validate` is the only constructor path from untrusted provider output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyContent {
    pub summary: String,
    pub interpretation: String,
    pub context: String,
    pub related_verses: Vec<String>,
    pub reflection_questions: Vec<String>,
    pub prayer_points: Vec<String>,
}

impl StudyContent {
    /// Reject empty or whitespace-only fields. Provider output is untrusted.
    pub fn validate(&self) -> Result<()> {
        fn text_ok(name: &str, value: &str) -> Result<()> {
            if value.trim().is_empty() {
                return Err(Error::LlmMalformed(format!("empty field {name:?}")));
            }
            Ok(())
        }
        fn list_ok(name: &str, values: &[String]) -> Result<()> {
            if values.is_empty() || values.iter().any(|v| v.trim().is_empty()) {
                return Err(Error::LlmMalformed(format!(
                    "field {name:?} must be a non-empty list of non-empty strings"
                )));
            }
            Ok(())
        }

        text_ok("summary", &self.summary)?;
        text_ok("interpretation", &self.interpretation)?;
        text_ok("context", &self.context)?;
        list_ok("related_verses", &self.related_verses)?;
        list_ok("reflection_questions", &self.reflection_questions)?;
        list_ok("prayer_points", &self.prayer_points)?;
        Ok(())
    }
}

/// An immutable generated study guide.
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub id: Uuid,
    pub fingerprint: String,
    pub input_kind: InputKind,
    /// Absent when the artifact originated from an anonymous session and
    /// plaintext retention is not permitted.
    pub raw_input: Option<String>,
    pub language: Language,
    pub content: StudyContent,
    pub created_at: DateTime<Utc>,
}
