// src/models/question.rs

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use validator::Validate;

/// One multiple-choice question inside a section.
///
/// Immutable for the lifetime of a session. `correct` is the index into
/// `options`; `marks` is the positive value awarded on a correct answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    pub options: Vec<String>,
    pub correct: usize,
    pub marks: i64,
}

/// A named, ordered block of questions. Section names come from a fixed
/// small set configured per test (Physics, Chemistry, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub questions: Vec<Question>,
}

/// The immutable, section-partitioned paper handed to the engine at start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionBank {
    pub sections: Vec<Section>,
}

impl QuestionBank {
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn question(&self, key: &QuestionKey) -> Option<&Question> {
        self.section(&key.section)?.questions.get(key.ordinal)
    }

    pub fn total_questions(&self) -> usize {
        self.sections.iter().map(|s| s.questions.len()).sum()
    }

    /// All keys in paper order: sections in section order, ordinals ascending.
    pub fn keys(&self) -> impl Iterator<Item = QuestionKey> + '_ {
        self.sections.iter().flat_map(|s| {
            (0..s.questions.len()).map(|i| QuestionKey::new(&s.name, i))
        })
    }
}

/// The sole identifier for per-question state: (section name, ordinal).
///
/// Serialized as the `"Section-ordinal"` string (e.g. `"Physics-3"`) so it
/// can key a JSON object, which is also the shape snapshots are stored in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct QuestionKey {
    pub section: String,
    pub ordinal: usize,
}

impl QuestionKey {
    pub fn new(section: &str, ordinal: usize) -> Self {
        Self {
            section: section.to_string(),
            ordinal,
        }
    }
}

impl fmt::Display for QuestionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.section, self.ordinal)
    }
}

impl From<QuestionKey> for String {
    fn from(key: QuestionKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for QuestionKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let (section, ordinal) = value
            .rsplit_once('-')
            .ok_or_else(|| format!("malformed question key '{}'", value))?;
        let ordinal = ordinal
            .parse()
            .map_err(|_| format!("malformed question key '{}'", value))?;
        Ok(Self {
            section: section.to_string(),
            ordinal,
        })
    }
}

/// Represents a row of the 'questions' table in the database.
#[derive(Debug, Clone, FromRow)]
pub struct QuestionRow {
    pub id: i64,
    pub test_id: String,
    pub section: String,
    pub ordinal: i64,
    pub text: String,
    /// JSON array of option strings, parsed on read.
    pub options: String,
    pub correct_option: i64,
    pub marks: i64,
}

/// DTO for sending a question to the candidate (correct index and marks withheld).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicQuestion {
    pub id: i64,
    pub section: String,
    pub ordinal: usize,
    pub text: String,
    pub options: Vec<String>,
}

/// DTO for the sectioned paper returned by the questions endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct PaperResponse {
    pub test_id: String,
    pub title: String,
    pub duration_secs: u64,
    pub sections: Vec<PublicSection>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublicSection {
    pub name: String,
    pub questions: Vec<PublicQuestion>,
}

/// DTO for a candidate starting an attempt.
#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct StartAttemptRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 50))]
    pub roll_number: String,
    #[validate(length(min = 1, max = 100))]
    pub test_id: String,
}

/// DTO for the incremental answer upsert. `selected_option = None` clears.
#[derive(Debug, Deserialize, Serialize)]
pub struct SyncAnswerRequest {
    pub question_id: i64,
    pub selected_option: Option<i64>,
}
