// src/models/attempt.rs

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;

use crate::models::question::QuestionKey;
use crate::models::score::ScoreBreakdown;

/// Opaque candidate identity supplied by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateInfo {
    pub email: String,
    pub roll_number: String,
}

/// Session lifecycle. The two submitted phases are terminal; nothing
/// transitions out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    NotStarted,
    InProgress,
    Submitted,
    AutoSubmitted(SubmitCause),
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Submitted | Phase::AutoSubmitted(_))
    }
}

/// What triggered a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitCause {
    User,
    Timeout,
    ViolationLimit,
    DriftTamper,
}

impl SubmitCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitCause::User => "user",
            SubmitCause::Timeout => "timeout",
            SubmitCause::ViolationLimit => "violation_limit",
            SubmitCause::DriftTamper => "drift_tamper",
        }
    }
}

/// Palette colour for one question, highest-priority state first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaletteStatus {
    AnsweredAndMarked,
    Marked,
    Answered,
    VisitedNotAnswered,
    NotVisited,
}

/// The aggregate root for one candidate's pass through one paper.
///
/// Owned exclusively by the session state machine; the timer, the violation
/// monitor and the autosaver request changes through its operations and
/// never touch these fields directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamSession {
    pub attempt_id: String,
    pub candidate: CandidateInfo,
    pub current_section: String,
    pub current_ordinal: usize,
    pub answers: BTreeMap<QuestionKey, usize>,
    pub visited: BTreeSet<QuestionKey>,
    pub marked: BTreeSet<QuestionKey>,
    pub remaining_secs: u64,
    pub violations: u32,
    pub phase: Phase,
}

/// What gets written to the local durable store: the full session plus a
/// save timestamp used for the staleness check on restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session: ExamSession,
    pub saved_at_unix: i64,
}

/// Immutable state handed to the rendering layer after every operation.
/// The rendering side never reaches back into the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub phase: Phase,
    pub section: String,
    pub ordinal: usize,
    pub question_text: String,
    pub options: Vec<String>,
    pub selected: Option<usize>,
    pub marked: bool,
    pub remaining_secs: u64,
    pub violations: u32,
    /// Running warning for the latest integrity event, if any.
    pub warning: Option<String>,
    /// Palette per section, in section order.
    pub palette: Vec<(String, Vec<PaletteStatus>)>,
    pub answered_per_section: Vec<(String, usize)>,
}

/// Represents a row of the 'attempts' table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AttemptRow {
    pub id: String,
    pub student_id: i64,
    pub test_id: String,
    pub status: String,
    pub started_at: i64,
    pub ends_at: i64,
    pub submitted_at: Option<i64>,
    pub submit_cause: Option<String>,
    pub score: Option<i64>,
    pub max_score: Option<i64>,
    pub correct_count: Option<i64>,
    pub wrong_count: Option<i64>,
    pub unanswered: Option<i64>,
    pub breakdown: Option<String>,
}

/// DTO returned when an attempt is opened.
#[derive(Debug, Serialize, Deserialize)]
pub struct AttemptStartedResponse {
    pub attempt_id: String,
    pub test_id: String,
    pub duration_secs: u64,
    pub ends_at: i64,
}

/// Final submission payload: the complete ordered answer list for every
/// section, including `None` gaps for unanswered questions. This is the
/// only call whose answer set is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAttemptRequest {
    pub cause: SubmitCause,
    pub sections: Vec<SectionAnswers>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionAnswers {
    pub section: String,
    pub selected: Vec<Option<i64>>,
}

/// Server-computed result-of-record returned from final submission.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitAttemptResponse {
    pub attempt_id: String,
    pub breakdown: ScoreBreakdown,
}

/// Post-exam review payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResultResponse {
    pub attempt_id: String,
    pub candidate: CandidateInfo,
    pub test_id: String,
    pub test_title: String,
    pub status: String,
    pub submit_cause: Option<String>,
    pub submitted_at: Option<i64>,
    pub breakdown: ScoreBreakdown,
    pub answers: Vec<AnswerReview>,
}

/// Per-question correctness for review, never shown during a live session.
#[derive(Debug, Serialize, Deserialize)]
pub struct AnswerReview {
    pub section: String,
    pub ordinal: usize,
    pub question_text: String,
    pub selected_option: Option<i64>,
    pub correct_option: i64,
    pub is_correct: bool,
    pub marks: i64,
}
