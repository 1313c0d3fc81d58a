// src/models/score.rs

use serde::{Deserialize, Serialize};

/// Marks obtained in one section. Derived data, never the source of truth:
/// recomputed from the bank and the answers whenever needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionScore {
    pub section: String,
    pub obtained: i64,
    pub max: i64,
    pub attempted: usize,
    pub correct: usize,
    pub total_questions: usize,
}

/// Full result of one attempt. The grand total is not clamped at zero; heavy
/// negative marking can legitimately take a candidate below it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub sections: Vec<SectionScore>,
    pub total: i64,
    pub max_total: i64,
    pub attempted: usize,
    pub correct: usize,
    pub total_questions: usize,
}

impl ScoreBreakdown {
    pub fn wrong(&self) -> usize {
        self.attempted - self.correct
    }

    pub fn unanswered(&self) -> usize {
        self.total_questions - self.attempted
    }
}
