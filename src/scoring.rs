// src/scoring.rs

use std::collections::BTreeMap;

use crate::models::question::{QuestionBank, QuestionKey};
use crate::models::score::{ScoreBreakdown, SectionScore};

/// Scores a finished attempt.
///
/// Pure and deterministic: the client engine calls this once at submission
/// for the on-screen preview, and the server calls the very same function
/// against its own correct-answer map. The marking scheme is the one the
/// paper has always used: `+marks` for a correct answer, a flat `-penalty`
/// for a wrong one regardless of the question's positive value, zero for a
/// gap. The total is deliberately not clamped at zero.
///
/// The flat penalty is inherited behaviour; product owners have been asked
/// whether it should scale with `marks` (see DESIGN.md), so it arrives here
/// as a parameter rather than a constant.
pub fn score(
    bank: &QuestionBank,
    answers: &BTreeMap<QuestionKey, usize>,
    wrong_penalty: i64,
) -> ScoreBreakdown {
    let mut sections = Vec::with_capacity(bank.sections.len());
    let mut total = 0i64;
    let mut max_total = 0i64;
    let mut attempted = 0usize;
    let mut correct = 0usize;
    let mut total_questions = 0usize;

    for section in &bank.sections {
        let mut s = SectionScore {
            section: section.name.clone(),
            obtained: 0,
            max: section.questions.iter().map(|q| q.marks).sum(),
            attempted: 0,
            correct: 0,
            total_questions: section.questions.len(),
        };

        for (ordinal, question) in section.questions.iter().enumerate() {
            let key = QuestionKey::new(&section.name, ordinal);
            match answers.get(&key) {
                None => {}
                Some(&selected) if selected == question.correct => {
                    s.attempted += 1;
                    s.correct += 1;
                    s.obtained += question.marks;
                }
                Some(_) => {
                    s.attempted += 1;
                    s.obtained -= wrong_penalty;
                }
            }
        }

        total += s.obtained;
        max_total += s.max;
        attempted += s.attempted;
        correct += s.correct;
        total_questions += s.total_questions;
        sections.push(s);
    }

    ScoreBreakdown {
        sections,
        total,
        max_total,
        attempted,
        correct,
        total_questions,
    }
}
