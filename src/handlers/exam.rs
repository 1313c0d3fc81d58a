// src/handlers/exam.rs

use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::ExamConfig,
    error::AppError,
    models::{
        attempt::{
            AnswerReview, AttemptRow, AttemptStartedResponse, CandidateInfo, ResultResponse,
            SubmitAttemptRequest, SubmitAttemptResponse,
        },
        question::{
            PaperResponse, PublicQuestion, PublicSection, QuestionBank, QuestionKey, QuestionRow,
            Section, StartAttemptRequest, SyncAnswerRequest,
        },
        score::ScoreBreakdown,
    },
    scoring,
    utils::html::clean_markup,
};

/// Loads a test's full question set in paper order (insertion order within
/// and across sections) and the key→row-id mapping the wire protocol uses.
async fn load_bank(
    pool: &SqlitePool,
    test_id: &str,
) -> Result<(QuestionBank, BTreeMap<QuestionKey, i64>), AppError> {
    let rows: Vec<QuestionRow> = sqlx::query_as(
        "SELECT id, test_id, section, ordinal, text, options, correct_option, marks
         FROM questions WHERE test_id = ? ORDER BY id",
    )
    .bind(test_id)
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Err(AppError::NotFound(format!(
            "No questions for test '{test_id}'"
        )));
    }

    let mut sections: Vec<Section> = Vec::new();
    let mut ids = BTreeMap::new();

    for row in rows {
        let options: Vec<String> = serde_json::from_str(&row.options).map_err(|e| {
            tracing::error!("Corrupt options JSON for question {}: {:?}", row.id, e);
            AppError::InternalServerError(e.to_string())
        })?;

        ids.insert(
            QuestionKey::new(&row.section, row.ordinal as usize),
            row.id,
        );

        let question = crate::models::question::Question {
            text: row.text,
            options,
            correct: row.correct_option as usize,
            marks: row.marks,
        };

        match sections.iter_mut().find(|s| s.name == row.section) {
            Some(section) => section.questions.push(question),
            None => sections.push(Section {
                name: row.section,
                questions: vec![question],
            }),
        }
    }

    Ok((QuestionBank { sections }, ids))
}

async fn load_attempt(pool: &SqlitePool, attempt_id: &str) -> Result<AttemptRow, AppError> {
    sqlx::query_as::<_, AttemptRow>("SELECT * FROM attempts WHERE id = ?")
        .bind(attempt_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Attempt '{attempt_id}' not found")))
}

/// Returns the sectioned paper for a test, with the correct-option index
/// and marks withheld and question markup sanitized.
pub async fn get_paper(
    State(pool): State<SqlitePool>,
    Path(test_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (title, duration_secs): (String, i64) =
        sqlx::query_as("SELECT title, duration_secs FROM tests WHERE id = ?")
            .bind(&test_id)
            .fetch_optional(&pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Test '{test_id}' not found")))?;

    let rows: Vec<QuestionRow> = sqlx::query_as(
        "SELECT id, test_id, section, ordinal, text, options, correct_option, marks
         FROM questions WHERE test_id = ? ORDER BY id",
    )
    .bind(&test_id)
    .fetch_all(&pool)
    .await?;

    let mut sections: Vec<PublicSection> = Vec::new();
    for row in rows {
        let options: Vec<String> = serde_json::from_str(&row.options)
            .map_err(|e| AppError::InternalServerError(e.to_string()))?;
        let question = PublicQuestion {
            id: row.id,
            section: row.section.clone(),
            ordinal: row.ordinal as usize,
            text: clean_markup(&row.text),
            options: options.iter().map(|o| clean_markup(o)).collect(),
        };
        match sections.iter_mut().find(|s| s.name == row.section) {
            Some(section) => section.questions.push(question),
            None => sections.push(PublicSection {
                name: row.section,
                questions: vec![question],
            }),
        }
    }

    Ok(Json(PaperResponse {
        test_id,
        title,
        duration_secs: duration_secs as u64,
        sections,
    }))
}

/// Opens an attempt for a candidate.
///
/// The expiry timestamp is stamped here, server-side; every later upsert is
/// checked against it regardless of what the client's clock claims.
pub async fn start_attempt(
    State(pool): State<SqlitePool>,
    Json(payload): Json<StartAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let email = payload.email.to_lowercase().trim().to_string();

    let duration_secs: i64 = sqlx::query_scalar("SELECT duration_secs FROM tests WHERE id = ?")
        .bind(&payload.test_id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Test '{}' not found", payload.test_id)))?;

    // Upsert the student record keyed by email.
    sqlx::query(
        "INSERT INTO students (email, roll_number) VALUES (?, ?)
         ON CONFLICT(email) DO UPDATE SET roll_number = excluded.roll_number",
    )
    .bind(&email)
    .bind(&payload.roll_number)
    .execute(&pool)
    .await?;

    let student_id: i64 = sqlx::query_scalar("SELECT id FROM students WHERE email = ?")
        .bind(&email)
        .fetch_one(&pool)
        .await?;

    let attempt_id = Uuid::new_v4().to_string();
    let now = Utc::now().timestamp();
    let ends_at = now + duration_secs;

    sqlx::query(
        "INSERT INTO attempts (id, student_id, test_id, status, started_at, ends_at)
         VALUES (?, ?, ?, 'in_progress', ?, ?)",
    )
    .bind(&attempt_id)
    .bind(student_id)
    .bind(&payload.test_id)
    .bind(now)
    .bind(ends_at)
    .execute(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create attempt: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    tracing::info!(attempt_id = %attempt_id, test_id = %payload.test_id, "attempt opened");

    Ok((
        StatusCode::CREATED,
        Json(AttemptStartedResponse {
            attempt_id,
            test_id: payload.test_id,
            duration_secs: duration_secs as u64,
            ends_at,
        }),
    ))
}

/// Incremental answer upsert: a full overwrite keyed by (attempt, question).
///
/// Checks the attempt's expiry on every call. If the clock has run out and
/// the attempt is not finalized yet, the attempt is finalized from the
/// answers the server already holds and the upsert is rejected with 410 —
/// the signal for the client to stop and force a local timeout submission.
pub async fn sync_answer(
    State(pool): State<SqlitePool>,
    Path(attempt_id): Path<String>,
    Json(payload): Json<SyncAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let attempt = load_attempt(&pool, &attempt_id).await?;

    if attempt.status == "completed" {
        return Err(AppError::AttemptExpired);
    }

    let now = Utc::now().timestamp();
    if now > attempt.ends_at {
        tracing::warn!(attempt_id = %attempt_id, "upsert past expiry, finalizing attempt");
        finalize_attempt(&pool, &attempt, "timeout").await?;
        return Err(AppError::AttemptExpired);
    }

    if let Some(value) = payload.selected_option {
        if value < 0 {
            return Err(AppError::BadRequest(format!(
                "Invalid option {value} for question {}",
                payload.question_id
            )));
        }
    }

    // The question must belong to the attempt's test.
    let belongs: Option<i64> =
        sqlx::query_scalar("SELECT id FROM questions WHERE id = ? AND test_id = ?")
            .bind(payload.question_id)
            .bind(&attempt.test_id)
            .fetch_optional(&pool)
            .await?;
    if belongs.is_none() {
        return Err(AppError::BadRequest(format!(
            "Question {} is not part of test '{}'",
            payload.question_id, attempt.test_id
        )));
    }

    sqlx::query(
        "INSERT INTO answers (attempt_id, question_id, selected_option, answered_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(attempt_id, question_id)
         DO UPDATE SET selected_option = excluded.selected_option,
                       answered_at = excluded.answered_at",
    )
    .bind(&attempt_id)
    .bind(payload.question_id)
    .bind(payload.selected_option)
    .bind(now)
    .execute(&pool)
    .await?;

    Ok(Json(serde_json::json!({ "success": true })))
}

/// Scores an attempt from the answers currently stored server-side and
/// persists the outcome. Used when expiry is detected on an upsert.
async fn finalize_attempt(
    pool: &SqlitePool,
    attempt: &AttemptRow,
    cause: &str,
) -> Result<ScoreBreakdown, AppError> {
    let (bank, ids) = load_bank(pool, &attempt.test_id).await?;

    let rows: Vec<(i64, Option<i64>)> =
        sqlx::query_as("SELECT question_id, selected_option FROM answers WHERE attempt_id = ?")
            .bind(&attempt.id)
            .fetch_all(pool)
            .await?;

    let by_id: BTreeMap<i64, i64> = rows
        .into_iter()
        .filter_map(|(qid, sel)| sel.map(|s| (qid, s)))
        .collect();

    let mut answers = BTreeMap::new();
    for (key, id) in &ids {
        if let Some(&selected) = by_id.get(id) {
            answers.insert(key.clone(), selected as usize);
        }
    }

    let breakdown = scoring::score(&bank, &answers, ExamConfig::default().wrong_penalty);
    persist_result(pool, &attempt.id, cause, &breakdown).await?;
    Ok(breakdown)
}

async fn persist_result(
    pool: &SqlitePool,
    attempt_id: &str,
    cause: &str,
    breakdown: &ScoreBreakdown,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE attempts
         SET status = 'completed', submitted_at = ?, submit_cause = ?,
             score = ?, max_score = ?, correct_count = ?, wrong_count = ?,
             unanswered = ?, breakdown = ?
         WHERE id = ?",
    )
    .bind(Utc::now().timestamp())
    .bind(cause)
    .bind(breakdown.total)
    .bind(breakdown.max_total)
    .bind(breakdown.correct as i64)
    .bind(breakdown.wrong() as i64)
    .bind(breakdown.unanswered() as i64)
    .bind(serde_json::to_string(breakdown).map_err(|e| {
        AppError::InternalServerError(e.to_string())
    })?)
    .bind(attempt_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Authoritative final submission.
///
/// The payload carries the complete ordered answer list, gaps included.
/// The server loads its own correct-answer map, recomputes the marking
/// formula, persists the attempt, and returns the computed breakdown; the
/// client must display these figures, not its own. Resubmitting a
/// finalized attempt returns the stored result unchanged, which makes the
/// call safe to retry.
pub async fn submit_attempt(
    State(pool): State<SqlitePool>,
    Path(attempt_id): Path<String>,
    Json(payload): Json<SubmitAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    let attempt = load_attempt(&pool, &attempt_id).await?;

    if attempt.status == "completed" {
        let breakdown = stored_breakdown(&attempt)?;
        return Ok(Json(SubmitAttemptResponse {
            attempt_id,
            breakdown,
        }));
    }

    let (bank, ids) = load_bank(&pool, &attempt.test_id).await?;

    let mut answers: BTreeMap<QuestionKey, usize> = BTreeMap::new();
    for section in &payload.sections {
        if bank.section(&section.section).is_none() {
            return Err(AppError::BadRequest(format!(
                "Unknown section '{}'",
                section.section
            )));
        }
        for (ordinal, selected) in section.selected.iter().enumerate() {
            if let Some(value) = selected {
                let key = QuestionKey::new(&section.section, ordinal);
                if bank.question(&key).is_none() {
                    return Err(AppError::BadRequest(format!("No question at {key}")));
                }
                if *value < 0 {
                    return Err(AppError::BadRequest(format!(
                        "Invalid option {value} for question {key}"
                    )));
                }
                answers.insert(key, *value as usize);
            }
        }
    }

    // Mirror the final answer set into the answers table so post-exam
    // review reads the same data the score was computed from.
    let now = Utc::now().timestamp();
    for (key, value) in &answers {
        if let Some(question_id) = ids.get(key) {
            sqlx::query(
                "INSERT INTO answers (attempt_id, question_id, selected_option, answered_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(attempt_id, question_id)
                 DO UPDATE SET selected_option = excluded.selected_option,
                               answered_at = excluded.answered_at",
            )
            .bind(&attempt_id)
            .bind(question_id)
            .bind(*value as i64)
            .bind(now)
            .execute(&pool)
            .await?;
        }
    }

    let breakdown = scoring::score(&bank, &answers, ExamConfig::default().wrong_penalty);
    persist_result(&pool, &attempt_id, payload.cause.as_str(), &breakdown).await?;

    tracing::info!(
        attempt_id = %attempt_id,
        total = breakdown.total,
        cause = payload.cause.as_str(),
        "attempt finalized"
    );

    Ok(Json(SubmitAttemptResponse {
        attempt_id,
        breakdown,
    }))
}

fn stored_breakdown(attempt: &AttemptRow) -> Result<ScoreBreakdown, AppError> {
    let raw = attempt.breakdown.as_deref().ok_or_else(|| {
        AppError::InternalServerError(format!("attempt {} has no stored breakdown", attempt.id))
    })?;
    serde_json::from_str(raw).map_err(|e| AppError::InternalServerError(e.to_string()))
}

/// Post-exam review: candidate info, test metadata, the persisted
/// breakdown, and per-question correctness. Not served during a live
/// session — the attempt must be finalized first.
pub async fn get_result(
    State(pool): State<SqlitePool>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let attempt = load_attempt(&pool, &attempt_id).await?;
    if attempt.status != "completed" {
        return Err(AppError::Conflict(format!(
            "Attempt '{attempt_id}' is still in progress"
        )));
    }

    let (email, roll_number): (String, String) =
        sqlx::query_as("SELECT email, roll_number FROM students WHERE id = ?")
            .bind(attempt.student_id)
            .fetch_one(&pool)
            .await?;

    let test_title: String = sqlx::query_scalar("SELECT title FROM tests WHERE id = ?")
        .bind(&attempt.test_id)
        .fetch_one(&pool)
        .await?;

    let rows: Vec<(String, i64, String, Option<i64>, i64, i64)> = sqlx::query_as(
        "SELECT q.section, q.ordinal, q.text, a.selected_option, q.correct_option, q.marks
         FROM answers a
         JOIN questions q ON a.question_id = q.id
         WHERE a.attempt_id = ?
         ORDER BY q.id",
    )
    .bind(&attempt_id)
    .fetch_all(&pool)
    .await?;

    let answers = rows
        .into_iter()
        .map(
            |(section, ordinal, text, selected_option, correct_option, marks)| AnswerReview {
                section,
                ordinal: ordinal as usize,
                question_text: text,
                selected_option,
                correct_option,
                is_correct: selected_option == Some(correct_option),
                marks,
            },
        )
        .collect();

    let breakdown = stored_breakdown(&attempt)?;

    Ok(Json(ResultResponse {
        attempt_id,
        candidate: CandidateInfo { email, roll_number },
        test_id: attempt.test_id.clone(),
        test_title,
        status: attempt.status.clone(),
        submit_cause: attempt.submit_cause.clone(),
        submitted_at: attempt.submitted_at,
        breakdown,
        answers,
    }))
}
