// src/session/machine.rs

use chrono::Utc;

use crate::config::ExamConfig;
use crate::error::EngineError;
use crate::models::attempt::{
    CandidateInfo, ExamSession, PaletteStatus, Phase, SectionAnswers, SessionSnapshot,
    SessionView, SubmitCause,
};
use crate::models::question::{QuestionBank, QuestionKey};
use crate::models::score::ScoreBreakdown;
use crate::scoring;

/// The session state machine: sole owner of the [`ExamSession`] aggregate.
///
/// Every mutation goes through a method here and hands back an immutable
/// [`SessionView`] for the rendering layer; the timer, violation monitor and
/// autosaver never touch session fields directly. All methods are
/// synchronous — I/O (sync, persistence) belongs to the runner.
pub struct ExamEngine {
    config: ExamConfig,
    bank: QuestionBank,
    session: Option<ExamSession>,
    last_warning: Option<String>,
}

/// What a countdown tick observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Running(u64),
    Expired,
    /// Tick arrived after a terminal transition; ignored.
    Ignored,
}

impl ExamEngine {
    /// Builds an engine over an immutable paper. Fails on an empty bank so
    /// "first question of the first section" always exists.
    pub fn new(config: ExamConfig, bank: QuestionBank) -> Result<Self, EngineError> {
        if bank.sections.is_empty() || bank.sections.iter().any(|s| s.questions.is_empty()) {
            return Err(EngineError::EmptyBank);
        }
        Ok(Self {
            config,
            bank,
            session: None,
            last_warning: None,
        })
    }

    /// Resumes directly into `InProgress` from a restored snapshot,
    /// bypassing `start()`. The snapshot is assumed already validated by
    /// [`crate::session::persist::restore`].
    pub fn resume(config: ExamConfig, bank: QuestionBank, session: ExamSession) -> Result<Self, EngineError> {
        let mut engine = Self::new(config, bank)?;
        engine.session = Some(session);
        Ok(engine)
    }

    /// `NotStarted → InProgress`. Positions the candidate on the first
    /// question of the first section and marks it visited.
    pub fn start(
        &mut self,
        attempt_id: String,
        candidate: CandidateInfo,
    ) -> Result<SessionView, EngineError> {
        if self.session.is_some() {
            return Err(EngineError::AlreadyStarted);
        }

        let first_section = self.bank.sections[0].name.clone();
        let mut session = ExamSession {
            attempt_id,
            candidate,
            current_section: first_section.clone(),
            current_ordinal: 0,
            answers: Default::default(),
            visited: Default::default(),
            marked: Default::default(),
            remaining_secs: self.config.total_duration_secs,
            violations: 0,
            phase: Phase::InProgress,
        };
        session.visited.insert(QuestionKey::new(&first_section, 0));

        tracing::info!(attempt_id = %session.attempt_id, "exam started");
        self.session = Some(session);
        Ok(self.view_unchecked())
    }

    pub fn phase(&self) -> Phase {
        self.session
            .as_ref()
            .map(|s| s.phase)
            .unwrap_or(Phase::NotStarted)
    }

    pub fn session(&self) -> Option<&ExamSession> {
        self.session.as_ref()
    }

    pub fn config(&self) -> &ExamConfig {
        &self.config
    }

    pub fn bank(&self) -> &QuestionBank {
        &self.bank
    }

    pub fn current_key(&self) -> Option<QuestionKey> {
        let s = self.session.as_ref()?;
        Some(QuestionKey::new(&s.current_section, s.current_ordinal))
    }

    fn in_progress_mut(&mut self) -> Result<&mut ExamSession, EngineError> {
        match self.session.as_mut() {
            Some(s) if s.phase == Phase::InProgress => Ok(s),
            _ => Err(EngineError::NotInProgress),
        }
    }

    /// Sets or overwrites the answer for the current question. Rejected
    /// synchronously, with no state change, if the index is out of range.
    pub fn select_answer(&mut self, option_index: usize) -> Result<SessionView, EngineError> {
        let key = self.current_key().ok_or(EngineError::NotInProgress)?;
        let option_count = self
            .bank
            .question(&key)
            .map(|q| q.options.len())
            .unwrap_or(0);

        let session = self.in_progress_mut()?;
        if option_index >= option_count {
            return Err(EngineError::InvalidOption(option_index));
        }
        session.answers.insert(key, option_index);
        Ok(self.view_unchecked())
    }

    /// Removes the current question's answer if present. Idempotent.
    pub fn clear_response(&mut self) -> Result<SessionView, EngineError> {
        let key = self.current_key().ok_or(EngineError::NotInProgress)?;
        let session = self.in_progress_mut()?;
        session.answers.remove(&key);
        Ok(self.view_unchecked())
    }

    /// Flips mark-for-review on the current question, then advances exactly
    /// like [`Self::save_and_next`].
    pub fn toggle_mark_for_review(&mut self) -> Result<SessionView, EngineError> {
        let key = self.current_key().ok_or(EngineError::NotInProgress)?;
        let session = self.in_progress_mut()?;
        if !session.marked.remove(&key) {
            session.marked.insert(key);
        }
        self.save_and_next()
    }

    /// Jumps to an arbitrary (section, ordinal) and marks it visited.
    pub fn navigate_to(&mut self, section: &str, ordinal: usize) -> Result<SessionView, EngineError> {
        let target = QuestionKey::new(section, ordinal);
        if self.bank.question(&target).is_none() {
            return Err(EngineError::InvalidPosition {
                section: section.to_string(),
                ordinal,
            });
        }
        let session = self.in_progress_mut()?;
        session.current_section = target.section.clone();
        session.current_ordinal = target.ordinal;
        session.visited.insert(target);
        Ok(self.view_unchecked())
    }

    /// Advances to the next ordinal, rolling over into the next section in
    /// section order. At the very last question of the very last section
    /// this is a no-op: the position stays put.
    pub fn save_and_next(&mut self) -> Result<SessionView, EngineError> {
        let bank = &self.bank;
        let session = match self.session.as_mut() {
            Some(s) if s.phase == Phase::InProgress => s,
            _ => return Err(EngineError::NotInProgress),
        };
        let section_idx = bank
            .sections
            .iter()
            .position(|s| s.name == session.current_section)
            .ok_or_else(|| EngineError::UnknownSection(session.current_section.clone()))?;

        let section_len = bank.sections[section_idx].questions.len();
        if session.current_ordinal + 1 < section_len {
            session.current_ordinal += 1;
        } else if section_idx + 1 < bank.sections.len() {
            session.current_section = bank.sections[section_idx + 1].name.clone();
            session.current_ordinal = 0;
        }
        // else: terminal question, stay put

        let key = QuestionKey::new(&session.current_section, session.current_ordinal);
        session.visited.insert(key);
        Ok(self.view_unchecked())
    }

    /// `InProgress → Submitted | AutoSubmitted`. Freezes all further
    /// mutation; repeated calls are rejected with `NotInProgress`.
    pub fn submit(&mut self, cause: SubmitCause) -> Result<SessionView, EngineError> {
        let session = self.in_progress_mut()?;
        session.phase = match cause {
            SubmitCause::User => Phase::Submitted,
            other => Phase::AutoSubmitted(other),
        };
        tracing::info!(
            attempt_id = %session.attempt_id,
            cause = cause.as_str(),
            "exam submitted"
        );
        Ok(self.view_unchecked())
    }

    /// One countdown tick. Only decrements while `InProgress`; reports
    /// `Expired` when the budget reaches zero so the runner can escalate
    /// to `submit(Timeout)`.
    pub fn tick(&mut self) -> TickOutcome {
        match self.session.as_mut() {
            Some(s) if s.phase == Phase::InProgress => {
                s.remaining_secs = s.remaining_secs.saturating_sub(1);
                if s.remaining_secs == 0 {
                    TickOutcome::Expired
                } else {
                    TickOutcome::Running(s.remaining_secs)
                }
            }
            _ => TickOutcome::Ignored,
        }
    }

    /// Records one integrity violation and surfaces its warning on the next
    /// view. Counting is handled here so the counter rides along in every
    /// snapshot; the escalation decision belongs to the violation monitor.
    pub fn record_violation(&mut self, warning: String) -> Result<u32, EngineError> {
        let session = self.in_progress_mut()?;
        session.violations += 1;
        let count = session.violations;
        self.last_warning = Some(warning);
        Ok(count)
    }

    pub fn violations(&self) -> u32 {
        self.session.as_ref().map(|s| s.violations).unwrap_or(0)
    }

    /// Palette status for one key, in the documented priority order.
    pub fn palette_status(&self, key: &QuestionKey) -> PaletteStatus {
        let Some(session) = self.session.as_ref() else {
            return PaletteStatus::NotVisited;
        };
        let answered = session.answers.contains_key(key);
        let marked = session.marked.contains(key);
        match (answered, marked) {
            (true, true) => PaletteStatus::AnsweredAndMarked,
            (false, true) => PaletteStatus::Marked,
            (true, false) => PaletteStatus::Answered,
            (false, false) if session.visited.contains(key) => PaletteStatus::VisitedNotAnswered,
            _ => PaletteStatus::NotVisited,
        }
    }

    /// The complete ordered answer list, including gaps, in paper order.
    /// This is the payload of the final submission.
    pub fn answer_sheet(&self) -> Vec<SectionAnswers> {
        let answers = self
            .session
            .as_ref()
            .map(|s| &s.answers)
            .cloned()
            .unwrap_or_default();

        self.bank
            .sections
            .iter()
            .map(|section| SectionAnswers {
                section: section.name.clone(),
                selected: (0..section.questions.len())
                    .map(|i| {
                        answers
                            .get(&QuestionKey::new(&section.name, i))
                            .map(|&v| v as i64)
                    })
                    .collect(),
            })
            .collect()
    }

    /// Client-side preview score. The server's recomputation of the same
    /// formula is the result of record.
    pub fn score_local(&self) -> ScoreBreakdown {
        let empty = Default::default();
        let answers = self.session.as_ref().map(|s| &s.answers).unwrap_or(&empty);
        scoring::score(&self.bank, answers, self.config.wrong_penalty)
    }

    /// Full-session snapshot for the durable store, stamped now.
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.session.as_ref().map(|session| SessionSnapshot {
            session: session.clone(),
            saved_at_unix: Utc::now().timestamp(),
        })
    }

    fn view_unchecked(&self) -> SessionView {
        let session = self.session.as_ref().expect("view without session");
        let key = QuestionKey::new(&session.current_section, session.current_ordinal);
        let question = self.bank.question(&key).expect("current key always valid");

        SessionView {
            phase: session.phase,
            section: session.current_section.clone(),
            ordinal: session.current_ordinal,
            question_text: question.text.clone(),
            options: question.options.clone(),
            selected: session.answers.get(&key).copied(),
            marked: session.marked.contains(&key),
            remaining_secs: session.remaining_secs,
            violations: session.violations,
            warning: self.last_warning.clone(),
            palette: self
                .bank
                .sections
                .iter()
                .map(|s| {
                    let statuses = (0..s.questions.len())
                        .map(|i| self.palette_status(&QuestionKey::new(&s.name, i)))
                        .collect();
                    (s.name.clone(), statuses)
                })
                .collect(),
            answered_per_section: self
                .bank
                .sections
                .iter()
                .map(|s| {
                    let count = (0..s.questions.len())
                        .filter(|&i| {
                            session.answers.contains_key(&QuestionKey::new(&s.name, i))
                        })
                        .count();
                    (s.name.clone(), count)
                })
                .collect(),
        }
    }

    /// Current view without mutating anything.
    pub fn view(&self) -> Option<SessionView> {
        self.session.as_ref().map(|_| self.view_unchecked())
    }
}
