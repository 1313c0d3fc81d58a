// tests/runner_tests.rs
//
// The countdown, drift check and autosave all run on tokio timers, so these
// tests run on a paused clock and let the runtime fast-forward through exam
// time instead of sleeping through it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use exam_engine::config::ExamConfig;
use exam_engine::models::attempt::{
    CandidateInfo, Phase, ResultResponse, SubmitAttemptRequest, SubmitCause,
};
use exam_engine::models::question::{Question, QuestionBank, QuestionKey, Section};
use exam_engine::models::score::ScoreBreakdown;
use exam_engine::scoring;
use exam_engine::session::persist::{FileStore, NoopStore, SnapshotStore, SESSION_STATE_KEY};
use exam_engine::session::{Command, ExamEngine, IntegrityEvent, SessionHandle, SessionRunner};
use exam_engine::sync::{SyncError, SyncTransport, UpsertOutcome};
use tokio::task::JoinHandle;

fn bank() -> QuestionBank {
    QuestionBank {
        sections: vec![
            Section {
                name: "Physics".to_string(),
                questions: (0..3)
                    .map(|i| Question {
                        text: format!("Physics question {}", i + 1),
                        options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
                        correct: 1,
                        marks: 4,
                    })
                    .collect(),
            },
            Section {
                name: "Chemistry".to_string(),
                questions: (0..2)
                    .map(|i| Question {
                        text: format!("Chemistry question {}", i + 1),
                        options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
                        correct: 2,
                        marks: 4,
                    })
                    .collect(),
            },
        ],
    }
}

/// Records every call and re-scores submissions the way the backend does.
struct MockTransport {
    bank: QuestionBank,
    wrong_penalty: i64,
    upsert_outcome: UpsertOutcome,
    /// Number of initial submit calls to fail before succeeding.
    submit_failures: AtomicU32,
    upserts: Mutex<Vec<(String, QuestionKey, Option<i64>)>>,
    submissions: Mutex<Vec<(String, SubmitAttemptRequest)>>,
}

impl MockTransport {
    fn new(bank: QuestionBank) -> Self {
        Self {
            bank,
            wrong_penalty: 1,
            upsert_outcome: UpsertOutcome::Accepted,
            submit_failures: AtomicU32::new(0),
            upserts: Mutex::new(Vec::new()),
            submissions: Mutex::new(Vec::new()),
        }
    }

    fn expiring(bank: QuestionBank) -> Self {
        Self {
            upsert_outcome: UpsertOutcome::Expired,
            ..Self::new(bank)
        }
    }

    fn flaky(bank: QuestionBank, failures: u32) -> Self {
        Self {
            submit_failures: AtomicU32::new(failures),
            ..Self::new(bank)
        }
    }

    fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn upsert_answer(
        &self,
        attempt_id: &str,
        key: &QuestionKey,
        selected: Option<i64>,
    ) -> Result<UpsertOutcome, SyncError> {
        self.upserts
            .lock()
            .unwrap()
            .push((attempt_id.to_string(), key.clone(), selected));
        Ok(self.upsert_outcome)
    }

    async fn submit(
        &self,
        attempt_id: &str,
        request: &SubmitAttemptRequest,
    ) -> Result<ScoreBreakdown, SyncError> {
        self.submissions
            .lock()
            .unwrap()
            .push((attempt_id.to_string(), request.clone()));

        if self
            .submit_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SyncError::Rejected("simulated outage".to_string()));
        }

        // Same reconstruction the submit handler performs.
        let mut answers = BTreeMap::new();
        for section in &request.sections {
            for (ordinal, selected) in section.selected.iter().enumerate() {
                if let Some(v) = selected {
                    answers.insert(QuestionKey::new(&section.section, ordinal), *v as usize);
                }
            }
        }
        Ok(scoring::score(&self.bank, &answers, self.wrong_penalty))
    }

    async fn fetch_result(&self, _attempt_id: &str) -> Result<ResultResponse, SyncError> {
        Err(SyncError::Rejected("not used by these tests".to_string()))
    }
}

fn spawn_session(
    config: ExamConfig,
    transport: Arc<MockTransport>,
    store: Arc<dyn SnapshotStore>,
) -> (
    SessionHandle,
    JoinHandle<Result<ScoreBreakdown, exam_engine::session::runner::RunnerError>>,
) {
    let mut engine = ExamEngine::new(config, bank()).unwrap();
    engine
        .start(
            "attempt-rt".to_string(),
            CandidateInfo {
                email: "student@example.com".to_string(),
                roll_number: "PW2024-A1".to_string(),
            },
        )
        .unwrap();

    let (runner, handle) = SessionRunner::new(engine, transport, store);
    (handle, tokio::spawn(runner.run()))
}

fn short_exam() -> ExamConfig {
    ExamConfig {
        total_duration_secs: 3,
        ..ExamConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn timeout_forces_exactly_one_final_submission() {
    let transport = Arc::new(MockTransport::new(bank()));
    let (handle, task) = spawn_session(short_exam(), Arc::clone(&transport), Arc::new(NoopStore));

    // Answer the first question, leave the rest blank, then let the clock
    // run out; the paused runtime fast-forwards through the remaining time.
    handle.commands.send(Command::SelectAnswer(1)).await.unwrap();
    let breakdown = task.await.unwrap().unwrap();

    assert_eq!(transport.submission_count(), 1);
    let (_, request) = transport.submissions.lock().unwrap()[0].clone();
    assert_eq!(request.cause, SubmitCause::Timeout);
    assert_eq!(request.sections[0].selected, vec![Some(1), None, None]);
    assert_eq!(request.sections[1].selected, vec![None, None]);

    assert_eq!(breakdown.total, 4);
    assert_eq!(breakdown.attempted, 1);

    let view = handle.views.borrow().clone().unwrap();
    assert_eq!(view.phase, Phase::AutoSubmitted(SubmitCause::Timeout));
    assert_eq!(view.remaining_secs, 0);
}

#[tokio::test(start_paused = true)]
async fn third_violation_forces_submission_and_closes_the_intake() {
    let transport = Arc::new(MockTransport::new(bank()));
    let (mut handle, task) =
        spawn_session(ExamConfig::default(), Arc::clone(&transport), Arc::new(NoopStore));

    // First violation warns but the session keeps running.
    handle.events.send(IntegrityEvent::FocusLost).await.unwrap();
    handle.views.changed().await.unwrap();
    {
        let view = handle.views.borrow().clone().unwrap();
        assert_eq!(view.phase, Phase::InProgress);
        assert_eq!(view.violations, 1);
        assert!(view.warning.as_deref().unwrap().contains("Violation #1"));
    }

    handle
        .events
        .send(IntegrityEvent::RestrictedKeys)
        .await
        .unwrap();
    handle.events.send(IntegrityEvent::FocusLost).await.unwrap();

    let breakdown = task.await.unwrap().unwrap();
    assert_eq!(transport.submission_count(), 1);
    assert_eq!(
        transport.submissions.lock().unwrap()[0].1.cause,
        SubmitCause::ViolationLimit
    );
    assert_eq!(breakdown.attempted, 0);

    let view = handle.views.borrow().clone().unwrap();
    assert_eq!(view.phase, Phase::AutoSubmitted(SubmitCause::ViolationLimit));
    assert_eq!(view.violations, 3);

    // The runner is gone; late events have nowhere to land.
    assert!(handle.events.send(IntegrityEvent::FocusLost).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn server_detected_expiry_becomes_a_local_timeout() {
    let transport = Arc::new(MockTransport::expiring(bank()));
    let (handle, task) =
        spawn_session(ExamConfig::default(), Arc::clone(&transport), Arc::new(NoopStore));

    // The upsert for this answer comes back Expired, which must end the
    // session locally long before the 7200s countdown would.
    handle.commands.send(Command::SelectAnswer(0)).await.unwrap();
    task.await.unwrap().unwrap();

    let view = handle.views.borrow().clone().unwrap();
    assert_eq!(view.phase, Phase::AutoSubmitted(SubmitCause::Timeout));
    assert!(view.remaining_secs > 0);
    assert_eq!(transport.submission_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn final_submission_retries_through_transient_failures() {
    let transport = Arc::new(MockTransport::flaky(bank(), 2));
    let (handle, task) =
        spawn_session(ExamConfig::default(), Arc::clone(&transport), Arc::new(NoopStore));

    handle.commands.send(Command::SelectAnswer(1)).await.unwrap();
    handle.commands.send(Command::Submit).await.unwrap();

    let breakdown = task.await.unwrap().unwrap();
    assert_eq!(transport.submission_count(), 3);
    assert_eq!(breakdown.total, 4);

    let view = handle.views.borrow().clone().unwrap();
    assert_eq!(view.phase, Phase::Submitted);
}

#[tokio::test(start_paused = true)]
async fn final_submission_gives_up_after_three_attempts() {
    let transport = Arc::new(MockTransport::flaky(bank(), 5));
    let (handle, task) =
        spawn_session(ExamConfig::default(), Arc::clone(&transport), Arc::new(NoopStore));

    handle.commands.send(Command::Submit).await.unwrap();

    let result = task.await.unwrap();
    assert!(result.is_err());
    assert_eq!(transport.submission_count(), 3);

    // The local state is still terminal even though the upload failed.
    let view = handle.views.borrow().clone().unwrap();
    assert_eq!(view.phase, Phase::Submitted);
}

#[tokio::test(start_paused = true)]
async fn user_submit_matches_an_independent_scoring_pass() {
    let transport = Arc::new(MockTransport::new(bank()));
    let (handle, task) =
        spawn_session(ExamConfig::default(), Arc::clone(&transport), Arc::new(NoopStore));

    // Physics-0 correct, Physics-1 wrong, Chemistry-0 correct.
    handle.commands.send(Command::SelectAnswer(1)).await.unwrap();
    handle.commands.send(Command::SaveAndNext).await.unwrap();
    handle.commands.send(Command::SelectAnswer(3)).await.unwrap();
    handle
        .commands
        .send(Command::NavigateTo {
            section: "Chemistry".to_string(),
            ordinal: 0,
        })
        .await
        .unwrap();
    handle.commands.send(Command::SelectAnswer(2)).await.unwrap();
    handle.commands.send(Command::Submit).await.unwrap();

    let breakdown = task.await.unwrap().unwrap();

    let mut answers = BTreeMap::new();
    answers.insert(QuestionKey::new("Physics", 0), 1usize);
    answers.insert(QuestionKey::new("Physics", 1), 3usize);
    answers.insert(QuestionKey::new("Chemistry", 0), 2usize);
    assert_eq!(breakdown, scoring::score(&bank(), &answers, 1));
    assert_eq!(breakdown.total, 4 - 1 + 4);
}

#[tokio::test(start_paused = true)]
async fn snapshot_is_written_while_running_and_cleared_on_submit() {
    let dir = std::env::temp_dir().join(format!("exam-runner-test-{}", uuid::Uuid::new_v4()));
    let store = Arc::new(FileStore::new(dir));
    let transport = Arc::new(MockTransport::new(bank()));
    let (handle, task) = spawn_session(
        ExamConfig::default(),
        Arc::clone(&transport),
        Arc::clone(&store) as Arc<dyn SnapshotStore>,
    );

    // Answer selection saves immediately, no need to wait out the autosave
    // interval.
    handle.commands.send(Command::SelectAnswer(1)).await.unwrap();
    let mut views = handle.views.clone();
    views.changed().await.unwrap();
    assert!(store.get(SESSION_STATE_KEY).await.unwrap().is_some());

    handle.commands.send(Command::Submit).await.unwrap();
    task.await.unwrap().unwrap();
    assert!(store.get(SESSION_STATE_KEY).await.unwrap().is_none());
}
