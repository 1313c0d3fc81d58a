// src/sync.rs

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::models::attempt::{
    AttemptStartedResponse, ResultResponse, SubmitAttemptRequest, SubmitAttemptResponse,
};
use crate::models::question::{PaperResponse, QuestionKey, StartAttemptRequest, SyncAnswerRequest};
use crate::models::score::ScoreBreakdown;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server rejected the call: {0}")]
    Rejected(String),

    #[error("question {0} is not part of this paper")]
    UnknownQuestion(QuestionKey),
}

/// Server response to an incremental upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Accepted,
    /// The server found the attempt past its expiry and finalized it.
    /// The client must stop and perform a local `submit(Timeout)`.
    Expired,
}

/// The network boundary of the session engine.
///
/// Incremental upserts are idempotent full overwrites keyed by question, so
/// out-of-order arrival of in-flight requests is tolerated; the final
/// submission carries the complete answer list and is the safety net for
/// any incremental loss.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn upsert_answer(
        &self,
        attempt_id: &str,
        key: &QuestionKey,
        selected: Option<i64>,
    ) -> Result<UpsertOutcome, SyncError>;

    /// The one authoritative call: the server re-scores independently and
    /// its breakdown, not the client's, is the result of record.
    async fn submit(
        &self,
        attempt_id: &str,
        request: &SubmitAttemptRequest,
    ) -> Result<ScoreBreakdown, SyncError>;

    async fn fetch_result(&self, attempt_id: &str) -> Result<ResultResponse, SyncError>;
}

/// HTTP implementation speaking to the exam backend.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    /// Server-side question ids by key, learned from the fetched paper.
    question_ids: HashMap<QuestionKey, i64>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, paper: &PaperResponse) -> Self {
        let question_ids = paper
            .sections
            .iter()
            .flat_map(|s| {
                s.questions
                    .iter()
                    .map(|q| (QuestionKey::new(&q.section, q.ordinal), q.id))
            })
            .collect();

        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            question_ids,
        }
    }

    /// Fetches the sectioned paper for a test.
    pub async fn fetch_paper(base_url: &str, test_id: &str) -> Result<PaperResponse, SyncError> {
        let response = reqwest::Client::new()
            .get(format!("{base_url}/api/exam/tests/{test_id}/questions"))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SyncError::Rejected(format!(
                "paper fetch failed with {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    /// Opens an attempt for the candidate; the server stamps the expiry.
    pub async fn start_attempt(
        &self,
        request: &StartAttemptRequest,
    ) -> Result<AttemptStartedResponse, SyncError> {
        let response = self
            .client
            .post(format!("{}/api/exam/attempts", self.base_url))
            .json(request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SyncError::Rejected(format!(
                "start attempt failed with {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn upsert_answer(
        &self,
        attempt_id: &str,
        key: &QuestionKey,
        selected: Option<i64>,
    ) -> Result<UpsertOutcome, SyncError> {
        let question_id = *self
            .question_ids
            .get(key)
            .ok_or_else(|| SyncError::UnknownQuestion(key.clone()))?;

        let response = self
            .client
            .post(format!(
                "{}/api/exam/attempts/{attempt_id}/answers",
                self.base_url
            ))
            .json(&SyncAnswerRequest {
                question_id,
                selected_option: selected,
            })
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => Ok(UpsertOutcome::Accepted),
            StatusCode::GONE => Ok(UpsertOutcome::Expired),
            s => Err(SyncError::Rejected(format!("upsert failed with {s}"))),
        }
    }

    async fn submit(
        &self,
        attempt_id: &str,
        request: &SubmitAttemptRequest,
    ) -> Result<ScoreBreakdown, SyncError> {
        let response = self
            .client
            .post(format!(
                "{}/api/exam/attempts/{attempt_id}/submit",
                self.base_url
            ))
            .json(request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SyncError::Rejected(format!(
                "final submission failed with {}",
                response.status()
            )));
        }
        let body: SubmitAttemptResponse = response.json().await?;
        Ok(body.breakdown)
    }

    async fn fetch_result(&self, attempt_id: &str) -> Result<ResultResponse, SyncError> {
        let response = self
            .client
            .get(format!(
                "{}/api/exam/attempts/{attempt_id}/result",
                self.base_url
            ))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SyncError::Rejected(format!(
                "result fetch failed with {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }
}
