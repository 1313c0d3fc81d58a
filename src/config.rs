// src/config.rs

use std::env;

use dotenvy::dotenv;
use serde::{Deserialize, Serialize};

/// Server-side settings, loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://exam.db?mode=rwc".to_string());

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Self {
            database_url,
            rust_log,
        }
    }
}

/// Engine knobs, instantiated once per test variant.
///
/// The defaults preserve the values the platform has always shipped with:
/// a 2 hour paper, 30s wall-clock resync with 5s tolerance, autosave every
/// 10s, forced submission on the 3rd violation, and a flat -1 penalty for a
/// wrong answer. The drift tolerance must stay above scheduling jitter and
/// below the resync interval, or minor delays start counting as tampering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamConfig {
    pub total_duration_secs: u64,
    pub resync_interval_secs: u64,
    pub drift_tolerance_secs: u64,
    pub autosave_interval_secs: u64,
    pub violation_threshold: u32,
    pub snapshot_staleness_secs: u64,
    pub wrong_penalty: i64,
}

impl Default for ExamConfig {
    fn default() -> Self {
        Self {
            total_duration_secs: 7200,
            resync_interval_secs: 30,
            drift_tolerance_secs: 5,
            autosave_interval_secs: 10,
            violation_threshold: 3,
            snapshot_staleness_secs: 4 * 60 * 60,
            wrong_penalty: 1,
        }
    }
}
