use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::generation::OutputFormat;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestImage {
    pub filename: String,
    pub format: OutputFormat,
    pub url: String,
}

/// The images shown right after a generation. Starts empty, is replaced as a
/// whole by each new generation and emptied by a reset. Files on disk are
/// never touched from here.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionState {
    pub latest: Vec<LatestImage>,
    pub elapsed_seconds: Option<f64>,
    pub generated_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn replace(&mut self, latest: Vec<LatestImage>, elapsed_seconds: f64) {
        *self = SessionState {
            latest,
            elapsed_seconds: Some(elapsed_seconds),
            generated_at: Some(Utc::now()),
        };
    }

    pub fn reset(&mut self) {
        *self = SessionState::default();
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}
