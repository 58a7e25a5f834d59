//! The normalized stage-outcome record (C3's LogLine datum from spec.md §3).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failure,
    Ignored,
}

/// One of the three granularities at which spans open and notifications
/// fire (GLOSSARY: "Stage").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Action,
    Output,
    Notification,
}

/// Normalized record of a stage's outcome. Used both for notifier payloads
/// and metrics labels (spec.md §3).
#[derive(Debug, Clone, Default, Serialize)]
pub struct LogLine {
    pub time: Option<DateTime<Utc>>,
    pub trace_id: String,
    pub rule: Option<String>,
    pub action: Option<String>,
    pub actionner: Option<String>,
    pub actionner_category: Option<String>,
    pub output_category: Option<String>,
    pub notifier: Option<String>,
    pub target: Option<String>,
    pub stage: Option<Stage>,
    pub status: Option<Status>,
    pub objects: BTreeMap<String, String>,
    pub output: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub message: Option<String>,
}

impl LogLine {
    pub fn new(trace_id: impl Into<String>) -> Self {
        LogLine {
            time: Some(Utc::now()),
            trace_id: trace_id.into(),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }
}
