//! Append-only audit log attached to each job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::common::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_log_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    Created,
    Progress,
    Note,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "log_level", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct JobLog {
    pub log_id: i64,
    pub job_id: JobId,
    pub time: DateTime<Utc>,
    #[sqlx(rename = "type")]
    pub log_type: LogType,
    pub level: LogLevel,
    pub message: String,
    pub raw: Option<String>,
}

/// A log entry not yet attached to a job. Written together with the state
/// change it describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub log_type: LogType,
    pub level: LogLevel,
    pub message: String,
    pub raw: Option<String>,
}

impl LogEntry {
    pub fn created(message: impl Into<String>) -> Self {
        Self {
            log_type: LogType::Created,
            level: LogLevel::Info,
            message: message.into(),
            raw: None,
        }
    }

    pub fn progress(message: impl Into<String>) -> Self {
        Self {
            log_type: LogType::Progress,
            level: LogLevel::Info,
            message: message.into(),
            raw: None,
        }
    }

    pub fn note(message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            log_type: LogType::Note,
            level: LogLevel::Info,
            message: message.into(),
            raw: Some(raw.into()),
        }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }
}
