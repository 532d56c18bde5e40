//! Trigger metadata for workflow initiation.
//!
//! The engine itself only starts runs on request. Trigger settings describe
//! how the workflow is meant to be started (manually, on a schedule, or by a
//! webhook) so that collaborators can wire the corresponding source.

use serde::{Deserialize, Serialize};

/// How a workflow is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// User-initiated.
    #[default]
    Manual,
    /// Time-based with a cron expression.
    Schedule,
    /// Inbound HTTP webhook.
    Webhook,
}

impl std::fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Schedule => write!(f, "schedule"),
            Self::Webhook => write!(f, "webhook"),
        }
    }
}

/// Trigger metadata stored on a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TriggerSettings {
    /// Trigger mode.
    pub mode: TriggerMode,
    /// Cron expression (e.g., "0 7 * * *" for 7am daily).
    pub schedule: Option<String>,
    /// The webhook path (e.g., "/hooks/my-workflow").
    pub webhook_path: Option<String>,
}

impl TriggerSettings {
    /// Manual trigger.
    #[must_use]
    pub fn manual() -> Self {
        Self::default()
    }

    /// Schedule trigger with a cron expression.
    #[must_use]
    pub fn schedule(cron: impl Into<String>) -> Self {
        Self {
            mode: TriggerMode::Schedule,
            schedule: Some(cron.into()),
            webhook_path: None,
        }
    }

    /// Webhook trigger on a path.
    #[must_use]
    pub fn webhook(path: impl Into<String>) -> Self {
        Self {
            mode: TriggerMode::Webhook,
            schedule: None,
            webhook_path: Some(path.into()),
        }
    }
}
