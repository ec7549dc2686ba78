use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::recurrence::{Recurrence, RecurrenceSource};

/// A persisted task. For a recurring task `due` is the anchor date: the due
/// date of its next, not yet completed occurrence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub due: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recurrence: Option<Recurrence>,
    /// True only for frozen historical copies of completed occurrences.
    #[serde(default)]
    pub is_recurrence_occurrence: bool,
    #[serde(default)]
    pub original_task_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A task that should be expanded into occurrences. Historical copies
    /// carry the rule of their source but are never expanded again.
    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some() && !self.is_recurrence_occurrence
    }

    pub fn due_date(&self) -> Option<NaiveDate> {
        self.due.map(|due| due.date_naive())
    }
}

/// Structured output of the external natural-language parser, consumed at
/// the service boundary. `recurrence` arrives either as a structured rule or
/// as the parser's free-text descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    pub title: String,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, alias = "recurrenceDescription")]
    pub recurrence: Option<RecurrenceSource>,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl TaskDraft {
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).map_err(|err| anyhow::anyhow!("invalid task draft: {err}"))
    }
}
