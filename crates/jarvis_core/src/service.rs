use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::agenda::{build_agenda, AgendaView};
use crate::notifications::{NotificationRequest, NotificationSink};
use crate::occurrence::Window;
use crate::recurrence::{advance, RecurrenceSource};
use crate::store::TaskStore;
use crate::task::{Task, TaskDraft};

/// Result of completing a task's current occurrence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// A plain task (or a historical copy toggled directly) was marked done.
    Completed(Task),
    /// A recurring task recorded a historical copy and moved its anchor.
    Advanced {
        task: Task,
        occurrence: Task,
        next_due: DateTime<Utc>,
    },
}

pub struct TaskService {
    store: Box<dyn TaskStore>,
    notification_sink: Option<Box<dyn NotificationSink>>,
}

pub struct TaskServiceBuilder {
    store: Option<Box<dyn TaskStore>>,
    notification_sink: Option<Box<dyn NotificationSink>>,
}

impl TaskServiceBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            notification_sink: None,
        }
    }

    pub fn with_store(mut self, store: Box<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_notification_sink(mut self, sink: Box<dyn NotificationSink>) -> Self {
        self.notification_sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<TaskService> {
        let store = self
            .store
            .ok_or_else(|| anyhow!("task service requires a store"))?;
        Ok(TaskService {
            store,
            notification_sink: self.notification_sink,
        })
    }
}

impl TaskService {
    pub fn builder() -> TaskServiceBuilder {
        TaskServiceBuilder::new()
    }

    /// Everything visible in the window, grouped by day. A store failure
    /// fails the whole query; per-task expansion problems only drop the one
    /// task.
    #[instrument(skip(self))]
    pub fn upcoming(&self, user_id: &str, window: Window, now: DateTime<Utc>) -> Result<AgendaView> {
        let base = self.store.fetch_tasks_in_range(user_id, window)?;
        let recurring = self.store.fetch_recurring_tasks(user_id)?;
        Ok(build_agenda(&base, &recurring, window, now))
    }

    pub fn task(&self, task_id: &str) -> Result<Task> {
        Ok(self.store.fetch_task(task_id)?)
    }

    /// Creates a task from the language parser's draft. Legacy recurrence
    /// text is normalized here; the rest of the engine only ever sees the
    /// structured rule.
    pub fn capture_task(&self, user_id: &str, draft: TaskDraft, now: DateTime<Utc>) -> Result<Task> {
        let title = draft.title.trim().to_string();
        anyhow::ensure!(!title.is_empty(), "task title must not be empty");
        let recurrence = draft
            .recurrence
            .as_ref()
            .and_then(RecurrenceSource::normalize);
        let task = self.store.insert_task(Task {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title,
            completed: false,
            completed_at: None,
            due: draft.due_date,
            recurrence,
            is_recurrence_occurrence: false,
            original_task_id: None,
            project_id: draft.project_id,
            created_at: now,
            updated_at: now,
        })?;
        if let (Some(sink), Some(due)) = (self.notification_sink.as_ref(), task.due) {
            sink.schedule(NotificationRequest {
                title: format!("Task: {}", task.title),
                body: format!("Due on {}", due.date_naive()),
                scheduled_for: due,
            });
        }
        info!(task_id = %task.id, "task captured");
        Ok(task)
    }

    /// Completes the task's current occurrence. For a recurring task the
    /// historical copy is persisted before the anchor moves, so a failure
    /// in between leaves a state that a retry repairs instead of losing the
    /// completion record or skipping a period.
    pub fn complete_task(&self, task_id: &str, now: DateTime<Utc>) -> Result<CompletionOutcome> {
        let task = self.store.fetch_task(task_id)?;
        let rule = match (&task.recurrence, task.is_recurrence_occurrence) {
            (Some(rule), false) => rule.clone(),
            _ => {
                let completed = self.store.mark_task_completed(task_id)?;
                return Ok(CompletionOutcome::Completed(completed));
            }
        };

        let anchor = task.due.unwrap_or(now);
        let mut copy = task.clone();
        copy.id = Uuid::new_v4().to_string();
        copy.completed = true;
        copy.completed_at = Some(now);
        copy.is_recurrence_occurrence = true;
        copy.original_task_id = Some(task.id.clone());
        copy.due = Some(anchor);
        copy.created_at = now;
        copy.updated_at = now;
        let occurrence = self.store.insert_historical_occurrence(copy)?;

        let next_due = advance(anchor, &rule);
        let updated = self.store.update_task_due_date(&task.id, next_due, true)?;
        info!(task_id = %task.id, next_due = %next_due, "recurring task advanced");
        Ok(CompletionOutcome::Advanced {
            task: updated,
            occurrence,
            next_due,
        })
    }

    /// Re-opens a plain task. A recurring original is never left completed
    /// by the normal flow, so for one this is just a reset to pending.
    pub fn uncomplete_task(&self, task_id: &str) -> Result<Task> {
        let task = self.store.fetch_task(task_id)?;
        if task.is_recurring() {
            tracing::debug!(task_id = %task.id, "resetting recurring task to pending");
        }
        Ok(self.store.mark_task_uncompleted(task_id)?)
    }

    pub fn delete_task(&self, task_id: &str) -> Result<()> {
        let task = self.store.fetch_task(task_id)?;
        if let Some(sink) = self.notification_sink.as_ref() {
            sink.clear_for_task(&task);
        }
        self.store.delete_task(task_id)?;
        Ok(())
    }
}
