use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use thiserror::Error;

use crate::occurrence::Window;
use crate::task::Task;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task `{0}` not found")]
    NotFound(String),
    #[error("conflicting write on task `{0}`")]
    Conflict(String),
    #[error("task store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence boundary of the occurrence engine. Read queries are scoped
/// per user; historical-occurrence insertion is idempotent per
/// `(original_task_id, occurrence date)` so a retried completion cannot
/// record the same occurrence twice.
pub trait TaskStore: Send + Sync {
    /// One-off tasks due inside the window, excluding completed ones.
    fn fetch_tasks_in_range(&self, user_id: &str, window: Window) -> Result<Vec<Task>, StoreError>;

    /// All recurring tasks of the user regardless of anchor date, excluding
    /// completed ones and historical copies.
    fn fetch_recurring_tasks(&self, user_id: &str) -> Result<Vec<Task>, StoreError>;

    fn fetch_task(&self, task_id: &str) -> Result<Task, StoreError>;

    fn insert_task(&self, task: Task) -> Result<Task, StoreError>;

    /// Persists a frozen completed copy of a recurring task's occurrence.
    /// Returns the already-stored copy when one exists for the same source
    /// task and occurrence date.
    fn insert_historical_occurrence(&self, occurrence: Task) -> Result<Task, StoreError>;

    fn update_task_due_date(
        &self,
        task_id: &str,
        new_due: DateTime<Utc>,
        reset_completion: bool,
    ) -> Result<Task, StoreError>;

    fn mark_task_completed(&self, task_id: &str) -> Result<Task, StoreError>;

    fn mark_task_uncompleted(&self, task_id: &str) -> Result<Task, StoreError>;

    /// Removes a task together with the historical copies that point at it.
    fn delete_task(&self, task_id: &str) -> Result<(), StoreError>;
}

impl<S: TaskStore + ?Sized> TaskStore for std::sync::Arc<S> {
    fn fetch_tasks_in_range(&self, user_id: &str, window: Window) -> Result<Vec<Task>, StoreError> {
        (**self).fetch_tasks_in_range(user_id, window)
    }

    fn fetch_recurring_tasks(&self, user_id: &str) -> Result<Vec<Task>, StoreError> {
        (**self).fetch_recurring_tasks(user_id)
    }

    fn fetch_task(&self, task_id: &str) -> Result<Task, StoreError> {
        (**self).fetch_task(task_id)
    }

    fn insert_task(&self, task: Task) -> Result<Task, StoreError> {
        (**self).insert_task(task)
    }

    fn insert_historical_occurrence(&self, occurrence: Task) -> Result<Task, StoreError> {
        (**self).insert_historical_occurrence(occurrence)
    }

    fn update_task_due_date(
        &self,
        task_id: &str,
        new_due: DateTime<Utc>,
        reset_completion: bool,
    ) -> Result<Task, StoreError> {
        (**self).update_task_due_date(task_id, new_due, reset_completion)
    }

    fn mark_task_completed(&self, task_id: &str) -> Result<Task, StoreError> {
        (**self).mark_task_completed(task_id)
    }

    fn mark_task_uncompleted(&self, task_id: &str) -> Result<Task, StoreError> {
        (**self).mark_task_uncompleted(task_id)
    }

    fn delete_task(&self, task_id: &str) -> Result<(), StoreError> {
        (**self).delete_task(task_id)
    }
}

#[derive(Default)]
struct UserCache {
    recurring: Option<Vec<Task>>,
    ranges: HashMap<(NaiveDate, NaiveDate), Vec<Task>>,
}

/// Reference store used by tests and by embedders that do not bring their
/// own persistence. Read queries are memoized per user; every write method
/// drops that user's cached queries before returning.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<String, Task>>,
    cache: RwLock<HashMap<String, UserCache>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.read().len()
    }

    fn invalidate(&self, user_id: &str) {
        self.cache.write().remove(user_id);
    }

    fn sorted(mut tasks: Vec<Task>) -> Vec<Task> {
        tasks.sort_by(|a, b| a.due.cmp(&b.due).then_with(|| a.id.cmp(&b.id)));
        tasks
    }
}

impl TaskStore for InMemoryTaskStore {
    fn fetch_tasks_in_range(&self, user_id: &str, window: Window) -> Result<Vec<Task>, StoreError> {
        let key = (window.start(), window.end());
        if let Some(hit) = self
            .cache
            .read()
            .get(user_id)
            .and_then(|cache| cache.ranges.get(&key))
        {
            tracing::debug!(user_id, "range query served from cache");
            return Ok(hit.clone());
        }
        let tasks = Self::sorted(
            self.tasks
                .read()
                .values()
                .filter(|task| task.user_id == user_id)
                .filter(|task| !task.completed && !task.is_recurring())
                .filter(|task| {
                    task.due_date()
                        .map(|date| window.contains(date))
                        .unwrap_or(false)
                })
                .cloned()
                .collect(),
        );
        self.cache
            .write()
            .entry(user_id.to_string())
            .or_default()
            .ranges
            .insert(key, tasks.clone());
        Ok(tasks)
    }

    fn fetch_recurring_tasks(&self, user_id: &str) -> Result<Vec<Task>, StoreError> {
        if let Some(hit) = self
            .cache
            .read()
            .get(user_id)
            .and_then(|cache| cache.recurring.clone())
        {
            tracing::debug!(user_id, "recurring query served from cache");
            return Ok(hit);
        }
        let tasks = Self::sorted(
            self.tasks
                .read()
                .values()
                .filter(|task| task.user_id == user_id)
                .filter(|task| task.is_recurring() && !task.completed)
                .cloned()
                .collect(),
        );
        self.cache
            .write()
            .entry(user_id.to_string())
            .or_default()
            .recurring = Some(tasks.clone());
        Ok(tasks)
    }

    fn fetch_task(&self, task_id: &str) -> Result<Task, StoreError> {
        self.tasks
            .read()
            .get(task_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))
    }

    fn insert_task(&self, task: Task) -> Result<Task, StoreError> {
        {
            let mut tasks = self.tasks.write();
            if tasks.contains_key(&task.id) {
                return Err(StoreError::Conflict(task.id));
            }
            tasks.insert(task.id.clone(), task.clone());
        }
        self.invalidate(&task.user_id);
        Ok(task)
    }

    fn insert_historical_occurrence(&self, occurrence: Task) -> Result<Task, StoreError> {
        let original = occurrence
            .original_task_id
            .clone()
            .ok_or_else(|| StoreError::Conflict(occurrence.id.clone()))?;
        {
            let mut tasks = self.tasks.write();
            let existing = tasks.values().find(|task| {
                task.is_recurrence_occurrence
                    && task.original_task_id.as_deref() == Some(original.as_str())
                    && task.due_date() == occurrence.due_date()
            });
            if let Some(existing) = existing {
                tracing::debug!(
                    original_task_id = %original,
                    "historical occurrence already recorded, keeping existing copy"
                );
                return Ok(existing.clone());
            }
            if tasks.contains_key(&occurrence.id) {
                return Err(StoreError::Conflict(occurrence.id));
            }
            tasks.insert(occurrence.id.clone(), occurrence.clone());
        }
        self.invalidate(&occurrence.user_id);
        Ok(occurrence)
    }

    fn update_task_due_date(
        &self,
        task_id: &str,
        new_due: DateTime<Utc>,
        reset_completion: bool,
    ) -> Result<Task, StoreError> {
        let updated = {
            let mut tasks = self.tasks.write();
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
            task.due = Some(new_due);
            if reset_completion {
                task.completed = false;
                task.completed_at = None;
            }
            task.updated_at = Utc::now();
            task.clone()
        };
        self.invalidate(&updated.user_id);
        Ok(updated)
    }

    fn mark_task_completed(&self, task_id: &str) -> Result<Task, StoreError> {
        let updated = {
            let mut tasks = self.tasks.write();
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
            let now = Utc::now();
            task.completed = true;
            task.completed_at = Some(now);
            task.updated_at = now;
            task.clone()
        };
        self.invalidate(&updated.user_id);
        Ok(updated)
    }

    fn mark_task_uncompleted(&self, task_id: &str) -> Result<Task, StoreError> {
        let updated = {
            let mut tasks = self.tasks.write();
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
            task.completed = false;
            task.completed_at = None;
            task.updated_at = Utc::now();
            task.clone()
        };
        self.invalidate(&updated.user_id);
        Ok(updated)
    }

    fn delete_task(&self, task_id: &str) -> Result<(), StoreError> {
        let removed = {
            let mut tasks = self.tasks.write();
            let removed = tasks
                .remove(task_id)
                .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
            tasks.retain(|_, task| task.original_task_id.as_deref() != Some(task_id));
            removed
        };
        self.invalidate(&removed.user_id);
        Ok(())
    }
}
