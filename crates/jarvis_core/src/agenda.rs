use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::occurrence::{expand_in_window, Occurrence, OccurrenceId, Window};
use crate::status::{classify_due, DueStatus};
use crate::task::Task;

/// Identity of an agenda entry. Persisted tasks keep their stored id;
/// generated occurrences carry their composite key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryId {
    Task(String),
    Occurrence(OccurrenceId),
}

/// One row of the upcoming view: a one-off task due in the window, the
/// current occurrence of a recurring task, or a projected occurrence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgendaEntry {
    pub id: EntryId,
    pub title: String,
    pub due: DateTime<Utc>,
    pub due_status: DueStatus,
    pub project_id: Option<String>,
    pub is_recurrence_occurrence: bool,
    pub original_task_id: Option<String>,
}

impl AgendaEntry {
    fn from_task(task: &Task, due: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id: EntryId::Task(task.id.clone()),
            title: task.title.clone(),
            due,
            due_status: classify_due(Some(due), false, now),
            project_id: task.project_id.clone(),
            is_recurrence_occurrence: false,
            original_task_id: None,
        }
    }

    fn from_occurrence(occurrence: Occurrence, now: DateTime<Utc>) -> Self {
        Self {
            title: occurrence.title,
            due: occurrence.due,
            due_status: classify_due(Some(occurrence.due), false, now),
            project_id: occurrence.project_id,
            is_recurrence_occurrence: true,
            original_task_id: Some(occurrence.id.original_task_id.clone()),
            id: EntryId::Occurrence(occurrence.id),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.due.date_naive()
    }
}

/// Day-keyed view of everything visible inside one window. Every day of the
/// window is present, including empty ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgendaView {
    days: BTreeMap<NaiveDate, Vec<AgendaEntry>>,
}

impl AgendaView {
    pub fn day(&self, date: NaiveDate) -> &[AgendaEntry] {
        self.days.get(&date).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn days(&self) -> impl Iterator<Item = (NaiveDate, &[AgendaEntry])> {
        self.days.iter().map(|(date, entries)| (*date, entries.as_slice()))
    }

    pub fn entries(&self) -> impl Iterator<Item = &AgendaEntry> {
        self.days.values().flatten()
    }

    pub fn entry_count(&self) -> usize {
        self.days.values().map(Vec::len).sum()
    }
}

/// Merges one-off tasks and expanded recurring tasks into a day-keyed view.
/// Duplicate base tasks and duplicate entry ids are dropped keep-first; a
/// task that fails to expand is skipped, never fatal to the whole view.
#[instrument(skip(base_tasks, recurring_tasks))]
pub fn build_agenda(
    base_tasks: &[Task],
    recurring_tasks: &[Task],
    window: Window,
    now: DateTime<Utc>,
) -> AgendaView {
    let mut seen_tasks: HashSet<&str> = HashSet::new();
    let mut one_offs: Vec<&Task> = Vec::new();
    let mut recurring: Vec<&Task> = Vec::new();
    for task in base_tasks.iter().chain(recurring_tasks.iter()) {
        if !seen_tasks.insert(task.id.as_str()) {
            tracing::warn!(task_id = %task.id, "duplicate task in base set, keeping first");
            continue;
        }
        if task.is_recurring() {
            recurring.push(task);
        } else {
            one_offs.push(task);
        }
    }

    let mut entries: Vec<AgendaEntry> = Vec::new();
    for task in one_offs {
        if task.completed {
            continue;
        }
        let Some(due) = task.due else {
            continue;
        };
        if window.contains(due.date_naive()) {
            entries.push(AgendaEntry::from_task(task, due, now));
        }
    }
    for task in recurring {
        for occurrence in expand_in_window(task, window, now) {
            if occurrence.is_anchor {
                // The anchor occurrence is the task itself, not a projection.
                entries.push(AgendaEntry::from_task(task, occurrence.due, now));
            } else {
                entries.push(AgendaEntry::from_occurrence(occurrence, now));
            }
        }
    }

    // Generation must emit unique ids; any same-id entry that slips through
    // is dropped keep-first.
    let mut seen_entries: HashSet<EntryId> = HashSet::new();
    entries.retain(|entry| {
        if seen_entries.insert(entry.id.clone()) {
            true
        } else {
            tracing::warn!(entry_id = ?entry.id, "duplicate agenda entry dropped");
            false
        }
    });

    let mut days: BTreeMap<NaiveDate, Vec<AgendaEntry>> =
        window.days().map(|date| (date, Vec::new())).collect();
    for entry in entries {
        days.entry(entry.date()).or_default().push(entry);
    }
    for list in days.values_mut() {
        list.sort_by(|a, b| {
            a.due
                .time()
                .cmp(&b.due.time())
                .then_with(|| a.id.cmp(&b.id))
        });
    }

    AgendaView { days }
}
