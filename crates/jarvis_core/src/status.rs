use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::Task;

/// How many days ahead a pending task counts as "due soon".
pub const DUE_SOON_DAYS: i64 = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DueStatus {
    Completed,
    Overdue,
    DueToday,
    DueSoon,
    Later,
    Unscheduled,
}

/// Classifies a task against an explicit reference instant, so callers and
/// tests control the clock.
pub fn classify(task: &Task, now: DateTime<Utc>) -> DueStatus {
    classify_due(task.due, task.completed, now)
}

pub fn classify_due(due: Option<DateTime<Utc>>, completed: bool, now: DateTime<Utc>) -> DueStatus {
    if completed {
        return DueStatus::Completed;
    }
    let Some(due) = due else {
        return DueStatus::Unscheduled;
    };
    let days_left = (due.date_naive() - now.date_naive()).num_days();
    if days_left < 0 {
        DueStatus::Overdue
    } else if days_left == 0 {
        DueStatus::DueToday
    } else if days_left <= DUE_SOON_DAYS {
        DueStatus::DueSoon
    } else {
        DueStatus::Later
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn instant(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
            .single()
            .unwrap()
    }

    fn task_due(due: Option<DateTime<Utc>>) -> Task {
        let created = instant(2024, 1, 1, 8);
        Task {
            id: "t1".to_string(),
            user_id: "user-1".to_string(),
            title: "Task".to_string(),
            completed: false,
            completed_at: None,
            due,
            recurrence: None,
            is_recurrence_occurrence: false,
            original_task_id: None,
            project_id: None,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn classifies_against_the_given_instant() {
        let now = instant(2024, 1, 10, 12);
        assert_eq!(
            classify(&task_due(Some(instant(2024, 1, 9, 23))), now),
            DueStatus::Overdue
        );
        assert_eq!(
            classify(&task_due(Some(instant(2024, 1, 10, 6))), now),
            DueStatus::DueToday,
            "earlier the same day is still today, not overdue"
        );
        assert_eq!(
            classify(&task_due(Some(instant(2024, 1, 13, 9))), now),
            DueStatus::DueSoon
        );
        assert_eq!(
            classify(&task_due(Some(instant(2024, 1, 20, 9))), now),
            DueStatus::Later
        );
        assert_eq!(classify(&task_due(None), now), DueStatus::Unscheduled);
    }

    #[test]
    fn completed_wins_over_everything() {
        let mut task = task_due(Some(instant(2024, 1, 1, 9)));
        task.completed = true;
        assert_eq!(
            classify(&task, instant(2024, 6, 1, 12)),
            DueStatus::Completed
        );
    }
}
