use chrono::{DateTime, Datelike, Days, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::recurrence::{add_months_rolling, Frequency};
use crate::task::Task;

/// Inclusive date range for which occurrences are materialized.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Window {
    start: NaiveDate,
    end: NaiveDate,
}

impl Window {
    pub fn new(start: NaiveDate, end: NaiveDate) -> anyhow::Result<Self> {
        anyhow::ensure!(start <= end, "window start {start} is after end {end}");
        Ok(Self { start, end })
    }

    /// The window covering one calendar month.
    pub fn month(year: i32, month: u32) -> anyhow::Result<Self> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| anyhow::anyhow!("invalid month {year}-{month}"))?;
        let end = start
            .checked_add_months(chrono::Months::new(1))
            .and_then(|next| next.pred_opt())
            .ok_or_else(|| anyhow::anyhow!("month {year}-{month} out of range"))?;
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        std::iter::successors(Some(self.start), move |day| {
            day.succ_opt().filter(|next| *next <= end)
        })
    }
}

/// Identity of a generated occurrence, compared by value. Generated
/// occurrences are never persisted; the id only has to be unique within one
/// window query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OccurrenceId {
    pub original_task_id: String,
    pub date: NaiveDate,
    pub sequence: u32,
}

/// One concrete date implied by a recurring task's rule, carrying the
/// display fields of its source task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Occurrence {
    pub id: OccurrenceId,
    pub title: String,
    pub due: DateTime<Utc>,
    pub project_id: Option<String>,
    pub user_id: String,
    /// True when this occurrence falls on the task's current anchor date,
    /// i.e. it is the task's own next occurrence rather than a projection.
    pub is_anchor: bool,
}

/// Expands one recurring task into its occurrences inside the window,
/// ordered by date, without duplicates. A malformed rule yields no
/// occurrences; an absent anchor falls back to the reference instant.
pub fn expand_in_window(task: &Task, window: Window, now: DateTime<Utc>) -> Vec<Occurrence> {
    let Some(rule) = task.recurrence.as_ref() else {
        tracing::warn!(task_id = %task.id, "expansion requested for a task without recurrence");
        return Vec::new();
    };
    if rule.interval == 0 {
        tracing::warn!(task_id = %task.id, "recurrence interval must be positive");
        return Vec::new();
    }

    let anchor_instant = task.due.unwrap_or(now);
    let anchor = anchor_instant.date_naive();
    let time_of_day = anchor_instant.time();

    let mut dates = match rule.frequency {
        Frequency::Daily => cadence_dates(anchor, i64::from(rule.interval), window),
        Frequency::Weekly => match rule.days_of_week.as_deref() {
            None => cadence_dates(anchor, i64::from(rule.interval) * 7, window),
            Some(days) => week_block_dates(anchor, rule.interval, days, window),
        },
        Frequency::Monthly => month_cadence_dates(anchor, rule.interval, window),
        Frequency::Yearly => month_cadence_dates(anchor, rule.interval.saturating_mul(12), window),
    };

    // The anchor is the task's current occurrence and is always part of the
    // window's sequence when it falls inside it, even for weekday-restricted
    // rules whose set does not cover the anchor's weekday.
    if window.contains(anchor) {
        dates.push(anchor);
    }
    dates.sort_unstable();
    dates.dedup();

    dates
        .into_iter()
        .enumerate()
        .map(|(index, date)| Occurrence {
            id: OccurrenceId {
                original_task_id: task.id.clone(),
                date,
                sequence: index as u32,
            },
            title: task.title.clone(),
            due: Utc.from_utc_datetime(&date.and_time(time_of_day)),
            project_id: task.project_id.clone(),
            user_id: task.user_id.clone(),
            is_anchor: date == anchor,
        })
        .collect()
}

/// Dates at a fixed day cadence from the anchor. The first in-window
/// candidate is found by integer division on the day gap, so an anchor far
/// in the past costs the same as one inside the window.
fn cadence_dates(anchor: NaiveDate, step_days: i64, window: Window) -> Vec<NaiveDate> {
    let mut current = anchor;
    if anchor < window.start() {
        let gap = (window.start() - anchor).num_days();
        let skip = (gap + step_days - 1) / step_days;
        match anchor.checked_add_days(Days::new((skip * step_days) as u64)) {
            Some(first) => current = first,
            None => return Vec::new(),
        }
    }
    let mut out = Vec::new();
    while current <= window.end() {
        out.push(current);
        match current.checked_add_days(Days::new(step_days as u64)) {
            Some(next) => current = next,
            None => break,
        }
    }
    out
}

/// Weekly cadence restricted to a weekday set: each cadence point starts a
/// seven-day block, and every requested weekday maps to one date inside the
/// block. Blocks stop once their start passes the window end.
fn week_block_dates(anchor: NaiveDate, interval: u32, days: &[u8], window: Window) -> Vec<NaiveDate> {
    let block_days = i64::from(interval) * 7;
    let mut block = anchor;
    if anchor < window.start() {
        // Blocks cover seven days, so the last block starting up to six days
        // before the window can still contribute.
        let gap = (window.start() - anchor).num_days();
        let skip = ((gap - 6).max(0)) / block_days;
        match anchor.checked_add_days(Days::new((skip * block_days) as u64)) {
            Some(first) => block = first,
            None => return Vec::new(),
        }
    }
    let mut out = Vec::new();
    while block <= window.end() {
        let block_weekday = i64::from(block.weekday().num_days_from_sunday());
        for &day in days {
            let offset = (i64::from(day) - block_weekday).rem_euclid(7);
            let Some(date) = block.checked_add_days(Days::new(offset as u64)) else {
                continue;
            };
            if window.contains(date) {
                out.push(date);
            }
        }
        match block.checked_add_days(Days::new(block_days as u64)) {
            Some(next) => block = next,
            None => break,
        }
    }
    out.sort_unstable();
    out
}

/// Month-granularity cadence: the k-th occurrence is the anchor moved by
/// `k * interval_months`, computed from the anchor each time so a day-31
/// anchor stays on the 31st wherever the month allows.
fn month_cadence_dates(anchor: NaiveDate, interval_months: u32, window: Window) -> Vec<NaiveDate> {
    if interval_months == 0 {
        return Vec::new();
    }
    let mut step: u32 = 0;
    if anchor < window.start() {
        // Cheap lower bound on the first candidate; months never exceed 31
        // days, so this undershoots by at most a handful of steps.
        let gap = (window.start() - anchor).num_days();
        step = (gap / (i64::from(interval_months) * 31)).max(0) as u32;
    }
    let mut out = Vec::new();
    loop {
        let Some(months) = step.checked_mul(interval_months) else {
            break;
        };
        let date = add_months_rolling(anchor, months);
        if date > window.end() {
            break;
        }
        if date >= window.start() {
            out.push(date);
        }
        step += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::Recurrence;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn instant(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
            .single()
            .unwrap()
    }

    fn recurring_task(id: &str, due: DateTime<Utc>, rule: Recurrence) -> Task {
        let created = instant(2023, 12, 1, 8);
        Task {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            title: format!("Task {id}"),
            completed: false,
            completed_at: None,
            due: Some(due),
            recurrence: Some(rule),
            is_recurrence_occurrence: false,
            original_task_id: None,
            project_id: None,
            created_at: created,
            updated_at: created,
        }
    }

    fn window(start: NaiveDate, end: NaiveDate) -> Window {
        Window::new(start, end).unwrap()
    }

    #[test]
    fn daily_rule_fills_the_window() {
        let task = recurring_task(
            "t1",
            instant(2024, 1, 1, 9),
            Recurrence::new(Frequency::Daily, 1),
        );
        let occurrences =
            expand_in_window(&task, window(date(2024, 1, 10), date(2024, 1, 12)), instant(2024, 1, 10, 0));
        let dates: Vec<NaiveDate> = occurrences.iter().map(|occ| occ.id.date).collect();
        assert_eq!(
            dates,
            vec![date(2024, 1, 10), date(2024, 1, 11), date(2024, 1, 12)]
        );
        assert!(occurrences.iter().all(|occ| !occ.is_anchor));
        assert!(occurrences.iter().all(|occ| occ.due.time() == instant(2024, 1, 1, 9).time()));
    }

    #[test]
    fn daily_count_matches_gap_arithmetic() {
        // Anchor 2023-12-25, every 3 days: first in-window candidate is
        // 2024-01-12, then every third day through the end.
        let task = recurring_task(
            "t1",
            instant(2023, 12, 25, 9),
            Recurrence::new(Frequency::Daily, 3),
        );
        let win = window(date(2024, 1, 10), date(2024, 1, 31));
        let occurrences = expand_in_window(&task, win, instant(2024, 1, 10, 0));
        let first = occurrences.first().expect("at least one occurrence");
        assert_eq!(first.id.date, date(2024, 1, 12));
        let expected = (win.end() - first.id.date).num_days() / 3 + 1;
        assert_eq!(occurrences.len() as i64, expected);
        assert!(occurrences.iter().all(|occ| win.contains(occ.id.date)));
    }

    #[test]
    fn weekly_rule_without_day_set_steps_whole_weeks() {
        let task = recurring_task(
            "t1",
            instant(2024, 1, 1, 9),
            Recurrence::new(Frequency::Weekly, 2),
        );
        let occurrences = expand_in_window(
            &task,
            window(date(2024, 1, 1), date(2024, 2, 12)),
            instant(2024, 1, 1, 0),
        );
        let dates: Vec<NaiveDate> = occurrences.iter().map(|occ| occ.id.date).collect();
        assert_eq!(
            dates,
            vec![
                date(2024, 1, 1),
                date(2024, 1, 15),
                date(2024, 1, 29),
                date(2024, 2, 12)
            ]
        );
        assert!(occurrences[0].is_anchor);
    }

    #[test]
    fn weekly_day_set_emits_each_requested_weekday() {
        // 2024-01-01 is a Monday; Mondays and Wednesdays over two weeks.
        let rule = Recurrence {
            frequency: Frequency::Weekly,
            interval: 1,
            days_of_week: Some(vec![1, 3]),
        };
        let task = recurring_task("t1", instant(2024, 1, 1, 9), rule);
        let occurrences = expand_in_window(
            &task,
            window(date(2024, 1, 1), date(2024, 1, 14)),
            instant(2024, 1, 1, 0),
        );
        let dates: Vec<NaiveDate> = occurrences.iter().map(|occ| occ.id.date).collect();
        assert_eq!(
            dates,
            vec![
                date(2024, 1, 1),
                date(2024, 1, 3),
                date(2024, 1, 8),
                date(2024, 1, 10)
            ]
        );
    }

    #[test]
    fn weekly_day_set_far_past_anchor_lands_on_correct_weekdays() {
        // Anchor on a Monday months before the window; only Fridays requested.
        let rule = Recurrence {
            frequency: Frequency::Weekly,
            interval: 1,
            days_of_week: Some(vec![5]),
        };
        let task = recurring_task("t1", instant(2023, 10, 2, 9), rule);
        let occurrences = expand_in_window(
            &task,
            window(date(2024, 1, 10), date(2024, 1, 31)),
            instant(2024, 1, 10, 0),
        );
        let dates: Vec<NaiveDate> = occurrences.iter().map(|occ| occ.id.date).collect();
        assert_eq!(
            dates,
            vec![date(2024, 1, 12), date(2024, 1, 19), date(2024, 1, 26)]
        );
    }

    #[test]
    fn monthly_rule_keeps_day_of_month_from_anchor() {
        let task = recurring_task(
            "t1",
            instant(2023, 10, 31, 9),
            Recurrence::new(Frequency::Monthly, 1),
        );
        let occurrences = expand_in_window(
            &task,
            window(date(2024, 1, 1), date(2024, 3, 31)),
            instant(2024, 1, 1, 0),
        );
        let dates: Vec<NaiveDate> = occurrences.iter().map(|occ| occ.id.date).collect();
        // The 31st exists in January and March; February's candidate spills
        // to March 2nd, computed from the anchor rather than compounded.
        assert_eq!(
            dates,
            vec![date(2024, 1, 31), date(2024, 3, 2), date(2024, 3, 31)]
        );
    }

    #[test]
    fn yearly_rule_steps_whole_years() {
        let task = recurring_task(
            "t1",
            instant(2020, 7, 4, 9),
            Recurrence::new(Frequency::Yearly, 2),
        );
        let occurrences = expand_in_window(
            &task,
            window(date(2024, 1, 1), date(2026, 12, 31)),
            instant(2024, 1, 1, 0),
        );
        let dates: Vec<NaiveDate> = occurrences.iter().map(|occ| occ.id.date).collect();
        assert_eq!(dates, vec![date(2024, 7, 4), date(2026, 7, 4)]);
    }

    #[test]
    fn anchor_inside_window_is_tagged_and_emitted_once() {
        let task = recurring_task(
            "t1",
            instant(2024, 1, 11, 9),
            Recurrence::new(Frequency::Daily, 1),
        );
        let occurrences = expand_in_window(
            &task,
            window(date(2024, 1, 10), date(2024, 1, 12)),
            instant(2024, 1, 10, 0),
        );
        let anchors: Vec<&Occurrence> = occurrences.iter().filter(|occ| occ.is_anchor).collect();
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].id.date, date(2024, 1, 11));
        let dates: Vec<NaiveDate> = occurrences.iter().map(|occ| occ.id.date).collect();
        assert_eq!(
            dates,
            vec![date(2024, 1, 11), date(2024, 1, 12)],
            "the anchor must not be emitted twice"
        );
    }

    #[test]
    fn zero_interval_yields_no_occurrences() {
        let rule = Recurrence {
            frequency: Frequency::Daily,
            interval: 0,
            days_of_week: None,
        };
        let task = recurring_task("t1", instant(2024, 1, 1, 9), rule);
        let occurrences = expand_in_window(
            &task,
            window(date(2024, 1, 1), date(2024, 1, 31)),
            instant(2024, 1, 1, 0),
        );
        assert!(occurrences.is_empty());
    }

    #[test]
    fn anchor_after_window_yields_nothing() {
        let task = recurring_task(
            "t1",
            instant(2024, 3, 1, 9),
            Recurrence::new(Frequency::Daily, 1),
        );
        let occurrences = expand_in_window(
            &task,
            window(date(2024, 1, 1), date(2024, 1, 31)),
            instant(2024, 1, 1, 0),
        );
        assert!(occurrences.is_empty());
    }

    #[test]
    fn missing_anchor_falls_back_to_reference_instant() {
        let mut task = recurring_task(
            "t1",
            instant(2024, 1, 5, 9),
            Recurrence::new(Frequency::Daily, 7),
        );
        task.due = None;
        let now = instant(2024, 1, 5, 9);
        let occurrences = expand_in_window(&task, window(date(2024, 1, 1), date(2024, 1, 31)), now);
        let dates: Vec<NaiveDate> = occurrences.iter().map(|occ| occ.id.date).collect();
        assert_eq!(
            dates,
            vec![date(2024, 1, 5), date(2024, 1, 12), date(2024, 1, 19), date(2024, 1, 26)]
        );
    }

    #[test]
    fn occurrence_ids_are_unique_within_a_window() {
        let rule = Recurrence {
            frequency: Frequency::Weekly,
            interval: 1,
            days_of_week: Some(vec![1, 3, 5]),
        };
        let task = recurring_task("t1", instant(2024, 1, 1, 9), rule);
        let occurrences = expand_in_window(
            &task,
            window(date(2024, 1, 1), date(2024, 3, 31)),
            instant(2024, 1, 1, 0),
        );
        let mut ids: Vec<&OccurrenceId> = occurrences.iter().map(|occ| &occ.id).collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }

    #[test]
    fn window_days_covers_both_endpoints() {
        let win = window(date(2024, 2, 27), date(2024, 3, 2));
        let days: Vec<NaiveDate> = win.days().collect();
        assert_eq!(days.len(), 5);
        assert_eq!(days[0], date(2024, 2, 27));
        assert_eq!(days[4], date(2024, 3, 2));
    }

    #[test]
    fn month_window_spans_the_whole_month() {
        let win = Window::month(2024, 2).unwrap();
        assert_eq!(win.start(), date(2024, 2, 1));
        assert_eq!(win.end(), date(2024, 2, 29));
        assert!(Window::month(2024, 13).is_err());
    }
}
