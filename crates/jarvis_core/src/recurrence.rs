use chrono::{DateTime, Datelike, Days, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Yearly => "yearly",
        }
    }

    pub fn parse(value: &str) -> Option<Frequency> {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily" => Some(Frequency::Daily),
            "weekly" => Some(Frequency::Weekly),
            "monthly" => Some(Frequency::Monthly),
            "yearly" => Some(Frequency::Yearly),
            _ => None,
        }
    }
}

/// Structured repetition cadence. `days_of_week` restricts a weekly rule to
/// specific weekdays, numbered 0-6 with 0 = Sunday; absent means "every
/// `interval` weeks on the anchor's weekday".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recurrence {
    pub frequency: Frequency,
    pub interval: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_of_week: Option<Vec<u8>>,
}

/// Recurrence as it arrives at the boundary: already structured, or the
/// legacy free-text descriptor kept by older records and the language
/// parser. Only the structured form ever reaches occurrence math.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RecurrenceSource {
    Rule(Recurrence),
    Legacy(String),
}

impl RecurrenceSource {
    /// Best effort: unrecognized legacy text and invalid rules yield `None`,
    /// never an error.
    pub fn normalize(&self) -> Option<Recurrence> {
        match self {
            RecurrenceSource::Rule(rule) => rule.clone().normalized(),
            RecurrenceSource::Legacy(text) => Recurrence::from_text(text),
        }
    }
}

impl Recurrence {
    pub fn new(frequency: Frequency, interval: u32) -> Self {
        Self {
            frequency,
            interval: interval.max(1),
            days_of_week: None,
        }
    }

    /// Validates and canonicalizes a rule: positive interval, weekday set
    /// sorted, deduplicated, restricted to weekly rules and to 0-6.
    pub fn normalized(self) -> Option<Recurrence> {
        if self.interval == 0 {
            tracing::warn!("rejecting recurrence with zero interval");
            return None;
        }
        let days_of_week = match self.days_of_week {
            Some(days) => {
                if self.frequency != Frequency::Weekly {
                    tracing::warn!(
                        frequency = self.frequency.as_str(),
                        "dropping weekday set on non-weekly recurrence"
                    );
                    None
                } else {
                    let mut kept: Vec<u8> = days.into_iter().filter(|day| *day <= 6).collect();
                    kept.sort_unstable();
                    kept.dedup();
                    if kept.is_empty() {
                        None
                    } else {
                        Some(kept)
                    }
                }
            }
            None => None,
        };
        Some(Recurrence {
            frequency: self.frequency,
            interval: self.interval,
            days_of_week,
        })
    }

    /// Parses the legacy free-text descriptors ("todo dia", "toda semana",
    /// "a cada 3 dias", "toda segunda"). Unrecognized text yields `None`.
    pub fn from_text(text: &str) -> Option<Recurrence> {
        let normalized = text.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }

        if let Some(rest) = normalized.strip_prefix("a cada ") {
            return parse_interval_phrase(rest);
        }

        let frequency = match normalized.as_str() {
            "todo dia" | "todos os dias" | "diariamente" | "cada dia" => Some(Frequency::Daily),
            "toda semana" | "todas as semanas" | "semanalmente" | "cada semana" => {
                Some(Frequency::Weekly)
            }
            "todo mês" | "todo mes" | "todos os meses" | "mensalmente" | "cada mês"
            | "cada mes" => Some(Frequency::Monthly),
            "todo ano" | "todos os anos" | "anualmente" | "cada ano" => Some(Frequency::Yearly),
            _ => None,
        };
        if let Some(frequency) = frequency {
            return Some(Recurrence::new(frequency, 1));
        }

        let weekday = normalized
            .strip_prefix("toda ")
            .or_else(|| normalized.strip_prefix("todo "))
            .and_then(parse_weekday_name)?;
        Recurrence {
            frequency: Frequency::Weekly,
            interval: 1,
            days_of_week: Some(vec![weekday]),
        }
        .normalized()
    }

    /// Human-readable description for display, e.g.
    /// "Semanalmente (a cada 2 semanas)". Not involved in scheduling.
    pub fn describe(&self) -> String {
        let (adverb, plural_unit) = match self.frequency {
            Frequency::Daily => ("Diariamente", "dias"),
            Frequency::Weekly => ("Semanalmente", "semanas"),
            Frequency::Monthly => ("Mensalmente", "meses"),
            Frequency::Yearly => ("Anualmente", "anos"),
        };
        let day_names = self.days_of_week.as_ref().map(|days| {
            days.iter()
                .map(|day| weekday_abbrev(*day))
                .collect::<Vec<_>>()
                .join(", ")
        });
        match (self.interval, day_names) {
            (0 | 1, None) => adverb.to_string(),
            (0 | 1, Some(names)) => format!("{adverb} ({names})"),
            (n, None) => format!("{adverb} (a cada {n} {plural_unit})"),
            (n, Some(names)) => format!("{adverb} (a cada {n} {plural_unit}: {names})"),
        }
    }

    /// Column triple used at the persistence boundary.
    pub fn to_columns(&self) -> (&'static str, u32, Option<Vec<u8>>) {
        (
            self.frequency.as_str(),
            self.interval,
            self.days_of_week.clone(),
        )
    }

    /// Rebuilds a rule from its persisted columns, discarding rows that no
    /// longer validate.
    pub fn from_columns(
        recurrence_type: &str,
        interval: u32,
        days_of_week: Option<Vec<u8>>,
    ) -> Option<Recurrence> {
        let Some(frequency) = Frequency::parse(recurrence_type) else {
            tracing::warn!(recurrence_type, "unknown recurrence type in storage");
            return None;
        };
        Recurrence {
            frequency,
            interval,
            days_of_week,
        }
        .normalized()
    }
}

fn parse_interval_phrase(rest: &str) -> Option<Recurrence> {
    let mut parts = rest.split_whitespace();
    let amount: u32 = parts.next()?.parse().ok()?;
    if amount == 0 {
        return None;
    }
    let frequency = match parts.next()? {
        "dia" | "dias" => Frequency::Daily,
        "semana" | "semanas" => Frequency::Weekly,
        "mês" | "mes" | "meses" => Frequency::Monthly,
        "ano" | "anos" => Frequency::Yearly,
        _ => return None,
    };
    Some(Recurrence::new(frequency, amount))
}

fn parse_weekday_name(name: &str) -> Option<u8> {
    match name.trim().trim_end_matches("-feira") {
        "domingo" => Some(0),
        "segunda" => Some(1),
        "terça" | "terca" => Some(2),
        "quarta" => Some(3),
        "quinta" => Some(4),
        "sexta" => Some(5),
        "sábado" | "sabado" => Some(6),
        _ => None,
    }
}

fn weekday_abbrev(day: u8) -> &'static str {
    match day {
        0 => "dom",
        1 => "seg",
        2 => "ter",
        3 => "qua",
        4 => "qui",
        5 => "sex",
        6 => "sáb",
        _ => "?",
    }
}

/// Moves a recurring task's anchor forward by exactly one period, keeping
/// the anchor's time of day.
pub fn advance(anchor: DateTime<Utc>, rule: &Recurrence) -> DateTime<Utc> {
    let date = advance_date(anchor.date_naive(), rule);
    Utc.from_utc_datetime(&date.and_time(anchor.time()))
}

pub fn advance_date(date: NaiveDate, rule: &Recurrence) -> NaiveDate {
    let interval = rule.interval.max(1);
    match rule.frequency {
        Frequency::Daily => date
            .checked_add_days(Days::new(u64::from(interval)))
            .unwrap_or(date),
        Frequency::Weekly => date
            .checked_add_days(Days::new(u64::from(interval) * 7))
            .unwrap_or(date),
        Frequency::Monthly => add_months_rolling(date, interval),
        Frequency::Yearly => add_months_rolling(date, interval.saturating_mul(12)),
    }
}

/// Calendar month stepping. A day past the end of the target month spills
/// into the following month (Jan 31 + 1 month lands in early March); the
/// clamp-to-last-day convention is deliberately not used here.
pub fn add_months_rolling(date: NaiveDate, months: u32) -> NaiveDate {
    let total = i64::from(date.year()) * 12 + i64::from(date.month0()) + i64::from(months);
    let year = total.div_euclid(12) as i32;
    let month = total.rem_euclid(12) as u32 + 1;
    if let Some(hit) = NaiveDate::from_ymd_opt(year, month, date.day()) {
        return hit;
    }
    let spill = date.day() - days_in_month(year, month);
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, spill).unwrap_or(date)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}
