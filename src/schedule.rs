//! When a recipe is due for regeneration.
//!
//! Schedules are evaluated as pure functions of the recipe's last successful
//! run and the current instant, so callers supply the clock. Offsets are in
//! hours east of UTC (fractional offsets such as `5.5` are allowed) and are
//! applied before looking at the weekday, day of month, or hour.

use chrono::{
    DateTime, Datelike as _, FixedOffset, NaiveDate, Offset as _, TimeDelta, Timelike as _, Utc,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    #[default]
    Always,
    Never,
    /// Enabled on the listed weekdays, 0 = Monday.
    Weekdays {
        days: Vec<u32>,
        #[serde(default)]
        offset_hours: f64,
    },
    DaysOfMonth {
        days: Vec<u32>,
        #[serde(default)]
        offset_hours: f64,
    },
    Hours {
        hours: Vec<u32>,
        #[serde(default)]
        offset_hours: f64,
    },
    /// Enabled once `days` have passed since the last run, minus `drift_minutes`.
    EveryDays {
        days: f64,
        #[serde(default)]
        drift_minutes: f64,
    },
    EveryHours {
        hours: f64,
        #[serde(default)]
        drift_minutes: f64,
    },
    LastDaysOfMonth {
        n: u32,
        #[serde(default)]
        offset_hours: f64,
    },
    FirstDaysOfMonth {
        n: u32,
        #[serde(default)]
        offset_hours: f64,
    },
    All {
        of: Vec<Schedule>,
    },
    Any {
        of: Vec<Schedule>,
    },
}

impl Schedule {
    pub fn is_enabled(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Weekdays { days, offset_hours } => {
                let weekday = local_now(now, *offset_hours)
                    .weekday()
                    .num_days_from_monday();
                days.contains(&weekday)
            }
            Self::DaysOfMonth { days, offset_hours } => {
                days.contains(&local_now(now, *offset_hours).day())
            }
            Self::Hours {
                hours,
                offset_hours,
            } => hours.contains(&local_now(now, *offset_hours).hour()),
            Self::EveryDays {
                days,
                drift_minutes,
            } => elapsed_at_least(last_run, now, days * 86_400.0, *drift_minutes),
            Self::EveryHours {
                hours,
                drift_minutes,
            } => elapsed_at_least(last_run, now, hours * 3_600.0, *drift_minutes),
            Self::LastDaysOfMonth { n, offset_hours } => {
                let local = local_now(now, *offset_hours);
                let month_days = days_in_month(local.year(), local.month());
                local.day() + n > month_days
            }
            Self::FirstDaysOfMonth { n, offset_hours } => {
                local_now(now, *offset_hours).day() <= *n
            }
            Self::All { of } => of.iter().all(|s| s.is_enabled(last_run, now)),
            Self::Any { of } => of.iter().any(|s| s.is_enabled(last_run, now)),
        }
    }
}

fn local_now(now: DateTime<Utc>, offset_hours: f64) -> DateTime<FixedOffset> {
    let offset_secs = (offset_hours * 3_600.0).round() as i32;
    let offset = FixedOffset::east_opt(offset_secs).unwrap_or_else(|| {
        tracing::warn!(offset_hours, "schedule offset out of range; using UTC");
        Utc.fix()
    });
    now.with_timezone(&offset)
}

fn elapsed_at_least(
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    interval_secs: f64,
    drift_minutes: f64,
) -> bool {
    let Some(last_run) = last_run else {
        return true;
    };
    let required_ms = ((interval_secs - drift_minutes * 60.0) * 1_000.0) as i64;
    now - last_run >= TimeDelta::milliseconds(required_ms)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}
