use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Session;

/// Half-open interval overlap: [a_start, a_end) intersects [b_start, b_end).
/// Ranges that touch at a boundary do not overlap.
pub fn overlaps(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// Operating window for the day grid, in whole local hours. Slots are 30
/// minutes wide and run from `start_hour:00` up to (not including)
/// `end_hour:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for SlotWindow {
    fn default() -> Self {
        Self {
            start_hour: 10,
            end_hour: 19,
        }
    }
}

impl SlotWindow {
    /// Reads `PORTAL_DAY_START_HOUR` / `PORTAL_DAY_END_HOUR`, keeping the
    /// defaults when unset, unparseable, or not a valid ordering.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let read = |key: &str, fallback: u32| {
            dotenvy::var(key)
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(fallback)
        };

        let window = Self {
            start_hour: read("PORTAL_DAY_START_HOUR", defaults.start_hour),
            end_hour: read("PORTAL_DAY_END_HOUR", defaults.end_hour),
        };

        if window.start_hour < window.end_hour && window.end_hour <= 24 {
            window
        } else {
            defaults
        }
    }

    pub fn slot_times(&self) -> Vec<NaiveTime> {
        let mut times = Vec::with_capacity(((self.end_hour - self.start_hour) * 2) as usize);
        for hour in self.start_hour..self.end_hour {
            times.push(NaiveTime::from_hms_opt(hour, 0, 0).expect("valid slot hour"));
            times.push(NaiveTime::from_hms_opt(hour, 30, 0).expect("valid slot hour"));
        }
        times
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaySlot {
    pub starts_at: NaiveTime,
    pub sessions: Vec<Session>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DayBucket {
    pub date: NaiveDate,
    pub sessions: Vec<Session>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonthCell {
    pub date: NaiveDate,
    pub in_month: bool,
    pub sessions: Vec<Session>,
}

/// Buckets sessions into the 30-minute slots of `date`'s operating window.
///
/// A session lands in the slot obtained by flooring its local start time to
/// the lower half-hour boundary. Sessions starting on another local date or
/// outside the window are dropped from the grid.
pub fn day_grid<Tz: TimeZone>(
    sessions: &[Session],
    date: NaiveDate,
    window: SlotWindow,
    tz: &Tz,
) -> Vec<DaySlot> {
    let mut slots: Vec<DaySlot> = window
        .slot_times()
        .into_iter()
        .map(|starts_at| DaySlot {
            starts_at,
            sessions: Vec::new(),
        })
        .collect();

    for session in sessions {
        let local = session.starts_at.with_timezone(tz);
        if local.date_naive() != date {
            continue;
        }

        let hour = local.hour();
        if hour < window.start_hour || hour >= window.end_hour {
            continue;
        }

        let half = if local.minute() < 30 { 0 } else { 1 };
        let index = ((hour - window.start_hour) * 2 + half) as usize;
        slots[index].sessions.push(session.clone());
    }

    slots
}

/// Buckets sessions into the 7 local calendar days starting at `start`.
pub fn week_grid<Tz: TimeZone>(
    sessions: &[Session],
    start: NaiveDate,
    tz: &Tz,
) -> Vec<DayBucket> {
    let mut buckets: Vec<DayBucket> = (0..7)
        .map(|i| DayBucket {
            date: start + Duration::days(i),
            sessions: Vec::new(),
        })
        .collect();

    for session in sessions {
        let local_date = session.starts_at.with_timezone(tz).date_naive();
        let offset = (local_date - start).num_days();
        if (0..7).contains(&offset) {
            buckets[offset as usize].sessions.push(session.clone());
        }
    }

    buckets
}

/// Builds the 42-cell (6 rows x 7 columns) month grid starting from the
/// Sunday on or before the 1st. Cells outside the displayed month carry
/// `in_month: false`. Returns `None` for an invalid year/month pair.
pub fn month_grid<Tz: TimeZone>(
    sessions: &[Session],
    year: i32,
    month: u32,
    tz: &Tz,
) -> Option<Vec<MonthCell>> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let start = first - Duration::days(first.weekday().num_days_from_sunday() as i64);

    let mut cells: Vec<MonthCell> = (0..42)
        .map(|i| {
            let date = start + Duration::days(i);
            MonthCell {
                date,
                in_month: date.month() == month && date.year() == year,
                sessions: Vec::new(),
            }
        })
        .collect();

    for session in sessions {
        let local_date = session.starts_at.with_timezone(tz).date_naive();
        let offset = (local_date - start).num_days();
        if (0..42).contains(&offset) {
            cells[offset as usize].sessions.push(session.clone());
        }
    }

    Some(cells)
}
