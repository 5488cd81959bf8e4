use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use std::collections::HashMap;

/// 6 whole weeks; the calendar grid is always this size regardless of month.
pub const GRID_CELLS: usize = 42;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Present,
    Absent,
    Half,
    Late,
    Unknown,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Present => "present",
            Status::Absent => "absent",
            Status::Half => "half",
            Status::Late => "late",
            Status::Unknown => "unknown",
        }
    }

    /// Marker color the UI shell associates with each category. Unknown has
    /// no marker at all.
    pub fn marker(&self) -> Option<&'static str> {
        match self {
            Status::Present => Some("green"),
            Status::Absent => Some("red"),
            Status::Half => Some("orange"),
            Status::Late => Some("yellow"),
            Status::Unknown => None,
        }
    }
}

/// Classify a raw upstream status string. Matching is case-insensitive with
/// whitespace and hyphens folded to underscores first. The checks run
/// present, absent, half, late in that order; mixed strings (e.g. one
/// containing both "half" and "late") are classified by the first match, and
/// existing data depends on that precedence.
pub fn normalize_status(raw: Option<&str>) -> Status {
    let Some(raw) = raw else {
        return Status::Unknown;
    };
    let folded: String = raw
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() || c == '-' { '_' } else { c })
        .collect();
    if folded.is_empty() {
        return Status::Unknown;
    }
    if folded.contains("present") || folded == "p" {
        return Status::Present;
    }
    if folded.contains("absent") || folded == "a" {
        return Status::Absent;
    }
    if folded.contains("half") {
        return Status::Half;
    }
    if folded.contains("late") || folded == "l" {
        return Status::Late;
    }
    Status::Unknown
}

/// Parse a stored `YYYY-MM-DD` day. Tolerates a trailing time component
/// (`2024-02-01T09:00:00Z`) since some feeds timestamp their records.
pub fn parse_day(s: &str) -> Option<NaiveDate> {
    let date_part = s.trim().split('T').next().unwrap_or("");
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Build the date-keyed status lookup. Records with unparseable dates are
/// skipped; duplicate dates keep the last record seen.
pub fn status_by_date<I>(records: I) -> HashMap<NaiveDate, Status>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut by_date = HashMap::new();
    for (date, raw) in records {
        let Some(day) = parse_day(&date) else {
            continue;
        };
        by_date.insert(day, normalize_status(Some(&raw)));
    }
    by_date
}

/// The 42 dates shown for the month containing `first_of_month` (which must
/// be the 1st). The sequence starts on the Sunday on or before the 1st and
/// advances one day per cell, so it always covers the whole month plus
/// lead/trail days from the adjacent months.
pub fn month_grid(first_of_month: NaiveDate) -> Vec<NaiveDate> {
    let lead = first_of_month.weekday().num_days_from_sunday() as i64;
    let start = first_of_month - Duration::days(lead);
    (0..GRID_CELLS as i64)
        .map(|i| start + Duration::days(i))
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct DayCell {
    pub date: NaiveDate,
    pub in_month: bool,
    pub today: bool,
    pub selected: bool,
    pub status: Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthStats {
    pub present: i64,
    pub absent: i64,
    pub half_late: i64,
    pub total: i64,
    pub attendance_rate: i64,
}

/// Aggregate the displayed month only. Unknown statuses are excluded from
/// every count. Half and Late share one bucket and count half-weight toward
/// the rate; an empty month reports rate 0 rather than dividing by zero.
pub fn month_stats(year: i32, month: u32, by_date: &HashMap<NaiveDate, Status>) -> MonthStats {
    let mut present: i64 = 0;
    let mut absent: i64 = 0;
    let mut half_late: i64 = 0;

    for (day, status) in by_date {
        if day.year() != year || day.month() != month {
            continue;
        }
        match status {
            Status::Present => present += 1,
            Status::Absent => absent += 1,
            Status::Half | Status::Late => half_late += 1,
            Status::Unknown => {}
        }
    }

    let total = present + absent + half_late;
    let attendance_rate = if total > 0 {
        ((present as f64 + 0.5 * half_late as f64) / total as f64 * 100.0).round() as i64
    } else {
        0
    };

    MonthStats {
        present,
        absent,
        half_late,
        total,
        attendance_rate,
    }
}

#[derive(Debug, Clone)]
pub struct MonthView {
    pub cells: Vec<DayCell>,
    pub stats: MonthStats,
}

/// Assemble the calendar view for one month: the fixed grid with per-cell
/// flags plus the month's aggregate stats. Selection only changes which cell
/// carries the `selected` flag; dates and stats are functions of the month
/// and the records alone.
pub fn build_month_view(
    first_of_month: NaiveDate,
    by_date: &HashMap<NaiveDate, Status>,
    today: NaiveDate,
    selected: NaiveDate,
) -> MonthView {
    let cells = month_grid(first_of_month)
        .into_iter()
        .map(|date| DayCell {
            date,
            in_month: date.year() == first_of_month.year()
                && date.month() == first_of_month.month(),
            today: date == today,
            selected: date == selected,
            status: by_date.get(&date).copied().unwrap_or(Status::Unknown),
        })
        .collect();

    MonthView {
        cells,
        stats: month_stats(first_of_month.year(), first_of_month.month(), by_date),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn grid_is_always_42_consecutive_days_starting_sunday() {
        for (y, m) in [(2024, 2), (2025, 6), (2025, 12), (2023, 1), (1999, 9)] {
            let first = day(y, m, 1);
            let grid = month_grid(first);
            assert_eq!(grid.len(), GRID_CELLS);
            assert_eq!(grid[0].weekday().num_days_from_sunday(), 0);
            for w in grid.windows(2) {
                assert_eq!(w[1] - w[0], Duration::days(1));
            }
            let offset = first.weekday().num_days_from_sunday() as usize;
            assert_eq!(grid[offset], first);
        }
    }

    #[test]
    fn grid_covers_leap_february_with_lead_and_trail_days() {
        // February 2024: 29 days, starts on a Thursday.
        let grid = month_grid(day(2024, 2, 1));
        assert_eq!(grid.len(), GRID_CELLS);
        assert_eq!(grid[0], day(2024, 1, 28));
        assert_eq!(grid[4], day(2024, 2, 1));
        assert_eq!(grid[32], day(2024, 2, 29));
        assert_eq!(grid[41], day(2024, 3, 9));
        for d in 1..=29 {
            assert!(grid.contains(&day(2024, 2, d)));
        }
    }

    #[test]
    fn normalize_status_matches_known_spellings() {
        for raw in ["Present", "PRESENT ", "p", "P"] {
            assert_eq!(normalize_status(Some(raw)), Status::Present, "{raw}");
        }
        for raw in ["absent", "A", "Absent Today"] {
            assert_eq!(normalize_status(Some(raw)), Status::Absent, "{raw}");
        }
        for raw in ["half-day", "half_day", "Half Day", "HALF"] {
            assert_eq!(normalize_status(Some(raw)), Status::Half, "{raw}");
        }
        for raw in ["late", "l", "came-late"] {
            assert_eq!(normalize_status(Some(raw)), Status::Late, "{raw}");
        }
        for raw in ["", "   ", "foo", "excused"] {
            assert_eq!(normalize_status(Some(raw)), Status::Unknown, "{raw:?}");
        }
        assert_eq!(normalize_status(None), Status::Unknown);
    }

    #[test]
    fn normalize_status_precedence_on_mixed_strings() {
        // Both substrings present: half wins because it is checked first.
        assert_eq!(normalize_status(Some("half late")), Status::Half);
        // "present" outranks everything else in the string.
        assert_eq!(normalize_status(Some("late but present")), Status::Present);
    }

    #[test]
    fn status_by_date_skips_bad_dates_and_keeps_last_duplicate() {
        let by_date = status_by_date(vec![
            ("2024-02-01".to_string(), "present".to_string()),
            ("".to_string(), "present".to_string()),
            ("not-a-date".to_string(), "absent".to_string()),
            ("2024-02-01".to_string(), "absent".to_string()),
            ("2024-02-02T08:30:00Z".to_string(), "late".to_string()),
        ]);
        assert_eq!(by_date.len(), 2);
        assert_eq!(by_date.get(&day(2024, 2, 1)), Some(&Status::Absent));
        assert_eq!(by_date.get(&day(2024, 2, 2)), Some(&Status::Late));
    }

    #[test]
    fn month_stats_weights_half_late_and_excludes_unknown() {
        let by_date = status_by_date(vec![
            ("2024-02-05".to_string(), "present".to_string()),
            ("2024-02-06".to_string(), "present".to_string()),
            ("2024-02-07".to_string(), "present".to_string()),
            ("2024-02-08".to_string(), "absent".to_string()),
            ("2024-02-09".to_string(), "half-day".to_string()),
            ("2024-02-12".to_string(), "mystery".to_string()),
            // Adjacent month; must not count.
            ("2024-01-31".to_string(), "present".to_string()),
        ]);
        let stats = month_stats(2024, 2, &by_date);
        assert_eq!(stats.present, 3);
        assert_eq!(stats.absent, 1);
        assert_eq!(stats.half_late, 1);
        assert_eq!(stats.total, 5);
        // (3 + 0.5) / 5 = 70%
        assert_eq!(stats.attendance_rate, 70);
    }

    #[test]
    fn month_stats_empty_month_reports_zero_rate() {
        let by_date = HashMap::new();
        let stats = month_stats(2024, 2, &by_date);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.attendance_rate, 0);
    }

    #[test]
    fn selection_changes_flags_only() {
        let by_date = status_by_date(vec![
            ("2024-02-05".to_string(), "present".to_string()),
            ("2024-02-08".to_string(), "absent".to_string()),
        ]);
        let first = day(2024, 2, 1);
        let today = day(2024, 2, 20);

        let a = build_month_view(first, &by_date, today, day(2024, 2, 5));
        let b = build_month_view(first, &by_date, today, day(2024, 2, 8));

        assert_eq!(a.stats, b.stats);
        for (ca, cb) in a.cells.iter().zip(b.cells.iter()) {
            assert_eq!(ca.date, cb.date);
            assert_eq!(ca.status, cb.status);
            assert_eq!(ca.in_month, cb.in_month);
        }
        assert!(a.cells.iter().any(|c| c.selected && c.date == day(2024, 2, 5)));
        assert!(b.cells.iter().any(|c| c.selected && c.date == day(2024, 2, 8)));
        assert_eq!(a.cells.iter().filter(|c| c.selected).count(), 1);
        assert_eq!(b.cells.iter().filter(|c| c.selected).count(), 1);
    }

    #[test]
    fn today_flag_follows_supplied_today() {
        let by_date = HashMap::new();
        let view = build_month_view(day(2024, 2, 1), &by_date, day(2024, 2, 14), day(2024, 2, 1));
        let today_cells: Vec<_> = view.cells.iter().filter(|c| c.today).collect();
        assert_eq!(today_cells.len(), 1);
        assert_eq!(today_cells[0].date, day(2024, 2, 14));
    }
}
