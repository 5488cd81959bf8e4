use anyhow::bail;
use chrono::NaiveDate;

use crate::calendar;

/// One attendance record in the normalized shape every tolerated upstream
/// payload collapses to.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRecord {
    pub date: NaiveDate,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub records: Vec<FeedRecord>,
    /// Entries dropped for a missing/empty/unparseable date or a non-object
    /// list item. Dropped entries are reported, never fatal.
    pub skipped: usize,
}

/// The shapes the upstream service has been observed sending. Keeping the
/// enumeration explicit means "which shape did the server send" is decided
/// in exactly one place.
enum FeedShape<'a> {
    /// Bare array of `{date, status}` objects.
    RecordList(&'a [serde_json::Value]),
    /// The same array wrapped in an envelope key (`data` or `html`).
    WrappedList(&'a [serde_json::Value]),
    /// Object map of date string to status string.
    DateMap(&'a serde_json::Map<String, serde_json::Value>),
}

fn detect_shape(payload: &serde_json::Value) -> anyhow::Result<FeedShape<'_>> {
    if let Some(items) = payload.as_array() {
        return Ok(FeedShape::RecordList(items));
    }
    let Some(obj) = payload.as_object() else {
        bail!("unsupported feed payload: expected array or object");
    };
    for key in ["data", "html"] {
        if let Some(v) = obj.get(key) {
            let Some(items) = v.as_array() else {
                bail!("unsupported feed payload: {} is not an array", key);
            };
            return Ok(FeedShape::WrappedList(items));
        }
    }
    Ok(FeedShape::DateMap(obj))
}

/// Collapse any tolerated payload shape to normalized records. Duplicate
/// dates are preserved in order so the caller's last-wins application holds.
pub fn parse_feed(payload: &serde_json::Value) -> anyhow::Result<ParsedFeed> {
    let mut records: Vec<FeedRecord> = Vec::new();
    let mut skipped = 0usize;

    match detect_shape(payload)? {
        FeedShape::RecordList(items) | FeedShape::WrappedList(items) => {
            for item in items {
                let Some(obj) = item.as_object() else {
                    skipped += 1;
                    continue;
                };
                let date_str = obj.get("date").and_then(|v| v.as_str()).unwrap_or("");
                let Some(date) = calendar::parse_day(date_str) else {
                    skipped += 1;
                    continue;
                };
                let status = obj
                    .get("status")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                records.push(FeedRecord { date, status });
            }
        }
        FeedShape::DateMap(map) => {
            for (key, value) in map {
                let Some(date) = calendar::parse_day(key) else {
                    skipped += 1;
                    continue;
                };
                let status = value.as_str().unwrap_or("").to_string();
                records.push(FeedRecord { date, status });
            }
        }
    }

    Ok(ParsedFeed { records, skipped })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn parses_bare_array() {
        let parsed = parse_feed(&json!([
            { "date": "2024-02-01", "status": "present" },
            { "date": "2024-02-02", "status": "late" }
        ]))
        .expect("parse");
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.skipped, 0);
        assert_eq!(parsed.records[0].date, day(2024, 2, 1));
        assert_eq!(parsed.records[1].status, "late");
    }

    #[test]
    fn parses_data_and_html_envelopes() {
        for key in ["data", "html"] {
            let parsed = parse_feed(&json!({
                key: [{ "date": "2024-02-01", "status": "P" }]
            }))
            .expect("parse");
            assert_eq!(parsed.records.len(), 1, "envelope {key}");
        }
    }

    #[test]
    fn parses_date_keyed_map() {
        let parsed = parse_feed(&json!({
            "2024-02-01": "present",
            "2024-02-02": "absent"
        }))
        .expect("parse");
        assert_eq!(parsed.records.len(), 2);
        assert!(parsed
            .records
            .iter()
            .any(|r| r.date == day(2024, 2, 2) && r.status == "absent"));
    }

    #[test]
    fn skips_entries_without_a_usable_date() {
        let parsed = parse_feed(&json!([
            { "date": "", "status": "present" },
            { "status": "present" },
            "not-an-object",
            { "date": "2024-02-29", "status": "present" }
        ]))
        .expect("parse");
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.skipped, 3);
    }

    #[test]
    fn missing_status_becomes_empty_string() {
        let parsed = parse_feed(&json!([{ "date": "2024-02-01" }])).expect("parse");
        assert_eq!(parsed.records[0].status, "");
    }

    #[test]
    fn rejects_scalar_payloads_and_bad_envelopes() {
        assert!(parse_feed(&json!(42)).is_err());
        assert!(parse_feed(&json!("present")).is_err());
        assert!(parse_feed(&json!({ "data": "not-a-list" })).is_err());
    }
}
