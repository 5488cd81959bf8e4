mod test_support;

use serde_json::json;
use test_support::{
    bootstrap_admin, create_student, request_ok, select_workspace, spawn_sidecar, temp_dir,
};

#[test]
fn month_stats_combine_half_late_and_exclude_unknown() {
    let workspace = temp_dir("campusd-stats-aggregate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);
    let token = bootstrap_admin(&mut stdin, &mut reader);
    let student_id = create_student(&mut stdin, &mut reader, "2", &token, "Omar", "Zahedi");

    for (id, date, status) in [
        ("3", "2024-02-01", "present"),
        ("4", "2024-02-02", "Present"),
        ("5", "2024-02-05", "P"),
        ("6", "2024-02-06", "absent"),
        ("7", "2024-02-07", "half_day"),
        // Unknown: excluded from every count.
        ("8", "2024-02-08", "field-trip"),
        // Adjacent month: on the grid but outside the stats.
        ("9", "2024-01-31", "absent"),
    ] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "attendance.mark",
            json!({
                "token": token,
                "studentId": student_id,
                "date": date,
                "status": status
            }),
        );
    }

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "attendance.calendarOpen",
        json!({
            "token": token,
            "studentId": student_id,
            "month": "2024-02",
            "selectedDate": "2024-02-01"
        }),
    );
    let stats = opened.get("stats").expect("stats");
    assert_eq!(stats.get("present").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(stats.get("absent").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(stats.get("halfLate").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(stats.get("total").and_then(|v| v.as_i64()), Some(5));
    // (3 + 0.5 * 1) / 5 = 70%
    assert_eq!(stats.get("attendanceRate").and_then(|v| v.as_i64()), Some(70));
}

#[test]
fn empty_month_reports_zeroed_stats() {
    let workspace = temp_dir("campusd-stats-empty");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);
    let token = bootstrap_admin(&mut stdin, &mut reader);
    let student_id = create_student(&mut stdin, &mut reader, "2", &token, "Pia", "Aalto");

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.calendarOpen",
        json!({
            "token": token,
            "studentId": student_id,
            "month": "2024-02",
            "selectedDate": "2024-02-01"
        }),
    );
    let stats = opened.get("stats").expect("stats");
    assert_eq!(stats.get("total").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(stats.get("attendanceRate").and_then(|v| v.as_i64()), Some(0));
}

#[test]
fn changing_the_selection_never_moves_the_grid_or_the_stats() {
    let workspace = temp_dir("campusd-stats-selection");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);
    let token = bootstrap_admin(&mut stdin, &mut reader);
    let student_id = create_student(&mut stdin, &mut reader, "2", &token, "Quin", "Barros");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.mark",
        json!({
            "token": token,
            "studentId": student_id,
            "date": "2024-02-05",
            "status": "late"
        }),
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.calendarOpen",
        json!({
            "token": token,
            "studentId": student_id,
            "month": "2024-02",
            "selectedDate": "2024-02-05"
        }),
    );
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.calendarOpen",
        json!({
            "token": token,
            "studentId": student_id,
            "month": "2024-02",
            "selectedDate": "2024-02-20"
        }),
    );

    assert_eq!(first.get("stats"), second.get("stats"));

    let dates = |v: &serde_json::Value| -> Vec<String> {
        v.get("cells")
            .and_then(|c| c.as_array())
            .expect("cells")
            .iter()
            .map(|c| {
                c.get("date")
                    .and_then(|d| d.as_str())
                    .expect("date")
                    .to_string()
            })
            .collect()
    };
    assert_eq!(dates(&first), dates(&second));

    let selected = |v: &serde_json::Value| -> Vec<String> {
        v.get("cells")
            .and_then(|c| c.as_array())
            .expect("cells")
            .iter()
            .filter(|c| c.get("selected").and_then(|s| s.as_bool()).unwrap_or(false))
            .map(|c| {
                c.get("date")
                    .and_then(|d| d.as_str())
                    .expect("date")
                    .to_string()
            })
            .collect()
    };
    assert_eq!(selected(&first), vec!["2024-02-05".to_string()]);
    assert_eq!(selected(&second), vec!["2024-02-20".to_string()]);

    // Selected-day detail follows the highlight: a marked day has its
    // status, an unmarked day degrades to unknown.
    assert_eq!(
        first
            .get("selectedDay")
            .and_then(|d| d.get("status"))
            .and_then(|v| v.as_str()),
        Some("late")
    );
    assert_eq!(
        second
            .get("selectedDay")
            .and_then(|d| d.get("status"))
            .and_then(|v| v.as_str()),
        Some("unknown")
    );
}
