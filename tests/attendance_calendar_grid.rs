mod test_support;

use serde_json::json;
use test_support::{
    bootstrap_admin, create_student, request_ok, select_workspace, spawn_sidecar, temp_dir,
};

#[test]
fn leap_february_grid_is_42_cells_with_lead_and_trail_days() {
    let workspace = temp_dir("campusd-calendar-grid");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);
    let token = bootstrap_admin(&mut stdin, &mut reader);
    let student_id = create_student(&mut stdin, &mut reader, "2", &token, "Lena", "Wirth");

    // February 2024: leap year, 29 days, the 1st falls on a Thursday.
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
    let cells = opened.get("cells").and_then(|v| v.as_array()).expect("cells");
    assert_eq!(cells.len(), 42);

    // Starts on the Sunday before the 1st.
    assert_eq!(
        cells[0].get("date").and_then(|v| v.as_str()),
        Some("2024-01-28")
    );
    assert_eq!(cells[0].get("inMonth").and_then(|v| v.as_bool()), Some(false));

    // Day 1 sits at the weekday offset of the 1st (Thursday = 4).
    assert_eq!(
        cells[4].get("date").and_then(|v| v.as_str()),
        Some("2024-02-01")
    );
    assert_eq!(cells[4].get("inMonth").and_then(|v| v.as_bool()), Some(true));

    // The leap day is present and inside the month.
    assert_eq!(
        cells[32].get("date").and_then(|v| v.as_str()),
        Some("2024-02-29")
    );
    assert_eq!(cells[32].get("inMonth").and_then(|v| v.as_bool()), Some(true));

    // Trailing March days fill the sixth week.
    assert_eq!(
        cells[41].get("date").and_then(|v| v.as_str()),
        Some("2024-03-09")
    );
    assert_eq!(cells[41].get("inMonth").and_then(|v| v.as_bool()), Some(false));

    // Exactly the 29 February cells are inside the month.
    let in_month = cells
        .iter()
        .filter(|c| c.get("inMonth").and_then(|v| v.as_bool()).unwrap_or(false))
        .count();
    assert_eq!(in_month, 29);
}

#[test]
fn cells_carry_statuses_and_empty_days_have_no_marker() {
    let workspace = temp_dir("campusd-calendar-statuses");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);
    let token = bootstrap_admin(&mut stdin, &mut reader);
    let student_id = create_student(&mut stdin, &mut reader, "2", &token, "Milo", "Xu");

    for (id, date, status) in [
        ("3", "2024-02-05", "present"),
        ("4", "2024-02-06", "half-day"),
        // A lead day from January must still show on the February grid.
        ("5", "2024-01-30", "absent"),
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
        "6",
        "attendance.calendarOpen",
        json!({
            "token": token,
            "studentId": student_id,
            "month": "2024-02",
            "selectedDate": "2024-02-05"
        }),
    );
    let cells = opened.get("cells").and_then(|v| v.as_array()).expect("cells");

    let by_date = |date: &str| {
        cells
            .iter()
            .find(|c| c.get("date").and_then(|v| v.as_str()) == Some(date))
            .expect("cell")
    };

    assert_eq!(
        by_date("2024-02-05").get("status").and_then(|v| v.as_str()),
        Some("present")
    );
    assert_eq!(
        by_date("2024-02-05").get("marker").and_then(|v| v.as_str()),
        Some("green")
    );
    assert_eq!(
        by_date("2024-02-06").get("status").and_then(|v| v.as_str()),
        Some("half")
    );
    // Lead-day record is visible even though it is outside the month.
    assert_eq!(
        by_date("2024-01-30").get("status").and_then(|v| v.as_str()),
        Some("absent")
    );
    // Unmarked days degrade silently: unknown status, no marker.
    assert_eq!(
        by_date("2024-02-12").get("status").and_then(|v| v.as_str()),
        Some("unknown")
    );
    assert!(by_date("2024-02-12")
        .get("marker")
        .map(|v| v.is_null())
        .unwrap_or(false));
}

#[test]
fn today_is_flagged_on_the_current_month_grid() {
    let workspace = temp_dir("campusd-calendar-today");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);
    let token = bootstrap_admin(&mut stdin, &mut reader);
    let student_id = create_student(&mut stdin, &mut reader, "2", &token, "Noor", "Yacoub");

    let now = chrono::Local::now().date_naive();
    let today = now.format("%Y-%m-%d").to_string();
    let month = now.format("%Y-%m").to_string();

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.calendarOpen",
        json!({ "token": token, "studentId": student_id, "month": month }),
    );
    let cells = opened.get("cells").and_then(|v| v.as_array()).expect("cells");
    let today_cells: Vec<_> = cells
        .iter()
        .filter(|c| c.get("today").and_then(|v| v.as_bool()).unwrap_or(false))
        .collect();
    assert_eq!(today_cells.len(), 1);
    assert_eq!(
        today_cells[0].get("date").and_then(|v| v.as_str()),
        Some(today.as_str())
    );

    // With no selectedDate the selection defaults to today as well.
    assert_eq!(
        opened
            .get("selectedDay")
            .and_then(|d| d.get("date"))
            .and_then(|v| v.as_str()),
        Some(today.as_str())
    );
}
