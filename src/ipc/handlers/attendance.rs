use crate::calendar;
use crate::feed;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    bad_params, db_query_failed, get_optional_str, get_required_str, now_iso, require_role,
    require_session, HandlerErr, SessionUser,
};
use crate::ipc::types::{AppState, Request};
use chrono::{Datelike, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn parse_month_key(month: &str) -> Result<(i32, u32), HandlerErr> {
    let t = month.trim();
    let Some((y, m)) = t.split_once('-') else {
        return Err(bad_params("month must be YYYY-MM"));
    };
    let year = y
        .parse::<i32>()
        .map_err(|_| bad_params("month year must be numeric"))?;
    let month_num = m
        .parse::<u32>()
        .map_err(|_| bad_params("month must be YYYY-MM"))?;
    if !(1..=12).contains(&month_num) {
        return Err(bad_params("month must be between 01 and 12"));
    }
    Ok((year, month_num))
}

fn student_user_id(conn: &Connection, student_id: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT user_id FROM students WHERE id = ?",
        [student_id],
        |r| r.get::<_, Option<String>>(0),
    )
    .optional()
    .map_err(db_query_failed)?
    .ok_or_else(|| HandlerErr::new("not_found", "student not found"))
}

/// Students may only look at their own attendance; staff can look at anyone.
fn check_view_access(
    conn: &Connection,
    user: &SessionUser,
    student_id: &str,
) -> Result<(), HandlerErr> {
    let linked_user = student_user_id(conn, student_id)?;
    if user.role == "student" && linked_user.as_deref() != Some(user.user_id.as_str()) {
        return Err(HandlerErr::new(
            "forbidden",
            "students may only view their own attendance",
        ));
    }
    Ok(())
}

fn load_status_lookup(
    conn: &Connection,
    student_id: &str,
) -> Result<std::collections::HashMap<NaiveDate, calendar::Status>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT date, status FROM attendance_records
             WHERE student_id = ?
             ORDER BY date",
        )
        .map_err(db_query_failed)?;
    let rows = stmt
        .query_map([student_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_failed)?;
    Ok(calendar::status_by_date(rows))
}

fn upsert_record(
    conn: &Connection,
    student_id: &str,
    date: &str,
    status: &str,
    marked_by: Option<&str>,
) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO attendance_records(student_id, date, status, marked_by, updated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(student_id, date) DO UPDATE SET
           status = excluded.status,
           marked_by = excluded.marked_by,
           updated_at = excluded.updated_at",
        (student_id, date, status, marked_by, now_iso()),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_update_failed",
            e.to_string(),
            json!({ "table": "attendance_records" }),
        )
    })?;
    Ok(())
}

fn attendance_mark(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user = require_session(conn, params)?;
    require_role(&user, &["admin", "teacher"])?;

    let student_id = get_required_str(params, "studentId")?;
    student_user_id(conn, &student_id)?;

    let raw_date = get_required_str(params, "date")?;
    let Some(day) = calendar::parse_day(&raw_date) else {
        return Err(bad_params("date must be YYYY-MM-DD"));
    };
    let status = get_required_str(params, "status")?.trim().to_string();
    if status.is_empty() {
        return Err(bad_params("status must not be empty"));
    }

    let date = day.format("%Y-%m-%d").to_string();
    upsert_record(conn, &student_id, &date, &status, Some(&user.user_id))?;

    Ok(json!({
        "studentId": student_id,
        "date": date,
        "status": status,
        "normalizedStatus": calendar::normalize_status(Some(&status)).as_str()
    }))
}

fn attendance_unmark(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user = require_session(conn, params)?;
    require_role(&user, &["admin", "teacher"])?;

    let student_id = get_required_str(params, "studentId")?;
    let raw_date = get_required_str(params, "date")?;
    let Some(day) = calendar::parse_day(&raw_date) else {
        return Err(bad_params("date must be YYYY-MM-DD"));
    };

    let removed = conn
        .execute(
            "DELETE FROM attendance_records WHERE student_id = ? AND date = ?",
            (&student_id, day.format("%Y-%m-%d").to_string()),
        )
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;

    Ok(json!({ "removed": removed > 0 }))
}

fn attendance_bulk_mark(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user = require_session(conn, params)?;
    require_role(&user, &["admin", "teacher"])?;

    let raw_date = get_required_str(params, "date")?;
    let Some(day) = calendar::parse_day(&raw_date) else {
        return Err(bad_params("date must be YYYY-MM-DD"));
    };
    let date = day.format("%Y-%m-%d").to_string();

    let Some(entries) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(bad_params("missing entries"));
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let mut applied = 0usize;
    let mut skipped = 0usize;
    for entry in entries {
        let Some(student_id) = entry.get("studentId").and_then(|v| v.as_str()) else {
            skipped += 1;
            continue;
        };
        let Some(status) = entry.get("status").and_then(|v| v.as_str()) else {
            skipped += 1;
            continue;
        };
        let exists = tx
            .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
                r.get::<_, i64>(0)
            })
            .optional()
            .map_err(db_query_failed)?
            .is_some();
        if !exists {
            skipped += 1;
            continue;
        }
        tx.execute(
            "INSERT INTO attendance_records(student_id, date, status, marked_by, updated_at)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(student_id, date) DO UPDATE SET
               status = excluded.status,
               marked_by = excluded.marked_by,
               updated_at = excluded.updated_at",
            (student_id, &date, status, &user.user_id, now_iso()),
        )
        .map_err(|e| {
            HandlerErr::with_details(
                "db_update_failed",
                e.to_string(),
                json!({ "table": "attendance_records" }),
            )
        })?;
        applied += 1;
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "date": date, "applied": applied, "skipped": skipped }))
}

fn attendance_records(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user = require_session(conn, params)?;
    let student_id = get_required_str(params, "studentId")?;
    check_view_access(conn, &user, &student_id)?;

    let month_key = get_required_str(params, "month")?;
    let (year, month_num) = parse_month_key(&month_key)?;
    let prefix = format!("{:04}-{:02}-", year, month_num);

    let mut stmt = conn
        .prepare(
            "SELECT date, status, marked_by, updated_at
             FROM attendance_records
             WHERE student_id = ? AND date LIKE ? || '%'
             ORDER BY date",
        )
        .map_err(db_query_failed)?;
    let rows = stmt
        .query_map((&student_id, &prefix), |r| {
            let status: String = r.get(1)?;
            Ok(json!({
                "date": r.get::<_, String>(0)?,
                "status": status.clone(),
                "normalizedStatus": calendar::normalize_status(Some(&status)).as_str(),
                "markedBy": r.get::<_, Option<String>>(2)?,
                "updatedAt": r.get::<_, Option<String>>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_failed)?;

    Ok(json!({ "studentId": student_id, "month": month_key, "records": rows }))
}

fn attendance_calendar_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user = require_session(conn, params)?;
    let student_id = get_required_str(params, "studentId")?;
    check_view_access(conn, &user, &student_id)?;

    let month_key = get_required_str(params, "month")?;
    let (year, month_num) = parse_month_key(&month_key)?;
    let Some(first_of_month) = NaiveDate::from_ymd_opt(year, month_num, 1) else {
        return Err(bad_params("month is out of range"));
    };

    let today = chrono::Local::now().date_naive();
    let selected = match get_optional_str(params, "selectedDate") {
        None => today,
        Some(raw) => {
            let Some(day) = calendar::parse_day(&raw) else {
                return Err(bad_params("selectedDate must be YYYY-MM-DD"));
            };
            day
        }
    };

    let by_date = load_status_lookup(conn, &student_id)?;
    let view = calendar::build_month_view(first_of_month, &by_date, today, selected);

    let cells: Vec<serde_json::Value> = view
        .cells
        .iter()
        .map(|c| {
            json!({
                "date": c.date.format("%Y-%m-%d").to_string(),
                "day": c.date.day(),
                "inMonth": c.in_month,
                "today": c.today,
                "selected": c.selected,
                "status": c.status.as_str(),
                "marker": c.status.marker()
            })
        })
        .collect();

    let selected_status = by_date
        .get(&selected)
        .copied()
        .unwrap_or(calendar::Status::Unknown);

    Ok(json!({
        "studentId": student_id,
        "month": month_key,
        "cells": cells,
        "stats": view.stats,
        "selectedDay": {
            "date": selected.format("%Y-%m-%d").to_string(),
            "status": selected_status.as_str(),
            "marker": selected_status.marker()
        }
    }))
}

fn attendance_import_records(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user = require_session(conn, params)?;
    require_role(&user, &["admin", "teacher"])?;

    let student_id = get_required_str(params, "studentId")?;
    student_user_id(conn, &student_id)?;

    let Some(payload) = params.get("payload") else {
        return Err(bad_params("missing payload"));
    };
    let parsed = feed::parse_feed(payload)
        .map_err(|e| HandlerErr::new("bad_feed", e.to_string()))?;

    let generation = match params.get("generation") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => {
            let Some(n) = v.as_i64() else {
                return Err(bad_params("generation must be an integer"));
            };
            Some(n)
        }
    };

    let current: Option<i64> = conn
        .query_row(
            "SELECT generation FROM attendance_feed_state WHERE student_id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_query_failed)?;

    // A fetch that raced with a newer one arrives late; acknowledge it but
    // leave the newer records in place.
    if let (Some(gen), Some(cur)) = (generation, current) {
        if gen <= cur {
            return Ok(json!({
                "applied": false,
                "staleGeneration": true,
                "generation": cur
            }));
        }
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    for record in &parsed.records {
        let date = record.date.format("%Y-%m-%d").to_string();
        tx.execute(
            "INSERT INTO attendance_records(student_id, date, status, marked_by, updated_at)
             VALUES(?, ?, ?, NULL, ?)
             ON CONFLICT(student_id, date) DO UPDATE SET
               status = excluded.status,
               marked_by = NULL,
               updated_at = excluded.updated_at",
            (&student_id, &date, &record.status, now_iso()),
        )
        .map_err(|e| {
            HandlerErr::with_details(
                "db_update_failed",
                e.to_string(),
                json!({ "table": "attendance_records" }),
            )
        })?;
    }

    if let Some(gen) = generation {
        tx.execute(
            "INSERT INTO attendance_feed_state(student_id, generation, fetched_at)
             VALUES(?, ?, ?)
             ON CONFLICT(student_id) DO UPDATE SET
               generation = excluded.generation,
               fetched_at = excluded.fetched_at",
            (&student_id, gen, now_iso()),
        )
        .map_err(|e| {
            HandlerErr::with_details(
                "db_update_failed",
                e.to_string(),
                json!({ "table": "attendance_feed_state" }),
            )
        })?;
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "applied": true,
        "imported": parsed.records.len(),
        "skipped": parsed.skipped
    }))
}

fn with_db(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(with_db(state, req, attendance_mark)),
        "attendance.unmark" => Some(with_db(state, req, attendance_unmark)),
        "attendance.bulkMark" => Some(with_db(state, req, attendance_bulk_mark)),
        "attendance.records" => Some(with_db(state, req, attendance_records)),
        "attendance.calendarOpen" => Some(with_db(state, req, attendance_calendar_open)),
        "attendance.importRecords" => Some(with_db(state, req, attendance_import_records)),
        _ => None,
    }
}
