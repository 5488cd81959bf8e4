use crate::calendar;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    bad_params, db_query_failed, get_optional_str, get_required_str, next_sort_order, require_role,
    require_session, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn course_exists(conn: &Connection, course_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(db_query_failed)
}

fn lectures_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_session(conn, params)?;

    let course_id = get_required_str(params, "courseId")?;
    if !course_exists(conn, &course_id)? {
        return Err(HandlerErr::new("not_found", "course not found"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, title, date, duration_minutes, notes, sort_order
             FROM lectures
             WHERE course_id = ?
             ORDER BY date IS NULL, date, sort_order",
        )
        .map_err(db_query_failed)?;
    let rows = stmt
        .query_map([&course_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "date": r.get::<_, Option<String>>(2)?,
                "durationMinutes": r.get::<_, Option<i64>>(3)?,
                "notes": r.get::<_, Option<String>>(4)?,
                "sortOrder": r.get::<_, i64>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_failed)?;

    Ok(json!({ "courseId": course_id, "lectures": rows }))
}

fn lectures_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user = require_session(conn, params)?;
    require_role(&user, &["admin", "teacher"])?;

    let course_id = get_required_str(params, "courseId")?;
    if !course_exists(conn, &course_id)? {
        return Err(HandlerErr::new("not_found", "course not found"));
    }
    let title = get_required_str(params, "title")?.trim().to_string();
    if title.is_empty() {
        return Err(bad_params("title must not be empty"));
    }

    let date = match get_optional_str(params, "date") {
        None => None,
        Some(raw) => {
            let Some(day) = calendar::parse_day(&raw) else {
                return Err(bad_params("date must be YYYY-MM-DD"));
            };
            Some(day.format("%Y-%m-%d").to_string())
        }
    };
    let duration_minutes = match params.get("durationMinutes") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => {
            let Some(n) = v.as_i64().filter(|n| *n > 0) else {
                return Err(bad_params("durationMinutes must be a positive integer"));
            };
            Some(n)
        }
    };
    let notes = get_optional_str(params, "notes");

    let lecture_id = Uuid::new_v4().to_string();
    let sort_order = next_sort_order(conn, "lectures")?;
    conn.execute(
        "INSERT INTO lectures(id, course_id, title, date, duration_minutes, notes, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &lecture_id,
            &course_id,
            &title,
            &date,
            &duration_minutes,
            &notes,
            sort_order,
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details("db_insert_failed", e.to_string(), json!({ "table": "lectures" }))
    })?;

    Ok(json!({ "lectureId": lecture_id }))
}

fn lectures_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user = require_session(conn, params)?;
    require_role(&user, &["admin", "teacher"])?;

    let lecture_id = get_required_str(params, "lectureId")?;
    let removed = conn
        .execute("DELETE FROM lectures WHERE id = ?", [&lecture_id])
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    if removed == 0 {
        return Err(HandlerErr::new("not_found", "lecture not found"));
    }

    Ok(json!({ "ok": true }))
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
        "lectures.list" => Some(with_db(state, req, lectures_list)),
        "lectures.create" => Some(with_db(state, req, lectures_create)),
        "lectures.delete" => Some(with_db(state, req, lectures_delete)),
        _ => None,
    }
}
