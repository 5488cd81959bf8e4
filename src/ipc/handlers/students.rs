use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    bad_params, db_query_failed, get_optional_str, get_required_str, next_sort_order, require_role,
    require_session, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_session(conn, params)?;

    let include_inactive = params
        .get("includeInactive")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let mut stmt = conn
        .prepare(
            "SELECT
               s.id,
               s.first_name,
               s.last_name,
               s.email,
               s.roll_no,
               s.active,
               s.sort_order,
               (SELECT COUNT(*) FROM attendance_records ar WHERE ar.student_id = s.id) AS record_count
             FROM students s
             ORDER BY s.sort_order",
        )
        .map_err(db_query_failed)?;
    let rows = stmt
        .query_map([], |r| {
            let first: String = r.get(1)?;
            let last: String = r.get(2)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "firstName": first,
                "lastName": last,
                "displayName": format!("{}, {}", last, first),
                "email": r.get::<_, Option<String>>(3)?,
                "rollNo": r.get::<_, Option<String>>(4)?,
                "active": r.get::<_, i64>(5)? != 0,
                "sortOrder": r.get::<_, i64>(6)?,
                "attendanceRecordCount": r.get::<_, i64>(7)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_failed)?;

    let students: Vec<serde_json::Value> = rows
        .into_iter()
        .filter(|s| include_inactive || s.get("active").and_then(|v| v.as_bool()).unwrap_or(false))
        .collect();

    Ok(json!({ "students": students }))
}

fn students_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user = require_session(conn, params)?;
    require_role(&user, &["admin"])?;

    let first_name = get_required_str(params, "firstName")?.trim().to_string();
    let last_name = get_required_str(params, "lastName")?.trim().to_string();
    if first_name.is_empty() || last_name.is_empty() {
        return Err(bad_params("firstName and lastName must not be empty"));
    }
    let email = get_optional_str(params, "email");
    let roll_no = get_optional_str(params, "rollNo");

    let user_id = match get_optional_str(params, "userId") {
        None => None,
        Some(uid) => {
            let role: Option<String> = conn
                .query_row("SELECT role FROM users WHERE id = ?", [&uid], |r| r.get(0))
                .optional()
                .map_err(db_query_failed)?;
            match role.as_deref() {
                None => return Err(HandlerErr::new("not_found", "linked user not found")),
                Some("student") => Some(uid),
                Some(_) => return Err(bad_params("linked user must have the student role")),
            }
        }
    };

    let student_id = Uuid::new_v4().to_string();
    let sort_order = next_sort_order(conn, "students")?;
    conn.execute(
        "INSERT INTO students(id, user_id, first_name, last_name, email, roll_no, active, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &student_id,
            &user_id,
            &first_name,
            &last_name,
            &email,
            &roll_no,
            sort_order,
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details("db_insert_failed", e.to_string(), json!({ "table": "students" }))
    })?;

    Ok(json!({ "studentId": student_id }))
}

fn students_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user = require_session(conn, params)?;
    require_role(&user, &["admin"])?;

    let student_id = get_required_str(params, "studentId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_query_failed)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    for (key, column) in [
        ("firstName", "first_name"),
        ("lastName", "last_name"),
        ("email", "email"),
        ("rollNo", "roll_no"),
    ] {
        let Some(value) = params.get(key) else {
            continue;
        };
        let Some(s) = value.as_str() else {
            return Err(bad_params(format!("{} must be a string", key)));
        };
        let trimmed = s.trim();
        if (key == "firstName" || key == "lastName") && trimmed.is_empty() {
            return Err(bad_params(format!("{} must not be empty", key)));
        }
        let sql = format!("UPDATE students SET {} = ? WHERE id = ?", column);
        conn.execute(&sql, (trimmed, &student_id))
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }

    if let Some(active) = params.get("active") {
        let Some(flag) = active.as_bool() else {
            return Err(bad_params("active must be a boolean"));
        };
        conn.execute(
            "UPDATE students SET active = ? WHERE id = ?",
            (flag as i64, &student_id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }

    Ok(json!({ "ok": true }))
}

fn students_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user = require_session(conn, params)?;
    require_role(&user, &["admin"])?;

    let student_id = get_required_str(params, "studentId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_query_failed)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    for (sql, table) in [
        (
            "DELETE FROM attendance_records WHERE student_id = ?",
            "attendance_records",
        ),
        (
            "DELETE FROM attendance_feed_state WHERE student_id = ?",
            "attendance_feed_state",
        ),
        ("DELETE FROM students WHERE id = ?", "students"),
    ] {
        if let Err(e) = tx.execute(sql, [&student_id]) {
            let _ = tx.rollback();
            return Err(HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": table }),
            ));
        }
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

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
        "students.list" => Some(with_db(state, req, students_list)),
        "students.create" => Some(with_db(state, req, students_create)),
        "students.update" => Some(with_db(state, req, students_update)),
        "students.delete" => Some(with_db(state, req, students_delete)),
        _ => None,
    }
}
