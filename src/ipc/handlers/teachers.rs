use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    bad_params, db_query_failed, get_optional_str, get_required_str, next_sort_order, require_role,
    require_session, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn teachers_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_session(conn, params)?;

    let mut stmt = conn
        .prepare(
            "SELECT
               t.id,
               t.first_name,
               t.last_name,
               t.email,
               t.phone,
               t.subject,
               t.sort_order,
               (SELECT COUNT(*) FROM courses c WHERE c.teacher_id = t.id) AS course_count
             FROM teachers t
             ORDER BY t.sort_order",
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
                "phone": r.get::<_, Option<String>>(4)?,
                "subject": r.get::<_, Option<String>>(5)?,
                "sortOrder": r.get::<_, i64>(6)?,
                "courseCount": r.get::<_, i64>(7)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_failed)?;

    Ok(json!({ "teachers": rows }))
}

fn teachers_create(
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
    let phone = get_optional_str(params, "phone");
    let subject = get_optional_str(params, "subject");

    let user_id = match get_optional_str(params, "userId") {
        None => None,
        Some(uid) => {
            let role: Option<String> = conn
                .query_row("SELECT role FROM users WHERE id = ?", [&uid], |r| r.get(0))
                .optional()
                .map_err(db_query_failed)?;
            match role.as_deref() {
                None => return Err(HandlerErr::new("not_found", "linked user not found")),
                Some("teacher") => Some(uid),
                Some(_) => return Err(bad_params("linked user must have the teacher role")),
            }
        }
    };

    let teacher_id = Uuid::new_v4().to_string();
    let sort_order = next_sort_order(conn, "teachers")?;
    conn.execute(
        "INSERT INTO teachers(id, user_id, first_name, last_name, email, phone, subject, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &teacher_id,
            &user_id,
            &first_name,
            &last_name,
            &email,
            &phone,
            &subject,
            sort_order,
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details("db_insert_failed", e.to_string(), json!({ "table": "teachers" }))
    })?;

    Ok(json!({ "teacherId": teacher_id }))
}

fn teachers_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user = require_session(conn, params)?;
    require_role(&user, &["admin"])?;

    let teacher_id = get_required_str(params, "teacherId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [&teacher_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_query_failed)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "teacher not found"));
    }

    // Only the provided fields change.
    for (key, column) in [
        ("firstName", "first_name"),
        ("lastName", "last_name"),
        ("email", "email"),
        ("phone", "phone"),
        ("subject", "subject"),
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
        let sql = format!("UPDATE teachers SET {} = ? WHERE id = ?", column);
        conn.execute(&sql, (trimmed, &teacher_id))
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }

    Ok(json!({ "ok": true }))
}

fn teachers_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user = require_session(conn, params)?;
    require_role(&user, &["admin"])?;

    let teacher_id = get_required_str(params, "teacherId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [&teacher_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_query_failed)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "teacher not found"));
    }

    let course_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM courses WHERE teacher_id = ?",
            [&teacher_id],
            |r| r.get(0),
        )
        .map_err(db_query_failed)?;
    if course_count > 0 {
        return Err(HandlerErr::with_details(
            "in_use",
            "teacher is assigned to courses",
            json!({ "courseCount": course_count }),
        ));
    }

    conn.execute("DELETE FROM teachers WHERE id = ?", [&teacher_id])
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;

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
        "teachers.list" => Some(with_db(state, req, teachers_list)),
        "teachers.create" => Some(with_db(state, req, teachers_create)),
        "teachers.update" => Some(with_db(state, req, teachers_update)),
        "teachers.delete" => Some(with_db(state, req, teachers_delete)),
        _ => None,
    }
}
