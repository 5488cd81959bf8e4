use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    bad_params, db_query_failed, get_optional_str, get_required_str, next_sort_order, require_role,
    require_session, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn category_exists(conn: &Connection, category_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM categories WHERE id = ?",
        [category_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(db_query_failed)
}

fn teacher_exists(conn: &Connection, teacher_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM teachers WHERE id = ?", [teacher_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(db_query_failed)
}

fn courses_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_session(conn, params)?;

    let category_filter = get_optional_str(params, "categoryId");

    let sql = "SELECT
                 c.id,
                 c.name,
                 c.code,
                 c.description,
                 c.sort_order,
                 c.category_id,
                 cat.name AS category_name,
                 c.teacher_id,
                 (SELECT t.last_name || ', ' || t.first_name FROM teachers t WHERE t.id = c.teacher_id) AS teacher_name,
                 (SELECT COUNT(*) FROM lectures l WHERE l.course_id = c.id) AS lecture_count
               FROM courses c
               JOIN categories cat ON cat.id = c.category_id
               WHERE (?1 IS NULL OR c.category_id = ?1)
               ORDER BY c.sort_order";
    let mut stmt = conn.prepare(sql).map_err(db_query_failed)?;
    let rows = stmt
        .query_map([&category_filter], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, Option<String>>(2)?,
                "description": r.get::<_, Option<String>>(3)?,
                "sortOrder": r.get::<_, i64>(4)?,
                "categoryId": r.get::<_, String>(5)?,
                "categoryName": r.get::<_, String>(6)?,
                "teacherId": r.get::<_, Option<String>>(7)?,
                "teacherName": r.get::<_, Option<String>>(8)?,
                "lectureCount": r.get::<_, i64>(9)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_failed)?;

    Ok(json!({ "courses": rows }))
}

fn courses_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user = require_session(conn, params)?;
    require_role(&user, &["admin"])?;

    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(bad_params("name must not be empty"));
    }
    let category_id = get_required_str(params, "categoryId")?;
    if !category_exists(conn, &category_id)? {
        return Err(HandlerErr::new("not_found", "category not found"));
    }
    let teacher_id = match get_optional_str(params, "teacherId") {
        None => None,
        Some(tid) => {
            if !teacher_exists(conn, &tid)? {
                return Err(HandlerErr::new("not_found", "teacher not found"));
            }
            Some(tid)
        }
    };
    let code = get_optional_str(params, "code");
    let description = get_optional_str(params, "description");

    let course_id = Uuid::new_v4().to_string();
    let sort_order = next_sort_order(conn, "courses")?;
    conn.execute(
        "INSERT INTO courses(id, category_id, teacher_id, name, code, description, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &course_id,
            &category_id,
            &teacher_id,
            &name,
            &code,
            &description,
            sort_order,
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details("db_insert_failed", e.to_string(), json!({ "table": "courses" }))
    })?;

    Ok(json!({ "courseId": course_id }))
}

fn courses_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user = require_session(conn, params)?;
    require_role(&user, &["admin"])?;

    let course_id = get_required_str(params, "courseId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [&course_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_query_failed)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "course not found"));
    }

    if let Some(category_id) = get_optional_str(params, "categoryId") {
        if !category_exists(conn, &category_id)? {
            return Err(HandlerErr::new("not_found", "category not found"));
        }
        conn.execute(
            "UPDATE courses SET category_id = ? WHERE id = ?",
            (&category_id, &course_id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }

    // teacherId: null clears the assignment, a string must resolve.
    if let Some(value) = params.get("teacherId") {
        if value.is_null() {
            conn.execute(
                "UPDATE courses SET teacher_id = NULL WHERE id = ?",
                [&course_id],
            )
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
        } else {
            let Some(tid) = value.as_str() else {
                return Err(bad_params("teacherId must be string or null"));
            };
            if !teacher_exists(conn, tid)? {
                return Err(HandlerErr::new("not_found", "teacher not found"));
            }
            conn.execute(
                "UPDATE courses SET teacher_id = ? WHERE id = ?",
                (tid, &course_id),
            )
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
        }
    }

    for (key, column) in [
        ("name", "name"),
        ("code", "code"),
        ("description", "description"),
    ] {
        let Some(value) = params.get(key) else {
            continue;
        };
        let Some(s) = value.as_str() else {
            return Err(bad_params(format!("{} must be a string", key)));
        };
        let trimmed = s.trim();
        if key == "name" && trimmed.is_empty() {
            return Err(bad_params("name must not be empty"));
        }
        let sql = format!("UPDATE courses SET {} = ? WHERE id = ?", column);
        conn.execute(&sql, (trimmed, &course_id))
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }

    Ok(json!({ "ok": true }))
}

fn courses_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user = require_session(conn, params)?;
    require_role(&user, &["admin"])?;

    let course_id = get_required_str(params, "courseId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [&course_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_query_failed)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "course not found"));
    }

    let lecture_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM lectures WHERE course_id = ?",
            [&course_id],
            |r| r.get(0),
        )
        .map_err(db_query_failed)?;
    if lecture_count > 0 {
        return Err(HandlerErr::with_details(
            "in_use",
            "course still has lectures",
            json!({ "lectureCount": lecture_count }),
        ));
    }

    conn.execute("DELETE FROM courses WHERE id = ?", [&course_id])
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
        "courses.list" => Some(with_db(state, req, courses_list)),
        "courses.create" => Some(with_db(state, req, courses_create)),
        "courses.update" => Some(with_db(state, req, courses_update)),
        "courses.delete" => Some(with_db(state, req, courses_delete)),
        _ => None,
    }
}
