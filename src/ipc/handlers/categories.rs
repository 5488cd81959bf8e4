use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    bad_params, db_query_failed, get_required_str, next_sort_order, require_role, require_session,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn categories_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_session(conn, params)?;

    let mut stmt = conn
        .prepare(
            "SELECT
               cat.id,
               cat.name,
               cat.sort_order,
               (SELECT COUNT(*) FROM courses c WHERE c.category_id = cat.id) AS course_count
             FROM categories cat
             ORDER BY cat.sort_order",
        )
        .map_err(db_query_failed)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "sortOrder": r.get::<_, i64>(2)?,
                "courseCount": r.get::<_, i64>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_failed)?;

    Ok(json!({ "categories": rows }))
}

fn categories_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user = require_session(conn, params)?;
    require_role(&user, &["admin"])?;

    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(bad_params("name must not be empty"));
    }

    let taken: Option<i64> = conn
        .query_row("SELECT 1 FROM categories WHERE name = ?", [&name], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_query_failed)?;
    if taken.is_some() {
        return Err(HandlerErr::new("name_taken", "category already exists"));
    }

    let category_id = Uuid::new_v4().to_string();
    let sort_order = next_sort_order(conn, "categories")?;
    conn.execute(
        "INSERT INTO categories(id, name, sort_order) VALUES(?, ?, ?)",
        (&category_id, &name, sort_order),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "categories" }),
        )
    })?;

    Ok(json!({ "categoryId": category_id, "name": name }))
}

fn categories_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user = require_session(conn, params)?;
    require_role(&user, &["admin"])?;

    let category_id = get_required_str(params, "categoryId")?;
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM categories WHERE id = ?",
            [&category_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_query_failed)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "category not found"));
    }

    let course_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM courses WHERE category_id = ?",
            [&category_id],
            |r| r.get(0),
        )
        .map_err(db_query_failed)?;
    if course_count > 0 {
        return Err(HandlerErr::with_details(
            "in_use",
            "category still has courses",
            json!({ "courseCount": course_count }),
        ));
    }

    conn.execute("DELETE FROM categories WHERE id = ?", [&category_id])
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
        "categories.list" => Some(with_db(state, req, categories_list)),
        "categories.create" => Some(with_db(state, req, categories_create)),
        "categories.delete" => Some(with_db(state, req, categories_delete)),
        _ => None,
    }
}
