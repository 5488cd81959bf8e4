use crate::calendar;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_query_failed, require_session, HandlerErr, SessionUser};
use crate::ipc::types::{AppState, Request};
use chrono::Datelike;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn count(conn: &Connection, sql: &str) -> Result<i64, HandlerErr> {
    conn.query_row(sql, [], |r| r.get(0)).map_err(db_query_failed)
}

fn admin_dashboard(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({
        "role": "admin",
        "counts": {
            "teachers": count(conn, "SELECT COUNT(*) FROM teachers")?,
            "students": count(conn, "SELECT COUNT(*) FROM students WHERE active = 1")?,
            "categories": count(conn, "SELECT COUNT(*) FROM categories")?,
            "courses": count(conn, "SELECT COUNT(*) FROM courses")?,
            "lectures": count(conn, "SELECT COUNT(*) FROM lectures")?,
            "accounts": count(conn, "SELECT COUNT(*) FROM users")?
        }
    }))
}

fn teacher_dashboard(
    conn: &Connection,
    user: &SessionUser,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id: Option<String> = conn
        .query_row(
            "SELECT id FROM teachers WHERE user_id = ?",
            [&user.user_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_query_failed)?;

    let today = chrono::Local::now().date_naive().format("%Y-%m-%d").to_string();

    let (courses, upcoming) = match &teacher_id {
        None => (Vec::new(), Vec::new()),
        Some(tid) => {
            let mut stmt = conn
                .prepare(
                    "SELECT id, name, code FROM courses WHERE teacher_id = ? ORDER BY sort_order",
                )
                .map_err(db_query_failed)?;
            let courses = stmt
                .query_map([tid], |r| {
                    Ok(json!({
                        "id": r.get::<_, String>(0)?,
                        "name": r.get::<_, String>(1)?,
                        "code": r.get::<_, Option<String>>(2)?
                    }))
                })
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(db_query_failed)?;

            let mut stmt = conn
                .prepare(
                    "SELECT l.id, l.title, l.date, c.name
                     FROM lectures l
                     JOIN courses c ON c.id = l.course_id
                     WHERE c.teacher_id = ? AND l.date IS NOT NULL AND l.date >= ?
                     ORDER BY l.date
                     LIMIT 5",
                )
                .map_err(db_query_failed)?;
            let upcoming = stmt
                .query_map((tid, &today), |r| {
                    Ok(json!({
                        "id": r.get::<_, String>(0)?,
                        "title": r.get::<_, String>(1)?,
                        "date": r.get::<_, String>(2)?,
                        "courseName": r.get::<_, String>(3)?
                    }))
                })
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(db_query_failed)?;

            (courses, upcoming)
        }
    };

    Ok(json!({
        "role": "teacher",
        "teacherId": teacher_id,
        "courses": courses,
        "upcomingLectures": upcoming,
        "studentCount": count(conn, "SELECT COUNT(*) FROM students WHERE active = 1")?
    }))
}

fn student_dashboard(
    conn: &Connection,
    user: &SessionUser,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id: Option<String> = conn
        .query_row(
            "SELECT id FROM students WHERE user_id = ?",
            [&user.user_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_query_failed)?;

    let today = chrono::Local::now().date_naive();

    let (stats, recent) = match &student_id {
        None => (
            calendar::month_stats(today.year(), today.month(), &Default::default()),
            Vec::new(),
        ),
        Some(sid) => {
            let mut stmt = conn
                .prepare(
                    "SELECT date, status FROM attendance_records
                     WHERE student_id = ?
                     ORDER BY date",
                )
                .map_err(db_query_failed)?;
            let rows = stmt
                .query_map([sid], |r| {
                    Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
                })
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(db_query_failed)?;

            let by_date = calendar::status_by_date(rows.clone());
            let stats = calendar::month_stats(today.year(), today.month(), &by_date);

            let recent: Vec<serde_json::Value> = rows
                .iter()
                .rev()
                .take(5)
                .map(|(date, status)| {
                    json!({
                        "date": date,
                        "status": status,
                        "normalizedStatus": calendar::normalize_status(Some(status)).as_str()
                    })
                })
                .collect();

            (stats, recent)
        }
    };

    Ok(json!({
        "role": "student",
        "studentId": student_id,
        "month": today.format("%Y-%m").to_string(),
        "stats": stats,
        "recentRecords": recent
    }))
}

fn dashboard_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user = require_session(conn, params)?;
    match user.role.as_str() {
        "admin" => admin_dashboard(conn),
        "teacher" => teacher_dashboard(conn, &user),
        "student" => student_dashboard(conn, &user),
        other => Err(HandlerErr::new(
            "bad_role",
            format!("unknown role: {}", other),
        )),
    }
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
        "dashboard.open" => Some(with_db(state, req, dashboard_open)),
        _ => None,
    }
}
