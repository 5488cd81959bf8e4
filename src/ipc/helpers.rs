use crate::ipc::error::err;
use rusqlite::{Connection, OptionalExtension};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        code: &'static str,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn bad_params(message: impl Into<String>) -> HandlerErr {
    HandlerErr::new("bad_params", message)
}

pub fn db_query_failed(e: rusqlite::Error) -> HandlerErr {
    HandlerErr::new("db_query_failed", e.to_string())
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.trim().is_empty())
}

pub fn now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Append position for list-ordered tables. `table` must be a compile-time
/// name, never user input.
pub fn next_sort_order(conn: &Connection, table: &'static str) -> Result<i64, HandlerErr> {
    let sql = format!("SELECT COALESCE(MAX(sort_order) + 1, 0) FROM {}", table);
    conn.query_row(&sql, [], |r| r.get(0))
        .map_err(db_query_failed)
}

#[derive(Debug, Clone)]
pub struct SessionUser {
    pub user_id: String,
    pub role: String,
    pub display_name: String,
    pub email: String,
}

/// Resolve params.token to a signed-in user. Every data method runs behind
/// this; only health/workspace/auth methods are open.
pub fn require_session(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<SessionUser, HandlerErr> {
    let Some(token) = params.get("token").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::new("auth_required", "missing token"));
    };
    let row = conn
        .query_row(
            "SELECT u.id, u.role, u.display_name, u.email
             FROM sessions s
             JOIN users u ON u.id = s.user_id
             WHERE s.token = ?",
            [token],
            |r| {
                Ok(SessionUser {
                    user_id: r.get(0)?,
                    role: r.get(1)?,
                    display_name: r.get(2)?,
                    email: r.get(3)?,
                })
            },
        )
        .optional()
        .map_err(db_query_failed)?;
    row.ok_or_else(|| HandlerErr::new("invalid_token", "session not found"))
}

pub fn require_role(user: &SessionUser, allowed: &[&str]) -> Result<(), HandlerErr> {
    if allowed.iter().any(|r| *r == user.role) {
        return Ok(());
    }
    Err(HandlerErr::with_details(
        "forbidden",
        format!("requires role {}", allowed.join(" or ")),
        serde_json::json!({ "role": user.role }),
    ))
}
