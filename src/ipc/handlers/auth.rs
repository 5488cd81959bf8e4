use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    bad_params, db_query_failed, get_optional_str, get_required_str, now_iso, require_session,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

const MIN_PASSWORD_LEN: usize = 6;

fn password_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn open_session(conn: &Connection, user_id: &str) -> Result<String, HandlerErr> {
    let token = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sessions(token, user_id, created_at) VALUES(?, ?, ?)",
        (&token, user_id, now_iso()),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok(token)
}

fn user_json(id: &str, email: &str, display_name: &str, role: &str) -> serde_json::Value {
    json!({
        "id": id,
        "email": email,
        "displayName": display_name,
        "role": role
    })
}

fn auth_sign_up(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let email = get_required_str(params, "email")?.trim().to_lowercase();
    let password = get_required_str(params, "password")?;
    let display_name = get_required_str(params, "displayName")?.trim().to_string();

    if email.is_empty() || !email.contains('@') {
        return Err(bad_params("email must be a valid address"));
    }
    if display_name.is_empty() {
        return Err(bad_params("displayName must not be empty"));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(bad_params(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let user_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
        .map_err(db_query_failed)?;

    // The very first account bootstraps the workspace and becomes admin;
    // everyone after that picks teacher or student.
    let role = if user_count == 0 {
        "admin".to_string()
    } else {
        let requested = get_optional_str(params, "role").unwrap_or_else(|| "student".to_string());
        match requested.as_str() {
            "teacher" | "student" => requested,
            _ => {
                return Err(bad_params("role must be teacher or student"));
            }
        }
    };

    let taken: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE email = ?", [&email], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_query_failed)?;
    if taken.is_some() {
        return Err(HandlerErr::new("email_taken", "account already exists"));
    }

    let user_id = Uuid::new_v4().to_string();
    let salt = Uuid::new_v4().to_string();
    let digest = password_digest(&salt, &password);
    conn.execute(
        "INSERT INTO users(id, email, display_name, role, password_salt, password_digest, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (&user_id, &email, &display_name, &role, &salt, &digest, now_iso()),
    )
    .map_err(|e| {
        HandlerErr::with_details("db_insert_failed", e.to_string(), json!({ "table": "users" }))
    })?;

    let token = open_session(conn, &user_id)?;
    Ok(json!({
        "token": token,
        "user": user_json(&user_id, &email, &display_name, &role)
    }))
}

fn auth_sign_in(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let email = get_required_str(params, "email")?.trim().to_lowercase();
    let password = get_required_str(params, "password")?;

    let row = conn
        .query_row(
            "SELECT id, display_name, role, password_salt, password_digest
             FROM users WHERE email = ?",
            [&email],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                ))
            },
        )
        .optional()
        .map_err(db_query_failed)?;

    // Same error for unknown email and wrong password.
    let Some((user_id, display_name, role, salt, digest)) = row else {
        return Err(HandlerErr::new("bad_credentials", "email or password is wrong"));
    };
    if password_digest(&salt, &password) != digest {
        return Err(HandlerErr::new("bad_credentials", "email or password is wrong"));
    }

    let token = open_session(conn, &user_id)?;
    Ok(json!({
        "token": token,
        "user": user_json(&user_id, &email, &display_name, &role)
    }))
}

fn auth_sign_out(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let token = get_required_str(params, "token")?;
    let removed = conn
        .execute("DELETE FROM sessions WHERE token = ?", [&token])
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    Ok(json!({ "signedOut": removed > 0 }))
}

fn auth_whoami(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user = require_session(conn, params)?;
    Ok(json!({
        "user": user_json(&user.user_id, &user.email, &user.display_name, &user.role)
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
        "auth.signUp" => Some(with_db(state, req, auth_sign_up)),
        "auth.signIn" => Some(with_db(state, req, auth_sign_in)),
        "auth.signOut" => Some(with_db(state, req, auth_sign_out)),
        "auth.whoami" => Some(with_db(state, req, auth_whoami)),
        _ => None,
    }
}
