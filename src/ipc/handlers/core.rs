use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{require_role, require_session, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn school_profile_get(
    conn: &rusqlite::Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_session(conn, params)?;
    let profile = db::settings_get_json(conn, "school.profile")
        .map_err(|e| HandlerErr::new("settings_read_failed", e.to_string()))?
        .unwrap_or_else(|| json!({}));
    Ok(json!({ "profile": profile }))
}

fn school_profile_set(
    conn: &rusqlite::Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user = require_session(conn, params)?;
    require_role(&user, &["admin"])?;
    let Some(profile) = params.get("profile") else {
        return Err(HandlerErr::new("bad_params", "missing profile"));
    };
    if !profile.is_object() {
        return Err(HandlerErr::new("bad_params", "profile must be an object"));
    }
    db::settings_set_json(conn, "school.profile", profile)
        .map_err(|e| HandlerErr::new("settings_write_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn with_db(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&rusqlite::Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
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
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "school.getProfile" => Some(with_db(state, req, school_profile_get)),
        "school.setProfile" => Some(with_db(state, req, school_profile_set)),
        _ => None,
    }
}
