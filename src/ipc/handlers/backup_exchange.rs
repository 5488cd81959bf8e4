use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, require_role, require_session};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_backup_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let user = match require_session(conn, &req.params) {
        Ok(u) => u,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_role(&user, &["admin"]) {
        return e.response(&req.id);
    }
    let out_path = match get_required_str(&req.params, "outPath") {
        Ok(p) => PathBuf::from(p),
        Err(e) => return e.response(&req.id),
    };

    match backup::export_workspace_bundle(&workspace, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormat": summary.bundle_format,
                "entryCount": summary.entry_count,
                "dbSha256": summary.db_sha256,
                "outPath": out_path.to_string_lossy()
            }),
        ),
        Err(e) => err(&req.id, "backup_export_failed", format!("{e:#}"), None),
    }
}

fn handle_backup_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let user = match require_session(conn, &req.params) {
        Ok(u) => u,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_role(&user, &["admin"]) {
        return e.response(&req.id);
    }
    let in_path = match get_required_str(&req.params, "inPath") {
        Ok(p) => PathBuf::from(p),
        Err(e) => return e.response(&req.id),
    };

    // The open connection pins the database file; release it before the
    // bundle swaps the file underneath, then reopen whatever landed.
    state.db = None;
    let imported = backup::import_workspace_bundle(&in_path, &workspace);

    let reopened = match db::open_db(&workspace) {
        Ok(conn) => {
            state.db = Some(conn);
            true
        }
        Err(e) => {
            log::warn!("failed to reopen workspace after import: {e:?}");
            false
        }
    };

    match imported {
        Ok(summary) => {
            if !reopened {
                return err(
                    &req.id,
                    "db_open_failed",
                    "bundle imported but workspace failed to reopen",
                    None,
                );
            }
            // Sessions now come from the imported database; the caller must
            // sign in again.
            ok(
                &req.id,
                json!({
                    "bundleFormatDetected": summary.bundle_format_detected,
                    "signedOut": true
                }),
            )
        }
        Err(e) => err(&req.id, "backup_import_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(handle_backup_export(state, req)),
        "backup.import" => Some(handle_backup_import(state, req)),
        _ => None,
    }
}
