use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_backup_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing outPath", None),
    };
    let Some(workspace_path) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    if let Some(conn) = state.db.as_ref() {
        if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(FULL)") {
            tracing::debug!(error = %e, "wal checkpoint before export failed");
        }
    }

    match backup::export_snapshot(&workspace_path, &PathBuf::from(&out_path)) {
        Ok(export) => ok(
            &req.id,
            json!({
                "ok": true,
                "path": out_path,
                "format": export.format,
                "sha256": export.sha256,
                "bytes": export.bytes
            }),
        ),
        Err(e) => err(
            &req.id,
            "io_failed",
            format!("{e:#}"),
            Some(json!({ "path": out_path })),
        ),
    }
}

fn handle_backup_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match req.params.get("inPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing inPath", None),
    };
    let Some(workspace_path) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "snapshot file not found",
            Some(json!({ "path": in_path })),
        );
    }

    // Drop open handle before replacing file.
    state.db = None;

    let import = backup::import_snapshot(&src, &workspace_path);
    // Reopen whatever database is now in place, restored or not.
    match db::open_db(&workspace_path) {
        Ok(conn) => state.db = Some(conn),
        Err(e) => return err(&req.id, "db_open_failed", e.to_string(), None),
    }
    match import {
        Ok(summary) => ok(
            &req.id,
            json!({
                "ok": true,
                "workspacePath": workspace_path.to_string_lossy(),
                "format": summary.format,
                "sha256": summary.sha256
            }),
        ),
        Err(e) => err(
            &req.id,
            "io_failed",
            format!("{e:#}"),
            Some(json!({ "path": src.to_string_lossy() })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(handle_backup_export(state, req)),
        "backup.import" => Some(handle_backup_import(state, req)),
        _ => None,
    }
}
