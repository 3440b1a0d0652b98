use crate::backup::{self, BundleError};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::core::open_workspace;
use crate::ipc::helpers::authenticated;
use crate::ipc::types::{AppState, Request};
use crate::lifecycle::profiles;
use serde_json::json;
use std::path::PathBuf;

fn target_workspace(state: &AppState, req: &Request) -> Result<PathBuf, HandlerErr> {
    req.params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
        .ok_or_else(HandlerErr::no_workspace)
}

// Bundles carry every classroom in the workspace.
fn require_operator(state: &AppState, req: &Request) -> Result<(), HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    profiles::require_admin_role(conn, &caller)?;
    Ok(())
}

fn handle_backup_export_workspace_bundle(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return Err(HandlerErr::bad_params("missing outPath")),
    };
    require_operator(state, req)?;
    let workspace_path = target_workspace(state, req)?;

    if let Some(conn) = state.db.as_ref() {
        // Fold the WAL into the main file so the copied database is complete.
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .map_err(|e| HandlerErr::internal("failed to checkpoint database", e.into()))?;
    }

    let export = backup::export_workspace_bundle(&workspace_path, &PathBuf::from(&out_path))
        .map_err(|e| HandlerErr::internal("failed to export workspace bundle", e))?;
    tracing::info!(out = %out_path, artifacts = export.artifact_count, "workspace bundle exported");

    Ok(json!({
        "path": out_path,
        "bundleFormat": export.bundle_format,
        "entryCount": export.entry_count,
        "artifactCount": export.artifact_count
    }))
}

fn handle_backup_import_workspace_bundle(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let in_path = match req.params.get("inPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return Err(HandlerErr::bad_params("missing inPath")),
    };
    require_operator(state, req)?;
    let workspace_path = target_workspace(state, req)?;

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(HandlerErr::new("not_found", "bundle file not found").with_details(json!({ "path": in_path })));
    }

    // Drop open handle before replacing file.
    state.db = None;

    let import = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(v) => v,
        Err(e) => {
            // A rejected bundle leaves the old database in place; keep serving it.
            if let Some(current) = state.workspace.clone() {
                if let Err(reopen) = open_workspace(state, current) {
                    tracing::error!(error = ?reopen, "failed to reopen workspace after rejected import");
                }
            }
            return Err(match e {
                BundleError::Invalid(message) => {
                    tracing::warn!(bundle = %in_path, reason = %message, "workspace bundle rejected");
                    HandlerErr::new("validation_failed", message).with_details(json!({ "field": "inPath" }))
                }
                BundleError::Io(inner) => HandlerErr::internal("failed to import workspace bundle", inner),
            });
        }
    };
    open_workspace(state, workspace_path.clone()).map_err(|e| HandlerErr::internal("failed to reopen workspace", e))?;
    tracing::info!(bundle = %in_path, artifacts = import.artifact_count, "workspace bundle imported");

    Ok(json!({
        "workspacePath": workspace_path.to_string_lossy(),
        "bundleFormatDetected": import.bundle_format_detected,
        "artifactCount": import.artifact_count
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backup.exportWorkspaceBundle" => handle_backup_export_workspace_bundle(state, req),
        "backup.importWorkspaceBundle" => handle_backup_import_workspace_bundle(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
