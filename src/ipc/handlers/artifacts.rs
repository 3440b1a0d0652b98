use crate::artifacts;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{authenticated, required_str, to_result, workspace};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_artifacts_upload(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    authenticated(state, req)?;
    let ws = workspace(state)?;
    let file_path = required_str(&req.params, "filePath")?;
    let src = PathBuf::from(&file_path);
    if !src.is_file() {
        return Err(HandlerErr::new("not_found", "file not found").with_details(json!({ "path": file_path })));
    }
    let stored = artifacts::store(ws, &src).map_err(|e| HandlerErr::internal("failed to store artifact", e))?;
    to_result(&stored)
}

fn handle_artifacts_resolve(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    authenticated(state, req)?;
    let ws = workspace(state)?;
    let url = required_str(&req.params, "url")?;
    if artifacts::parse_url(&url).is_none() {
        return Err(HandlerErr::new("validation_failed", "malformed artifact url").with_details(json!({ "field": "url" })));
    }
    let path = artifacts::resolve(ws, &url)
        .map_err(|_| HandlerErr::new("not_found", "artifact not found").with_details(json!({ "entity": "artifact" })))?;
    Ok(json!({ "url": url, "path": path.to_string_lossy() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "artifacts.upload" => handle_artifacts_upload(state, req),
        "artifacts.resolve" => handle_artifacts_resolve(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
