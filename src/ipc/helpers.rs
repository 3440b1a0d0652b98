use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use super::error::HandlerErr;
use super::identity::resolve_identity;
use super::types::{AppState, Request};
use crate::artifacts;
use crate::lifecycle::profiles;

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state.db.as_ref().ok_or_else(HandlerErr::no_workspace)
}

pub fn workspace(state: &AppState) -> Result<&Path, HandlerErr> {
    state.workspace.as_deref().ok_or_else(HandlerErr::no_workspace)
}

/// Open connection plus the authenticated caller's id. The caller's user row
/// is created or refreshed on the way in, and configured operators are
/// promoted to ADMIN.
pub fn authenticated<'a>(state: &'a AppState, req: &Request) -> Result<(&'a Connection, String), HandlerErr> {
    let conn = db(state)?;
    let principal = resolve_identity(req).ok_or_else(HandlerErr::unauthenticated)?;
    profiles::ensure_user(conn, &principal, now())?;
    if state.config.admin_users.iter().any(|id| *id == principal.user_id) {
        profiles::grant_admin(conn, &principal.user_id)?;
    }
    Ok((conn, principal.user_id))
}

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn parse_params<T: DeserializeOwned>(params: &serde_json::Value) -> Result<T, HandlerErr> {
    let value = if params.is_null() { json!({}) } else { params.clone() };
    serde_json::from_value(value).map_err(|e| HandlerErr::bad_params(format!("invalid params: {}", e)))
}

pub fn to_result<T: Serialize>(v: &T) -> Result<serde_json::Value, HandlerErr> {
    serde_json::to_value(v).map_err(|e| HandlerErr::internal("failed to serialize result", e.into()))
}

/// What a submission or resource points at.
pub struct ArtifactReference {
    pub url: String,
    pub file_size: Option<i64>,
}

/// Reads `filePath` (copied into the artifact store) or `artifactUrl`.
/// `artifact://` references must name a stored file; other links pass through.
pub fn artifact_reference(state: &AppState, params: &serde_json::Value) -> Result<ArtifactReference, HandlerErr> {
    let ws = workspace(state)?;
    if let Some(file_path) = optional_str(params, "filePath") {
        let src = PathBuf::from(&file_path);
        if !src.is_file() {
            return Err(HandlerErr::new("not_found", "file not found").with_details(json!({ "path": file_path })));
        }
        let stored = artifacts::store(ws, &src).map_err(|e| HandlerErr::internal("failed to store artifact", e))?;
        return Ok(ArtifactReference {
            url: stored.url,
            file_size: i64::try_from(stored.size).ok(),
        });
    }

    let url = optional_str(params, "artifactUrl")
        .or_else(|| optional_str(params, "content"))
        .ok_or_else(|| HandlerErr::bad_params("missing filePath or artifactUrl"))?;
    if !artifacts::is_artifact_url(&url) {
        return Ok(ArtifactReference { url, file_size: None });
    }
    if artifacts::parse_url(&url).is_none() {
        return Err(HandlerErr::new("validation_failed", "malformed artifact url")
            .with_details(json!({ "field": "artifactUrl" })));
    }
    let path = artifacts::resolve(ws, &url).map_err(|_| {
        HandlerErr::new("not_found", "artifact not found").with_details(json!({ "entity": "artifact" }))
    })?;
    let file_size = std::fs::metadata(&path).ok().and_then(|m| i64::try_from(m.len()).ok());
    Ok(ArtifactReference { url, file_size })
}
