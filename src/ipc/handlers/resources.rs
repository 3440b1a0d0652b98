use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{artifact_reference, authenticated, now, optional_str, required_str, to_result};
use crate::ipc::types::{AppState, Request};
use crate::lifecycle::resources::{self, NewResource};
use serde_json::json;

fn handle_resources_upload(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    let classroom_id = required_str(&req.params, "classroomId")?;
    let artifact = artifact_reference(state, &req.params)?;
    let fields = NewResource {
        title: optional_str(&req.params, "title"),
        category: optional_str(&req.params, "category"),
        url: artifact.url,
        file_size: artifact.file_size,
    };
    to_result(&resources::upload(conn, &caller, &classroom_id, fields, now())?)
}

fn handle_resources_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    let classroom_id = required_str(&req.params, "classroomId")?;
    let listed = resources::list(conn, &classroom_id, &caller)?;
    Ok(json!({ "resources": to_result(&listed)? }))
}

fn handle_resources_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    let resource_id = required_str(&req.params, "resourceId")?;
    resources::delete(conn, &caller, &resource_id)?;
    Ok(json!({ "deleted": true, "resourceId": resource_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "resources.upload" => handle_resources_upload(state, req),
        "resources.list" => handle_resources_list(state, req),
        "resources.delete" => handle_resources_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
