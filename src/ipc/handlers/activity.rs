use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{authenticated, to_result};
use crate::ipc::types::{AppState, Request};
use crate::lifecycle::activity;
use serde_json::json;

fn handle_activities_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    let limit = match req.params.get("limit") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => Some(
            v.as_u64()
                .ok_or_else(|| HandlerErr::bad_params("limit must be a non-negative integer"))?,
        ),
    };
    let limit = activity::clamp_limit(limit.map(|n| usize::try_from(n).unwrap_or(usize::MAX)));
    let events = activity::list(conn, &caller, limit)?;
    Ok(json!({ "activities": to_result(&events)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "activities.list" => handle_activities_list(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
