use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{authenticated, now, parse_params, required_str, to_result};
use crate::ipc::types::{AppState, Request};
use crate::lifecycle::classrooms::{self, NewClassroom};
use crate::lifecycle::membership;
use serde_json::json;

fn handle_classrooms_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    let listed = classrooms::list_for_user(conn, &caller, now())?;
    Ok(json!({ "classrooms": to_result(&listed)? }))
}

fn handle_classrooms_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    let fields: NewClassroom = parse_params(&req.params)?;
    let created = classrooms::create(conn, &caller, fields, &state.config.invite_base_url, now())?;
    to_result(&created)
}

fn handle_classrooms_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    let classroom_id = required_str(&req.params, "classroomId")?;
    to_result(&classrooms::get_by_id(conn, &classroom_id, &caller)?)
}

fn handle_classrooms_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    let classroom_id = required_str(&req.params, "classroomId")?;
    // Blank confirmation still reaches the domain check and fails validation there.
    let confirmation = req
        .params
        .get("confirmation")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    to_result(&classrooms::delete(conn, &classroom_id, &caller, confirmation)?)
}

fn handle_classrooms_join(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    let code = required_str(&req.params, "code")?;
    to_result(&membership::join_by_code(conn, &caller, &code, now())?)
}

fn handle_classrooms_leave(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    let classroom_id = required_str(&req.params, "classroomId")?;
    membership::leave(conn, &caller, &classroom_id)?;
    Ok(json!({ "left": true, "classroomId": classroom_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "classrooms.list" => handle_classrooms_list(state, req),
        "classrooms.create" => handle_classrooms_create(state, req),
        "classrooms.get" => handle_classrooms_get(state, req),
        "classrooms.delete" => handle_classrooms_delete(state, req),
        "classrooms.join" => handle_classrooms_join(state, req),
        "classrooms.leave" => handle_classrooms_leave(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
