use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{authenticated, parse_params, required_str, to_result};
use crate::ipc::types::{AppState, Request};
use crate::lifecycle::profiles::{self, ProfilePatch, Role};

fn handle_user_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    to_result(&profiles::get_profile(conn, &caller)?)
}

fn handle_user_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    let patch: ProfilePatch = parse_params(&req.params)?;
    to_result(&profiles::update_profile(conn, &caller, patch)?)
}

fn handle_user_set_role(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    let user_id = required_str(&req.params, "userId")?;
    let raw = required_str(&req.params, "role")?;
    let role = Role::parse(&raw).ok_or_else(|| HandlerErr::bad_params("role must be STUDENT, PROFESSOR or ADMIN"))?;
    to_result(&profiles::set_role(conn, &caller, &user_id, role)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "user.get" => handle_user_get(state, req),
        "user.update" => handle_user_update(state, req),
        "user.setRole" => handle_user_set_role(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
