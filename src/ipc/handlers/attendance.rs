use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{authenticated, now, required_str, to_result};
use crate::ipc::types::{AppState, Request};
use crate::lifecycle::attendance;
use serde_json::json;

fn handle_attendance_mark(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    let classroom_id = required_str(&req.params, "classroomId")?;
    let user_id = required_str(&req.params, "userId")?;
    let date = required_str(&req.params, "date")?;
    let status = required_str(&req.params, "status")?;
    to_result(&attendance::mark(conn, &caller, &classroom_id, &user_id, &date, &status, now())?)
}

fn handle_attendance_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    let classroom_id = required_str(&req.params, "classroomId")?;
    let records = attendance::list(conn, &classroom_id, &caller)?;
    Ok(json!({ "records": to_result(&records)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "attendance.mark" => handle_attendance_mark(state, req),
        "attendance.list" => handle_attendance_list(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
