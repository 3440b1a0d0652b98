use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{artifact_reference, authenticated, now, parse_params, required_str, to_result};
use crate::ipc::types::{AppState, Request};
use crate::lifecycle::assignments::{self, NewAssignment};
use serde_json::json;

fn handle_assignments_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    let classroom_id = required_str(&req.params, "classroomId")?;
    let fields: NewAssignment = parse_params(&req.params)?;
    to_result(&assignments::create_assignment(conn, &caller, &classroom_id, fields, now())?)
}

fn handle_assignments_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    let classroom_id = required_str(&req.params, "classroomId")?;
    let listed = assignments::list_assignments(conn, &classroom_id, &caller, now())?;
    Ok(json!({ "assignments": to_result(&listed)? }))
}

fn handle_assignments_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    let assignment_id = required_str(&req.params, "assignmentId")?;
    to_result(&assignments::get_assignment(conn, &assignment_id, &caller, now())?)
}

fn handle_assignments_submit(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    let assignment_id = required_str(&req.params, "assignmentId")?;
    let artifact = artifact_reference(state, &req.params)?;
    to_result(&assignments::submit(conn, &assignment_id, &caller, &artifact.url, now())?)
}

fn handle_assignments_submissions(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    let assignment_id = required_str(&req.params, "assignmentId")?;
    let listed = assignments::list_submissions(conn, &assignment_id, &caller, now())?;
    Ok(json!({ "submissions": to_result(&listed)? }))
}

fn handle_submissions_grade(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    let submission_id = required_str(&req.params, "submissionId")?;
    let marks = req
        .params
        .get("marks")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params("missing marks"))?;
    to_result(&assignments::grade(conn, &submission_id, &caller, marks, now())?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "assignments.create" => handle_assignments_create(state, req),
        "assignments.list" => handle_assignments_list(state, req),
        "assignments.get" => handle_assignments_get(state, req),
        "assignments.submit" => handle_assignments_submit(state, req),
        "assignments.submissions" => handle_assignments_submissions(state, req),
        "submissions.grade" => handle_submissions_grade(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
