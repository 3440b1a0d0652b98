use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{authenticated, now, optional_str, required_str, to_result};
use crate::ipc::types::{AppState, Request};
use crate::lifecycle::membership::{self, InviteTarget};
use serde_json::json;

fn handle_invitations_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    let pending = membership::list_invitations(conn, &caller)?;
    Ok(json!({ "invitations": to_result(&pending)? }))
}

fn handle_invitations_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    let classroom_id = required_str(&req.params, "classroomId")?;
    let target = match (optional_str(&req.params, "userId"), optional_str(&req.params, "email")) {
        (Some(id), _) => InviteTarget::UserId(id),
        (None, Some(email)) => InviteTarget::Email(email),
        (None, None) => return Err(HandlerErr::bad_params("missing userId or email")),
    };
    to_result(&membership::invite(conn, &caller, &classroom_id, target, now())?)
}

fn handle_invitations_accept(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    let invitation_id = required_str(&req.params, "invitationId")?;
    to_result(&membership::accept_invitation(conn, &caller, &invitation_id, now())?)
}

fn handle_invitations_dismiss(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, caller) = authenticated(state, req)?;
    let invitation_id = required_str(&req.params, "invitationId")?;
    to_result(&membership::dismiss_invitation(conn, &caller, &invitation_id)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "invitations.list" => handle_invitations_list(state, req),
        "invitations.create" => handle_invitations_create(state, req),
        "invitations.accept" => handle_invitations_accept(state, req),
        "invitations.dismiss" => handle_invitations_dismiss(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
