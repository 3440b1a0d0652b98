use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{info, warn};

use super::classrooms::{self, Classroom};
use super::profiles;
use super::{access, format_ts, new_id};
use crate::error::{LifecycleError, LifecycleResult};

pub const ALREADY_MEMBER_MESSAGE: &str = "You are already a member of this classroom";
const ADMIN_JOIN_MESSAGE: &str = "You are the admin of this classroom";
const JOINED_MESSAGE: &str = "Joined classroom";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinOutcome {
    pub already_member: bool,
    pub message: &'static str,
    pub classroom: Classroom,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Professor {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub id: String,
    pub classroom_id: String,
    pub course_name: String,
    pub course_code: String,
    pub year: String,
    pub division: String,
    pub professor: Professor,
    pub member_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DismissOutcome {
    pub dismissed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteTarget {
    UserId(String),
    Email(String),
}

/// Inserts the membership unless it already exists. Returns true when a row
/// was created. The primary key makes this safe against concurrent joins.
fn insert_membership(conn: &Connection, classroom_id: &str, user_id: &str, now: DateTime<Utc>) -> LifecycleResult<bool> {
    let inserted = conn.execute(
        "INSERT INTO memberships(classroom_id, user_id, joined_at)
         VALUES(?, ?, ?)
         ON CONFLICT(classroom_id, user_id) DO NOTHING",
        (classroom_id, user_id, format_ts(now)),
    )?;
    Ok(inserted > 0)
}

pub fn join_by_code(conn: &Connection, user_id: &str, code: &str, now: DateTime<Utc>) -> LifecycleResult<JoinOutcome> {
    if code.trim().is_empty() {
        return Err(LifecycleError::validation("code", "join code must not be empty"));
    }
    let classroom = classrooms::find_by_code(conn, code)?;
    if classroom.admin_id == user_id {
        return Ok(JoinOutcome {
            already_member: true,
            message: ADMIN_JOIN_MESSAGE,
            classroom,
        });
    }
    profiles::require_onboarded(conn, user_id)?;

    let created = insert_membership(conn, &classroom.id, user_id, now)?;
    if created {
        info!(classroom_id = %classroom.id, user_id, "joined classroom by code");
    }
    Ok(JoinOutcome {
        already_member: !created,
        message: if created { JOINED_MESSAGE } else { ALREADY_MEMBER_MESSAGE },
        classroom,
    })
}

pub fn accept_invitation(
    conn: &Connection,
    user_id: &str,
    invitation_id: &str,
    now: DateTime<Utc>,
) -> LifecycleResult<JoinOutcome> {
    profiles::require_onboarded(conn, user_id)?;

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let classroom_id: String = tx
        .query_row(
            "SELECT classroom_id FROM invitations WHERE id = ? AND user_id = ?",
            (invitation_id, user_id),
            |r| r.get(0),
        )
        .optional()?
        .ok_or(LifecycleError::NotFound("invitation"))?;

    tx.execute("DELETE FROM invitations WHERE id = ?", [invitation_id])?;
    // A direct join may have won the race; the invitation is still consumed.
    let created = insert_membership(&tx, &classroom_id, user_id, now)?;
    tx.commit()?;

    info!(classroom_id = %classroom_id, user_id, invitation_id, created, "invitation accepted");
    Ok(JoinOutcome {
        already_member: !created,
        message: if created { JOINED_MESSAGE } else { ALREADY_MEMBER_MESSAGE },
        classroom: classrooms::load(conn, &classroom_id)?,
    })
}

pub fn dismiss_invitation(conn: &Connection, user_id: &str, invitation_id: &str) -> LifecycleResult<DismissOutcome> {
    let removed = conn.execute(
        "DELETE FROM invitations WHERE id = ? AND user_id = ?",
        (invitation_id, user_id),
    )?;
    if removed > 0 {
        info!(user_id, invitation_id, "invitation dismissed");
    }
    Ok(DismissOutcome { dismissed: removed > 0 })
}

pub fn leave(conn: &Connection, user_id: &str, classroom_id: &str) -> LifecycleResult<()> {
    let acc = access(conn, classroom_id, user_id)?;
    if acc.is_admin {
        warn!(classroom_id, user_id, "admin attempted to leave own classroom");
        return Err(LifecycleError::forbidden(
            "the classroom admin cannot leave; delete the classroom instead",
        ));
    }
    let removed = conn.execute(
        "DELETE FROM memberships WHERE classroom_id = ? AND user_id = ?",
        (classroom_id, user_id),
    )?;
    if removed == 0 {
        return Err(LifecycleError::NotFound("membership"));
    }
    info!(classroom_id, user_id, "left classroom");
    Ok(())
}

const INVITATION_SELECT: &str = "SELECT i.id, c.id, c.course_name, c.course_code, c.year, c.division,
        p.id, p.name,
        (SELECT COUNT(*) FROM memberships m WHERE m.classroom_id = c.id),
        i.created_at
     FROM invitations i
     JOIN classrooms c ON c.id = i.classroom_id
     JOIN users p ON p.id = c.admin_id";

fn invitation_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Invitation> {
    Ok(Invitation {
        id: r.get(0)?,
        classroom_id: r.get(1)?,
        course_name: r.get(2)?,
        course_code: r.get(3)?,
        year: r.get(4)?,
        division: r.get(5)?,
        professor: Professor {
            id: r.get(6)?,
            name: r.get(7)?,
        },
        member_count: r.get(8)?,
        created_at: r.get(9)?,
    })
}

/// Pending invitations for the user. An invitation to a classroom the user
/// already joined by code is hidden; it stays in place so a concurrent accept
/// still finds it.
pub fn list_invitations(conn: &Connection, user_id: &str) -> LifecycleResult<Vec<Invitation>> {
    let sql = format!(
        "{INVITATION_SELECT}
         WHERE i.user_id = ?
           AND NOT EXISTS(SELECT 1 FROM memberships m WHERE m.classroom_id = i.classroom_id AND m.user_id = i.user_id)
         ORDER BY i.created_at DESC, i.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([user_id], invitation_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Admin-side channel that puts a pending invitation in front of a user.
/// Re-inviting returns the invitation that is already pending.
pub fn invite(
    conn: &Connection,
    admin_id: &str,
    classroom_id: &str,
    target: InviteTarget,
    now: DateTime<Utc>,
) -> LifecycleResult<Invitation> {
    let acc = access(conn, classroom_id, admin_id)?.require_admin()?;

    let invitee: Option<String> = match &target {
        InviteTarget::UserId(id) => conn
            .query_row("SELECT id FROM users WHERE id = ?", [id.trim()], |r| r.get(0))
            .optional()?,
        InviteTarget::Email(email) => conn
            .query_row(
                "SELECT id FROM users WHERE lower(email) = lower(?) ORDER BY created_at LIMIT 1",
                [email.trim()],
                |r| r.get(0),
            )
            .optional()?,
    };
    let invitee = invitee.ok_or(LifecycleError::NotFound("user"))?;

    if invitee == acc.admin_id {
        return Err(LifecycleError::validation("userId", "the admin cannot be invited to their own classroom"));
    }
    let is_member: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM memberships WHERE classroom_id = ? AND user_id = ?)",
        (classroom_id, &invitee),
        |r| r.get(0),
    )?;
    if is_member {
        return Err(LifecycleError::validation("userId", "user is already a member of this classroom"));
    }

    let created = conn.execute(
        "INSERT INTO invitations(id, classroom_id, user_id, invited_by, created_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(classroom_id, user_id) DO NOTHING",
        (new_id(), classroom_id, &invitee, admin_id, format_ts(now)),
    )?;
    if created > 0 {
        info!(classroom_id, invitee = %invitee, "invitation created");
    }

    let sql = format!("{INVITATION_SELECT} WHERE i.classroom_id = ? AND i.user_id = ?");
    Ok(conn.query_row(&sql, (classroom_id, &invitee), invitation_from_row)?)
}
