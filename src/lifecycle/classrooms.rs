use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::profiles::{self, Role};
use super::{access, format_ts, new_id, required_text};
use crate::error::{LifecycleError, LifecycleResult};

const JOIN_CODE_LEN: usize = 8;
const JOIN_CODE_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewClassroom {
    pub name: Option<String>,
    pub course_name: Option<String>,
    pub course_code: Option<String>,
    pub year: Option<String>,
    pub division: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classroom {
    pub id: String,
    pub name: String,
    pub course_code: String,
    pub course_name: String,
    pub year: String,
    pub division: String,
    pub code: String,
    pub invite_link: String,
    pub admin_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomDetail {
    pub classroom: Classroom,
    pub is_admin: bool,
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomListing {
    #[serde(flatten)]
    pub classroom: Classroom,
    pub role: &'static str,
    pub member_count: i64,
    pub pending_assignments: i64,
}

/// Rows removed alongside a classroom.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionReport {
    pub classroom_id: String,
    pub memberships: i64,
    pub invitations: i64,
    pub assignments: i64,
    pub submissions: i64,
    pub attendance: i64,
    pub resources: i64,
}

const CLASSROOM_COLUMNS: &str =
    "c.id, c.name, c.course_code, c.course_name, c.year, c.division, c.code, c.invite_link, c.admin_id, c.created_at";

fn classroom_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Classroom> {
    Ok(Classroom {
        id: r.get(0)?,
        name: r.get(1)?,
        course_code: r.get(2)?,
        course_name: r.get(3)?,
        year: r.get(4)?,
        division: r.get(5)?,
        code: r.get(6)?,
        invite_link: r.get(7)?,
        admin_id: r.get(8)?,
        created_at: r.get(9)?,
    })
}

fn new_join_code() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..JOIN_CODE_LEN].to_ascii_uppercase()
}

fn invite_link(base_url: &str, code: &str) -> String {
    format!("{}/join/{}", base_url.trim_end_matches('/'), code)
}

pub fn create(
    conn: &Connection,
    admin_id: &str,
    fields: NewClassroom,
    invite_base_url: &str,
    now: DateTime<Utc>,
) -> LifecycleResult<Classroom> {
    if profiles::role_of(conn, admin_id)? != Role::Professor {
        return Err(LifecycleError::forbidden("only professors can create classrooms"));
    }
    let course_name = required_text("courseName", fields.course_name.as_deref())?;
    let year = required_text("year", fields.year.as_deref())?;
    let division = required_text("division", fields.division.as_deref())?;
    let course_code = required_text("courseCode", fields.course_code.as_deref())?;
    let name = fields
        .name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(&course_name)
        .to_string();

    let id = new_id();
    let created_at = format_ts(now);
    for _ in 0..JOIN_CODE_ATTEMPTS {
        let code = new_join_code();
        let link = invite_link(invite_base_url, &code);
        let inserted = conn.execute(
            "INSERT INTO classrooms(id, name, course_code, course_name, year, division, code, invite_link, admin_id, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![&id, &name, &course_code, &course_name, &year, &division, &code, &link, admin_id, &created_at],
        );
        match inserted {
            Ok(_) => {
                info!(classroom_id = %id, admin_id, code = %code, "classroom created");
                return Ok(Classroom {
                    id,
                    name,
                    course_code,
                    course_name,
                    year,
                    division,
                    code,
                    invite_link: link,
                    admin_id: admin_id.to_string(),
                    created_at,
                });
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                warn!(code = %code, "join code collision, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(LifecycleError::Internal(anyhow::anyhow!(
        "could not allocate a unique join code after {JOIN_CODE_ATTEMPTS} attempts"
    )))
}

pub(crate) fn load(conn: &Connection, classroom_id: &str) -> LifecycleResult<Classroom> {
    let sql = format!("SELECT {CLASSROOM_COLUMNS} FROM classrooms c WHERE c.id = ?");
    conn.query_row(&sql, [classroom_id], classroom_from_row)
        .optional()?
        .ok_or(LifecycleError::NotFound("classroom"))
}

pub(crate) fn find_by_code(conn: &Connection, code: &str) -> LifecycleResult<Classroom> {
    let sql = format!("SELECT {CLASSROOM_COLUMNS} FROM classrooms c WHERE c.code = ?");
    conn.query_row(&sql, [code.trim().to_ascii_uppercase()], classroom_from_row)
        .optional()?
        .ok_or(LifecycleError::NotFound("classroom"))
}

pub fn get_by_id(conn: &Connection, classroom_id: &str, caller_id: &str) -> LifecycleResult<ClassroomDetail> {
    // Both relationships are resolved before anything about the classroom is read.
    let acc = access(conn, classroom_id, caller_id)?.require_view()?;
    let classroom = load(conn, classroom_id)?;

    let mut stmt = conn.prepare(
        "SELECT u.id, u.name, u.email
         FROM memberships m
         JOIN users u ON u.id = m.user_id
         WHERE m.classroom_id = ?
         ORDER BY u.name, u.id",
    )?;
    let members = stmt
        .query_map([classroom_id], |r| {
            Ok(Member {
                id: r.get(0)?,
                name: r.get(1)?,
                email: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ClassroomDetail {
        classroom,
        is_admin: acc.is_admin,
        members,
    })
}

/// Classrooms the user administers or belongs to, with dashboard counts.
pub fn list_for_user(conn: &Connection, user_id: &str, now: DateTime<Utc>) -> LifecycleResult<Vec<ClassroomListing>> {
    // Correlated subqueries keep counts independent of each other.
    let sql = format!(
        "SELECT {CLASSROOM_COLUMNS},
           (SELECT COUNT(*) FROM memberships m WHERE m.classroom_id = c.id) AS member_count,
           CASE WHEN c.admin_id = ?1 THEN 0 ELSE
             (SELECT COUNT(*) FROM assignments a
              WHERE a.classroom_id = c.id
                AND a.deadline > ?2
                AND NOT EXISTS (
                  SELECT 1 FROM submissions s WHERE s.assignment_id = a.id AND s.user_id = ?1
                ))
           END AS pending_assignments
         FROM classrooms c
         WHERE c.admin_id = ?1
            OR EXISTS (SELECT 1 FROM memberships m WHERE m.classroom_id = c.id AND m.user_id = ?1)
         ORDER BY c.course_name, c.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((user_id, format_ts(now)), |r| {
            let classroom = classroom_from_row(r)?;
            let role = if classroom.admin_id == user_id { "admin" } else { "member" };
            Ok(ClassroomListing {
                classroom,
                role,
                member_count: r.get(10)?,
                pending_assignments: r.get(11)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn count(tx: &Transaction<'_>, sql: &str, classroom_id: &str) -> LifecycleResult<i64> {
    Ok(tx.query_row(sql, [classroom_id], |r| r.get(0))?)
}

/// Deletes a classroom and everything under it. The typed confirmation is
/// checked here, inside the same transaction as the cascade, so a client
/// cannot skip it.
pub fn delete(
    conn: &Connection,
    classroom_id: &str,
    caller_id: &str,
    typed_confirmation: &str,
) -> LifecycleResult<DeletionReport> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let acc = access(&tx, classroom_id, caller_id)?.require_admin()?;
    if typed_confirmation.trim().to_lowercase() != acc.course_name.trim().to_lowercase() {
        warn!(classroom_id, caller_id, "classroom delete confirmation mismatch");
        return Err(LifecycleError::validation(
            "confirmation",
            "confirmation does not match the classroom's course name",
        ));
    }

    let report = DeletionReport {
        classroom_id: classroom_id.to_string(),
        memberships: count(&tx, "SELECT COUNT(*) FROM memberships WHERE classroom_id = ?", classroom_id)?,
        invitations: count(&tx, "SELECT COUNT(*) FROM invitations WHERE classroom_id = ?", classroom_id)?,
        assignments: count(&tx, "SELECT COUNT(*) FROM assignments WHERE classroom_id = ?", classroom_id)?,
        submissions: count(
            &tx,
            "SELECT COUNT(*) FROM submissions s
             JOIN assignments a ON a.id = s.assignment_id
             WHERE a.classroom_id = ?",
            classroom_id,
        )?,
        attendance: count(&tx, "SELECT COUNT(*) FROM attendance WHERE classroom_id = ?", classroom_id)?,
        resources: count(&tx, "SELECT COUNT(*) FROM resources WHERE classroom_id = ?", classroom_id)?,
    };

    // Foreign keys cascade to every dependent table.
    tx.execute("DELETE FROM classrooms WHERE id = ?", [classroom_id])?;
    tx.commit()?;

    info!(
        classroom_id,
        caller_id,
        memberships = report.memberships,
        assignments = report.assignments,
        submissions = report.submissions,
        "classroom deleted"
    );
    Ok(report)
}
