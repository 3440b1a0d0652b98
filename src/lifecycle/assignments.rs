use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{access, format_ts, new_id, parse_ts, required_text};
use crate::error::{LifecycleError, LifecycleResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentType {
    Theory,
    Lab,
}

impl AssignmentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Theory => "theory",
            Self::Lab => "lab",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "theory" => Some(Self::Theory),
            "lab" => Some(Self::Lab),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAssignment {
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub description: Option<String>,
    pub points: Option<i64>,
    #[serde(default)]
    pub requirements: Vec<String>,
    pub deadline: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: String,
    pub classroom_id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: AssignmentType,
    pub description: String,
    pub points: i64,
    pub requirements: Vec<String>,
    pub deadline: String,
    pub created_at: String,
    pub is_deadline_passed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub assignment_id: String,
    pub user_id: String,
    pub content: String,
    pub submitted_at: String,
    pub marks: Option<f64>,
    pub graded_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Creator {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomRef {
    pub id: String,
    pub name: String,
    pub creator: Creator,
}

/// An assignment as one caller sees it: `submissions` holds the caller's own
/// submission at most, never anyone else's.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentDetail {
    #[serde(flatten)]
    pub assignment: Assignment,
    pub classroom: ClassroomRef,
    pub submissions: Vec<Submission>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentListing {
    #[serde(flatten)]
    pub assignment: Assignment,
    pub submitted: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub submission_id: String,
    pub content: String,
    pub submitted_at: String,
    pub replaced: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSubmission {
    #[serde(flatten)]
    pub submission: Submission,
    pub student_name: String,
}

const ASSIGNMENT_COLUMNS: &str =
    "a.id, a.classroom_id, a.title, a.kind, a.description, a.points, a.requirements, a.deadline, a.created_at";

fn assignment_from_row(r: &rusqlite::Row<'_>, now: &str) -> rusqlite::Result<Assignment> {
    let kind: String = r.get(3)?;
    let requirements: String = r.get(6)?;
    let deadline: String = r.get(7)?;
    Ok(Assignment {
        id: r.get(0)?,
        classroom_id: r.get(1)?,
        title: r.get(2)?,
        kind: AssignmentType::parse(&kind).unwrap_or(AssignmentType::Theory),
        description: r.get(4)?,
        points: r.get(5)?,
        requirements: serde_json::from_str(&requirements).unwrap_or_default(),
        is_deadline_passed: now >= deadline.as_str(),
        deadline,
        created_at: r.get(8)?,
    })
}

const SUBMISSION_COLUMNS: &str = "s.id, s.assignment_id, s.user_id, s.content, s.submitted_at, s.marks, s.graded_at";

fn submission_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Submission> {
    Ok(Submission {
        id: r.get(0)?,
        assignment_id: r.get(1)?,
        user_id: r.get(2)?,
        content: r.get(3)?,
        submitted_at: r.get(4)?,
        marks: r.get(5)?,
        graded_at: r.get(6)?,
    })
}

fn load_assignment(conn: &Connection, assignment_id: &str, now: DateTime<Utc>) -> LifecycleResult<Assignment> {
    let now = format_ts(now);
    let sql = format!("SELECT {ASSIGNMENT_COLUMNS} FROM assignments a WHERE a.id = ?");
    conn.query_row(&sql, [assignment_id], |r| assignment_from_row(r, &now))
        .optional()?
        .ok_or(LifecycleError::NotFound("assignment"))
}

pub fn create_assignment(
    conn: &Connection,
    admin_id: &str,
    classroom_id: &str,
    fields: NewAssignment,
    now: DateTime<Utc>,
) -> LifecycleResult<Assignment> {
    access(conn, classroom_id, admin_id)?.require_admin()?;

    let title = required_text("title", fields.title.as_deref())?;
    let kind = match fields.kind.as_deref() {
        None => AssignmentType::Theory,
        Some(k) => AssignmentType::parse(k)
            .ok_or_else(|| LifecycleError::validation("type", "type must be theory or lab"))?,
    };
    let points = fields
        .points
        .ok_or_else(|| LifecycleError::validation("points", "points is required"))?;
    if points <= 0 {
        return Err(LifecycleError::validation("points", "points must be greater than zero"));
    }
    let deadline = parse_ts("deadline", &required_text("deadline", fields.deadline.as_deref())?)?;
    let requirements: Vec<String> = fields
        .requirements
        .into_iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();
    let requirements_json =
        serde_json::to_string(&requirements).map_err(|e| LifecycleError::Internal(e.into()))?;

    let id = new_id();
    conn.execute(
        "INSERT INTO assignments(id, classroom_id, title, kind, description, points, requirements, deadline, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &id,
            classroom_id,
            &title,
            kind.as_str(),
            fields.description.as_deref().map(str::trim).unwrap_or(""),
            points,
            &requirements_json,
            format_ts(deadline),
            format_ts(now),
        ],
    )?;
    info!(assignment_id = %id, classroom_id, deadline = %format_ts(deadline), "assignment created");
    load_assignment(conn, &id, now)
}

pub fn list_assignments(
    conn: &Connection,
    classroom_id: &str,
    caller_id: &str,
    now: DateTime<Utc>,
) -> LifecycleResult<Vec<AssignmentListing>> {
    access(conn, classroom_id, caller_id)?.require_view()?;
    let now = format_ts(now);
    let sql = format!(
        "SELECT {ASSIGNMENT_COLUMNS},
           EXISTS(SELECT 1 FROM submissions s WHERE s.assignment_id = a.id AND s.user_id = ?2)
         FROM assignments a
         WHERE a.classroom_id = ?1
         ORDER BY a.deadline, a.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((classroom_id, caller_id), |r| {
            Ok(AssignmentListing {
                assignment: assignment_from_row(r, &now)?,
                submitted: r.get::<_, i64>(9)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_assignment(
    conn: &Connection,
    assignment_id: &str,
    caller_id: &str,
    now: DateTime<Utc>,
) -> LifecycleResult<AssignmentDetail> {
    let assignment = load_assignment(conn, assignment_id, now)?;
    let acc = access(conn, &assignment.classroom_id, caller_id)?.require_view()?;

    let creator = conn.query_row(
        "SELECT name, email FROM users WHERE id = ?",
        [&acc.admin_id],
        |r| {
            Ok(Creator {
                name: r.get(0)?,
                email: r.get(1)?,
            })
        },
    )?;
    let sql = format!("SELECT {SUBMISSION_COLUMNS} FROM submissions s WHERE s.assignment_id = ? AND s.user_id = ?");
    let own: Option<Submission> = conn
        .query_row(&sql, (assignment_id, caller_id), submission_from_row)
        .optional()?;

    Ok(AssignmentDetail {
        classroom: ClassroomRef {
            id: acc.classroom_id,
            name: acc.classroom_name,
            creator,
        },
        assignment,
        submissions: own.into_iter().collect(),
    })
}

/// Creates or replaces the caller's submission while the deadline is open.
///
/// The upsert is a single statement keyed on `(assignment_id, user_id)`, so
/// concurrent resubmits from one user end with one row holding the last write.
/// A replaced submission loses any previous grade.
pub fn submit(
    conn: &Connection,
    assignment_id: &str,
    user_id: &str,
    content: &str,
    now: DateTime<Utc>,
) -> LifecycleResult<SubmitOutcome> {
    let assignment = load_assignment(conn, assignment_id, now)?;
    let acc = access(conn, &assignment.classroom_id, user_id)?;
    if !acc.is_member {
        return Err(LifecycleError::forbidden("only classroom members can submit"));
    }
    if assignment.is_deadline_passed {
        warn!(assignment_id, user_id, deadline = %assignment.deadline, "submission after deadline rejected");
        return Err(LifecycleError::Deadline {
            deadline: assignment.deadline,
        });
    }
    let content = content.trim();
    if content.is_empty() {
        return Err(LifecycleError::validation("content", "a submission needs an artifact"));
    }

    let fresh_id = new_id();
    let submitted_at = format_ts(now);
    let stored_id: String = conn.query_row(
        "INSERT INTO submissions(id, assignment_id, user_id, content, submitted_at, marks, graded_at)
         VALUES(?1, ?2, ?3, ?4, ?5, NULL, NULL)
         ON CONFLICT(assignment_id, user_id) DO UPDATE SET
           content = excluded.content,
           submitted_at = excluded.submitted_at,
           marks = NULL,
           graded_at = NULL
         RETURNING id",
        (&fresh_id, assignment_id, user_id, content, &submitted_at),
        |r| r.get(0),
    )?;
    let replaced = stored_id != fresh_id;
    info!(assignment_id, user_id, submission_id = %stored_id, replaced, "submission stored");

    Ok(SubmitOutcome {
        submission_id: stored_id,
        content: content.to_string(),
        submitted_at,
        replaced,
    })
}

pub fn grade(
    conn: &Connection,
    submission_id: &str,
    grader_id: &str,
    marks: f64,
    now: DateTime<Utc>,
) -> LifecycleResult<Submission> {
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT a.classroom_id, a.points
             FROM submissions s
             JOIN assignments a ON a.id = s.assignment_id
             WHERE s.id = ?",
            [submission_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let (classroom_id, points) = row.ok_or(LifecycleError::NotFound("submission"))?;
    access(conn, &classroom_id, grader_id)?.require_admin()?;

    if !marks.is_finite() || marks < 0.0 || marks > points as f64 {
        return Err(LifecycleError::validation(
            "marks",
            format!("marks must be between 0 and {points}"),
        ));
    }

    conn.execute(
        "UPDATE submissions SET marks = ?, graded_at = ? WHERE id = ?",
        (marks, format_ts(now), submission_id),
    )?;
    info!(submission_id, grader_id, marks, "submission graded");

    let sql = format!("SELECT {SUBMISSION_COLUMNS} FROM submissions s WHERE s.id = ?");
    Ok(conn.query_row(&sql, [submission_id], submission_from_row)?)
}

pub fn list_submissions(
    conn: &Connection,
    assignment_id: &str,
    caller_id: &str,
    now: DateTime<Utc>,
) -> LifecycleResult<Vec<StudentSubmission>> {
    let assignment = load_assignment(conn, assignment_id, now)?;
    access(conn, &assignment.classroom_id, caller_id)?.require_admin()?;

    let sql = format!(
        "SELECT {SUBMISSION_COLUMNS}, u.name
         FROM submissions s
         JOIN users u ON u.id = s.user_id
         WHERE s.assignment_id = ?
         ORDER BY s.submitted_at, s.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([assignment_id], |r| {
            Ok(StudentSubmission {
                submission: submission_from_row(r)?,
                student_name: r.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
