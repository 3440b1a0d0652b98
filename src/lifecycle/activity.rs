//! Read-only activity feed.
//!
//! Nothing here is stored: every call re-derives attendance, submission and
//! grade events from the lifecycle tables and merges them newest first.

use rusqlite::Connection;
use serde::Serialize;

use crate::error::LifecycleResult;

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    Attendance,
    Submission,
    Grade,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grade: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_grade: Option<i64>,
    pub classroom_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_status: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub title: String,
    pub date: String,
    pub details: ActivityDetails,
}

pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

// A member's rows count only while the membership lasts; admins see their
// classrooms in full.
const SCOPE: &str = "(c.admin_id = ?1 OR (x.user_id = ?1 AND EXISTS(
        SELECT 1 FROM memberships m WHERE m.classroom_id = c.id AND m.user_id = ?1)))";

fn attendance_events(conn: &Connection, user_id: &str) -> LifecycleResult<Vec<Activity>> {
    let sql = format!(
        "SELECT x.classroom_id, x.user_id, x.date, x.status, c.name, u.name, c.admin_id = ?1
         FROM attendance x
         JOIN classrooms c ON c.id = x.classroom_id
         JOIN users u ON u.id = x.user_id
         WHERE {SCOPE}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([user_id], |r| {
            let classroom_id: String = r.get(0)?;
            let member_id: String = r.get(1)?;
            let date: String = r.get(2)?;
            let status: String = r.get(3)?;
            let student: String = r.get(5)?;
            let as_admin: bool = r.get(6)?;
            let title = if as_admin {
                format!("Attendance: {} marked {}", student, status)
            } else {
                format!("Marked {}", status)
            };
            Ok(Activity {
                id: format!("attendance-{}-{}-{}", classroom_id, member_id, date),
                kind: ActivityType::Attendance,
                title,
                date: format!("{}T00:00:00.000000Z", date),
                details: ActivityDetails {
                    classroom_name: r.get(4)?,
                    status: Some(status),
                    ..Default::default()
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn submission_events(conn: &Connection, user_id: &str) -> LifecycleResult<Vec<Activity>> {
    let sql = format!(
        "SELECT x.id, x.submitted_at, a.title, a.deadline, c.name, u.name, c.admin_id = ?1
         FROM submissions x
         JOIN assignments a ON a.id = x.assignment_id
         JOIN classrooms c ON c.id = a.classroom_id
         JOIN users u ON u.id = x.user_id
         WHERE {SCOPE}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([user_id], |r| {
            let id: String = r.get(0)?;
            let submitted_at: String = r.get(1)?;
            let assignment: String = r.get(2)?;
            let deadline: String = r.get(3)?;
            let student: String = r.get(5)?;
            let as_admin: bool = r.get(6)?;
            let title = if as_admin {
                format!("{} submitted {}", student, assignment)
            } else {
                format!("Submitted {}", assignment)
            };
            let submission_status = if submitted_at < deadline { "on_time" } else { "late" };
            Ok(Activity {
                id: format!("submission-{}", id),
                kind: ActivityType::Submission,
                title,
                date: submitted_at,
                details: ActivityDetails {
                    classroom_name: r.get(4)?,
                    submission_status: Some(submission_status),
                    ..Default::default()
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// Grades are only news to the student who received them.
fn grade_events(conn: &Connection, user_id: &str) -> LifecycleResult<Vec<Activity>> {
    let mut stmt = conn.prepare(
        "SELECT x.id, x.graded_at, x.marks, a.points, a.title, c.name
         FROM submissions x
         JOIN assignments a ON a.id = x.assignment_id
         JOIN classrooms c ON c.id = a.classroom_id
         WHERE x.user_id = ?1
           AND x.marks IS NOT NULL
           AND x.graded_at IS NOT NULL
           AND EXISTS(SELECT 1 FROM memberships m WHERE m.classroom_id = c.id AND m.user_id = ?1)",
    )?;
    let rows = stmt
        .query_map([user_id], |r| {
            let id: String = r.get(0)?;
            let title: String = r.get(4)?;
            Ok(Activity {
                id: format!("grade-{}", id),
                kind: ActivityType::Grade,
                title: format!("Graded: {}", title),
                date: r.get(1)?,
                details: ActivityDetails {
                    grade: r.get(2)?,
                    max_grade: r.get(3)?,
                    classroom_name: r.get(5)?,
                    ..Default::default()
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Recent events across every classroom the user belongs to or administers.
pub fn list(conn: &Connection, user_id: &str, limit: usize) -> LifecycleResult<Vec<Activity>> {
    let mut events = attendance_events(conn, user_id)?;
    events.extend(submission_events(conn, user_id)?);
    events.extend(grade_events(conn, user_id)?);

    // Dates share one fixed-width UTC layout, so text order is time order.
    events.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.id.cmp(&a.id)));
    events.truncate(limit);
    Ok(events)
}
