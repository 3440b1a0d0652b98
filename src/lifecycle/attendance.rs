use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{access, format_ts, parse_day};
use crate::error::{LifecycleError, LifecycleResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" | "p" => Some(Self::Present),
            "absent" | "a" => Some(Self::Absent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub classroom_id: String,
    pub user_id: String,
    pub student_name: String,
    pub date: String,
    pub status: AttendanceStatus,
    pub recorded_at: String,
}

/// Records one member's status for a day; marking the same day again
/// overwrites the earlier status.
pub fn mark(
    conn: &Connection,
    admin_id: &str,
    classroom_id: &str,
    user_id: &str,
    date: &str,
    status: &str,
    now: DateTime<Utc>,
) -> LifecycleResult<AttendanceRecord> {
    access(conn, classroom_id, admin_id)?.require_admin()?;
    let day = parse_day("date", date)?;
    let status = AttendanceStatus::parse(status)
        .ok_or_else(|| LifecycleError::validation("status", "status must be present or absent"))?;

    let student_name: String = conn
        .query_row(
            "SELECT u.name FROM memberships m JOIN users u ON u.id = m.user_id
             WHERE m.classroom_id = ? AND m.user_id = ?",
            (classroom_id, user_id),
            |r| r.get(0),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => LifecycleError::NotFound("membership"),
            other => other.into(),
        })?;

    let date = day.format("%Y-%m-%d").to_string();
    let recorded_at = format_ts(now);
    conn.execute(
        "INSERT INTO attendance(classroom_id, user_id, date, status, recorded_by, recorded_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(classroom_id, user_id, date) DO UPDATE SET
           status = excluded.status,
           recorded_by = excluded.recorded_by,
           recorded_at = excluded.recorded_at",
        (classroom_id, user_id, &date, status.as_str(), admin_id, &recorded_at),
    )?;
    info!(classroom_id, user_id, date = %date, status = status.as_str(), "attendance marked");

    Ok(AttendanceRecord {
        classroom_id: classroom_id.to_string(),
        user_id: user_id.to_string(),
        student_name,
        date,
        status,
        recorded_at,
    })
}

/// Admins see the whole register; members see their own rows.
pub fn list(conn: &Connection, classroom_id: &str, caller_id: &str) -> LifecycleResult<Vec<AttendanceRecord>> {
    let acc = access(conn, classroom_id, caller_id)?.require_view()?;
    let mut stmt = conn.prepare(
        "SELECT a.classroom_id, a.user_id, u.name, a.date, a.status, a.recorded_at
         FROM attendance a
         JOIN users u ON u.id = a.user_id
         WHERE a.classroom_id = ?1 AND (?2 OR a.user_id = ?3)
         ORDER BY a.date DESC, u.name, a.user_id",
    )?;
    let rows = stmt
        .query_map((classroom_id, acc.is_admin, caller_id), |r| {
            let status: String = r.get(4)?;
            Ok(AttendanceRecord {
                classroom_id: r.get(0)?,
                user_id: r.get(1)?,
                student_name: r.get(2)?,
                date: r.get(3)?,
                status: AttendanceStatus::parse(&status).unwrap_or(AttendanceStatus::Absent),
                recorded_at: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
