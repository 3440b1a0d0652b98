//! Classroom membership and assignment submission lifecycle.
//!
//! Every operation takes the caller's user id and enforces its own
//! authorization; callers never pre-check roles or relationships. Cross-row
//! invariants (one membership per user and classroom, one submission per
//! user and assignment) live in the schema and are reached through atomic
//! statements, so racing requests from separate processes stay consistent.

pub mod activity;
pub mod assignments;
pub mod attendance;
pub mod classrooms;
pub mod membership;
pub mod profiles;
pub mod resources;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};

use crate::error::{LifecycleError, LifecycleResult};

/// Stored timestamps are fixed-width UTC so text order equals time order.
pub fn format_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(field: &'static str, raw: &str) -> LifecycleResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| LifecycleError::validation(field, format!("{field} must be an RFC 3339 timestamp")))
}

pub fn parse_day(field: &'static str, raw: &str) -> LifecycleResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| LifecycleError::validation(field, format!("{field} must be YYYY-MM-DD")))
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Trimmed, non-empty value of a required text field.
pub(crate) fn required_text(field: &'static str, value: Option<&str>) -> LifecycleResult<String> {
    let v = value.map(str::trim).unwrap_or("");
    if v.is_empty() {
        return Err(LifecycleError::validation(field, format!("{field} is required")));
    }
    Ok(v.to_string())
}

/// How the caller relates to one classroom.
#[derive(Debug, Clone)]
pub(crate) struct Access {
    pub classroom_id: String,
    pub classroom_name: String,
    pub course_name: String,
    pub admin_id: String,
    pub is_admin: bool,
    pub is_member: bool,
}

impl Access {
    pub fn can_view(&self) -> bool {
        self.is_admin || self.is_member
    }

    pub fn require_view(self) -> LifecycleResult<Self> {
        if self.can_view() {
            Ok(self)
        } else {
            Err(LifecycleError::forbidden("you are not a member of this classroom"))
        }
    }

    pub fn require_admin(self) -> LifecycleResult<Self> {
        if self.is_admin {
            Ok(self)
        } else {
            Err(LifecycleError::forbidden("only the classroom admin can do this"))
        }
    }
}

/// Resolves both the admin and membership relationship in one query.
pub(crate) fn access(conn: &Connection, classroom_id: &str, user_id: &str) -> LifecycleResult<Access> {
    conn.query_row(
        "SELECT c.id, c.name, c.course_name, c.admin_id,
                EXISTS(SELECT 1 FROM memberships m WHERE m.classroom_id = c.id AND m.user_id = ?2)
         FROM classrooms c
         WHERE c.id = ?1",
        (classroom_id, user_id),
        |r| {
            let admin_id: String = r.get(3)?;
            Ok(Access {
                classroom_id: r.get(0)?,
                classroom_name: r.get(1)?,
                course_name: r.get(2)?,
                is_admin: admin_id == user_id,
                admin_id,
                is_member: r.get::<_, i64>(4)? != 0,
            })
        },
    )
    .optional()?
    .ok_or(LifecycleError::NotFound("classroom"))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_fixed_width_utc() {
        let t = parse_ts("deadline", "2026-03-01T10:00:00+05:30").expect("parse");
        assert_eq!(format_ts(t), "2026-03-01T04:30:00.000000Z");
        assert!(parse_ts("deadline", "tomorrow").is_err());
    }

    #[test]
    fn day_parsing_rejects_other_layouts() {
        assert!(parse_day("date", "2026-03-04").is_ok());
        let e = parse_day("date", "04/03/2026").unwrap_err();
        assert_eq!(e.code(), "validation_failed");
    }
}
