use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::format_ts;
use crate::error::{LifecycleError, LifecycleResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Student,
    Professor,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "STUDENT",
            Self::Professor => "PROFESSOR",
            Self::Admin => "ADMIN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STUDENT" => Some(Self::Student),
            "PROFESSOR" => Some(Self::Professor),
            "ADMIN" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Authenticated caller as handed over by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub roll_no: Option<String>,
    pub srn: Option<String>,
    pub prn: Option<String>,
    pub year: Option<String>,
    pub division: Option<String>,
    pub onboarding_complete: bool,
    pub missing_fields: Vec<&'static str>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    pub roll_no: Option<String>,
    pub srn: Option<String>,
    pub prn: Option<String>,
    pub year: Option<String>,
    pub division: Option<String>,
}

fn missing_fields(
    roll_no: &Option<String>,
    srn: &Option<String>,
    prn: &Option<String>,
    year: &Option<String>,
) -> Vec<&'static str> {
    [("rollNo", roll_no), ("srn", srn), ("prn", prn), ("year", year)]
        .into_iter()
        .filter(|(_, v)| v.as_deref().map(str::trim).unwrap_or("").is_empty())
        .map(|(k, _)| k)
        .collect()
}

/// Creates the user on first authenticated access; later calls only refresh
/// the name and email the identity provider reports.
pub fn ensure_user(conn: &Connection, principal: &Principal, now: DateTime<Utc>) -> LifecycleResult<()> {
    let created = conn.execute(
        "INSERT INTO users(id, name, email, role, created_at)
         VALUES(?, ?, ?, 'STUDENT', ?)
         ON CONFLICT(id) DO NOTHING",
        (
            &principal.user_id,
            principal.name.as_deref().unwrap_or(""),
            principal.email.as_deref().unwrap_or(""),
            format_ts(now),
        ),
    )?;
    if created > 0 {
        info!(user_id = %principal.user_id, "user created on first access");
        return Ok(());
    }
    if let Some(name) = principal.name.as_deref() {
        conn.execute("UPDATE users SET name = ? WHERE id = ?", (name, &principal.user_id))?;
    }
    if let Some(email) = principal.email.as_deref() {
        conn.execute("UPDATE users SET email = ? WHERE id = ?", (email, &principal.user_id))?;
    }
    Ok(())
}

pub fn get_profile(conn: &Connection, user_id: &str) -> LifecycleResult<Profile> {
    let row = conn
        .query_row(
            "SELECT id, name, email, role, roll_no, srn, prn, year, division
             FROM users WHERE id = ?",
            [user_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, Option<String>>(4)?,
                    r.get::<_, Option<String>>(5)?,
                    r.get::<_, Option<String>>(6)?,
                    r.get::<_, Option<String>>(7)?,
                    r.get::<_, Option<String>>(8)?,
                ))
            },
        )
        .optional()?;
    let Some((id, name, email, role, roll_no, srn, prn, year, division)) = row else {
        return Err(LifecycleError::NotFound("user"));
    };
    let missing = missing_fields(&roll_no, &srn, &prn, &year);
    Ok(Profile {
        id,
        name,
        email,
        role: Role::parse(&role).unwrap_or(Role::Student),
        roll_no,
        srn,
        prn,
        year,
        division,
        onboarding_complete: missing.is_empty(),
        missing_fields: missing,
    })
}

pub fn update_profile(conn: &Connection, user_id: &str, patch: ProfilePatch) -> LifecycleResult<Profile> {
    // Existence check first so an unknown user is not reported as a bad field.
    get_profile(conn, user_id)?;

    let fields: [(&'static str, &'static str, Option<String>); 5] = [
        ("rollNo", "roll_no", patch.roll_no),
        ("srn", "srn", patch.srn),
        ("prn", "prn", patch.prn),
        ("year", "year", patch.year),
        ("division", "division", patch.division),
    ];
    let mut updates = Vec::new();
    for (field, column, value) in fields {
        let Some(value) = value else { continue };
        let value = value.trim().to_string();
        if value.is_empty() {
            return Err(LifecycleError::validation(field, format!("{field} must not be empty")));
        }
        updates.push((column, value));
    }

    for (column, value) in &updates {
        let sql = format!("UPDATE users SET {} = ? WHERE id = ?", column);
        conn.execute(&sql, (value, user_id))?;
    }

    let profile = get_profile(conn, user_id)?;
    if !updates.is_empty() {
        info!(
            user_id,
            onboarding_complete = profile.onboarding_complete,
            "profile updated"
        );
    }
    Ok(profile)
}

/// Gate for workspace-wide operations such as role changes and backups.
pub fn require_admin_role(conn: &Connection, user_id: &str) -> LifecycleResult<()> {
    if role_of(conn, user_id)? != Role::Admin {
        return Err(LifecycleError::forbidden("only administrators can do this"));
    }
    Ok(())
}

pub fn set_role(conn: &Connection, caller_id: &str, user_id: &str, role: Role) -> LifecycleResult<Profile> {
    require_admin_role(conn, caller_id)?;
    let changed = conn.execute("UPDATE users SET role = ? WHERE id = ?", (role.as_str(), user_id))?;
    if changed == 0 {
        return Err(LifecycleError::NotFound("user"));
    }
    info!(caller_id, user_id, role = role.as_str(), "role changed");
    get_profile(conn, user_id)
}

/// Promotes an operator account named in the configuration. Returns whether
/// the role changed.
pub fn grant_admin(conn: &Connection, user_id: &str) -> LifecycleResult<bool> {
    let changed = conn.execute(
        "UPDATE users SET role = 'ADMIN' WHERE id = ? AND role <> 'ADMIN'",
        [user_id],
    )?;
    if changed > 0 {
        info!(user_id, "configured administrator promoted");
    }
    Ok(changed > 0)
}

pub fn role_of(conn: &Connection, user_id: &str) -> LifecycleResult<Role> {
    let role: Option<String> = conn
        .query_row("SELECT role FROM users WHERE id = ?", [user_id], |r| r.get(0))
        .optional()?;
    let role = role.ok_or(LifecycleError::NotFound("user"))?;
    Ok(Role::parse(&role).unwrap_or(Role::Student))
}

/// Gate for actions that need the onboarding fields filled in.
pub fn require_onboarded(conn: &Connection, user_id: &str) -> LifecycleResult<()> {
    let profile = get_profile(conn, user_id)?;
    if profile.onboarding_complete {
        Ok(())
    } else {
        Err(LifecycleError::OnboardingRequired {
            missing: profile.missing_fields,
        })
    }
}
