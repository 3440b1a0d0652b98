use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::info;

use super::{access, format_ts, new_id};
use crate::error::{LifecycleError, LifecycleResult};

pub const CATEGORIES: [&str; 7] = ["unit-1", "unit-2", "unit-3", "unit-4", "unit-5", "unit-6", "extra"];
const DEFAULT_CATEGORY: &str = "extra";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    pub classroom_id: String,
    pub title: String,
    pub url: String,
    pub category: String,
    pub file_type: &'static str,
    pub file_size: Option<i64>,
    pub uploader_id: String,
    pub uploaded_at: String,
}

#[derive(Debug, Clone)]
pub struct NewResource {
    pub title: Option<String>,
    pub category: Option<String>,
    pub url: String,
    pub file_size: Option<i64>,
}

/// Preview family of a resource, judged by its extension.
pub fn file_type_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "pdf",
        "doc" | "docx" => "word",
        "xls" | "xlsx" => "excel",
        _ => "unknown",
    }
}

fn file_type_from_stored(s: &str) -> &'static str {
    match s {
        "pdf" => "pdf",
        "word" => "word",
        "excel" => "excel",
        _ => "unknown",
    }
}

fn last_segment(url: &str) -> &str {
    url.trim_end_matches('/').rsplit('/').next().unwrap_or(url)
}

pub fn upload(
    conn: &Connection,
    caller_id: &str,
    classroom_id: &str,
    fields: NewResource,
    now: DateTime<Utc>,
) -> LifecycleResult<Resource> {
    access(conn, classroom_id, caller_id)?.require_view()?;

    let url = fields.url.trim().to_string();
    if url.is_empty() {
        return Err(LifecycleError::validation("url", "a resource needs an artifact"));
    }
    let category = match fields.category.as_deref().map(str::trim) {
        None | Some("") => DEFAULT_CATEGORY.to_string(),
        Some(c) if CATEGORIES.contains(&c) => c.to_string(),
        Some(_) => {
            return Err(LifecycleError::validation(
                "category",
                format!("category must be one of {}", CATEGORIES.join(", ")),
            ))
        }
    };
    let title = fields
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| last_segment(&url))
        .to_string();

    let resource = Resource {
        id: new_id(),
        classroom_id: classroom_id.to_string(),
        file_type: file_type_for(last_segment(&url)),
        title,
        url,
        category,
        file_size: fields.file_size,
        uploader_id: caller_id.to_string(),
        uploaded_at: format_ts(now),
    };
    conn.execute(
        "INSERT INTO resources(id, classroom_id, title, url, category, file_type, file_size, uploader_id, uploaded_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &resource.id,
            &resource.classroom_id,
            &resource.title,
            &resource.url,
            &resource.category,
            resource.file_type,
            resource.file_size,
            &resource.uploader_id,
            &resource.uploaded_at,
        ],
    )?;
    info!(resource_id = %resource.id, classroom_id, caller_id, "resource uploaded");
    Ok(resource)
}

pub fn list(conn: &Connection, classroom_id: &str, caller_id: &str) -> LifecycleResult<Vec<Resource>> {
    access(conn, classroom_id, caller_id)?.require_view()?;
    let mut stmt = conn.prepare(
        "SELECT id, classroom_id, title, url, category, file_type, file_size, uploader_id, uploaded_at
         FROM resources
         WHERE classroom_id = ?
         ORDER BY uploaded_at DESC, id",
    )?;
    let rows = stmt
        .query_map([classroom_id], |r| {
            let file_type: String = r.get(5)?;
            Ok(Resource {
                id: r.get(0)?,
                classroom_id: r.get(1)?,
                title: r.get(2)?,
                url: r.get(3)?,
                category: r.get(4)?,
                file_type: file_type_from_stored(&file_type),
                file_size: r.get(6)?,
                uploader_id: r.get(7)?,
                uploaded_at: r.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// The uploader or the classroom admin may remove a resource.
pub fn delete(conn: &Connection, caller_id: &str, resource_id: &str) -> LifecycleResult<()> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT classroom_id, uploader_id FROM resources WHERE id = ?",
            [resource_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let (classroom_id, uploader_id) = row.ok_or(LifecycleError::NotFound("resource"))?;
    let acc = access(conn, &classroom_id, caller_id)?.require_view()?;
    if !acc.is_admin && uploader_id != caller_id {
        return Err(LifecycleError::forbidden("only the uploader or the classroom admin can delete this resource"));
    }
    conn.execute("DELETE FROM resources WHERE id = ?", [resource_id])?;
    info!(resource_id, caller_id, "resource deleted");
    Ok(())
}
