use anyhow::{anyhow, Context};
use serde_json::json;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_FILE: &str = "classroomd.sqlite3";
const DB_ENTRY: &str = "db/classroomd.sqlite3";
const ARTIFACT_DIR: &str = "artifacts";
pub const BUNDLE_FORMAT_V1: &str = "classroomd-workspace-v1";
// The remaining tables are recreated on open; these two hold the workspace.
const REQUIRED_TABLES: [&str; 2] = ["users", "classrooms"];

/// Why an import was refused. `Invalid` blames the bundle; `Io` is a local
/// storage failure.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

fn invalid(message: impl Into<String>) -> BundleError {
    BundleError::Invalid(message.into())
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub artifact_count: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub artifact_count: usize,
}

/// Files under `dir`, as paths relative to `root`, in a stable order.
fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.to_string_lossy()))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to list {}", dir.to_string_lossy()))?;
    entries.sort_by_key(|e| e.file_name());
    for ent in entries {
        let p = ent.path();
        if p.is_dir() {
            collect_files(root, &p, out)?;
        } else if p.is_file() {
            let rel = p.strip_prefix(root).context("artifact outside workspace")?;
            out.push(rel.to_path_buf());
        }
    }
    Ok(())
}

fn entry_name(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Writes the database and every stored artifact into one zip bundle. The
/// caller checkpoints the WAL first so the database file is complete.
pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let mut artifacts = Vec::new();
    collect_files(workspace_path, &workspace_path.join(ARTIFACT_DIR), &mut artifacts)?;
    artifacts.retain(|rel| {
        rel.file_name()
            .and_then(|n| n.to_str())
            .map(|n| !n.starts_with('.'))
            .unwrap_or(false)
    });

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": chrono::Utc::now().to_rfc3339(),
        "artifactCount": artifacts.len(),
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    let mut db_file = File::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    std::io::copy(&mut db_file, &mut zip).context("failed to write database entry")?;

    for rel in &artifacts {
        let name = entry_name(rel);
        zip.start_file(name.as_str(), opts)
            .with_context(|| format!("failed to start entry {}", name))?;
        let src = workspace_path.join(rel);
        let mut f = File::open(&src)
            .with_context(|| format!("failed to open artifact {}", src.to_string_lossy()))?;
        std::io::copy(&mut f, &mut zip).with_context(|| format!("failed to write entry {}", name))?;
    }

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: 2 + artifacts.len(),
        artifact_count: artifacts.len(),
    })
}

/// Restores a bundle into `workspace_path`, replacing its database. The
/// caller must drop any open connection to the workspace first. The live
/// database is only touched once the bundled one has been opened and checked.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> Result<ImportSummary, BundleError> {
    if !is_zip_file(in_path)? {
        return Err(invalid("not a workspace bundle"));
    }
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;

    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).map_err(|e| invalid(format!("invalid zip archive: {}", e)))?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .map_err(|_| invalid("bundle missing manifest.json"))?
        .read_to_string(&mut manifest_text)
        .map_err(|_| invalid("manifest.json is unreadable"))?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).map_err(|_| invalid("manifest.json is invalid JSON"))?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(invalid(format!("unsupported bundle format: {}", format)));
    }

    let dst = workspace_path.join(DB_FILE);
    let tmp_dst = workspace_path.join(format!("{}.importing", DB_FILE));
    remove_with_side_files(&tmp_dst);
    {
        let mut db_entry = archive
            .by_name(DB_ENTRY)
            .map_err(|_| invalid("bundle missing db/classroomd.sqlite3"))?;
        let mut db_out = File::create(&tmp_dst).with_context(|| {
            format!(
                "failed to create temp database {}",
                tmp_dst.to_string_lossy()
            )
        })?;
        if let Err(e) = std::io::copy(&mut db_entry, &mut db_out) {
            drop(db_out);
            remove_with_side_files(&tmp_dst);
            return Err(invalid(format!("database entry is unreadable: {}", e)));
        }
        db_out
            .flush()
            .context("failed to flush extracted database")?;
    }
    if let Err(e) = verify_database(&tmp_dst) {
        remove_with_side_files(&tmp_dst);
        return Err(e);
    }
    // Verification may leave empty side files behind the temp name.
    remove_side_files(&tmp_dst);

    // A WAL left by the previous database would be replayed onto the new one.
    for suffix in ["-wal", "-shm"] {
        let side = workspace_path.join(format!("{}{}", DB_FILE, suffix));
        if side.exists() {
            std::fs::remove_file(&side)
                .with_context(|| format!("failed to remove {}", side.to_string_lossy()))?;
        }
    }
    if dst.exists() {
        std::fs::remove_file(&dst).with_context(|| {
            format!(
                "failed to remove existing database {}",
                dst.to_string_lossy()
            )
        })?;
    }
    std::fs::rename(&tmp_dst, &dst).with_context(|| {
        format!(
            "failed to move extracted database to {}",
            dst.to_string_lossy()
        )
    })?;

    let mut artifact_count = 0usize;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).context("failed to read bundle entry")?;
        if entry.is_dir() {
            continue;
        }
        let Some(rel) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
            tracing::warn!(entry = entry.name(), "skipping bundle entry with unsafe path");
            continue;
        };
        if !rel.starts_with(ARTIFACT_DIR) {
            continue;
        }
        let out = workspace_path.join(&rel);
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
        }
        let mut f = File::create(&out)
            .with_context(|| format!("failed to create artifact {}", out.to_string_lossy()))?;
        std::io::copy(&mut entry, &mut f)
            .with_context(|| format!("failed to extract artifact {}", out.to_string_lossy()))?;
        artifact_count += 1;
    }

    Ok(ImportSummary {
        bundle_format_detected: BUNDLE_FORMAT_V1.to_string(),
        artifact_count,
    })
}

/// Opens the extracted file as SQLite and checks it is intact and holds a
/// workspace.
fn verify_database(path: &Path) -> Result<(), BundleError> {
    let conn = rusqlite::Connection::open(path).context("failed to open extracted database")?;
    let check: String = conn
        .query_row("PRAGMA integrity_check", [], |r| r.get(0))
        .map_err(|e| invalid(format!("bundle database is unreadable: {}", e)))?;
    if check != "ok" {
        return Err(invalid(format!("bundle database failed integrity check: {}", check)));
    }
    for table in REQUIRED_TABLES {
        let present: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
                [table],
                |r| r.get(0),
            )
            .map_err(|e| invalid(format!("bundle database is unreadable: {}", e)))?;
        if !present {
            return Err(invalid(format!("bundle database has no {} table", table)));
        }
    }
    conn.close()
        .map_err(|(_, e)| anyhow::Error::from(e).context("failed to close extracted database"))?;
    Ok(())
}

fn remove_side_files(path: &Path) {
    for suffix in ["-wal", "-shm"] {
        let mut side = path.as_os_str().to_owned();
        side.push(suffix);
        let _ = std::fs::remove_file(PathBuf::from(side));
    }
}

fn remove_with_side_files(path: &Path) {
    if path.exists() {
        let _ = std::fs::remove_file(path);
    }
    remove_side_files(path);
}

fn is_zip_file(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 4];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    if read < 4 {
        return Ok(false);
    }
    Ok(sig == [0x50, 0x4B, 0x03, 0x04])
}
