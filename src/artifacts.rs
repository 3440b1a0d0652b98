//! Content-addressed file store under `<workspace>/artifacts`.
//!
//! Files land at `artifacts/<sha256>/<fileName>` and are referred to as
//! `artifact://<sha256>/<fileName>`. The lifecycle tables only ever hold the
//! URL.

use anyhow::{anyhow, Context};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

pub const ARTIFACT_DIR: &str = "artifacts";
pub const URL_SCHEME: &str = "artifact://";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredArtifact {
    pub url: String,
    pub sha256: String,
    pub file_name: String,
    pub size: u64,
}

/// Parsed `artifact://` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef<'a> {
    pub sha256: &'a str,
    pub file_name: &'a str,
}

fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Restricts a file name to a portable character set.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn parse_url(url: &str) -> Option<ArtifactRef<'_>> {
    let rest = url.trim().strip_prefix(URL_SCHEME)?;
    let (sha256, file_name) = rest.split_once('/')?;
    if !is_sha256_hex(sha256) || file_name.is_empty() || sanitize_file_name(file_name) != file_name {
        return None;
    }
    Some(ArtifactRef { sha256, file_name })
}

pub fn is_artifact_url(s: &str) -> bool {
    s.trim().starts_with(URL_SCHEME)
}

fn sha256_file(path: &Path) -> anyhow::Result<(String, u64)> {
    let mut f = File::open(path).with_context(|| format!("failed to open {}", path.to_string_lossy()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = f
            .read(&mut buf)
            .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}

/// Copies `source` into the store. Identical bytes under the same name map to
/// the same URL, and an existing copy is left untouched.
pub fn store(workspace: &Path, source: &Path) -> anyhow::Result<StoredArtifact> {
    if !source.is_file() {
        return Err(anyhow!("source file not found: {}", source.to_string_lossy()));
    }
    let raw_name = source
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("source path has no file name: {}", source.to_string_lossy()))?;
    let file_name = sanitize_file_name(raw_name);
    let (sha256, size) = sha256_file(source)?;

    let dir = workspace.join(ARTIFACT_DIR).join(&sha256);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create directory {}", dir.to_string_lossy()))?;
    let dst = dir.join(&file_name);
    if !dst.is_file() {
        // Sidecars sharing the workspace may store the same file at once.
        let tmp = dir.join(format!(".{}.{}.partial", file_name, uuid::Uuid::new_v4().simple()));
        std::fs::copy(source, &tmp).with_context(|| {
            format!(
                "failed to copy {} into artifact store",
                source.to_string_lossy()
            )
        })?;
        if let Err(e) = std::fs::rename(&tmp, &dst) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e).with_context(|| format!("failed to move artifact to {}", dst.to_string_lossy()));
        }
    }
    tracing::debug!(%sha256, file_name = %file_name, size, "artifact stored");

    Ok(StoredArtifact {
        url: format!("{}{}/{}", URL_SCHEME, sha256, file_name),
        sha256,
        file_name,
        size,
    })
}

/// Maps a URL back to its file; fails on malformed URLs and missing files.
pub fn resolve(workspace: &Path, url: &str) -> anyhow::Result<PathBuf> {
    let r = parse_url(url).ok_or_else(|| anyhow!("malformed artifact url: {}", url))?;
    let path = workspace.join(ARTIFACT_DIR).join(r.sha256).join(r.file_name);
    if !path.is_file() {
        return Err(anyhow!("artifact not found: {}", url));
    }
    Ok(path)
}
