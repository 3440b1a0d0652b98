#[path = "../src/backup.rs"]
mod backup;

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_classroomd");
    let mut child = Command::new(exe)
        .env("CLASSROOMD_ADMIN_USERS", "ops")
        .env("CLASSROOMD_LOG", "off")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn classroomd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    user: Option<&str>,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let mut payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if let Some(u) = user {
        payload["auth"] = json!({
            "userId": u,
            "name": format!("{} name", u),
            "email": format!("{}@example.edu", u),
        });
    }
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    user: Option<&str>,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, user, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(serde_json::Value::Null)
}

fn write_zip(path: &std::path::Path, entries: &[(&str, &[u8])]) {
    let f = std::fs::File::create(path).expect("create zip");
    let mut zip = zip::ZipWriter::new(f);
    let opts = zip::write::FileOptions::default();
    for (name, bytes) in entries {
        zip.start_file(*name, opts).expect("start entry");
        zip.write_all(bytes).expect("write entry");
    }
    zip.finish().expect("finish zip");
}

#[test]
fn bundle_restores_classrooms_and_artifacts_into_a_fresh_workspace() {
    let source = temp_dir("classroomd-backup-src");
    let restored = temp_dir("classroomd-backup-dst");
    let out_dir = temp_dir("classroomd-backup-out");
    let notes = out_dir.join("unit1-notes.docx");
    std::fs::write(&notes, b"unit one notes").expect("write notes");
    let bundle = out_dir.join("workspace.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        None,
        "workspace.select",
        json!({ "path": source.to_string_lossy() }),
    );
    request_ok(&mut stdin, &mut reader, "2", Some("prof"), "user.get", json!({}));
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        Some("ops"),
        "user.setRole",
        json!({ "userId": "prof", "role": "PROFESSOR" }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        Some("prof"),
        "classrooms.create",
        json!({ "courseName": "Software Engineering", "courseCode": "SE", "year": "Third Year", "division": "A" }),
    );
    let classroom_id = created["id"].as_str().expect("classroom id").to_string();
    let resource = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        Some("prof"),
        "resources.upload",
        json!({ "classroomId": classroom_id, "filePath": notes.to_string_lossy(), "title": "Unit 1" }),
    );
    assert_eq!(resource["fileType"], json!("word"));
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        Some("ops"),
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(exported["artifactCount"], json!(1));
    assert_eq!(exported["entryCount"], json!(3));
    drop(stdin);
    let _ = child.wait();

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "0",
        None,
        "workspace.select",
        json!({ "path": restored.to_string_lossy() }),
    );
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        Some("ops"),
        "backup.importWorkspaceBundle",
        json!({ "inPath": bundle.to_string_lossy(), "workspacePath": restored.to_string_lossy() }),
    );
    assert_eq!(imported["bundleFormatDetected"], json!("classroomd-workspace-v1"));
    assert_eq!(imported["artifactCount"], json!(1));

    let listed = request_ok(&mut stdin, &mut reader, "2", Some("prof"), "classrooms.list", json!({}));
    assert_eq!(listed["classrooms"][0]["courseName"], json!("Software Engineering"));
    let resources = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        Some("prof"),
        "resources.list",
        json!({ "classroomId": classroom_id }),
    );
    assert_eq!(resources["resources"][0]["title"], json!("Unit 1"));
    let resolved = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        Some("prof"),
        "artifacts.resolve",
        json!({ "url": resource["url"] }),
    );
    let path = PathBuf::from(resolved["path"].as_str().expect("path"));
    assert!(path.starts_with(&restored));
    assert_eq!(std::fs::read(path).expect("read restored artifact"), b"unit one notes");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(source);
    let _ = std::fs::remove_dir_all(restored);
    let _ = std::fs::remove_dir_all(out_dir);
}

/// Minimal database holding the tables a workspace bundle must carry.
fn workspace_db_bytes(dir: &std::path::Path) -> Vec<u8> {
    let path = dir.join("seed.sqlite3");
    let conn = rusqlite::Connection::open(&path).expect("open seed db");
    conn.execute_batch(
        "CREATE TABLE users(id TEXT PRIMARY KEY, name TEXT NOT NULL);
         CREATE TABLE classrooms(id TEXT PRIMARY KEY, course_name TEXT NOT NULL);
         INSERT INTO classrooms VALUES('c1', 'Operating Systems');",
    )
    .expect("seed tables");
    drop(conn);
    std::fs::read(&path).expect("read seed db")
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
}

#[test]
fn foreign_bundles_are_rejected_and_unsafe_entries_skipped() {
    let out_dir = temp_dir("classroomd-backup-foreign");
    let workspace = out_dir.join("ws");

    let foreign = out_dir.join("foreign.zip");
    write_zip(
        &foreign,
        &[("manifest.json", &br#"{"format":"gradebook-workspace-v2"}"#[..]), ("db/classroomd.sqlite3", &b"x"[..])],
    );
    let e = backup::import_workspace_bundle(&foreign, &workspace).unwrap_err();
    assert!(matches!(e, backup::BundleError::Invalid(_)));
    assert!(e.to_string().contains("unsupported bundle format"));

    let not_zip = out_dir.join("plain.sqlite3");
    std::fs::write(&not_zip, b"SQLite format 3").expect("write plain file");
    let e = backup::import_workspace_bundle(&not_zip, &workspace).unwrap_err();
    assert!(matches!(e, backup::BundleError::Invalid(_)));

    let db_bytes = workspace_db_bytes(&out_dir);
    let sneaky = out_dir.join("sneaky.zip");
    let manifest = format!(r#"{{"format":"{}"}}"#, backup::BUNDLE_FORMAT_V1);
    write_zip(
        &sneaky,
        &[
            ("manifest.json", manifest.as_bytes()),
            ("db/classroomd.sqlite3", &db_bytes[..]),
            ("artifacts/abc/ok.txt", &b"fine"[..]),
            ("artifacts/../../escaped.txt", &b"nope"[..]),
        ],
    );
    let summary = backup::import_workspace_bundle(&sneaky, &workspace).expect("import");
    assert_eq!(summary.artifact_count, 1);
    assert_eq!(std::fs::read(workspace.join("classroomd.sqlite3")).expect("db"), db_bytes);
    assert!(workspace.join("artifacts/abc/ok.txt").is_file());
    assert!(!out_dir.join("escaped.txt").exists());

    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn unusable_database_entries_leave_the_live_database_untouched() {
    let out_dir = temp_dir("classroomd-backup-corrupt");
    let workspace = out_dir.join("ws");
    std::fs::create_dir_all(&workspace).expect("create workspace");
    let live = workspace.join("classroomd.sqlite3");
    std::fs::write(&live, b"live database bytes").expect("write live db");
    let manifest = format!(r#"{{"format":"{}"}}"#, backup::BUNDLE_FORMAT_V1);

    let garbage = out_dir.join("garbage.zip");
    write_zip(
        &garbage,
        &[("manifest.json", manifest.as_bytes()), ("db/classroomd.sqlite3", &b"not a database"[..])],
    );
    let e = backup::import_workspace_bundle(&garbage, &workspace).unwrap_err();
    assert!(matches!(e, backup::BundleError::Invalid(_)), "{e}");

    let empty_path = out_dir.join("empty.sqlite3");
    rusqlite::Connection::open(&empty_path)
        .and_then(|c| c.execute_batch("CREATE TABLE notes(body TEXT);"))
        .expect("create unrelated db");
    let unrelated = out_dir.join("unrelated.zip");
    write_zip(
        &unrelated,
        &[
            ("manifest.json", manifest.as_bytes()),
            ("db/classroomd.sqlite3", &std::fs::read(&empty_path).expect("read unrelated db")[..]),
        ],
    );
    let e = backup::import_workspace_bundle(&unrelated, &workspace).unwrap_err();
    assert!(e.to_string().contains("no users table"), "{e}");

    let missing_db = out_dir.join("missing-db.zip");
    write_zip(&missing_db, &[("manifest.json", manifest.as_bytes())]);
    let e = backup::import_workspace_bundle(&missing_db, &workspace).unwrap_err();
    assert!(matches!(e, backup::BundleError::Invalid(_)));

    assert_eq!(std::fs::read(&live).expect("live db"), b"live database bytes");
    assert!(!workspace.join("classroomd.sqlite3.importing").exists());

    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn rejected_import_keeps_the_sidecar_serving_the_current_workspace() {
    let workspace = temp_dir("classroomd-backup-reject");
    let garbage = workspace.join("garbage.zip");
    let manifest = format!(r#"{{"format":"{}"}}"#, backup::BUNDLE_FORMAT_V1);
    write_zip(
        &garbage,
        &[("manifest.json", manifest.as_bytes()), ("db/classroomd.sqlite3", &b"not a database"[..])],
    );

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        None,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(&mut stdin, &mut reader, "2", Some("prof"), "user.get", json!({}));

    let rejected = request(
        &mut stdin,
        &mut reader,
        "3",
        Some("ops"),
        "backup.importWorkspaceBundle",
        json!({ "inPath": garbage.to_string_lossy() }),
    );
    assert_eq!(error_code(&rejected), "validation_failed");
    assert_eq!(rejected["error"]["details"]["field"], json!("inPath"));

    let prof = request_ok(&mut stdin, &mut reader, "4", Some("ops"), "user.get", json!({}));
    assert_eq!(prof["role"], json!("ADMIN"));
    let role = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        Some("ops"),
        "user.setRole",
        json!({ "userId": "prof", "role": "PROFESSOR" }),
    );
    assert_eq!(role["name"], json!("prof name"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn only_administrators_export_or_import_bundles() {
    let workspace = temp_dir("classroomd-backup-gate");
    let bundle = workspace.join("gate.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        None,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let anonymous = request(
        &mut stdin,
        &mut reader,
        "2",
        None,
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(error_code(&anonymous), "unauthenticated");

    let student_export = request(
        &mut stdin,
        &mut reader,
        "3",
        Some("stu"),
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(error_code(&student_export), "forbidden");
    assert!(!bundle.exists());

    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        Some("ops"),
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );

    let student_import = request(
        &mut stdin,
        &mut reader,
        "5",
        Some("stu"),
        "backup.importWorkspaceBundle",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(error_code(&student_import), "forbidden");
    let stu = request_ok(&mut stdin, &mut reader, "6", Some("stu"), "user.get", json!({}));
    assert_eq!(stu["role"], json!("STUDENT"));

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        Some("ops"),
        "backup.importWorkspaceBundle",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(imported["bundleFormatDetected"], json!("classroomd-workspace-v1"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
