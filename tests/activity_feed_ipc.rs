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

#[test]
fn feed_mixes_event_types_newest_first() {
    let workspace = temp_dir("classroomd-feed");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        None,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let empty = request_ok(&mut stdin, &mut reader, "2", Some("newcomer"), "activities.list", json!({}));
    assert_eq!(empty["activities"], json!([]));

    request_ok(&mut stdin, &mut reader, "3", Some("prof"), "user.get", json!({}));
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        Some("ops"),
        "user.setRole",
        json!({ "userId": "prof", "role": "PROFESSOR" }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        Some("prof"),
        "classrooms.create",
        json!({ "courseName": "Databases", "courseCode": "DB", "year": "Second Year", "division": "B" }),
    );
    let classroom_id = created["id"].as_str().expect("classroom id").to_string();
    let code = created["code"].as_str().expect("code").to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        Some("stu"),
        "user.update",
        json!({ "rollNo": "9", "srn": "SRN9", "prn": "PRN9", "year": "Second Year" }),
    );
    request_ok(&mut stdin, &mut reader, "7", Some("stu"), "classrooms.join", json!({ "code": code }));

    request_ok(
        &mut stdin,
        &mut reader,
        "8",
        Some("prof"),
        "attendance.mark",
        json!({ "classroomId": classroom_id, "userId": "stu", "date": "2026-01-05", "status": "present" }),
    );
    let assignment = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        Some("prof"),
        "assignments.create",
        json!({
            "classroomId": classroom_id,
            "title": "ER Diagram",
            "points": 20,
            "deadline": "2099-06-01T00:00:00Z",
        }),
    );
    let submitted = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        Some("stu"),
        "assignments.submit",
        json!({ "assignmentId": assignment["id"], "artifactUrl": "https://drive.example.edu/er" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "11",
        Some("prof"),
        "submissions.grade",
        json!({ "submissionId": submitted["submissionId"], "marks": 18 }),
    );

    let feed = request_ok(&mut stdin, &mut reader, "12", Some("stu"), "activities.list", json!({}));
    let feed = feed["activities"].as_array().expect("activities").clone();
    let types: Vec<&str> = feed.iter().map(|a| a["type"].as_str().unwrap_or("")).collect();
    assert_eq!(types, vec!["grade", "submission", "attendance"]);
    let dates: Vec<&str> = feed.iter().map(|a| a["date"].as_str().unwrap_or("")).collect();
    assert!(dates.windows(2).all(|w| w[0] > w[1]), "not strictly descending: {:?}", dates);
    assert_eq!(feed[0]["details"]["grade"], json!(18.0));
    assert_eq!(feed[0]["details"]["maxGrade"], json!(20));
    assert_eq!(feed[1]["details"]["submissionStatus"], json!("on_time"));
    assert_eq!(feed[2]["details"]["status"], json!("present"));
    assert!(feed.iter().all(|a| a["details"]["classroomName"] == json!("Databases")));

    let limited = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        Some("stu"),
        "activities.list",
        json!({ "limit": 1 }),
    );
    assert_eq!(limited["activities"].as_array().map(|a| a.len()), Some(1));

    let admin_feed = request_ok(&mut stdin, &mut reader, "14", Some("prof"), "activities.list", json!({}));
    let admin_types: Vec<&str> = admin_feed["activities"]
        .as_array()
        .expect("admin activities")
        .iter()
        .map(|a| a["type"].as_str().unwrap_or(""))
        .collect();
    assert_eq!(admin_types, vec!["submission", "attendance"]);

    let register = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        Some("stu"),
        "attendance.list",
        json!({ "classroomId": classroom_id }),
    );
    assert_eq!(register["records"][0]["date"], json!("2026-01-05"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
