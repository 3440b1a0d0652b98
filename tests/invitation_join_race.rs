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

type Pipe = (ChildStdin, BufReader<ChildStdout>);

fn select(pipe: &mut Pipe, id: &str, workspace: &std::path::Path) {
    request_ok(
        &mut pipe.0,
        &mut pipe.1,
        id,
        None,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
}

#[test]
fn accept_racing_join_from_another_process_yields_one_membership() {
    let workspace = temp_dir("classroomd-race");
    let (mut child_a, stdin_a, reader_a) = spawn_sidecar();
    let (mut child_b, stdin_b, reader_b) = spawn_sidecar();
    let mut a: Pipe = (stdin_a, reader_a);
    let mut b: Pipe = (stdin_b, reader_b);
    select(&mut a, "a-select", &workspace);
    select(&mut b, "b-select", &workspace);

    request_ok(&mut a.0, &mut a.1, "a-1", Some("prof"), "user.get", json!({}));
    request_ok(
        &mut a.0,
        &mut a.1,
        "a-2",
        Some("ops"),
        "user.setRole",
        json!({ "userId": "prof", "role": "PROFESSOR" }),
    );
    request_ok(
        &mut a.0,
        &mut a.1,
        "a-3",
        Some("stu"),
        "user.update",
        json!({ "rollNo": "3", "srn": "SRN3", "prn": "PRN3", "year": "First Year" }),
    );

    for round in 0..8 {
        let created = request_ok(
            &mut a.0,
            &mut a.1,
            &format!("create-{}", round),
            Some("prof"),
            "classrooms.create",
            json!({
                "courseName": format!("Race {}", round),
                "courseCode": "RC",
                "year": "First Year",
                "division": "A",
            }),
        );
        let classroom_id = created["id"].as_str().expect("classroom id").to_string();
        let code = created["code"].as_str().expect("code").to_string();
        let invitation = request_ok(
            &mut a.0,
            &mut a.1,
            &format!("invite-{}", round),
            Some("prof"),
            "invitations.create",
            json!({ "classroomId": classroom_id, "userId": "stu" }),
        );
        let invitation_id = invitation["id"].as_str().expect("invitation id").to_string();

        let barrier = std::sync::Barrier::new(2);
        let (accepted, joined) = std::thread::scope(|s| {
            let accept = s.spawn(|| {
                barrier.wait();
                request(
                    &mut a.0,
                    &mut a.1,
                    &format!("accept-{}", round),
                    Some("stu"),
                    "invitations.accept",
                    json!({ "invitationId": invitation_id }),
                )
            });
            let join = s.spawn(|| {
                barrier.wait();
                request(
                    &mut b.0,
                    &mut b.1,
                    &format!("join-{}", round),
                    Some("stu"),
                    "classrooms.join",
                    json!({ "code": code }),
                )
            });
            (
                accept.join().expect("accept thread"),
                join.join().expect("join thread"),
            )
        });
        assert_eq!(accepted["ok"], json!(true), "accept failed: {}", accepted);
        assert_eq!(joined["ok"], json!(true), "join failed: {}", joined);
        // Exactly one of the two calls created the membership.
        let fresh = [&accepted, &joined]
            .iter()
            .filter(|v| v["result"]["alreadyMember"] == json!(false))
            .count();
        assert_eq!(fresh, 1, "round {}: {} / {}", round, accepted, joined);

        let detail = request_ok(
            &mut a.0,
            &mut a.1,
            &format!("detail-{}", round),
            Some("prof"),
            "classrooms.get",
            json!({ "classroomId": classroom_id }),
        );
        assert_eq!(detail["members"].as_array().map(|m| m.len()), Some(1));
    }

    let pending = request_ok(&mut b.0, &mut b.1, "pending", Some("stu"), "invitations.list", json!({}));
    assert_eq!(pending["invitations"], json!([]));

    drop(a);
    drop(b);
    let _ = child_a.wait();
    let _ = child_b.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn concurrent_double_join_from_two_processes_is_idempotent() {
    let workspace = temp_dir("classroomd-double-join");
    let (mut child_a, stdin_a, reader_a) = spawn_sidecar();
    let (mut child_b, stdin_b, reader_b) = spawn_sidecar();
    let mut a: Pipe = (stdin_a, reader_a);
    let mut b: Pipe = (stdin_b, reader_b);
    select(&mut a, "a-select", &workspace);
    select(&mut b, "b-select", &workspace);

    request_ok(&mut a.0, &mut a.1, "a-1", Some("prof"), "user.get", json!({}));
    request_ok(
        &mut a.0,
        &mut a.1,
        "a-2",
        Some("ops"),
        "user.setRole",
        json!({ "userId": "prof", "role": "PROFESSOR" }),
    );
    request_ok(
        &mut a.0,
        &mut a.1,
        "a-3",
        Some("stu"),
        "user.update",
        json!({ "rollNo": "3", "srn": "SRN3", "prn": "PRN3", "year": "First Year" }),
    );
    let created = request_ok(
        &mut a.0,
        &mut a.1,
        "a-4",
        Some("prof"),
        "classrooms.create",
        json!({ "courseName": "Twice", "courseCode": "TW", "year": "First Year", "division": "A" }),
    );
    let classroom_id = created["id"].as_str().expect("classroom id").to_string();
    let code = created["code"].as_str().expect("code").to_string();

    let barrier = std::sync::Barrier::new(2);
    let (first, second) = std::thread::scope(|s| {
        let one = s.spawn(|| {
            barrier.wait();
            request(&mut a.0, &mut a.1, "join-a", Some("stu"), "classrooms.join", json!({ "code": code }))
        });
        let two = s.spawn(|| {
            barrier.wait();
            request(&mut b.0, &mut b.1, "join-b", Some("stu"), "classrooms.join", json!({ "code": code }))
        });
        (one.join().expect("thread a"), two.join().expect("thread b"))
    });
    assert_eq!(first["ok"], json!(true), "{}", first);
    assert_eq!(second["ok"], json!(true), "{}", second);
    let already: Vec<bool> = [&first, &second]
        .iter()
        .map(|v| v["result"]["alreadyMember"].as_bool().expect("alreadyMember"))
        .collect();
    assert_eq!(already.iter().filter(|x| !**x).count(), 1);

    let detail = request_ok(
        &mut b.0,
        &mut b.1,
        "detail",
        Some("prof"),
        "classrooms.get",
        json!({ "classroomId": classroom_id }),
    );
    assert_eq!(detail["members"].as_array().map(|m| m.len()), Some(1));

    drop(a);
    drop(b);
    let _ = child_a.wait();
    let _ = child_b.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
