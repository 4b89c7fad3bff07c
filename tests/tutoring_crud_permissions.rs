use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

const TEACHER_CODE: &str = "amaru-geheim";

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

fn spawn_daemon() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_checkmathed");
    let mut child = Command::new(exe)
        .env("CHECKMATHE_TEACHER_CODE", TEACHER_CODE)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn checkmathed");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
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
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
    expected_code: &str,
) {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    let code = value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    assert_eq!(code, expected_code, "{}: {}", method, value);
}

fn register(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    username: &str,
    teacher: bool,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        id,
        "users.create",
        json!({
            "username": username,
            "email": format!("{}@mail.de", username),
            "password": "password",
            "firstName": "Test",
            "lastName": "User",
            "teacherCode": if teacher { Some(TEACHER_CODE) } else { None },
        }),
    )
}

fn login(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    username: &str,
) -> String {
    let result = request_ok(
        stdin,
        reader,
        id,
        "auth.login",
        json!({ "username": username, "password": "password" }),
    );
    result
        .get("token")
        .and_then(|v| v.as_str())
        .expect("token")
        .to_string()
}

struct Trio {
    nico: String,
    xavier: String,
    kat: String,
    tut_id: String,
}

fn setup_trio(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Trio {
    let _ = register(stdin, reader, "s1", "nico.st", true);
    let _ = register(stdin, reader, "s2", "xavier.x", true);
    let _ = register(stdin, reader, "s3", "kat.ev", false);
    let nico = login(stdin, reader, "s4", "nico.st");
    let xavier = login(stdin, reader, "s5", "xavier.x");
    let kat = login(stdin, reader, "s6", "kat.ev");
    let created = request_ok(
        stdin,
        reader,
        "s7",
        "tutorings.create",
        json!({
            "token": nico,
            "date": "2024-05-06",
            "durationMin": 45,
            "subjectTitle": "Math",
            "teacherUsername": "nico.st",
            "studentUsername": "kat.ev",
            "content": "Lorem ipsum"
        }),
    );
    let tut_id = created
        .get("id")
        .and_then(|v| v.as_str())
        .expect("tutoring id")
        .to_string();
    Trio {
        nico,
        xavier,
        kat,
        tut_id,
    }
}

#[test]
fn get_is_limited_to_participants() {
    let workspace = temp_dir("checkmathe-crud-get");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let trio = setup_trio(&mut stdin, &mut reader);

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "tutorings.get",
        json!({ "token": trio.nico, "tutId": trio.tut_id }),
    );
    assert_eq!(
        fetched
            .get("student")
            .and_then(|s| s.get("username"))
            .and_then(|v| v.as_str()),
        Some("kat.ev")
    );

    // the student participates too
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "tutorings.get",
        json!({ "token": trio.kat, "tutId": trio.tut_id }),
    );

    request_err(
        &mut stdin,
        &mut reader,
        "4",
        "tutorings.get",
        json!({ "token": "wrongtoken", "tutId": trio.tut_id }),
        "auth_required",
    );
    request_err(
        &mut stdin,
        &mut reader,
        "5",
        "tutorings.get",
        json!({ "token": trio.xavier, "tutId": trio.tut_id }),
        "forbidden",
    );
    request_err(
        &mut stdin,
        &mut reader,
        "6",
        "tutorings.get",
        json!({ "token": trio.nico, "tutId": "no-such-id" }),
        "not_found",
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn update_is_limited_to_the_own_teacher() {
    let workspace = temp_dir("checkmathe-crud-update");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let trio = setup_trio(&mut stdin, &mut reader);

    request_err(
        &mut stdin,
        &mut reader,
        "2",
        "tutorings.update",
        json!({
            "token": trio.xavier,
            "tutId": trio.tut_id,
            "newValues": { "content": "hijacked" }
        }),
        "forbidden",
    );
    request_err(
        &mut stdin,
        &mut reader,
        "3",
        "tutorings.update",
        json!({
            "token": trio.kat,
            "tutId": trio.tut_id,
            "newValues": { "content": "hijacked" }
        }),
        "forbidden",
    );

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "tutorings.update",
        json!({
            "token": trio.nico,
            "tutId": trio.tut_id,
            "newValues": { "content": "New Content. Ananas." }
        }),
    );
    assert_eq!(
        updated
            .get("tutoring")
            .and_then(|t| t.get("content"))
            .and_then(|v| v.as_str()),
        Some("New Content. Ananas.")
    );

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "tutorings.get",
        json!({ "token": trio.kat, "tutId": trio.tut_id }),
    );
    assert_eq!(
        fetched.get("content").and_then(|v| v.as_str()),
        Some("New Content. Ananas.")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn update_patches_are_whitelisted_and_validated() {
    let workspace = temp_dir("checkmathe-crud-patch");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let trio = setup_trio(&mut stdin, &mut reader);

    request_err(
        &mut stdin,
        &mut reader,
        "2",
        "tutorings.update",
        json!({ "token": trio.nico, "tutId": trio.tut_id }),
        "bad_params",
    );
    request_err(
        &mut stdin,
        &mut reader,
        "3",
        "tutorings.update",
        json!({ "token": trio.nico, "tutId": trio.tut_id, "newValues": {} }),
        "bad_params",
    );
    request_err(
        &mut stdin,
        &mut reader,
        "4",
        "tutorings.update",
        json!({
            "token": trio.nico,
            "tutId": trio.tut_id,
            "newValues": { "studentUsername": "someone.else" }
        }),
        "bad_params",
    );
    request_err(
        &mut stdin,
        &mut reader,
        "5",
        "tutorings.update",
        json!({
            "token": trio.nico,
            "tutId": trio.tut_id,
            "newValues": { "durationMin": 0 }
        }),
        "bad_params",
    );
    request_err(
        &mut stdin,
        &mut reader,
        "6",
        "tutorings.update",
        json!({
            "token": trio.nico,
            "tutId": trio.tut_id,
            "newValues": { "date": "2090-01-01" }
        }),
        "bad_params",
    );

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "tutorings.update",
        json!({
            "token": trio.nico,
            "tutId": trio.tut_id,
            "newValues": { "paid": true, "subjectTitle": "Physics", "durationMin": 90 }
        }),
    );
    let tut = updated.get("tutoring").expect("tutoring");
    assert_eq!(tut.get("paid").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        tut.get("subjectTitle").and_then(|v| v.as_str()),
        Some("Physics")
    );
    assert_eq!(tut.get("durationMin").and_then(|v| v.as_i64()), Some(90));

    // moving onto a date already taken by the same pair collides
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "tutorings.create",
        json!({
            "token": trio.nico,
            "date": "2024-05-07",
            "durationMin": 45,
            "subjectTitle": "Math",
            "teacherUsername": "nico.st",
            "studentUsername": "kat.ev",
            "content": "Folgetermin"
        }),
    );
    request_err(
        &mut stdin,
        &mut reader,
        "9",
        "tutorings.update",
        json!({
            "token": trio.nico,
            "tutId": trio.tut_id,
            "newValues": { "date": "2024-05-07" }
        }),
        "conflict",
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn delete_is_limited_to_the_own_teacher() {
    let workspace = temp_dir("checkmathe-crud-delete");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let trio = setup_trio(&mut stdin, &mut reader);

    request_err(
        &mut stdin,
        &mut reader,
        "2",
        "tutorings.delete",
        json!({ "token": trio.kat, "tutId": trio.tut_id }),
        "forbidden",
    );
    request_err(
        &mut stdin,
        &mut reader,
        "3",
        "tutorings.delete",
        json!({ "token": trio.xavier, "tutId": trio.tut_id }),
        "forbidden",
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "tutorings.delete",
        json!({ "token": trio.nico, "tutId": trio.tut_id }),
    );
    request_err(
        &mut stdin,
        &mut reader,
        "5",
        "tutorings.get",
        json!({ "token": trio.nico, "tutId": trio.tut_id }),
        "not_found",
    );
    request_err(
        &mut stdin,
        &mut reader,
        "6",
        "tutorings.delete",
        json!({ "token": trio.nico, "tutId": trio.tut_id }),
        "not_found",
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn list_for_user_covers_both_sides() {
    let workspace = temp_dir("checkmathe-crud-list");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let trio = setup_trio(&mut stdin, &mut reader);

    // as teacher and as student the session shows up; xavier has none
    for (i, (token, username, expected)) in [
        (&trio.nico, "nico.st", 1),
        (&trio.kat, "kat.ev", 1),
        (&trio.xavier, "xavier.x", 0),
    ]
    .iter()
    .enumerate()
    {
        let listed = request_ok(
            &mut stdin,
            &mut reader,
            &format!("list-{}", i),
            "tutorings.listForUser",
            json!({ "token": token, "username": username }),
        );
        assert_eq!(
            listed.as_array().map(|a| a.len()),
            Some(*expected),
            "listForUser {}",
            username
        );
    }

    request_err(
        &mut stdin,
        &mut reader,
        "2",
        "tutorings.listForUser",
        json!({ "token": trio.nico, "username": "ghost" }),
        "not_found",
    );
    request_err(
        &mut stdin,
        &mut reader,
        "3",
        "tutorings.listForUser",
        json!({ "username": "kat.ev" }),
        "auth_required",
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
