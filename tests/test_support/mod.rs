#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
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

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_campusd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn campusd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
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

pub fn request_ok(
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
            .get("error")
            .map(|e| e.to_string())
            .unwrap_or_else(|| value.to_string())
    );
    value.get("result").cloned().expect("result payload")
}

pub fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
}

pub fn select_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
}

/// The first account in a fresh workspace always comes back as admin.
pub fn bootstrap_admin(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> String {
    let result = request_ok(
        stdin,
        reader,
        "bootstrap",
        "auth.signUp",
        json!({
            "email": "head@school.test",
            "password": "letmein1",
            "displayName": "Head Admin"
        }),
    );
    assert_eq!(
        result
            .get("user")
            .and_then(|u| u.get("role"))
            .and_then(|r| r.as_str()),
        Some("admin")
    );
    result
        .get("token")
        .and_then(|t| t.as_str())
        .expect("admin token")
        .to_string()
}

pub fn sign_up(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    email: &str,
    role: &str,
    display_name: &str,
) -> String {
    let result = request_ok(
        stdin,
        reader,
        id,
        "auth.signUp",
        json!({
            "email": email,
            "password": "letmein1",
            "displayName": display_name,
            "role": role
        }),
    );
    result
        .get("token")
        .and_then(|t| t.as_str())
        .expect("token")
        .to_string()
}

pub fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    token: &str,
    first: &str,
    last: &str,
) -> String {
    let result = request_ok(
        stdin,
        reader,
        id,
        "students.create",
        json!({
            "token": token,
            "firstName": first,
            "lastName": last
        }),
    );
    result
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string()
}
