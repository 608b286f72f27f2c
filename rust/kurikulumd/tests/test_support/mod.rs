#![allow(dead_code)]

use serde_json::{json, Value};
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
    let exe = env!("CARGO_BIN_EXE_kurikulumd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn kurikulumd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
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
    let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(Value::Null)
}

/// Sends a request expected to fail and returns its error code.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .pointer("/error/code")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
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

/// Switches the generator to canned responses.
pub fn use_fixtures(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, fixtures: Value) {
    let _ = request_ok(
        stdin,
        reader,
        "fixtures",
        "setup.update",
        json!({ "section": "ai", "patch": { "provider": "fixture", "fixtures": fixtures } }),
    );
}

pub fn criteria() -> Value {
    json!([
        { "level": 1, "description": "perlu bimbingan" },
        { "level": 2, "description": "berkembang" },
        { "level": 3, "description": "cakap" },
        { "level": 4, "description": "mahir" }
    ])
}

pub fn rubric(aspects: &[&str]) -> Value {
    let aspects: Vec<Value> = aspects
        .iter()
        .map(|a| json!({ "aspek": a, "critical": false, "criteria": criteria() }))
        .collect();
    json!({ "aspects": aspects })
}

pub fn lesson(title: &str) -> Value {
    json!({
        "title": title,
        "phases": [
            { "name": "Memahami", "durationMinutes": 20, "activities": ["apersepsi"] },
            { "name": "Mengaplikasi", "durationMinutes": 40, "activities": ["praktik"] },
            { "name": "Merefleksi", "durationMinutes": 10, "activities": ["jurnal"] }
        ]
    })
}

pub struct Seeded {
    pub class_id: String,
    pub plan_id: String,
    /// Objective ids in flow order, as assigned by the daemon.
    pub tp_ids: Vec<String>,
    pub student_ids: Vec<String>,
}

/// One class with `students` members and a plan with one objective per
/// entry of `descriptions`.
pub fn seed_plan(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    descriptions: &[&str],
    students: &[&str],
) -> Seeded {
    let class = request_ok(stdin, reader, "seed-class", "classes.create", json!({ "name": "5A" }));
    let class_id = class["classId"].as_str().expect("classId").to_string();
    let mut student_ids = Vec::new();
    for name in students {
        let s = request_ok(
            stdin,
            reader,
            "seed-student",
            "students.create",
            json!({ "classId": class_id, "name": name }),
        );
        student_ids.push(s["studentId"].as_str().expect("studentId").to_string());
    }
    let plan = request_ok(
        stdin,
        reader,
        "seed-plan",
        "plans.create",
        json!({ "name": "IPAS Kelas 5", "subject": "IPAS", "grade": "5", "classId": class_id }),
    );
    let plan_id = plan["planId"].as_str().expect("planId").to_string();
    let tp_ids = set_objectives(stdin, reader, &plan_id, descriptions);
    Seeded {
        class_id,
        plan_id,
        tp_ids,
        student_ids,
    }
}

/// Replaces the plan's objectives with fresh ones and returns their ids.
pub fn set_objectives(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    plan_id: &str,
    descriptions: &[&str],
) -> Vec<String> {
    let objectives: Vec<Value> = descriptions
        .iter()
        .map(|d| json!({ "description": d }))
        .collect();
    let result = request_ok(
        stdin,
        reader,
        "seed-tps",
        "tps.update",
        json!({ "planId": plan_id, "objectives": objectives }),
    );
    result
        .pointer("/plan/curriculum/objectives")
        .and_then(|v| v.as_array())
        .expect("objectives")
        .iter()
        .map(|o| o["id"].as_str().expect("objective id").to_string())
        .collect()
}

pub fn objective<'v>(plan: &'v Value, tp_id: &str) -> &'v Value {
    plan.pointer("/curriculum/objectives")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.iter().find(|o| o["id"] == tp_id))
        .expect("objective in plan")
}

pub fn open_plan(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    plan_id: &str,
) -> Value {
    request_ok(stdin, reader, "open", "plans.open", json!({ "planId": plan_id }))["plan"].clone()
}

pub fn student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    student_id: &str,
) -> Value {
    request_ok(
        stdin,
        reader,
        "student",
        "students.get",
        json!({ "studentId": student_id }),
    )["student"]
        .clone()
}
