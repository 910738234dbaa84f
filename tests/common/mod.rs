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

/// A running `normbookd` driven over JSON lines.
pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    pub fn spawn() -> Self {
        let exe = env!("CARGO_BIN_EXE_normbookd");
        let mut child = Command::new(exe)
            .env_remove("NORMBOOKD_WORKSPACE")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn normbookd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        }
    }

    /// Spawns a sidecar with a fresh workspace already selected.
    pub fn with_workspace(prefix: &str) -> Self {
        let mut sc = Self::spawn();
        let workspace = temp_dir(prefix);
        sc.call("workspace.select", json!({ "path": workspace.to_string_lossy() }));
        sc
    }

    /// Sends one request and returns the full response envelope.
    pub fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        assert!(!line.trim().is_empty(), "empty response for {}", method);
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    /// Sends a request that must succeed and returns its `result`.
    pub fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let resp = self.request(method, params);
        assert_eq!(
            resp.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            resp
        );
        resp.get("result").cloned().unwrap_or(serde_json::Value::Null)
    }

    /// Sends a request that must fail and returns its error code.
    pub fn call_err(&mut self, method: &str, params: serde_json::Value) -> String {
        let resp = self.request(method, params);
        assert_eq!(
            resp.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            resp
        );
        resp.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string()
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn str_at<'a>(v: &'a serde_json::Value, pointer: &str) -> &'a str {
    v.pointer(pointer)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing string at {} in {}", pointer, v))
}

/// 30 m sprint for class-4 boys, lower is better.
pub fn sprint_boundaries() -> serde_json::Value {
    json!([
        { "grade": 5, "sex": "M", "classNumber": 4, "fromValue": 1.0, "toValue": 6.2 },
        { "grade": 4, "sex": "M", "classNumber": 4, "fromValue": 6.3, "toValue": 6.8 },
        { "grade": 3, "sex": "M", "classNumber": 4, "fromValue": 6.9, "toValue": 7.2 },
        { "grade": 2, "sex": "M", "classNumber": 4, "fromValue": 7.3, "toValue": 15.0 }
    ])
}

/// Creates the sprint template with its default table; returns its id.
pub fn create_sprint_template(sc: &mut Sidecar) -> String {
    let created = sc.call(
        "templates.create",
        json!({
            "name": "30m sprint",
            "unit": "s",
            "classFrom": 1,
            "classTo": 11,
            "direction": "LOWER_IS_BETTER"
        }),
    );
    let template_id = str_at(&created, "/template/id").to_string();
    sc.call(
        "templates.boundaries.set",
        json!({ "templateId": template_id, "boundaries": sprint_boundaries() }),
    );
    template_id
}

pub fn create_group(sc: &mut Sidecar, name: &str, class_label: Option<&str>) -> String {
    let created = sc.call(
        "groups.create",
        json!({ "name": name, "academicYear": "2024/2025", "classLabel": class_label }),
    );
    str_at(&created, "/group/id").to_string()
}

pub fn create_student(sc: &mut Sidecar, group_id: &str, name: &str, sex: Option<&str>) -> String {
    let created = sc.call(
        "students.create",
        json!({ "groupId": group_id, "fullName": name, "sex": sex }),
    );
    str_at(&created, "/student/id").to_string()
}

pub fn create_instance(
    sc: &mut Sidecar,
    template_id: &str,
    group_id: &str,
    period: &str,
    test_date: &str,
) -> String {
    let created = sc.call(
        "instances.create",
        json!({
            "templateId": template_id,
            "groupId": group_id,
            "period": period,
            "testDate": test_date
        }),
    );
    str_at(&created, "/instance/id").to_string()
}
