mod common;

use common::{temp_dir, Sidecar};
use serde_json::json;

#[test]
fn health_reports_version_and_workspace() {
    let mut sc = Sidecar::spawn();
    let health = sc.call("health", json!({}));
    assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));
    assert!(health["workspacePath"].is_null());

    let workspace = temp_dir("normbook-health");
    sc.call("workspace.select", json!({ "path": workspace.to_string_lossy() }));
    let health = sc.call("health", json!({}));
    let expected = workspace.to_string_lossy().to_string();
    assert_eq!(health["workspacePath"].as_str(), Some(expected.as_str()));
    assert!(workspace.join("normbook.sqlite3").is_file());
}

#[test]
fn data_methods_require_a_workspace() {
    let mut sc = Sidecar::spawn();
    for method in ["templates.list", "groups.list", "settings.get"] {
        assert_eq!(sc.call_err(method, json!({})), "no_workspace", "{}", method);
    }
    assert_eq!(sc.call_err("workspace.select", json!({})), "bad_params");
}

#[test]
fn unknown_method_is_not_implemented() {
    let mut sc = Sidecar::spawn();
    assert_eq!(sc.call_err("reports.export", json!({})), "not_implemented");
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let mut sc = Sidecar::with_workspace("normbook-router-smoke");
    let methods = [
        "settings.get",
        "settings.update",
        "templates.create",
        "templates.list",
        "templates.boundaries.set",
        "templates.boundaries.get",
        "boundaries.check",
        "groups.create",
        "groups.list",
        "students.create",
        "students.list",
        "students.setActive",
        "instances.create",
        "instances.list",
        "instances.boundaries.set",
        "eligibility.list",
        "grading.resolve",
        "results.upsert",
        "results.recordAdhoc",
        "results.list",
        "progress.group",
        "progress.student",
    ];
    for method in methods {
        let resp = sc.request(method, json!({}));
        let code = resp
            .pointer("/error/code")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        assert_ne!(code, "not_implemented", "{} is not routed", method);
    }
}

#[test]
fn malformed_lines_get_an_error_and_the_loop_continues() {
    use std::io::{BufRead, BufReader, Write};
    use std::process::{Command, Stdio};

    let mut child = Command::new(env!("CARGO_BIN_EXE_normbookd"))
        .env_remove("NORMBOOKD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn normbookd");
    let mut stdin = child.stdin.take().expect("stdin");
    let mut reader = BufReader::new(child.stdout.take().expect("stdout"));

    writeln!(stdin, "{{not json").expect("write");
    writeln!(stdin, "{}", json!({ "id": "2", "method": "health" })).expect("write");
    stdin.flush().expect("flush");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read");
    let first: serde_json::Value = serde_json::from_str(line.trim()).expect("json");
    assert_eq!(first["ok"], false);
    assert_eq!(first["error"]["code"], "bad_json");

    line.clear();
    reader.read_line(&mut line).expect("read");
    let second: serde_json::Value = serde_json::from_str(line.trim()).expect("json");
    assert_eq!(second["id"], "2");
    assert_eq!(second["ok"], true);

    drop(stdin);
    let _ = child.wait();
}
