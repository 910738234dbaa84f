use serde_json::json;
use std::path::PathBuf;

use crate::config::CalendarSettings;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{bad_params, db_conn, respond, HandlerResult};
use crate::ipc::types::{AppState, Request};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match state.open_workspace(path.clone()) {
        Ok(()) => ok(&req.id, json!({ "workspacePath": path.to_string_lossy() })),
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn handle_settings_get(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let calendar = CalendarSettings::load(conn)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    Ok(json!({ "calendar": calendar }))
}

fn handle_settings_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let Some(patch) = req.params.get("calendar") else {
        return Err(bad_params(req, "missing calendar"));
    };
    let mut calendar = CalendarSettings::load(conn)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    if let Some(v) = patch.get("schoolYearStartMonth") {
        let month = v
            .as_u64()
            .filter(|m| (1..=12).contains(m))
            .ok_or_else(|| bad_params(req, "schoolYearStartMonth must be 1..12"))?;
        calendar.school_year_start_month = month as u32;
    }
    calendar
        .save(conn)
        .map_err(|e| err(&req.id, "db_update_failed", e.to_string(), None))?;
    Ok(json!({ "calendar": calendar }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "settings.get" => Some(respond(req, handle_settings_get(state, req))),
        "settings.update" => Some(respond(req, handle_settings_update(state, req))),
        _ => None,
    }
}
