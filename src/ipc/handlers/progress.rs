use crate::ipc::helpers::{
    core_err, db_conn, required_str, required_year, respond, to_json, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::progress::{group_progress, student_progress, ProgressOptions};
use crate::store;

fn options(req: &Request) -> ProgressOptions {
    ProgressOptions {
        include_intermediate: req
            .params
            .get("includeIntermediate")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    }
}

fn handle_progress_group(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let group_id = required_str(req, "groupId")?;
    let year = required_year(req, "academicYear")?;
    let group = store::get_group(conn, &group_id).map_err(|e| core_err(req, e))?;
    let inputs = store::load_progress_inputs(conn, &group.id, year).map_err(|e| core_err(req, e))?;
    let report = group_progress(&group, year, &inputs.data(), options(req));
    to_json(req, &report)
}

fn handle_progress_student(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let year = required_year(req, "academicYear")?;
    let student = store::get_student(conn, &student_id).map_err(|e| core_err(req, e))?;
    let inputs = store::load_progress_inputs(conn, &student.group_id, year)
        .map_err(|e| core_err(req, e))?;
    let report = student_progress(&student, year, &inputs.data(), options(req));
    to_json(req, &report)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "progress.group" => handle_progress_group(state, req),
        "progress.student" => handle_progress_student(state, req),
        _ => return None,
    };
    Some(respond(req, res))
}
