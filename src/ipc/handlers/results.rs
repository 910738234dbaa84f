use serde_json::json;

use crate::grading::GradeResolution;
use crate::ipc::helpers::{
    bad_params, core_err, db_conn, optional_f64, optional_grade_code, optional_str, required_date,
    required_str, respond, to_json, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::results::Submission;
use crate::store;

fn submission(req: &Request) -> Result<Submission, serde_json::Value> {
    Ok(Submission {
        value: optional_f64(req, "value")?,
        explicit_grade: optional_grade_code(req, "grade")?,
    })
}

/// Preview only; nothing is written.
fn handle_grading_resolve(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let instance_id = required_str(req, "instanceId")?;
    let value = optional_f64(req, "value")?.ok_or_else(|| bad_params(req, "missing value"))?;
    if !value.is_finite() {
        return Err(bad_params(req, "value must be a finite number"));
    }
    let (resolution, source) = store::preview_grade(conn, &student_id, &instance_id, value)
        .map_err(|e| core_err(req, e))?;
    let (grade, reason) = match resolution {
        GradeResolution::Resolved(g) => (Some(g), None),
        GradeResolution::Unresolved(r) => (None, Some(r)),
    };
    Ok(json!({
        "grade": grade,
        "unresolvedReason": reason,
        "boundarySource": source,
    }))
}

fn handle_results_upsert(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let instance_id = required_str(req, "instanceId")?;
    let sub = submission(req)?;
    let record = store::upsert_result(conn, &student_id, &instance_id, &sub)
        .map_err(|e| core_err(req, e))?;
    Ok(json!({ "result": to_json(req, &record)? }))
}

fn handle_results_record_adhoc(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let template_id = required_str(req, "templateId")?;
    let test_date = required_date(req, "testDate")?;
    let sub = submission(req)?;
    let record = store::record_adhoc_result(conn, &student_id, &template_id, test_date, &sub)
        .map_err(|e| core_err(req, e))?;
    Ok(json!({ "result": to_json(req, &record)? }))
}

/// Lists by `instanceId`, or every record of one `studentId` including
/// ad-hoc entries.
fn handle_results_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let records = if let Some(instance_id) = optional_str(req, "instanceId") {
        store::list_instance_results(conn, &instance_id)
    } else if let Some(student_id) = optional_str(req, "studentId") {
        store::list_student_results(conn, &student_id)
    } else {
        return Err(bad_params(req, "missing instanceId or studentId"));
    }
    .map_err(|e| core_err(req, e))?;
    Ok(json!({ "results": to_json(req, &records)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "grading.resolve" => handle_grading_resolve(state, req),
        "results.upsert" => handle_results_upsert(state, req),
        "results.recordAdhoc" => handle_results_record_adhoc(state, req),
        "results.list" => handle_results_list(state, req),
        _ => return None,
    };
    Some(respond(req, res))
}
