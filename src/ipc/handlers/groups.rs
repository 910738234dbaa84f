use serde_json::json;

use crate::ipc::helpers::{
    bad_params, core_err, db_conn, optional_str, required_str, required_year, respond, to_json,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::store;

fn handle_groups_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let name = required_str(req, "name")?;
    let academic_year = required_year(req, "academicYear")?;
    let class_label = optional_str(req, "classLabel");
    let group = store::insert_group(conn, &name, academic_year, class_label.as_deref())
        .map_err(|e| core_err(req, e))?;
    Ok(json!({
        "group": to_json(req, &group)?,
        "classNumber": group.class_number(),
    }))
}

fn handle_groups_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let groups = store::list_groups(conn).map_err(|e| core_err(req, e))?;
    let rows: Vec<serde_json::Value> = groups
        .iter()
        .map(|g| {
            json!({
                "id": g.id,
                "name": g.name,
                "academicYear": g.academic_year,
                "classLabel": g.class_label,
                "classNumber": g.class_number(),
            })
        })
        .collect();
    Ok(json!({ "groups": rows }))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let group_id = required_str(req, "groupId")?;
    let full_name = required_str(req, "fullName")?;
    let sex = optional_str(req, "sex");
    let student = store::insert_student(conn, &group_id, &full_name, sex.as_deref())
        .map_err(|e| core_err(req, e))?;
    Ok(json!({ "student": to_json(req, &student)? }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let group_id = required_str(req, "groupId")?;
    store::get_group(conn, &group_id).map_err(|e| core_err(req, e))?;
    let students = store::list_students(conn, &group_id).map_err(|e| core_err(req, e))?;
    Ok(json!({ "students": to_json(req, &students)? }))
}

fn handle_students_set_active(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let active = req
        .params
        .get("active")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| bad_params(req, "missing active"))?;
    let student =
        store::set_student_active(conn, &student_id, active).map_err(|e| core_err(req, e))?;
    Ok(json!({ "student": to_json(req, &student)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "groups.create" => handle_groups_create(state, req),
        "groups.list" => handle_groups_list(state, req),
        "students.create" => handle_students_create(state, req),
        "students.list" => handle_students_list(state, req),
        "students.setActive" => handle_students_set_active(state, req),
        _ => return None,
    };
    Some(respond(req, res))
}
