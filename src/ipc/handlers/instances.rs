use serde_json::json;

use crate::config::CalendarSettings;
use crate::ipc::error::err;
use crate::ipc::helpers::{
    bad_params, boundary_entries, core_err, db_conn, optional_enum, optional_str, required_date,
    required_str, respond, to_json, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{AcademicYear, Period, SexScope};
use crate::store::{self, NewInstance};

fn handle_instances_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let template_id = required_str(req, "templateId")?;
    let group_id = required_str(req, "groupId")?;
    let test_date = required_date(req, "testDate")?;
    let period = optional_enum(req, "period", Period::parse)?.unwrap_or(Period::Regular);
    let sex_scope_override = optional_enum(req, "sexScopeOverride", SexScope::parse)?;
    let calendar = CalendarSettings::load(conn)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;

    let instance = store::insert_instance(
        conn,
        &NewInstance {
            template_id,
            group_id,
            test_date,
            period,
            name_override: optional_str(req, "nameOverride"),
            unit_override: optional_str(req, "unitOverride"),
            sex_scope_override,
        },
        calendar,
    )
    .map_err(|e| core_err(req, e))?;
    Ok(json!({ "instance": to_json(req, &instance)? }))
}

fn handle_instances_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let group_id = required_str(req, "groupId")?;
    let year = optional_enum(req, "academicYear", AcademicYear::parse)?;
    store::get_group(conn, &group_id).map_err(|e| core_err(req, e))?;
    let instances = store::list_instances(conn, &group_id, year).map_err(|e| core_err(req, e))?;
    Ok(json!({ "instances": to_json(req, &instances)? }))
}

/// `boundaries: null` drops the private table and returns the instance to
/// its template's defaults.
fn handle_instance_boundaries_set(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let instance_id = required_str(req, "instanceId")?;
    let entries = match req.params.get("boundaries") {
        None => return Err(bad_params(req, "missing boundaries")),
        Some(serde_json::Value::Null) => None,
        Some(_) => Some(boundary_entries(req, "boundaries")?),
    };
    let advisory = store::replace_instance_boundaries(conn, &instance_id, entries.as_deref())
        .map_err(|e| core_err(req, e))?;
    Ok(json!({
        "instanceId": instance_id,
        "useCustomBoundaries": entries.is_some(),
        "advisory": to_json(req, &advisory)?,
    }))
}

fn handle_eligibility_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let instance_id = required_str(req, "instanceId")?;
    let eligibility =
        store::instance_eligibility(conn, &instance_id).map_err(|e| core_err(req, e))?;
    Ok(json!({
        "instanceId": instance_id,
        "sexScope": eligibility.scope,
        "students": to_json(req, &eligibility.eligible)?,
        "counts": to_json(req, &eligibility.counts)?,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "instances.create" => handle_instances_create(state, req),
        "instances.list" => handle_instances_list(state, req),
        "instances.boundaries.set" => handle_instance_boundaries_set(state, req),
        "eligibility.list" => handle_eligibility_list(state, req),
        _ => return None,
    };
    Some(respond(req, res))
}
