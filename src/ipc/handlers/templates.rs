use serde_json::json;

use crate::boundary::{check_table, BoundarySource, BoundaryTable};
use crate::ipc::helpers::{
    bad_params, boundary_entries, core_err, db_conn, optional_enum, optional_str, required_i64,
    required_str, respond, to_json, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Direction, SexScope};
use crate::store::{self, NewTemplate};

fn handle_templates_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let name = required_str(req, "name")?;
    let unit = optional_str(req, "unit").unwrap_or_default();
    let class_from = required_i64(req, "classFrom")?;
    let class_to = required_i64(req, "classTo")?;
    let direction = optional_enum(req, "direction", Direction::parse)?
        .ok_or_else(|| bad_params(req, "missing direction"))?;
    let sex_scope = optional_enum(req, "sexScope", SexScope::parse)?;
    let owner_trainer_id = optional_str(req, "ownerTrainerId");

    let template = store::insert_template(
        conn,
        &NewTemplate {
            name,
            unit,
            class_from,
            class_to,
            direction,
            sex_scope,
            owner_trainer_id,
        },
    )
    .map_err(|e| core_err(req, e))?;
    Ok(json!({ "template": to_json(req, &template)? }))
}

fn handle_templates_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let trainer_id = optional_str(req, "trainerId");
    let templates =
        store::list_templates(conn, trainer_id.as_deref()).map_err(|e| core_err(req, e))?;
    Ok(json!({ "templates": to_json(req, &templates)? }))
}

fn handle_boundaries_set(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let template_id = required_str(req, "templateId")?;
    let entries = boundary_entries(req, "boundaries")?;
    let advisory = store::replace_template_boundaries(conn, &template_id, &entries)
        .map_err(|e| core_err(req, e))?;
    Ok(json!({
        "templateId": template_id,
        "count": entries.len(),
        "advisory": to_json(req, &advisory)?,
    }))
}

fn handle_boundaries_get(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let template_id = required_str(req, "templateId")?;
    store::get_template(conn, &template_id).map_err(|e| core_err(req, e))?;
    let entries = store::template_boundaries(conn, &template_id).map_err(|e| core_err(req, e))?;
    Ok(json!({ "templateId": template_id, "boundaries": to_json(req, &entries)? }))
}

/// Advisory check of a proposed table; nothing is saved.
fn handle_boundaries_check(_state: &mut AppState, req: &Request) -> HandlerResult {
    let entries = boundary_entries(req, "boundaries")?;
    for e in &entries {
        e.validate().map_err(|e| core_err(req, e))?;
    }
    let advisory = check_table(&BoundaryTable::new(BoundarySource::Template, entries));
    Ok(json!({
        "clean": advisory.is_clean(),
        "advisory": to_json(req, &advisory)?,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "templates.create" => handle_templates_create(state, req),
        "templates.list" => handle_templates_list(state, req),
        "templates.boundaries.set" => handle_boundaries_set(state, req),
        "templates.boundaries.get" => handle_boundaries_get(state, req),
        "boundaries.check" => handle_boundaries_check(state, req),
        _ => return None,
    };
    Some(respond(req, res))
}
