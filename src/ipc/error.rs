use serde_json::json;

use crate::error::CoreError;

pub const NO_WORKSPACE: &str = "no_workspace";
pub const BAD_PARAMS: &str = "bad_params";
pub const BAD_JSON: &str = "bad_json";
pub const NOT_IMPLEMENTED: &str = "not_implemented";

/// Handler outcome: the `Err` side is an already-built error envelope.
pub type HandlerResult = Result<serde_json::Value, serde_json::Value>;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Envelope for a core failure. Missing rows name the entity and id in
/// `details`.
pub fn core_error(id: &str, e: &CoreError) -> serde_json::Value {
    let details = match e {
        CoreError::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
        _ => None,
    };
    err(id, e.code(), e.to_string(), details)
}

pub fn respond(id: &str, res: HandlerResult) -> serde_json::Value {
    match res {
        Ok(result) => ok(id, result),
        Err(resp) => resp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_carries_entity_details() {
        let resp = core_error("7", &CoreError::not_found("instance", "i-1"));
        assert_eq!(resp["id"], "7");
        assert_eq!(resp["ok"], false);
        assert_eq!(resp["error"]["code"], "not_found");
        assert_eq!(resp["error"]["details"]["entity"], "instance");
        assert_eq!(resp["error"]["details"]["id"], "i-1");
    }

    #[test]
    fn other_core_errors_have_no_details() {
        let resp = core_error("8", &CoreError::AlreadyExists("START_OF_YEAR".into()));
        assert_eq!(resp["error"]["code"], "already_exists");
        assert!(resp["error"].get("details").is_none());
    }

    #[test]
    fn respond_wraps_results_and_passes_errors_through() {
        let good = respond("1", Ok(json!({ "n": 1 })));
        assert_eq!(good["ok"], true);
        assert_eq!(good["result"]["n"], 1);

        let failed = err("2", BAD_PARAMS, "missing groupId", None);
        assert_eq!(respond("2", Err(failed.clone())), failed);
    }
}
