use chrono::NaiveDate;
use rusqlite::Connection;
use tracing::warn;

use crate::boundary::BoundaryEntry;
use crate::error::CoreError;
use crate::gender::normalize_sex;
use crate::ipc::error::{core_error, err, BAD_PARAMS, NO_WORKSPACE};
pub use crate::ipc::error::HandlerResult;
use crate::ipc::types::{AppState, Request};
use crate::model::{AcademicYear, Grade, GradeCode};

pub fn respond(req: &Request, res: HandlerResult) -> serde_json::Value {
    crate::ipc::error::respond(&req.id, res)
}

pub fn bad_params(req: &Request, message: impl Into<String>) -> serde_json::Value {
    err(&req.id, BAD_PARAMS, message, None)
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, NO_WORKSPACE, "select a workspace first", None))
}

pub fn core_err(req: &Request, e: CoreError) -> serde_json::Value {
    if let CoreError::Storage(inner) = &e {
        warn!(id = %req.id, method = %req.method, error = %inner, "storage failure");
    }
    core_error(&req.id, &e)
}

pub fn to_json<T: serde::Serialize>(req: &Request, value: &T) -> HandlerResult {
    serde_json::to_value(value)
        .map_err(|e| err(&req.id, "serialize_failed", e.to_string(), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    optional_str(req, key).ok_or_else(|| bad_params(req, format!("missing {}", key)))
}

/// Absent or `null` is `None`; anything other than a number is rejected.
pub fn optional_f64(req: &Request, key: &str) -> Result<Option<f64>, serde_json::Value> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| bad_params(req, format!("{} must be a number", key))),
    }
}

pub fn required_i64(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| bad_params(req, format!("missing {}", key)))
}

pub fn required_date(req: &Request, key: &str) -> Result<NaiveDate, serde_json::Value> {
    let raw = required_str(req, key)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|_| bad_params(req, format!("{} must be YYYY-MM-DD", key)))
}

pub fn required_year(req: &Request, key: &str) -> Result<AcademicYear, serde_json::Value> {
    let raw = required_str(req, key)?;
    AcademicYear::parse(&raw)
        .ok_or_else(|| bad_params(req, format!("{} must look like 2024/2025", key)))
}

/// Reads an optional enum-valued string with the given parser.
pub fn optional_enum<T>(
    req: &Request,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>, serde_json::Value> {
    match optional_str(req, key) {
        None => Ok(None),
        Some(raw) => parse(&raw)
            .map(Some)
            .ok_or_else(|| bad_params(req, format!("invalid {}: {}", key, raw))),
    }
}

pub fn optional_grade_code(req: &Request, key: &str) -> Result<Option<GradeCode>, serde_json::Value> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u8::try_from(v).ok())
            .and_then(Grade::new)
            .map(|g| Some(GradeCode::Grade(g)))
            .ok_or_else(|| bad_params(req, format!("invalid {}: {}", key, n))),
        Some(serde_json::Value::String(s)) => GradeCode::parse(s)
            .map(Some)
            .ok_or_else(|| bad_params(req, format!("invalid {}: {}", key, s))),
        Some(_) => Err(bad_params(req, format!("invalid {}", key))),
    }
}

/// Parses `params[key]` as an array of boundary entries.
///
/// Each entry is `{grade, sex, classNumber, fromValue, toValue}`; `sex`
/// accepts any token the roster accepts.
pub fn boundary_entries(req: &Request, key: &str) -> Result<Vec<BoundaryEntry>, serde_json::Value> {
    let Some(items) = req.params.get(key).and_then(|v| v.as_array()) else {
        return Err(bad_params(req, format!("missing {}", key)));
    };
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let bad = |what: &str| bad_params(req, format!("{}[{}]: {}", key, i, what));
        let grade = item
            .get("grade")
            .and_then(|v| v.as_u64())
            .and_then(|v| u8::try_from(v).ok())
            .and_then(Grade::new)
            .ok_or_else(|| bad("grade must be 2..5"))?;
        let sex = item
            .get("sex")
            .and_then(|v| v.as_str())
            .and_then(normalize_sex)
            .ok_or_else(|| bad("sex must be M or F"))?;
        let class_number = item
            .get("classNumber")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| bad("missing classNumber"))?;
        let from_value = item
            .get("fromValue")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| bad("missing fromValue"))?;
        let to_value = item
            .get("toValue")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| bad("missing toValue"))?;
        out.push(BoundaryEntry {
            grade,
            sex,
            class_number,
            from_value,
            to_value,
        });
    }
    Ok(out)
}
