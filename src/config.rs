use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;

use crate::db;

pub const WORKSPACE_ENV: &str = "NORMBOOKD_WORKSPACE";
pub const LOG_ENV: &str = "NORMBOOKD_LOG";
const DEFAULT_LOG_FILTER: &str = "info";

/// Process-level settings, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Workspace opened before the first request, if set.
    pub workspace: Option<PathBuf>,
    pub log_filter: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        // A missing .env is the normal case.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let workspace = lookup(WORKSPACE_ENV)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        let log_filter = lookup(LOG_ENV)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        Self {
            workspace,
            log_filter,
        }
    }
}

const CALENDAR_KEY: &str = "calendar";
const DEFAULT_SCHOOL_YEAR_START_MONTH: u32 = 9;

/// Per-workspace calendar settings stored in the `settings` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarSettings {
    pub school_year_start_month: u32,
}

impl Default for CalendarSettings {
    fn default() -> Self {
        Self {
            school_year_start_month: DEFAULT_SCHOOL_YEAR_START_MONTH,
        }
    }
}

impl CalendarSettings {
    /// Malformed saved values fall back to defaults.
    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        let Some(saved) = db::settings_get_json(conn, CALENDAR_KEY)? else {
            return Ok(Self::default());
        };
        let month = saved
            .get("schoolYearStartMonth")
            .and_then(|v| v.as_u64())
            .filter(|m| (1..=12).contains(m))
            .map(|m| m as u32)
            .unwrap_or(DEFAULT_SCHOOL_YEAR_START_MONTH);
        Ok(Self {
            school_year_start_month: month,
        })
    }

    pub fn save(&self, conn: &Connection) -> anyhow::Result<()> {
        db::settings_set_json(
            conn,
            CALENDAR_KEY,
            &json!({ "schoolYearStartMonth": self.school_year_start_month }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_defaults_and_overrides() {
        let empty: HashMap<&str, &str> = HashMap::new();
        let cfg = AppConfig::from_lookup(|k| empty.get(k).map(|v| v.to_string()));
        assert!(cfg.workspace.is_none());
        assert_eq!(cfg.log_filter, "info");

        let set: HashMap<&str, &str> =
            HashMap::from([(WORKSPACE_ENV, "/tmp/norms"), (LOG_ENV, "normbookd=debug")]);
        let cfg = AppConfig::from_lookup(|k| set.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/norms")));
        assert_eq!(cfg.log_filter, "normbookd=debug");
    }

    #[test]
    fn calendar_settings_fall_back_on_bad_values() {
        let conn = db::open_in_memory().unwrap();
        assert_eq!(CalendarSettings::load(&conn).unwrap(), CalendarSettings::default());

        db::settings_set_json(&conn, CALENDAR_KEY, &json!({ "schoolYearStartMonth": 13 })).unwrap();
        assert_eq!(CalendarSettings::load(&conn).unwrap().school_year_start_month, 9);

        CalendarSettings {
            school_year_start_month: 8,
        }
        .save(&conn)
        .unwrap();
        assert_eq!(CalendarSettings::load(&conn).unwrap().school_year_start_month, 8);
    }
}
