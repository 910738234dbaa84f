use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "normbook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.to_string_lossy()))?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    create_schema(&conn)?;
    Ok(conn)
}

/// In-memory database with the full schema, for tests and previews.
pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    create_schema(&conn)?;
    Ok(conn)
}

fn create_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS templates(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            unit TEXT NOT NULL,
            class_from INTEGER NOT NULL,
            class_to INTEGER NOT NULL,
            direction TEXT NOT NULL,
            sex_scope TEXT,
            owner_trainer_id TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_templates_owner ON templates(owner_trainer_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS template_boundaries(
            id TEXT PRIMARY KEY,
            template_id TEXT NOT NULL,
            grade INTEGER NOT NULL,
            sex TEXT NOT NULL,
            class_number INTEGER NOT NULL,
            from_value REAL NOT NULL,
            to_value REAL NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(template_id) REFERENCES templates(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_template_boundaries_template ON template_boundaries(template_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS school_groups(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            academic_year INTEGER NOT NULL,
            class_label TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            full_name TEXT NOT NULL,
            sex TEXT,
            active INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(group_id) REFERENCES school_groups(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_group_sort ON students(group_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS measurement_instances(
            id TEXT PRIMARY KEY,
            template_id TEXT NOT NULL,
            group_id TEXT NOT NULL,
            test_date TEXT NOT NULL,
            period TEXT NOT NULL,
            academic_year INTEGER NOT NULL,
            name_override TEXT,
            unit_override TEXT,
            sex_scope_override TEXT,
            use_custom_boundaries INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(template_id) REFERENCES templates(id),
            FOREIGN KEY(group_id) REFERENCES school_groups(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_instances_group_year ON measurement_instances(group_id, academic_year)",
        [],
    )?;
    // One start and one end control test per group/template/year. Regular
    // instances are unlimited.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_instances_control_period
         ON measurement_instances(group_id, template_id, period, academic_year)
         WHERE period <> 'REGULAR'",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS instance_boundaries(
            id TEXT PRIMARY KEY,
            instance_id TEXT NOT NULL,
            grade INTEGER NOT NULL,
            sex TEXT NOT NULL,
            class_number INTEGER NOT NULL,
            from_value REAL NOT NULL,
            to_value REAL NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(instance_id) REFERENCES measurement_instances(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_instance_boundaries_instance ON instance_boundaries(instance_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS results(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            instance_id TEXT,
            template_id TEXT NOT NULL,
            test_date TEXT,
            value REAL,
            grade_code TEXT NOT NULL,
            grade_source TEXT NOT NULL,
            unresolved_reason TEXT,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(instance_id) REFERENCES measurement_instances(id),
            FOREIGN KEY(template_id) REFERENCES templates(id),
            UNIQUE(student_id, instance_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_instance ON results(instance_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_student ON results(student_id)",
        [],
    )?;

    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(
            serde_json::from_str(&text)
                .with_context(|| format!("settings value for {} is not valid json", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_is_idempotent() {
        let conn = open_in_memory().expect("open");
        create_schema(&conn).expect("second create");
    }

    #[test]
    fn settings_round_trip() {
        let conn = open_in_memory().expect("open");
        assert!(settings_get_json(&conn, "calendar").unwrap().is_none());
        settings_set_json(&conn, "calendar", &json!({ "schoolYearStartMonth": 8 })).unwrap();
        settings_set_json(&conn, "calendar", &json!({ "schoolYearStartMonth": 9 })).unwrap();
        let v = settings_get_json(&conn, "calendar").unwrap().unwrap();
        assert_eq!(v["schoolYearStartMonth"], 9);
    }
}
