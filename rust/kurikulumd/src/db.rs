use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "kurikulum.sqlite3";

/// Bumped whenever a table or column is added. Opening an older workspace
/// creates what is missing and records the new version.
pub const SCHEMA_VERSION: i64 = 2;

pub const ACTIVE_PLAN_KEY: &str = "activePlanId";
pub const ACTIVE_CLASS_KEY: &str = "activeClassId";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    ensure_schema(&conn)?;
    Ok(conn)
}

pub fn ensure_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_profiles(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            grade TEXT,
            academic_year TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS learning_plans(
            id TEXT PRIMARY KEY,
            class_id TEXT,
            name TEXT NOT NULL,
            subject TEXT NOT NULL DEFAULT '',
            grade TEXT NOT NULL DEFAULT '',
            curriculum_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_learning_plans_class ON learning_plans(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            nis TEXT,
            sort_order INTEGER NOT NULL DEFAULT 0,
            assessments_json TEXT NOT NULL DEFAULT '[]',
            summatives_json TEXT NOT NULL DEFAULT '[]',
            dpl_json TEXT NOT NULL DEFAULT '[]'
        )",
        [],
    )?;
    ensure_students_hafalan(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_sort ON students(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            note TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_class_date ON attendance_records(class_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS holidays(
            date TEXT PRIMARY KEY,
            description TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS app_state(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS api_keys(
            user_id TEXT PRIMARY KEY,
            key TEXT NOT NULL
        )",
        [],
    )?;

    let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    if version < SCHEMA_VERSION {
        conn.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
    }
    Ok(())
}

pub fn schema_version(conn: &Connection) -> anyhow::Result<i64> {
    Ok(conn.query_row("PRAGMA user_version", [], |r| r.get(0))?)
}

// Version 1 workspaces predate memorization tracking.
fn ensure_students_hafalan(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "hafalan_json")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE students ADD COLUMN hafalan_json TEXT NOT NULL DEFAULT '[]'",
        [],
    )?;
    Ok(())
}

/// Tables wiped by a full import, in dependency-free order.
pub const ALL_STORES: [&str; 7] = [
    "learning_plans",
    "students",
    "class_profiles",
    "attendance_records",
    "holidays",
    "app_state",
    "api_keys",
];

/// Empties one store. Only names from [`ALL_STORES`] are accepted since the
/// name is spliced into the statement.
pub fn clear_store(conn: &Connection, store: &str) -> rusqlite::Result<usize> {
    if !ALL_STORES.contains(&store) {
        return Err(rusqlite::Error::InvalidParameterName(store.to_string()));
    }
    conn.execute(&format!("DELETE FROM {}", store), [])
}

pub fn clear_all(conn: &Connection) -> rusqlite::Result<()> {
    for store in ALL_STORES {
        clear_store(conn, store)?;
    }
    Ok(())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM app_state WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO app_state(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn settings_delete(conn: &Connection, key: &str) -> anyhow::Result<()> {
    conn.execute("DELETE FROM app_state WHERE key = ?", [key])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn stores_clear_one_at_a_time() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO holidays(date, description) VALUES('2024-08-17', 'Kemerdekaan')",
            [],
        )
        .unwrap();
        settings_set_json(&conn, ACTIVE_PLAN_KEY, &serde_json::json!("plan-1")).unwrap();

        assert_eq!(clear_store(&conn, "holidays").unwrap(), 1);
        assert_eq!(count(&conn, "holidays"), 0);
        assert_eq!(count(&conn, "app_state"), 1);
        assert!(clear_store(&conn, "sqlite_master").is_err());

        clear_all(&conn).unwrap();
        assert_eq!(count(&conn, "app_state"), 0);
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }
}
