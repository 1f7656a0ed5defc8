use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

use crate::curriculum;

pub const DB_FILE_NAME: &str = "hafaland.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    // Another process holding the write lock should delay us, not fail the request.
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    create_schema(&conn)?;

    let units: i64 = conn.query_row("SELECT COUNT(*) FROM curriculum_units", [], |r| r.get(0))?;
    if units == 0 {
        let seeded = curriculum::seed_quran(&conn)?;
        tracing::info!(units = seeded, "seeded default curriculum");
    }

    Ok(conn)
}

pub fn create_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS curriculum_units(
            id INTEGER PRIMARY KEY,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            position_count INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            student_no TEXT,
            class_name TEXT,
            guardian_name TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // from_ayah/to_ayah are always equal; entries cover a single ayah.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS hafalan_records(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id TEXT NOT NULL,
            teacher_id TEXT,
            unit_id INTEGER NOT NULL,
            from_ayah INTEGER NOT NULL,
            to_ayah INTEGER NOT NULL,
            record_date TEXT NOT NULL,
            status TEXT NOT NULL,
            notes TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(unit_id) REFERENCES curriculum_units(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_hafalan_student_recent
         ON hafalan_records(student_id, record_date, id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_hafalan_student_slot
         ON hafalan_records(student_id, unit_id, from_ayah)",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_hafalan_completed_slot
         ON hafalan_records(student_id, unit_id, from_ayah)
         WHERE status = 'selesai'",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS workspace_settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM workspace_settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO workspace_settings(key, value_json)
         VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_slot_is_unique_per_student() {
        let conn = Connection::open_in_memory().expect("open");
        create_schema(&conn).expect("schema");
        curriculum::seed_quran(&conn).expect("seed");
        conn.execute(
            "INSERT INTO students(id, full_name, created_at) VALUES('s1', 'Ahmad', '2026-01-01')",
            [],
        )
        .expect("student");
        let insert = |status: &str| {
            conn.execute(
                "INSERT INTO hafalan_records(student_id, unit_id, from_ayah, to_ayah, record_date, status, created_at)
                 VALUES('s1', 1, 1, 1, '2026-03-01', ?, '2026-03-01T08:00:00')",
                [status],
            )
        };
        insert("murojaah").expect("first review");
        insert("murojaah").expect("second review");
        insert("selesai").expect("completion");
        assert!(insert("selesai").is_err());
    }

    #[test]
    fn reopening_a_workspace_keeps_data_and_does_not_reseed() {
        let dir = std::env::temp_dir().join(format!("hafaland-db-reopen-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        {
            let conn = open_db(&dir).expect("first open");
            conn.execute(
                "INSERT INTO students(id, full_name, class_name, created_at)
                 VALUES('s1', 'Ahmad', '7A', '2026-01-01')",
                [],
            )
            .expect("student");
        }
        let conn = open_db(&dir).expect("reopen");
        let class: Option<String> = conn
            .query_row("SELECT class_name FROM students WHERE id = 's1'", [], |r| r.get(0))
            .expect("class");
        assert_eq!(class.as_deref(), Some("7A"));
        let units: i64 = conn
            .query_row("SELECT COUNT(*) FROM curriculum_units", [], |r| r.get(0))
            .expect("count");
        assert_eq!(units, 114);
        drop(conn);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn settings_roundtrip_and_overwrite() {
        let conn = Connection::open_in_memory().expect("open");
        create_schema(&conn).expect("schema");
        assert!(settings_get_json(&conn, "setup.hafalan").expect("get").is_none());
        settings_set_json(&conn, "setup.hafalan", &serde_json::json!({ "a": 1 })).expect("set");
        settings_set_json(&conn, "setup.hafalan", &serde_json::json!({ "a": 2 })).expect("set");
        let v = settings_get_json(&conn, "setup.hafalan").expect("get").expect("some");
        assert_eq!(v["a"], 2);
    }
}
