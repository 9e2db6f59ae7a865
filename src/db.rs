use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("aulad.sqlite3");
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// In-memory database with the full schema applied; used by unit tests.
pub fn open_db_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_sections(
            id TEXT PRIMARY KEY,
            grade TEXT NOT NULL,
            section TEXT NOT NULL,
            level TEXT NOT NULL,
            UNIQUE(grade, section)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staff_members(
            id TEXT PRIMARY KEY,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            role TEXT NOT NULL,
            schedule_json TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    // Older workspaces predate the stored weekly schedule. Add if needed.
    ensure_staff_schedule_json(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignments(
            id TEXT PRIMARY KEY,
            staff_id TEXT NOT NULL,
            grade_section_id TEXT NOT NULL,
            area_id TEXT,
            role TEXT NOT NULL,
            weekly_hours REAL,
            FOREIGN KEY(staff_id) REFERENCES staff_members(id),
            FOREIGN KEY(grade_section_id) REFERENCES grade_sections(id)
        )",
        [],
    )?;
    // area_id NULL marks the main assignment; COALESCE folds NULLs into the
    // uniqueness so a staff member cannot hold two rows for one slot.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_assignments_slot
         ON assignments(staff_id, grade_section_id, COALESCE(area_id, ''))",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_staff ON assignments(staff_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_section ON assignments(grade_section_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            grade_section_id TEXT,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            active INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(grade_section_id) REFERENCES grade_sections(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_section ON students(grade_section_id)",
        [],
    )?;

    Ok(())
}

fn ensure_staff_schedule_json(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "staff_members", "schedule_json")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE staff_members ADD COLUMN schedule_json TEXT", [])?;
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
