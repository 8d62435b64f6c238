use rusqlite::Connection;
use std::path::Path;

pub const DEFAULT_ADMIN_USERNAME: &str = "admin";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("school.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            username TEXT PRIMARY KEY,
            password TEXT NOT NULL,
            roles TEXT NOT NULL,
            school TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            expires_on TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            teacher TEXT NOT NULL,
            name TEXT NOT NULL,
            username TEXT,
            password TEXT,
            class_name TEXT,
            registered_at TEXT
        )",
        [],
    )?;
    // Workspaces created before student logins existed lack the
    // credential columns. Add them in place.
    ensure_students_credentials(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_teacher ON students(teacher)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_username ON students(username)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS scores(
            id TEXT PRIMARY KEY,
            teacher TEXT NOT NULL,
            student_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            sequence_label TEXT NOT NULL,
            value INTEGER NOT NULL,
            recorded_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scores_student ON scores(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scores_teacher_subject ON scores(teacher, subject)",
        [],
    )?;

    seed_default_admin(&conn)?;

    Ok(conn)
}

/// The stock superadmin account, inserted once per workspace so a fresh
/// database is usable before any other account exists.
fn seed_default_admin(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO users(username, password, roles, school, status, expires_on)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            DEFAULT_ADMIN_USERNAME,
            "1234",
            "superadmin",
            "Sample School",
            "active",
            "2099/12/31",
        ),
    )?;
    Ok(())
}

fn ensure_students_credentials(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "students", "username")? {
        conn.execute("ALTER TABLE students ADD COLUMN username TEXT", [])?;
    }
    if !table_has_column(conn, "students", "password")? {
        conn.execute("ALTER TABLE students ADD COLUMN password TEXT", [])?;
    }
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
