use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("checkmathe.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            password_salt TEXT NOT NULL,
            password_digest TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            phone_number TEXT,
            rate_per_45 REAL,
            role TEXT NOT NULL,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS auth_tokens(
            token TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            created_at TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_auth_tokens_user ON auth_tokens(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tutorings(
            id TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            duration_min INTEGER NOT NULL,
            subject_id TEXT,
            teacher_id TEXT,
            student_id TEXT NOT NULL,
            content TEXT NOT NULL,
            paid INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            FOREIGN KEY(subject_id) REFERENCES subjects(id) ON DELETE SET NULL,
            FOREIGN KEY(teacher_id) REFERENCES users(id) ON DELETE SET NULL,
            FOREIGN KEY(student_id) REFERENCES users(id) ON DELETE CASCADE,
            UNIQUE(date, teacher_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tutorings_teacher ON tutorings(teacher_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tutorings_student ON tutorings(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tutorings_date ON tutorings(date)",
        [],
    )?;

    // Workspaces created before payment tracking have no paid column.
    ensure_tutorings_paid(&conn)?;
    // Per-student rates used to live in a side table; now a users column.
    ensure_users_rate(&conn)?;

    Ok(conn)
}

fn ensure_tutorings_paid(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "tutorings", "paid")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE tutorings ADD COLUMN paid INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn ensure_users_rate(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "users", "rate_per_45")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE users ADD COLUMN rate_per_45 REAL", [])?;
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
