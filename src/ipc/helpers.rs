use crate::auth;
use crate::ipc::error::err;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

pub const ROLE_TEACHER: &str = "teacher";
pub const ROLE_STUDENT: &str = "student";

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn db_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr::new("db_query_failed", e.to_string())
}

/// Required string param: present, a string, non-empty after trimming.
pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

/// Optional string param: absent or null read as None; any other
/// non-string value is rejected.
pub fn get_optional_str(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must be a string", key)))
            .map(Some),
    }
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub rate_per_45: Option<f64>,
    pub role: String,
}

pub const USER_COLS: &str =
    "id, username, email, first_name, last_name, phone_number, rate_per_45, role";

impl UserRow {
    pub fn from_row(r: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            username: r.get(1)?,
            email: r.get(2)?,
            first_name: r.get(3)?,
            last_name: r.get(4)?,
            phone_number: r.get(5)?,
            rate_per_45: r.get(6)?,
            role: r.get(7)?,
        })
    }

    pub fn is_teacher(&self) -> bool {
        self.role == ROLE_TEACHER
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "username": self.username,
            "email": self.email,
            "firstName": self.first_name,
            "lastName": self.last_name,
            "phoneNumber": self.phone_number,
            "ratePer45": self.rate_per_45,
            "role": self.role,
        })
    }
}

pub fn user_by_id(conn: &Connection, user_id: &str) -> Result<Option<UserRow>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?", USER_COLS),
        [user_id],
        UserRow::from_row,
    )
    .optional()
    .map_err(db_err)
}

pub fn user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE username = ?", USER_COLS),
        [username],
        UserRow::from_row,
    )
    .optional()
    .map_err(db_err)
}

/// Resolves params.token to its user. Missing or unknown tokens are an
/// auth failure, not a bad-params failure.
pub fn require_user(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<UserRow, HandlerErr> {
    let token = params
        .get("token")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|t| !t.is_empty());
    let Some(token) = token else {
        return Err(HandlerErr::new("auth_required", "missing token"));
    };
    let user_id = auth::user_id_for_token(conn, token).map_err(db_err)?;
    let Some(user_id) = user_id else {
        return Err(HandlerErr::new("auth_required", "invalid token"));
    };
    user_by_id(conn, &user_id)?
        .ok_or_else(|| HandlerErr::new("auth_required", "invalid token"))
}

pub fn require_teacher(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<UserRow, HandlerErr> {
    let user = require_user(conn, params)?;
    if !user.is_teacher() {
        return Err(HandlerErr::new(
            "forbidden",
            "this action requires the teacher role",
        ));
    }
    Ok(user)
}

pub fn subject_get_or_create(conn: &Connection, title: &str) -> Result<String, HandlerErr> {
    let existing: Option<String> = conn
        .query_row("SELECT id FROM subjects WHERE title = ?", [title], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if let Some(id) = existing {
        return Ok(id);
    }
    let id = Uuid::new_v4().to_string();
    conn.execute("INSERT INTO subjects(id, title) VALUES(?, ?)", (&id, title))
        .map_err(|e| HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "subjects" })),
        })?;
    Ok(id)
}

#[derive(Debug, Clone)]
pub struct TutoringRow {
    pub id: String,
    pub date: String,
    pub duration_min: i64,
    pub subject_title: Option<String>,
    pub teacher_id: Option<String>,
    pub student_id: String,
    pub content: String,
    pub paid: bool,
}

/// Column list matching `TutoringRow::from_row`; use with
/// `FROM tutorings t LEFT JOIN subjects s ON s.id = t.subject_id`.
pub const TUTORING_COLS: &str =
    "t.id, t.date, t.duration_min, s.title, t.teacher_id, t.student_id, t.content, t.paid";

impl TutoringRow {
    pub fn from_row(r: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            date: r.get(1)?,
            duration_min: r.get(2)?,
            subject_title: r.get(3)?,
            teacher_id: r.get(4)?,
            student_id: r.get(5)?,
            content: r.get(6)?,
            paid: r.get::<_, i64>(7)? != 0,
        })
    }

    pub fn is_participant(&self, user: &UserRow) -> bool {
        self.student_id == user.id || self.teacher_id.as_deref() == Some(user.id.as_str())
    }

    pub fn is_taught_by(&self, user: &UserRow) -> bool {
        self.teacher_id.as_deref() == Some(user.id.as_str())
    }
}

pub fn tutoring_by_id(conn: &Connection, tut_id: &str) -> Result<Option<TutoringRow>, HandlerErr> {
    conn.query_row(
        &format!(
            "SELECT {} FROM tutorings t LEFT JOIN subjects s ON s.id = t.subject_id WHERE t.id = ?",
            TUTORING_COLS
        ),
        [tut_id],
        TutoringRow::from_row,
    )
    .optional()
    .map_err(db_err)
}

/// Full serialization with nested participants. The teacher slot is null
/// after the teaching account was deleted.
pub fn tutoring_to_json(
    conn: &Connection,
    row: &TutoringRow,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher = match row.teacher_id.as_deref() {
        Some(id) => user_by_id(conn, id)?.map(|u| u.to_json()),
        None => None,
    };
    let student = user_by_id(conn, &row.student_id)?.map(|u| u.to_json());
    Ok(json!({
        "id": row.id,
        "date": row.date,
        "durationMin": row.duration_min,
        "subjectTitle": row.subject_title,
        "content": row.content,
        "paid": row.paid,
        "teacher": teacher,
        "student": student,
    }))
}

pub fn tutorings_to_json(
    conn: &Connection,
    rows: &[TutoringRow],
) -> Result<Vec<serde_json::Value>, HandlerErr> {
    rows.iter().map(|r| tutoring_to_json(conn, r)).collect()
}
