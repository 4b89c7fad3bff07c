use crate::billing;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_err, get_required_i64, get_required_str, require_teacher, require_user,
    subject_get_or_create, tutoring_by_id, tutoring_to_json, tutorings_to_json, user_by_username,
    HandlerErr, TutoringRow, TUTORING_COLS,
};
use crate::ipc::types::{AppState, Request};
use chrono::{Local, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const DURATION_MIN: i64 = 1;
const DURATION_MAX: i64 = 360;

/// Sessions are logged after the fact; future dates are rejected.
fn parse_session_date(raw: &str) -> Result<NaiveDate, HandlerErr> {
    let Some(date) = billing::parse_iso_date(raw) else {
        return Err(HandlerErr::new("bad_params", "date must be YYYY-MM-DD"));
    };
    if date > Local::now().date_naive() {
        return Err(HandlerErr::new(
            "bad_params",
            "date must not be in the future",
        ));
    }
    Ok(date)
}

fn check_duration(minutes: i64) -> Result<i64, HandlerErr> {
    if !(DURATION_MIN..=DURATION_MAX).contains(&minutes) {
        return Err(HandlerErr::new(
            "bad_params",
            format!(
                "durationMin must be between {} and {}",
                DURATION_MIN, DURATION_MAX
            ),
        ));
    }
    Ok(minutes)
}

fn duplicate_exists(
    conn: &Connection,
    date: &str,
    teacher_id: &str,
    student_id: &str,
    ignore_id: Option<&str>,
) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM tutorings
         WHERE date = ? AND teacher_id = ? AND student_id = ? AND id <> COALESCE(?, '')",
        (date, teacher_id, student_id, ignore_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

fn tutorings_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let _requester = require_teacher(conn, params)?;

    let date_raw = get_required_str(params, "date")?;
    let date = parse_session_date(&date_raw)?;
    let duration = check_duration(get_required_i64(params, "durationMin")?)?;
    let subject_title = get_required_str(params, "subjectTitle")?;
    let teacher_username = get_required_str(params, "teacherUsername")?;
    let student_username = get_required_str(params, "studentUsername")?;
    let content = get_required_str(params, "content")?;

    let teacher = user_by_username(conn, &teacher_username)?.ok_or_else(|| {
        HandlerErr::new(
            "not_found",
            format!("user {} does not exist", teacher_username),
        )
    })?;
    if !teacher.is_teacher() {
        return Err(HandlerErr::new(
            "forbidden",
            format!("user {} does not hold the teacher role", teacher_username),
        ));
    }
    let student = user_by_username(conn, &student_username)?.ok_or_else(|| {
        HandlerErr::new(
            "not_found",
            format!("user {} does not exist", student_username),
        )
    })?;

    let date_iso = date.format("%Y-%m-%d").to_string();
    if duplicate_exists(conn, &date_iso, &teacher.id, &student.id, None)? {
        return Err(HandlerErr::new(
            "conflict",
            format!(
                "a tutoring on {} between {} and {} already exists",
                date_iso, teacher_username, student_username
            ),
        ));
    }

    let subject_id = subject_get_or_create(conn, &subject_title)?;
    let tut_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO tutorings(
           id,
           date,
           duration_min,
           subject_id,
           teacher_id,
           student_id,
           content,
           paid,
           created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, 0, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &tut_id,
            &date_iso,
            duration,
            &subject_id,
            &teacher.id,
            &student.id,
            &content,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "tutorings" })),
    })?;

    tracing::info!(
        teacher = %teacher_username,
        student = %student_username,
        date = %date_iso,
        "tutoring created"
    );
    let row = tutoring_by_id(conn, &tut_id)?
        .ok_or_else(|| HandlerErr::new("db_query_failed", "tutoring row missing after insert"))?;
    tutoring_to_json(conn, &row)
}

fn tutorings_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let requester = require_user(conn, params)?;
    let tut_id = get_required_str(params, "tutId")?;
    let row = tutoring_by_id(conn, &tut_id)?.ok_or_else(|| {
        HandlerErr::new("not_found", format!("tutoring with id {} not found", tut_id))
    })?;
    if !row.is_participant(&requester) {
        return Err(HandlerErr::new(
            "forbidden",
            "only participants may view this tutoring",
        ));
    }
    tutoring_to_json(conn, &row)
}

fn tutorings_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let requester = require_user(conn, params)?;
    let tut_id = get_required_str(params, "tutId")?;
    let row = tutoring_by_id(conn, &tut_id)?.ok_or_else(|| {
        HandlerErr::new("not_found", format!("tutoring with id {} not found", tut_id))
    })?;
    if !row.is_taught_by(&requester) {
        return Err(HandlerErr::new(
            "forbidden",
            "only the teacher of this tutoring may update or delete it",
        ));
    }

    let Some(patch) = params.get("newValues").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::new("bad_params", "missing newValues"));
    };
    if patch.is_empty() {
        return Err(HandlerErr::new("bad_params", "newValues is empty"));
    }
    for key in patch.keys() {
        if !matches!(
            key.as_str(),
            "date" | "durationMin" | "content" | "subjectTitle" | "paid"
        ) {
            return Err(HandlerErr::new(
                "bad_params",
                format!("unknown field {}", key),
            ));
        }
    }

    let mut new_date: Option<String> = None;
    let mut new_duration: Option<i64> = None;
    let mut new_content: Option<String> = None;
    let mut new_subject_id: Option<String> = None;
    let mut new_paid: Option<bool> = None;
    for (key, value) in patch {
        match key.as_str() {
            "date" => {
                let raw = value
                    .as_str()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| HandlerErr::new("bad_params", "date must be a string"))?;
                new_date = Some(parse_session_date(raw)?.format("%Y-%m-%d").to_string());
            }
            "durationMin" => {
                let minutes = value.as_i64().ok_or_else(|| {
                    HandlerErr::new("bad_params", "durationMin must be an integer")
                })?;
                new_duration = Some(check_duration(minutes)?);
            }
            "content" => {
                let text = value
                    .as_str()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        HandlerErr::new("bad_params", "content must be a non-empty string")
                    })?;
                new_content = Some(text.to_string());
            }
            "subjectTitle" => {
                let title = value
                    .as_str()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        HandlerErr::new("bad_params", "subjectTitle must be a non-empty string")
                    })?;
                new_subject_id = Some(subject_get_or_create(conn, title)?);
            }
            "paid" => {
                let flag = value
                    .as_bool()
                    .ok_or_else(|| HandlerErr::new("bad_params", "paid must be a boolean"))?;
                new_paid = Some(flag);
            }
            _ => unreachable!("whitelist checked above"),
        }
    }

    if let Some(date) = &new_date {
        if *date != row.date {
            let teacher_id = row.teacher_id.as_deref().unwrap_or("");
            if duplicate_exists(conn, date, teacher_id, &row.student_id, Some(&row.id))? {
                return Err(HandlerErr::new(
                    "conflict",
                    format!("a tutoring on {} with this student already exists", date),
                ));
            }
        }
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    let update_err = |e: rusqlite::Error| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "tutorings" })),
    };
    if let Some(v) = &new_date {
        tx.execute("UPDATE tutorings SET date = ? WHERE id = ?", (v, &row.id))
            .map_err(update_err)?;
    }
    if let Some(v) = new_duration {
        tx.execute(
            "UPDATE tutorings SET duration_min = ? WHERE id = ?",
            (v, &row.id),
        )
        .map_err(update_err)?;
    }
    if let Some(v) = &new_content {
        tx.execute("UPDATE tutorings SET content = ? WHERE id = ?", (v, &row.id))
            .map_err(update_err)?;
    }
    if let Some(v) = &new_subject_id {
        tx.execute(
            "UPDATE tutorings SET subject_id = ? WHERE id = ?",
            (v, &row.id),
        )
        .map_err(update_err)?;
    }
    if let Some(v) = new_paid {
        tx.execute(
            "UPDATE tutorings SET paid = ? WHERE id = ?",
            (v as i64, &row.id),
        )
        .map_err(update_err)?;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    let updated = tutoring_by_id(conn, &row.id)?
        .ok_or_else(|| HandlerErr::new("db_query_failed", "tutoring row missing after update"))?;
    let changed: Vec<String> = patch.keys().cloned().collect();
    Ok(json!({
        "changed": changed,
        "tutoring": tutoring_to_json(conn, &updated)?,
    }))
}

fn tutorings_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let requester = require_user(conn, params)?;
    let tut_id = get_required_str(params, "tutId")?;
    let row = tutoring_by_id(conn, &tut_id)?.ok_or_else(|| {
        HandlerErr::new("not_found", format!("tutoring with id {} not found", tut_id))
    })?;
    if !row.is_taught_by(&requester) {
        return Err(HandlerErr::new(
            "forbidden",
            "only the teacher of this tutoring may update or delete it",
        ));
    }
    conn.execute("DELETE FROM tutorings WHERE id = ?", [&row.id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "tutorings" })),
        })?;
    Ok(json!({ "deleted": row.id }))
}

fn tutorings_list_for_user(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let _requester = require_user(conn, params)?;
    let username = get_required_str(params, "username")?;
    let target = user_by_username(conn, &username)?
        .ok_or_else(|| HandlerErr::new("not_found", format!("user {} does not exist", username)))?;

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM tutorings t
             LEFT JOIN subjects s ON s.id = t.subject_id
             WHERE t.teacher_id = ? OR t.student_id = ?
             ORDER BY t.date DESC",
            TUTORING_COLS
        ))
        .map_err(db_err)?;
    let rows: Vec<TutoringRow> = stmt
        .query_map((&target.id, &target.id), TutoringRow::from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(json!(tutorings_to_json(conn, &rows)?))
}

fn handle_tutorings_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match tutorings_create(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_tutorings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match tutorings_get(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_tutorings_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match tutorings_update(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_tutorings_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match tutorings_delete(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_tutorings_list_for_user(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match tutorings_list_for_user(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tutorings.create" => Some(handle_tutorings_create(state, req)),
        "tutorings.get" => Some(handle_tutorings_get(state, req)),
        "tutorings.update" => Some(handle_tutorings_update(state, req)),
        "tutorings.delete" => Some(handle_tutorings_delete(state, req)),
        "tutorings.listForUser" => Some(handle_tutorings_list_for_user(state, req)),
        _ => None,
    }
}
