use crate::billing;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_err, get_required_i64, get_required_str, require_teacher, tutorings_to_json,
    user_by_username, HandlerErr, TutoringRow, TUTORING_COLS,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn month_range(year: i64, month: i64) -> Result<(String, String), HandlerErr> {
    billing::month_bounds(year, month)
        .ok_or_else(|| HandlerErr::new("bad_params", "year/month out of range"))
}

/// The requester's own sessions with one student in one month,
/// chronological.
fn month_rows_for_teacher(
    conn: &Connection,
    teacher_id: &str,
    student_username: &str,
    start: &str,
    end: &str,
) -> Result<Vec<TutoringRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM tutorings t
             LEFT JOIN subjects s ON s.id = t.subject_id
             WHERE t.teacher_id = ?
               AND t.student_id IN (SELECT id FROM users WHERE username = ?)
               AND t.date >= ? AND t.date < ?
             ORDER BY t.date",
            TUTORING_COLS
        ))
        .map_err(db_err)?;
    stmt.query_map(
        (teacher_id, student_username, start, end),
        TutoringRow::from_row,
    )
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

fn payments_month_status(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let requester = require_teacher(conn, params)?;
    let student_username = get_required_str(params, "studentUsername")?;
    let year = get_required_i64(params, "year")?;
    let month = get_required_i64(params, "month")?;
    let (start, end) = month_range(year, month)?;

    // An unknown student simply matches nothing; a month without
    // sessions has nothing left to pay.
    let rows = month_rows_for_teacher(conn, &requester.id, &student_username, &start, &end)?;
    let (paid, unpaid): (Vec<_>, Vec<_>) = rows.into_iter().partition(|t| t.paid);

    Ok(json!({
        "allPaid": unpaid.is_empty(),
        "paidTuts": tutorings_to_json(conn, &paid)?,
        "unpaidTuts": tutorings_to_json(conn, &unpaid)?,
    }))
}

fn payments_set_month_paid(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let requester = require_teacher(conn, params)?;

    let paid = match params.get("paid") {
        Some(v) if v.is_boolean() => v.as_bool().unwrap_or(false),
        _ => return Err(HandlerErr::new("bad_params", "paid must be a boolean")),
    };
    let student_username = get_required_str(params, "studentUsername")?;
    let year = get_required_i64(params, "year")?;
    let month = get_required_i64(params, "month")?;
    let (start, end) = month_range(year, month)?;

    let student = user_by_username(conn, &student_username)?.ok_or_else(|| {
        HandlerErr::new(
            "not_found",
            format!("user {} does not exist", student_username),
        )
    })?;

    let updated = conn
        .execute(
            "UPDATE tutorings SET paid = ?
             WHERE teacher_id = ? AND student_id = ? AND date >= ? AND date < ?",
            (paid as i64, &requester.id, &student.id, &start, &end),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "tutorings" })),
        })?;

    tracing::info!(
        teacher = %requester.username,
        student = %student_username,
        year,
        month,
        paid,
        updated,
        "month paid status set"
    );
    let rows = month_rows_for_teacher(conn, &requester.id, &student_username, &start, &end)?;
    Ok(json!({
        "updated": updated,
        "tutorings": tutorings_to_json(conn, &rows)?,
    }))
}

fn handle_payments_month_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match payments_month_status(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_payments_set_month_paid(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match payments_set_month_paid(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "payments.monthStatus" => Some(handle_payments_month_status(state, req)),
        "payments.setMonthPaid" => Some(handle_payments_set_month_paid(state, req)),
        _ => None,
    }
}
