use crate::billing;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_err, get_optional_str, get_required_i64, get_required_str, require_user,
    tutorings_to_json, user_by_username, HandlerErr, TutoringRow, TUTORING_COLS,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, Connection};
use serde_json::json;

fn billing_monthly_sum(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let requester = require_user(conn, params)?;
    let student_username = get_required_str(params, "studentUsername")?;

    // Teachers may bill any student; a student only sees their own.
    if !requester.is_teacher() && requester.username != student_username {
        return Err(HandlerErr::new(
            "forbidden",
            "students may only view their own billing",
        ));
    }

    let student = user_by_username(conn, &student_username)?.ok_or_else(|| {
        HandlerErr::new(
            "not_found",
            format!("user {} does not exist", student_username),
        )
    })?;
    let Some(rate) = student.rate_per_45 else {
        return Err(HandlerErr::new(
            "no_rate",
            format!("user {} has no configured ratePer45", student_username),
        ));
    };

    let year = get_required_i64(params, "year")?;
    let month = get_required_i64(params, "month")?;
    let (start, end) = billing::month_bounds(year, month)
        .ok_or_else(|| HandlerErr::new("bad_params", "year/month out of range"))?;

    // Every session the student took that month, regardless of teacher.
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM tutorings t
             LEFT JOIN subjects s ON s.id = t.subject_id
             WHERE t.student_id = ? AND t.date >= ? AND t.date < ?
             ORDER BY t.date",
            TUTORING_COLS
        ))
        .map_err(db_err)?;
    let rows: Vec<TutoringRow> = stmt
        .query_map((&student.id, &start, &end), TutoringRow::from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let sum = billing::round_to_cents(
        rows.iter()
            .map(|t| billing::session_cost(rate, t.duration_min))
            .sum(),
    );

    Ok(json!({
        "sum": sum,
        "countTutorings": rows.len(),
        "tutorings": tutorings_to_json(conn, &rows)?,
    }))
}

fn billing_history(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let requester = require_user(conn, params)?;

    // Teachers browse what they taught, optionally narrowed to one
    // student; students always browse what they took.
    let filter_student = if requester.is_teacher() {
        match get_optional_str(params, "studentUsername")? {
            Some(username) => Some(user_by_username(conn, &username)?.ok_or_else(|| {
                HandlerErr::new("not_found", format!("user {} does not exist", username))
            })?),
            None => None,
        }
    } else {
        None
    };

    let mut sql = format!(
        "SELECT {}, su.rate_per_45 FROM tutorings t
         LEFT JOIN subjects s ON s.id = t.subject_id
         JOIN users su ON su.id = t.student_id
         WHERE ",
        TUTORING_COLS
    );
    let mut binds: Vec<String> = Vec::new();
    if requester.is_teacher() {
        sql.push_str("t.teacher_id = ?");
        binds.push(requester.id.clone());
        if let Some(student) = &filter_student {
            sql.push_str(" AND t.student_id = ?");
            binds.push(student.id.clone());
        }
    } else {
        sql.push_str("t.student_id = ?");
        binds.push(requester.id.clone());
    }
    sql.push_str(" ORDER BY t.date DESC");

    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let rows: Vec<(TutoringRow, Option<f64>)> = stmt
        .query_map(params_from_iter(binds.iter()), |r| {
            Ok((TutoringRow::from_row(r)?, r.get::<_, Option<f64>>(8)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let buckets = billing::group_by_month(rows, |(t, _)| billing::parse_iso_date(&t.date));
    let mut months = Vec::with_capacity(buckets.len());
    for bucket in buckets {
        let mut sum = 0.0;
        let mut tut_rows: Vec<TutoringRow> = Vec::with_capacity(bucket.items.len());
        for (tut, rate) in bucket.items {
            // Sessions of students without a rate are listed but cannot
            // be priced; they stay out of the sum.
            if let Some(rate) = rate {
                sum += billing::session_cost(rate, tut.duration_min);
            }
            tut_rows.push(tut);
        }
        months.push(json!({
            "year": bucket.key.year,
            "month": bucket.key.month,
            "count": tut_rows.len(),
            "sumMoney": billing::round_to_cents(sum),
            "tutorings": tutorings_to_json(conn, &tut_rows)?,
        }));
    }

    Ok(json!({ "months": months }))
}

fn handle_billing_monthly_sum(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match billing_monthly_sum(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_billing_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match billing_history(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "billing.monthlySum" => Some(handle_billing_monthly_sum(state, req)),
        "billing.history" => Some(handle_billing_history(state, req)),
        _ => None,
    }
}
