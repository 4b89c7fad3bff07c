use crate::auth;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_err, get_optional_str, get_required_str, require_teacher, require_user, user_by_id,
    user_by_username, HandlerErr, ROLE_STUDENT, ROLE_TEACHER,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn users_create(
    conn: &Connection,
    teacher_code: Option<&str>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let username = get_required_str(params, "username")?;
    let email = get_required_str(params, "email")?;
    let password = get_required_str(params, "password")?;
    let first_name = get_required_str(params, "firstName")?;
    let last_name = get_required_str(params, "lastName")?;
    let phone_number = get_optional_str(params, "phoneNumber")?;
    let given_code = get_optional_str(params, "teacherCode")?;

    // Role defaults to student; only the configured code upgrades it.
    let role = match given_code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        None => ROLE_STUDENT,
        Some(given) => match teacher_code {
            Some(expected) if given == expected => ROLE_TEACHER,
            _ => return Err(HandlerErr::new("bad_params", "invalid teacher code")),
        },
    };

    let taken: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM users WHERE username = ? OR email = ?",
            (&username, &email),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    if taken.is_some() {
        return Err(HandlerErr::new(
            "conflict",
            format!(
                "user with username {} or email {} already exists",
                username, email
            ),
        ));
    }

    let user_id = Uuid::new_v4().to_string();
    let salt = Uuid::new_v4().to_string();
    let digest = auth::password_digest(&salt, &password);
    conn.execute(
        "INSERT INTO users(
           id,
           username,
           email,
           password_salt,
           password_digest,
           first_name,
           last_name,
           phone_number,
           rate_per_45,
           role,
           created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &user_id,
            &username,
            &email,
            &salt,
            &digest,
            &first_name,
            &last_name,
            phone_number.as_deref(),
            role,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "users" })),
    })?;

    tracing::info!(username = %username, role = role, "user registered");
    let user = user_by_id(conn, &user_id)?
        .ok_or_else(|| HandlerErr::new("db_query_failed", "user row missing after insert"))?;
    Ok(user.to_json())
}

fn users_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let _requester = require_teacher(conn, params)?;
    let user_id = get_required_str(params, "userId")?;
    let user = user_by_id(conn, &user_id)?
        .ok_or_else(|| HandlerErr::new("not_found", format!("user with id {} does not exist", user_id)))?;
    Ok(user.to_json())
}

fn users_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let _requester = require_user(conn, params)?;
    let mut stmt = conn
        .prepare("SELECT username, email FROM users ORDER BY username")
        .map_err(db_err)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "username": r.get::<_, String>(0)?,
                "email": r.get::<_, String>(1)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(json!(rows))
}

fn users_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let requester = require_user(conn, params)?;
    let username = get_required_str(params, "username")?;
    let target = user_by_username(conn, &username)?
        .ok_or_else(|| HandlerErr::new("not_found", format!("user {} does not exist", username)))?;

    if !requester.is_teacher() && requester.id != target.id {
        return Err(HandlerErr::new(
            "forbidden",
            "students may only delete their own account",
        ));
    }

    // FKs do the bookkeeping: tokens and taken tutorings go with the
    // user, taught tutorings keep the record with a null teacher.
    conn.execute("DELETE FROM users WHERE id = ?", [&target.id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "users" })),
        })?;
    tracing::info!(username = %target.username, "user deleted");
    Ok(json!({ "deleted": target.username }))
}

fn users_set_rate(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let _requester = require_teacher(conn, params)?;
    let username = get_required_str(params, "username")?;

    let rate = match params.get("ratePer45") {
        None => return Err(HandlerErr::new("bad_params", "missing ratePer45")),
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_f64() {
            Some(r) if r > 0.0 => Some(r),
            _ => {
                return Err(HandlerErr::new(
                    "bad_params",
                    "ratePer45 must be a positive number or null",
                ))
            }
        },
    };

    let target = user_by_username(conn, &username)?
        .ok_or_else(|| HandlerErr::new("not_found", format!("user {} does not exist", username)))?;

    conn.execute(
        "UPDATE users SET rate_per_45 = ? WHERE id = ?",
        (rate, &target.id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "users" })),
    })?;

    let updated = user_by_id(conn, &target.id)?
        .ok_or_else(|| HandlerErr::new("db_query_failed", "user row missing after update"))?;
    Ok(updated.to_json())
}

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match users_create(conn, state.teacher_code.as_deref(), &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_users_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match users_get(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match users_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_users_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match users_delete(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_users_set_rate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match users_set_rate(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => Some(handle_users_create(state, req)),
        "users.get" => Some(handle_users_get(state, req)),
        "users.list" => Some(handle_users_list(state, req)),
        "users.delete" => Some(handle_users_delete(state, req)),
        "users.setRate" => Some(handle_users_set_rate(state, req)),
        _ => None,
    }
}
