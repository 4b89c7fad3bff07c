use crate::auth;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_err, get_required_str, user_by_id, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn login(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let username = get_required_str(params, "username")?;
    let password = get_required_str(params, "password")?;

    let stored: Option<(String, String, String)> = conn
        .query_row(
            "SELECT id, password_salt, password_digest FROM users WHERE username = ?",
            [&username],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(db_err)?;

    // Unknown user and wrong password answer identically.
    let Some((user_id, salt, digest)) = stored else {
        return Err(HandlerErr::new("auth_failed", "invalid username or password"));
    };
    if !auth::verify_password(&salt, &digest, &password) {
        return Err(HandlerErr::new("auth_failed", "invalid username or password"));
    }

    let token = auth::issue_token(conn, &user_id).map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "auth_tokens" })),
    })?;
    let user = user_by_id(conn, &user_id)?
        .ok_or_else(|| HandlerErr::new("db_query_failed", "user row missing after login"))?;
    tracing::info!(username = %user.username, "login");
    Ok(json!({ "token": token, "user": user.to_json() }))
}

fn logout(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let token = get_required_str(params, "token")?;
    let revoked = auth::revoke_token(conn, &token).map_err(|e| HandlerErr {
        code: "db_delete_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "auth_tokens" })),
    })?;
    Ok(json!({ "revoked": revoked }))
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match login(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match logout(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        _ => None,
    }
}
