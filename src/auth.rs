use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Salted SHA-256 digest, hex-encoded. The salt is a per-user random
/// string generated at registration; digests are compared byte-for-byte.
pub fn password_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn verify_password(salt: &str, stored_digest: &str, password: &str) -> bool {
    password_digest(salt, password) == stored_digest
}

/// Issues a fresh token for the user. Earlier tokens stay valid until
/// revoked, so each client session holds its own.
pub fn issue_token(conn: &Connection, user_id: &str) -> rusqlite::Result<String> {
    let token = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO auth_tokens(token, user_id, created_at)
         VALUES(?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&token, user_id),
    )?;
    Ok(token)
}

/// Returns whether the token existed.
pub fn revoke_token(conn: &Connection, token: &str) -> rusqlite::Result<bool> {
    let n = conn.execute("DELETE FROM auth_tokens WHERE token = ?", [token])?;
    Ok(n > 0)
}

pub fn user_id_for_token(conn: &Connection, token: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT user_id FROM auth_tokens WHERE token = ?",
        [token],
        |r| r.get(0),
    )
    .optional()
}
