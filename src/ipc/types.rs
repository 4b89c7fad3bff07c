use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Registration code that grants the teacher role, from
    /// CHECKMATHE_TEACHER_CODE. None disables teacher self-registration.
    pub teacher_code: Option<String>,
}
