use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::Result;

pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn format_timestamp(timestamp: u64) -> String {
    let dt = DateTime::from_timestamp(timestamp as i64, 0)
        .unwrap_or_else(|| Utc::now());
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Writes `value` as pretty JSON to `<dir>/<prefix>_<session_id>.json`.
pub fn save_json<T: Serialize>(dir: &Path, prefix: &str, session_id: &str, value: &T) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}_{}.json", prefix, session_id));
    let json_output = serde_json::to_string_pretty(value)?;
    std::fs::write(&path, json_output)?;
    Ok(path)
}
