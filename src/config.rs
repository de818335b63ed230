//! Engine settings, persisted under `setup.engine` in the workspace
//! settings table. Unknown or malformed saved values fall back to defaults.

use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::db;
use crate::store::MAX_BATCH_OPS;
use crate::taught::DEFAULT_LESSON_MINUTES;

pub const ENGINE_KEY: &str = "setup.engine";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Year scans and reports default to; the current calendar year when null.
    pub school_year: Option<i32>,
    pub lesson_minutes: u32,
    pub batch_limit: usize,
    pub filter_unscheduled_sessions: bool,
    pub default_shift: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            school_year: None,
            lesson_minutes: DEFAULT_LESSON_MINUTES,
            batch_limit: MAX_BATCH_OPS,
            filter_unscheduled_sessions: true,
            default_shift: None,
        }
    }
}

impl EngineConfig {
    pub fn year_or(&self, today: chrono::NaiveDate) -> i32 {
        use chrono::Datelike;
        self.school_year.unwrap_or_else(|| today.year())
    }
}

pub fn default_section() -> Value {
    json!({
        "schoolYear": null,
        "lessonMinutes": DEFAULT_LESSON_MINUTES,
        "batchLimit": MAX_BATCH_OPS,
        "filterUnscheduledSessions": true,
        "defaultShift": null
    })
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v.as_i64().ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_nullable_string_max(v: &Value, key: &str, max_len: usize) -> Result<Value, String> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    if s.is_empty() {
        return Ok(Value::Null);
    }
    Ok(Value::String(s.to_string()))
}

/// Validates `patch` field by field and writes accepted values into
/// `current`. The first invalid field aborts with a message for the caller.
pub fn merge_patch(current: &mut Value, patch: &Map<String, Value>) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match k.as_str() {
            "schoolYear" => {
                let year = if v.is_null() {
                    Value::Null
                } else {
                    Value::from(parse_i64_range(v, k, 2000, 2100)?)
                };
                obj.insert(k.clone(), year);
            }
            "lessonMinutes" => {
                obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 30, 120)?));
            }
            "batchLimit" => {
                obj.insert(
                    k.clone(),
                    Value::from(parse_i64_range(v, k, 1, MAX_BATCH_OPS as i64)?),
                );
            }
            "filterUnscheduledSessions" => {
                obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
            }
            "defaultShift" => {
                obj.insert(k.clone(), parse_nullable_string_max(v, k, 32)?);
            }
            _ => return Err(format!("unknown engine field: {}", k)),
        }
    }
    Ok(())
}

/// The `setup.engine` section with defaults filled in, as stored JSON.
pub fn load_section(conn: &Connection) -> anyhow::Result<Value> {
    let mut current = default_section();
    if let Some(saved) = db::settings_get_json(conn, ENGINE_KEY)? {
        if let Some(saved_obj) = saved.as_object() {
            // Saved fields are applied one by one so a single bad value
            // does not discard the rest.
            for (k, v) in saved_obj {
                let mut single = Map::new();
                single.insert(k.clone(), v.clone());
                if let Err(e) = merge_patch(&mut current, &single) {
                    tracing::warn!(field = %k, error = %e, "ignoring saved engine setting");
                }
            }
        }
    }
    Ok(current)
}

pub fn load(conn: &Connection) -> anyhow::Result<EngineConfig> {
    let section = load_section(conn)?;
    Ok(serde_json::from_value(section)?)
}

/// Applies a validated patch and persists the result.
pub fn update(conn: &Connection, patch: &Map<String, Value>) -> Result<Value, UpdateError> {
    let mut current = load_section(conn).map_err(UpdateError::Read)?;
    merge_patch(&mut current, patch).map_err(UpdateError::Invalid)?;
    db::settings_set_json(conn, ENGINE_KEY, &current).map_err(UpdateError::Write)?;
    Ok(current)
}

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("{0}")]
    Invalid(String),
    #[error("failed to read settings: {0}")]
    Read(anyhow::Error),
    #[error("failed to write settings: {0}")]
    Write(anyhow::Error),
}

impl UpdateError {
    pub fn code(&self) -> &'static str {
        match self {
            UpdateError::Invalid(_) => "bad_params",
            UpdateError::Read(_) => "db_query_failed",
            UpdateError::Write(_) => "db_update_failed",
        }
    }
}
