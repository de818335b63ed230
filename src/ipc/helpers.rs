use chrono::NaiveDate;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::calendar::ClassScope;
use crate::config::{self, EngineConfig};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::SessionContext;
use crate::reconcile::apply::ApplyError;
use crate::store::{Kind, SqliteStore, StoreError};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<StoreError> for HandlerErr {
    fn from(e: StoreError) -> Self {
        let details = match &e {
            StoreError::Malformed { kind, id, .. } => {
                Some(serde_json::json!({ "kind": kind.as_str(), "id": id }))
            }
            _ => None,
        };
        Self {
            code: e.code(),
            message: e.to_string(),
            details,
        }
    }
}

impl From<ApplyError> for HandlerErr {
    fn from(e: ApplyError) -> Self {
        match e {
            ApplyError::Store(inner) => inner.into(),
            other => Self::new(other.code(), other.to_string()),
        }
    }
}

/// Runs `f` against the open workspace and wraps its result for the wire.
pub fn with_db(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &Value) -> Result<Value, HandlerErr>,
) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => {
            tracing::debug!(method = %req.method, code = error.code, message = %error.message, "request failed");
            error.response(&req.id)
        }
    }
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn parse_date(raw: &str, key: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("{} must be a YYYY-MM-DD date", key)))
}

pub fn get_required_date(params: &Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    parse_date(&get_required_str(params, key)?, key)
}

pub fn get_optional_date(params: &Value, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    get_optional_str(params, key)
        .map(|s| parse_date(&s, key))
        .transpose()
}

pub fn get_optional_i32(params: &Value, key: &str) -> Result<Option<i32>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be integer", key))),
    }
}

pub fn get_optional_bool(params: &Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

/// Deserializes `params[key]` into `T`.
pub fn get_required<T: DeserializeOwned>(params: &Value, key: &str) -> Result<T, HandlerErr> {
    let raw = params
        .get(key)
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    serde_json::from_value(raw.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid {}: {}", key, e)))
}

pub fn parse_kind(params: &Value) -> Result<Kind, HandlerErr> {
    let raw = get_required_str(params, "kind")?;
    Kind::parse(&raw).ok_or_else(|| HandlerErr::bad_params(format!("unknown kind: {}", raw)))
}

pub fn parse_session(params: &Value) -> Result<SessionContext, HandlerErr> {
    get_required(params, "session")
}

pub fn engine_config(conn: &Connection) -> Result<EngineConfig, HandlerErr> {
    config::load(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

pub fn store_for<'c>(conn: &'c Connection, cfg: &EngineConfig) -> SqliteStore<'c> {
    SqliteStore::new(conn).with_batch_limit(cfg.batch_limit)
}

pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Year from `params.year`, else the configured school year, else today's.
pub fn resolve_year(params: &Value, cfg: &EngineConfig) -> Result<i32, HandlerErr> {
    Ok(get_optional_i32(params, "year")?.unwrap_or_else(|| cfg.year_or(today())))
}

pub fn to_json<T: Serialize>(value: &T) -> Result<Value, HandlerErr> {
    serde_json::to_value(value).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

/// Class coordinates as they appear in request params.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassParams {
    pub unit: String,
    pub grade_level: String,
    pub school_class: String,
    #[serde(default)]
    pub shift: Option<String>,
}

impl ClassParams {
    pub fn from_params(params: &Value, cfg: &EngineConfig) -> Result<Self, HandlerErr> {
        let mut class: ClassParams = serde_json::from_value(params.clone())
            .map_err(|e| HandlerErr::bad_params(format!("invalid class params: {}", e)))?;
        if class.shift.is_none() {
            class.shift = cfg.default_shift.clone();
        }
        Ok(class)
    }

    pub fn scope(&self) -> ClassScope<'_> {
        ClassScope {
            unit: &self.unit,
            grade_level: &self.grade_level,
            school_class: &self.school_class,
            shift: self.shift.as_deref(),
        }
    }
}
