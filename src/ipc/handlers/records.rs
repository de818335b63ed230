use crate::ipc::helpers::{
    engine_config, get_optional_str, get_required, get_required_str, parse_kind, store_for,
    with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{
    AcademicSettings, AcademicSubject, AttendanceRecord, CalendarEvent, ClassSchedule,
    ReportCardEntry, StudentRecord, TeacherRecord,
};
use crate::store::{
    commit_chunked, merge_json, BatchOp, ChunkOutcome, Document, DocumentStore, FilterOp, Kind,
    StoreError,
};
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

/// Decodes a full body as its kind's record type.
fn validate(kind: Kind, doc: &Document) -> Result<(), StoreError> {
    match kind {
        Kind::Attendance => doc.decode::<AttendanceRecord>().map(drop),
        Kind::Grades => doc.decode::<ReportCardEntry>().map(drop),
        Kind::ClassSchedules => doc.decode::<ClassSchedule>().map(drop),
        Kind::CalendarEvents => doc.decode::<CalendarEvent>().map(drop),
        Kind::AcademicSettings => doc.decode::<AcademicSettings>().map(drop),
        Kind::AcademicSubjects => doc.decode::<AcademicSubject>().map(drop),
        Kind::Students => doc.decode::<StudentRecord>().map(drop),
        Kind::Teachers => doc.decode::<TeacherRecord>().map(drop),
    }
}

/// The body `patch` would leave behind once deep-merged into the stored one.
fn merged_document(
    store: &dyn DocumentStore,
    kind: Kind,
    id: &str,
    patch: &Value,
) -> Result<Document, StoreError> {
    let mut data = store
        .fetch_one(kind, id)?
        .map(|d| d.data)
        .unwrap_or_else(|| json!({}));
    merge_json(&mut data, patch);
    Ok(Document {
        id: id.to_string(),
        data,
    })
}

fn chunk_summary(outcomes: &[ChunkOutcome]) -> Value {
    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| !o.committed)
        .flat_map(|o| o.unprocessed_ids.iter().map(String::as_str))
        .collect();
    json!({
        "chunks": outcomes,
        "failedIds": failed,
    })
}

fn records_upsert(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let kind = parse_kind(params)?;
    let records: Vec<Value> = get_required(params, "records")?;
    let merge = match get_optional_str(params, "mode").as_deref() {
        None | Some("set") => false,
        Some("merge") => true,
        Some(other) => {
            return Err(HandlerErr::bad_params(format!(
                "mode must be one of: set, merge (got {})",
                other
            )))
        }
    };

    let cfg = engine_config(conn)?;
    let store = store_for(conn, &cfg);

    // Everything is validated before the first write. Merges are checked
    // against the body they would produce.
    let mut ops = Vec::with_capacity(records.len());
    for (index, mut data) in records.into_iter().enumerate() {
        let Some(obj) = data.as_object_mut() else {
            return Err(HandlerErr::bad_params(format!("records[{}] must be an object", index)));
        };
        let id = match obj.remove("id") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::String(_)) | Some(Value::Null) | None => Uuid::new_v4().to_string(),
            Some(_) => {
                return Err(HandlerErr::bad_params(format!("records[{}].id must be a string", index)))
            }
        };
        let doc = Document { id, data };
        let merged;
        let checked = if merge {
            merged = merged_document(&store, kind, &doc.id, &doc.data)?;
            &merged
        } else {
            &doc
        };
        validate(kind, checked).map_err(|e| {
            let mut he = HandlerErr::from(e);
            he.details = Some(json!({ "index": index, "kind": kind.as_str(), "id": doc.id }));
            he
        })?;
        ops.push(if merge {
            BatchOp::Merge {
                id: doc.id,
                data: doc.data,
            }
        } else {
            BatchOp::Set {
                id: doc.id,
                data: doc.data,
            }
        });
    }

    let ids: Vec<String> = ops.iter().map(|op| op.id().to_string()).collect();
    let outcomes = commit_chunked(&store, kind, ops);
    tracing::info!(kind = %kind, records = ids.len(), chunks = outcomes.len(), "records upserted");
    let mut result = chunk_summary(&outcomes);
    result["ids"] = json!(ids);
    Ok(result)
}

fn records_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let kind = parse_kind(params)?;
    let store = store_for(conn, &engine_config(conn)?);
    let docs = match get_optional_str(params, "field") {
        Some(field) => {
            let value = params
                .get("value")
                .cloned()
                .ok_or_else(|| HandlerErr::bad_params("missing value"))?;
            let op = match get_optional_str(params, "op").as_deref() {
                None | Some("==") | Some("eq") => FilterOp::Eq,
                Some("in") => {
                    if !value.is_array() {
                        return Err(HandlerErr::bad_params("value must be an array for op in"));
                    }
                    FilterOp::In
                }
                Some(other) => return Err(HandlerErr::bad_params(format!("unknown op: {}", other))),
            };
            store.fetch_where(kind, &field, op, &value)?
        }
        None => store.fetch_all(kind)?,
    };
    let records: Vec<Value> = docs
        .into_iter()
        .map(|d| {
            let mut data = d.data;
            if let Some(obj) = data.as_object_mut() {
                obj.insert("id".into(), Value::String(d.id));
            }
            data
        })
        .collect();
    Ok(json!({ "kind": kind.as_str(), "records": records }))
}

/// Deep-merges `patch` into one record, creating it when absent.
fn records_patch(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let kind = parse_kind(params)?;
    let id = get_required_str(params, "id")?;
    let patch = match params.get("patch") {
        Some(v @ Value::Object(_)) => v,
        _ => return Err(HandlerErr::bad_params("patch must be an object")),
    };
    let store = store_for(conn, &engine_config(conn)?);
    validate(kind, &merged_document(&store, kind, &id, patch)?)?;
    store.write_merge(kind, &id, patch)?;
    let Some(doc) = store.fetch_one(kind, &id)? else {
        return Err(HandlerErr::new(
            "db_query_failed",
            format!("{} record {} vanished after write", kind, id),
        ));
    };
    let mut record = doc.data;
    if let Some(obj) = record.as_object_mut() {
        obj.insert("id".into(), Value::String(doc.id));
    }
    Ok(json!({ "kind": kind.as_str(), "record": record }))
}

fn records_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let kind = parse_kind(params)?;
    // A single id is removed directly, lists go through chunked batches.
    if let Some(id) = get_optional_str(params, "id") {
        let store = store_for(conn, &engine_config(conn)?);
        store.delete_by_id(kind, &id)?;
        tracing::info!(kind = %kind, id = %id, "record deleted");
        return Ok(json!({ "deleted": id }));
    }
    let ids: Vec<String> = get_required(params, "ids")?;
    if ids.is_empty() {
        return Err(HandlerErr::bad_params("ids must not be empty"));
    }
    let store = store_for(conn, &engine_config(conn)?);
    let ops = ids.into_iter().map(|id| BatchOp::Delete { id }).collect();
    let outcomes = commit_chunked(&store, kind, ops);
    Ok(chunk_summary(&outcomes))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "records.upsert" => Some(with_db(state, req, records_upsert)),
        "records.list" => Some(with_db(state, req, records_list)),
        "records.patch" => Some(with_db(state, req, records_patch)),
        "records.delete" => Some(with_db(state, req, records_delete)),
        _ => None,
    }
}
