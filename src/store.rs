//! Document persistence: the collaborator the engine reads from and the
//! applier writes through.
//!
//! The engine only needs whole-collection reads, field-equality reads,
//! merge-writes, deletes and bounded write batches. [`SqliteStore`] provides
//! those over the workspace database; every kind lives in one `documents`
//! table as a JSON body.

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::Record;

/// Hard platform limit on operations per committed batch.
pub const MAX_BATCH_OPS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Attendance,
    Grades,
    ClassSchedules,
    CalendarEvents,
    AcademicSettings,
    AcademicSubjects,
    Students,
    Teachers,
}

impl Kind {
    pub const ALL: [Kind; 8] = [
        Kind::Attendance,
        Kind::Grades,
        Kind::ClassSchedules,
        Kind::CalendarEvents,
        Kind::AcademicSettings,
        Kind::AcademicSubjects,
        Kind::Students,
        Kind::Teachers,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Attendance => "attendance",
            Kind::Grades => "grades",
            Kind::ClassSchedules => "classSchedules",
            Kind::CalendarEvents => "calendarEvents",
            Kind::AcademicSettings => "academicSettings",
            Kind::AcademicSubjects => "academicSubjects",
            Kind::Students => "students",
            Kind::Teachers => "teachers",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Kind::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("malformed {kind} record {id}: {reason}")]
    Malformed {
        kind: Kind,
        id: String,
        reason: String,
    },

    #[error("batch holds at most {limit} operations")]
    BatchFull { limit: usize },
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Sqlite(_) => "db_query_failed",
            StoreError::Malformed { .. } => "malformed_record",
            StoreError::BatchFull { .. } => "batch_full",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn decode<T: Record>(&self) -> Result<T, StoreError> {
        let mut rec: T =
            serde_json::from_value(self.data.clone()).map_err(|e| StoreError::Malformed {
                kind: T::KIND,
                id: self.id.clone(),
                reason: e.to_string(),
            })?;
        rec.set_id(self.id.clone());
        Ok(rec)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    /// `value` is an array; matches when the field equals any element.
    In,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    Set { id: String, data: Value },
    Merge { id: String, data: Value },
    Delete { id: String },
}

impl BatchOp {
    pub fn id(&self) -> &str {
        match self {
            BatchOp::Set { id, .. } | BatchOp::Merge { id, .. } | BatchOp::Delete { id } => id,
        }
    }
}

/// Write handle for one kind. Nothing is written until the store commits it.
#[derive(Debug)]
pub struct WriteBatch {
    kind: Kind,
    limit: usize,
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new(kind: Kind, limit: usize) -> Self {
        Self {
            kind,
            limit: limit.clamp(1, MAX_BATCH_OPS),
            ops: Vec::new(),
        }
    }

    fn push(&mut self, op: BatchOp) -> Result<(), StoreError> {
        if self.ops.len() >= self.limit {
            return Err(StoreError::BatchFull { limit: self.limit });
        }
        self.ops.push(op);
        Ok(())
    }

    pub fn set(&mut self, id: impl Into<String>, data: Value) -> Result<(), StoreError> {
        self.push(BatchOp::Set {
            id: id.into(),
            data,
        })
    }

    pub fn merge(&mut self, id: impl Into<String>, data: Value) -> Result<(), StoreError> {
        self.push(BatchOp::Merge {
            id: id.into(),
            data,
        })
    }

    pub fn delete(&mut self, id: impl Into<String>) -> Result<(), StoreError> {
        self.push(BatchOp::Delete { id: id.into() })
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

pub trait DocumentStore {
    fn fetch_all(&self, kind: Kind) -> Result<Vec<Document>, StoreError>;

    fn fetch_where(
        &self,
        kind: Kind,
        field: &str,
        op: FilterOp,
        value: &Value,
    ) -> Result<Vec<Document>, StoreError> {
        let docs = self.fetch_all(kind)?;
        Ok(docs
            .into_iter()
            .filter(|d| {
                let field_value = if field == "id" {
                    Some(Value::String(d.id.clone()))
                } else {
                    d.data.get(field).cloned()
                };
                let Some(fv) = field_value else {
                    return false;
                };
                match op {
                    FilterOp::Eq => &fv == value,
                    FilterOp::In => value
                        .as_array()
                        .map(|vals| vals.contains(&fv))
                        .unwrap_or(false),
                }
            })
            .collect())
    }

    fn fetch_one(&self, kind: Kind, id: &str) -> Result<Option<Document>, StoreError>;

    /// Upsert by id, deep-merging object fields into the existing body.
    fn write_merge(&self, kind: Kind, id: &str, partial: &Value) -> Result<(), StoreError>;

    fn delete_by_id(&self, kind: Kind, id: &str) -> Result<(), StoreError>;

    fn batch_limit(&self) -> usize {
        MAX_BATCH_OPS
    }

    fn batch(&self, kind: Kind) -> WriteBatch {
        WriteBatch::new(kind, self.batch_limit())
    }

    /// Applies every operation of the batch or none of them.
    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;
}

pub fn fetch_records<T: Record>(store: &dyn DocumentStore) -> Result<Vec<T>, StoreError> {
    store
        .fetch_all(T::KIND)?
        .iter()
        .map(|d| d.decode::<T>())
        .collect()
}

pub fn fetch_record<T: Record>(
    store: &dyn DocumentStore,
    id: &str,
) -> Result<Option<T>, StoreError> {
    store
        .fetch_one(T::KIND, id)?
        .map(|d| d.decode::<T>())
        .transpose()
}

/// Deep merge: objects merge key by key, everything else replaces.
pub fn merge_json(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(t), Value::Object(p)) => {
            for (k, v) in p {
                let nested = v.is_object() && t.get(k).map(Value::is_object).unwrap_or(false);
                if nested {
                    if let Some(existing) = t.get_mut(k) {
                        merge_json(existing, v);
                    }
                } else {
                    t.insert(k.clone(), v.clone());
                }
            }
        }
        (t, p) => *t = p.clone(),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkOutcome {
    pub index: usize,
    /// Half-open range of operation positions covered by this chunk.
    pub start: usize,
    pub end: usize,
    pub committed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unprocessed_ids: Vec<String>,
}

/// Splits `ops` into batches of at most `store.batch_limit()` and commits
/// them in order. A failed chunk is reported with its range and the ids it
/// carried; later chunks still run and earlier commits stay in place.
pub fn commit_chunked(store: &dyn DocumentStore, kind: Kind, ops: Vec<BatchOp>) -> Vec<ChunkOutcome> {
    let limit = store.batch_limit().clamp(1, MAX_BATCH_OPS);
    let mut outcomes = Vec::new();
    for (index, chunk) in ops.chunks(limit).enumerate() {
        let start = index * limit;
        let end = start + chunk.len();
        let mut batch = store.batch(kind);
        let mut staged = Ok(());
        for op in chunk {
            staged = batch.push(op.clone());
            if staged.is_err() {
                break;
            }
        }
        let result = staged.and_then(|_| store.commit(batch));
        match result {
            Ok(()) => {
                tracing::debug!(kind = %kind, chunk = index, start, end, "batch committed");
                outcomes.push(ChunkOutcome {
                    index,
                    start,
                    end,
                    committed: true,
                    error: None,
                    unprocessed_ids: Vec::new(),
                });
            }
            Err(e) => {
                tracing::error!(kind = %kind, chunk = index, start, end, error = %e, "batch commit failed");
                outcomes.push(ChunkOutcome {
                    index,
                    start,
                    end,
                    committed: false,
                    error: Some(e.to_string()),
                    unprocessed_ids: chunk.iter().map(|op| op.id().to_string()).collect(),
                });
            }
        }
    }
    outcomes
}

pub struct SqliteStore<'a> {
    conn: &'a Connection,
    batch_limit: usize,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self {
            conn,
            batch_limit: MAX_BATCH_OPS,
        }
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.clamp(1, MAX_BATCH_OPS);
        self
    }

    fn parse_body(kind: Kind, id: &str, body: &str) -> Result<Value, StoreError> {
        serde_json::from_str(body).map_err(|e| StoreError::Malformed {
            kind,
            id: id.to_string(),
            reason: e.to_string(),
        })
    }

    fn read_body(conn: &Connection, kind: Kind, id: &str) -> Result<Option<Value>, StoreError> {
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM documents WHERE kind = ? AND id = ?",
                (kind.as_str(), id),
                |r| r.get(0),
            )
            .optional()?;
        body.map(|b| Self::parse_body(kind, id, &b)).transpose()
    }

    fn upsert(conn: &Connection, kind: Kind, id: &str, data: &Value) -> Result<(), StoreError> {
        let mut body = data.clone();
        if let Value::Object(obj) = &mut body {
            obj.remove("id");
        }
        conn.execute(
            "INSERT INTO documents(kind, id, body, updated_at) VALUES(?, ?, ?, ?)
             ON CONFLICT(kind, id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            (
                kind.as_str(),
                id,
                body.to_string(),
                chrono::Utc::now().to_rfc3339(),
            ),
        )?;
        Ok(())
    }

    fn merge_into(conn: &Connection, kind: Kind, id: &str, partial: &Value) -> Result<(), StoreError> {
        let mut current = Self::read_body(conn, kind, id)?.unwrap_or_else(|| Value::Object(Map::new()));
        merge_json(&mut current, partial);
        Self::upsert(conn, kind, id, &current)
    }

    fn apply_op(conn: &Connection, kind: Kind, op: &BatchOp) -> Result<(), StoreError> {
        match op {
            BatchOp::Set { id, data } => Self::upsert(conn, kind, id, data),
            BatchOp::Merge { id, data } => Self::merge_into(conn, kind, id, data),
            BatchOp::Delete { id } => {
                conn.execute(
                    "DELETE FROM documents WHERE kind = ? AND id = ?",
                    (kind.as_str(), id),
                )?;
                Ok(())
            }
        }
    }
}

impl DocumentStore for SqliteStore<'_> {
    fn fetch_all(&self, kind: Kind) -> Result<Vec<Document>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, body FROM documents WHERE kind = ? ORDER BY rowid")?;
        let rows = stmt
            .query_map([kind.as_str()], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(id, body)| {
                let data = Self::parse_body(kind, &id, &body)?;
                Ok(Document { id, data })
            })
            .collect()
    }

    fn fetch_one(&self, kind: Kind, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(Self::read_body(self.conn, kind, id)?.map(|data| Document {
            id: id.to_string(),
            data,
        }))
    }

    fn write_merge(&self, kind: Kind, id: &str, partial: &Value) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        Self::merge_into(&tx, kind, id, partial)?;
        tx.commit()?;
        Ok(())
    }

    fn delete_by_id(&self, kind: Kind, id: &str) -> Result<(), StoreError> {
        Self::apply_op(self.conn, kind, &BatchOp::Delete { id: id.to_string() })
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.len() > self.batch_limit {
            return Err(StoreError::BatchFull {
                limit: self.batch_limit,
            });
        }
        let tx = self.conn.unchecked_transaction()?;
        for op in batch.ops() {
            Self::apply_op(&tx, batch.kind(), op)?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use serde_json::json;

    #[test]
    fn write_merge_keeps_untouched_nested_fields() {
        let conn = db::open_in_memory().expect("open db");
        let store = SqliteStore::new(&conn);
        store
            .write_merge(
                Kind::Grades,
                "g1",
                &json!({
                    "studentId": "st1",
                    "bimesters": { "bimester1": { "nota": 8.0, "faltas": 1 } }
                }),
            )
            .expect("seed");
        store
            .write_merge(
                Kind::Grades,
                "g1",
                &json!({ "bimesters": { "bimester1": { "faltas": 4 } } }),
            )
            .expect("patch");

        let doc = store
            .fetch_one(Kind::Grades, "g1")
            .expect("read")
            .expect("present");
        assert_eq!(doc.data["bimesters"]["bimester1"]["nota"], json!(8.0));
        assert_eq!(doc.data["bimesters"]["bimester1"]["faltas"], json!(4));
        assert_eq!(doc.data["studentId"], json!("st1"));
    }

    #[test]
    fn fetch_where_matches_fields_and_ids() {
        let conn = db::open_in_memory().expect("open db");
        let store = SqliteStore::new(&conn);
        let mut batch = store.batch(Kind::Students);
        batch
            .set("a", json!({ "unit": "north" }))
            .expect("stage");
        batch
            .set("b", json!({ "unit": "south" }))
            .expect("stage");
        store.commit(batch).expect("commit");

        let north = store
            .fetch_where(Kind::Students, "unit", FilterOp::Eq, &json!("north"))
            .expect("query");
        assert_eq!(north.len(), 1);
        assert_eq!(north[0].id, "a");

        let both = store
            .fetch_where(Kind::Students, "id", FilterOp::In, &json!(["a", "b"]))
            .expect("query");
        assert_eq!(both.len(), 2);
    }

    #[test]
    fn batch_refuses_ops_past_its_limit() {
        let mut batch = WriteBatch::new(Kind::Attendance, 2);
        batch.delete("a").expect("first");
        batch.delete("b").expect("second");
        assert!(matches!(
            batch.delete("c"),
            Err(StoreError::BatchFull { limit: 2 })
        ));
    }

    #[test]
    fn commit_chunked_splits_on_the_store_limit() {
        let conn = db::open_in_memory().expect("open db");
        let store = SqliteStore::new(&conn).with_batch_limit(3);
        let ops: Vec<BatchOp> = (0..7)
            .map(|i| BatchOp::Set {
                id: format!("s{}", i),
                data: json!({ "n": i }),
            })
            .collect();
        let outcomes = commit_chunked(&store, Kind::Students, ops);
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.committed));
        assert_eq!((outcomes[2].start, outcomes[2].end), (6, 7));
        assert_eq!(store.fetch_all(Kind::Students).expect("read").len(), 7);
    }

    #[test]
    fn malformed_body_surfaces_as_error() {
        let conn = db::open_in_memory().expect("open db");
        conn.execute(
            "INSERT INTO documents(kind, id, body) VALUES('students', 'bad', '{not json')",
            [],
        )
        .expect("insert");
        let store = SqliteStore::new(&conn);
        let err = store.fetch_all(Kind::Students).expect_err("must fail");
        assert_eq!(err.code(), "malformed_record");
    }
}
