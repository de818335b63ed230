//! Fix operations. Every fix re-reads the documents it touches right before
//! writing and reports per-item outcomes instead of failing wholesale.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use thiserror::Error;

use super::scan::Discrepancy;
use crate::model::{
    AcademicSubject, BimesterNumber, BimesterSlot, Bimesters, ClassSchedule, ReportCardEntry,
    Role, SessionContext, StudentRecord, TeacherRecord,
};
use crate::store::{
    commit_chunked, fetch_record, fetch_records, BatchOp, ChunkOutcome, DocumentStore, Kind,
    StoreError,
};
use crate::subjects::{self, ResolveContext, SubjectCatalog, CANONICAL_PREFIX};

pub const DELETE_CONFIRMATION: &str = "DELETE";

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("nothing selected")]
    NothingSelected,

    #[error("confirmation phrase does not match; type {expected} to confirm")]
    ConfirmationMismatch { expected: &'static str },

    #[error("role {0:?} may not apply fixes")]
    Forbidden(Role),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApplyError {
    pub fn code(&self) -> &'static str {
        match self {
            ApplyError::NothingSelected | ApplyError::ConfirmationMismatch { .. } => "bad_params",
            ApplyError::Forbidden(_) => "forbidden",
            ApplyError::Store(e) => e.code(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedItem {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    pub succeeded: Vec<String>,
    /// Already correct, or already gone.
    pub skipped: Vec<String>,
    pub failed: Vec<FailedItem>,
    pub chunks: Vec<ChunkOutcome>,
}

impl ApplyReport {
    fn fail(&mut self, id: impl Into<String>, reason: impl Into<String>) {
        self.failed.push(FailedItem {
            id: id.into(),
            reason: reason.into(),
        });
    }

    /// Commits `ops` in chunks and books every op's id by its chunk outcome.
    fn commit(&mut self, store: &dyn DocumentStore, kind: Kind, ops: Vec<BatchOp>) {
        if ops.is_empty() {
            return;
        }
        let ids: Vec<String> = ops.iter().map(|op| op.id().to_string()).collect();
        let outcomes = commit_chunked(store, kind, ops);
        for o in &outcomes {
            let chunk_ids = ids.get(o.start..o.end).unwrap_or(&[]);
            if o.committed {
                self.succeeded.extend(chunk_ids.iter().cloned());
            } else {
                let reason = o.error.clone().unwrap_or_else(|| "commit failed".to_string());
                for id in chunk_ids {
                    self.fail(id.clone(), reason.clone());
                }
            }
        }
        self.chunks.extend(outcomes);
    }
}

fn require_fix_role(session: &SessionContext) -> Result<(), ApplyError> {
    if session.can_apply_fixes() {
        Ok(())
    } else {
        Err(ApplyError::Forbidden(session.role))
    }
}

/// Whether a report-card entry belongs to the session's unit, judged by
/// its student when the student still exists.
fn entry_in_session(
    store: &dyn DocumentStore,
    session: &SessionContext,
    entry: &ReportCardEntry,
) -> Result<bool, StoreError> {
    if session.effective_unit() == "all" {
        return Ok(true);
    }
    let student = fetch_record::<StudentRecord>(store, &entry.student_id)?;
    let unit = student.map(|s| s.unit).or_else(|| entry.unit.clone());
    Ok(unit.map_or(false, |u| session.unit_in_scope(&u)))
}

/// Overwrites `faltas` on the selected bimester slots with the computed
/// totals. Nothing else on the entry is written.
pub fn apply_absence_fixes(
    store: &dyn DocumentStore,
    session: &SessionContext,
    selected: &[Discrepancy],
) -> Result<ApplyReport, ApplyError> {
    require_fix_role(session)?;
    if selected.is_empty() {
        return Err(ApplyError::NothingSelected);
    }

    let mut by_entry: BTreeMap<&str, BTreeMap<BimesterNumber, u32>> = BTreeMap::new();
    for d in selected {
        by_entry
            .entry(d.entry_id.as_str())
            .or_default()
            .insert(d.bimester, d.actual);
    }

    let mut report = ApplyReport::default();
    let mut ops = Vec::new();
    for (entry_id, fixes) in by_entry {
        let entry = match fetch_record::<ReportCardEntry>(store, entry_id) {
            Ok(Some(e)) => e,
            Ok(None) => {
                report.fail(entry_id, "report-card entry no longer exists");
                continue;
            }
            Err(e) => {
                tracing::warn!(entry_id, error = %e, "could not re-read entry");
                report.fail(entry_id, e.to_string());
                continue;
            }
        };
        match entry_in_session(store, session, &entry) {
            Ok(true) => {}
            Ok(false) => {
                report.fail(entry_id, "entry is outside the session's unit");
                continue;
            }
            Err(e) => {
                report.fail(entry_id, e.to_string());
                continue;
            }
        }

        let mut slots = Map::new();
        for (b, actual) in fixes {
            let slot = entry.bimesters.get(b);
            if slot.faltas == Some(actual) || (slot.faltas.is_none() && actual == 0) {
                continue;
            }
            slots.insert(Bimesters::wire_key(b).to_string(), json!({ "faltas": actual }));
        }
        if slots.is_empty() {
            report.skipped.push(entry_id.to_string());
            continue;
        }
        ops.push(BatchOp::Merge {
            id: entry_id.to_string(),
            data: json!({ "bimesters": Value::Object(slots) }),
        });
    }

    report.commit(store, Kind::Grades, ops);
    tracing::info!(
        succeeded = report.succeeded.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "absence fixes applied"
    );
    Ok(report)
}

/// One duplicate group chosen by the operator.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub canonical: String,
    pub entry_ids: Vec<String>,
}

/// A value present on both sides of a merge. The target's value is kept.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConflict {
    pub source_id: String,
    pub bimester: BimesterNumber,
    pub field: &'static str,
    pub kept: f64,
    pub dropped: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeStatus {
    Merged,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    pub canonical: String,
    pub status: MergeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub deleted: Vec<String>,
    pub conflicts: Vec<FieldConflict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MergeOutcome {
    fn new(canonical: &str, status: MergeStatus) -> Self {
        Self {
            canonical: canonical.to_string(),
            status,
            target_id: None,
            deleted: Vec::new(),
            conflicts: Vec::new(),
            error: None,
        }
    }

    fn failed(canonical: &str, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(canonical, MergeStatus::Failed)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub merged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub groups: Vec<MergeOutcome>,
}

/// Entry whose subject already is the canonical id, else the first with a
/// canonical-looking id, else the first. Among several canonical-looking
/// candidates list order decides.
pub fn pick_target(entries: &[ReportCardEntry], canonical: &str) -> usize {
    entries
        .iter()
        .position(|e| e.subject == canonical)
        .or_else(|| {
            entries
                .iter()
                .position(|e| e.subject.starts_with(CANONICAL_PREFIX))
        })
        .unwrap_or(0)
}

fn merge_grade(
    kept: &mut Option<f64>,
    incoming: Option<f64>,
    field: &'static str,
    bimester: BimesterNumber,
    source_id: &str,
    conflicts: &mut Vec<FieldConflict>,
) {
    match (*kept, incoming) {
        (None, Some(v)) => *kept = Some(v),
        (Some(k), Some(v)) if k != v => conflicts.push(FieldConflict {
            source_id: source_id.to_string(),
            bimester,
            field,
            kept: k,
            dropped: v,
        }),
        _ => {}
    }
}

/// Folds `source` into `target`: the target's non-null values win, gaps are
/// filled from the source and `faltas` takes the larger count.
pub fn merge_bimesters(
    target: &mut Bimesters,
    source: &Bimesters,
    source_id: &str,
    conflicts: &mut Vec<FieldConflict>,
) {
    for b in BimesterNumber::ALL {
        let from: &BimesterSlot = source.get(b);
        let into = target.get_mut(b);
        merge_grade(&mut into.nota, from.nota, "nota", b, source_id, conflicts);
        merge_grade(
            &mut into.recuperacao,
            from.recuperacao,
            "recuperacao",
            b,
            source_id,
            conflicts,
        );
        merge_grade(&mut into.media, from.media, "media", b, source_id, conflicts);
        into.faltas = match (into.faltas, from.faltas) {
            (Some(a), Some(c)) => Some(a.max(c)),
            (a, c) => a.or(c),
        };
    }
}

/// The subject bucket an entry falls in, resolved with the same context the
/// integrity scan uses.
fn entry_bucket(
    store: &dyn DocumentStore,
    catalog: &SubjectCatalog,
    entry: &ReportCardEntry,
) -> Result<String, StoreError> {
    let student = fetch_record::<StudentRecord>(store, &entry.student_id)?;
    let teacher = match entry.teacher_id.as_deref() {
        Some(t) => fetch_record::<TeacherRecord>(store, t)?,
        None => None,
    };
    let ctx = ResolveContext {
        teacher: teacher.as_ref(),
        grade_level: student
            .as_ref()
            .map(|s| s.grade_level.as_str())
            .or(entry.grade_level.as_deref()),
        school_class: student
            .as_ref()
            .map(|s| s.school_class.as_str())
            .or(entry.school_class.as_deref()),
    };
    Ok(subjects::bucket_key(&entry.subject, catalog, &ctx).0)
}

fn merge_group(
    store: &dyn DocumentStore,
    session: &SessionContext,
    catalog: &SubjectCatalog,
    request: &MergeRequest,
) -> MergeOutcome {
    let canonical = request.canonical.as_str();
    if !catalog.is_canonical(canonical) {
        return MergeOutcome::failed(
            canonical,
            format!("{} is not a canonical subject id; resolve the subject first", canonical),
        );
    }

    // Reads first; any read error abandons this group only.
    let mut entries = Vec::new();
    let mut seen = HashSet::new();
    for id in request.entry_ids.iter().filter(|id| seen.insert(id.as_str())) {
        match fetch_record::<ReportCardEntry>(store, id) {
            Ok(Some(e)) => entries.push(e),
            Ok(None) => tracing::debug!(entry_id = %id, "merge source already gone"),
            Err(e) => return MergeOutcome::failed(canonical, e.to_string()),
        }
    }
    if entries.len() < 2 {
        return MergeOutcome::new(canonical, MergeStatus::Skipped);
    }
    let students: BTreeSet<&str> = entries.iter().map(|e| e.student_id.as_str()).collect();
    if students.len() > 1 {
        return MergeOutcome::failed(canonical, "entries belong to different students");
    }
    for e in &entries {
        match entry_in_session(store, session, e) {
            Ok(true) => {}
            Ok(false) => return MergeOutcome::failed(canonical, "entry is outside the session's unit"),
            Err(err) => return MergeOutcome::failed(canonical, err.to_string()),
        }
        match entry_bucket(store, catalog, e) {
            Ok(bucket) if bucket == canonical => {}
            Ok(bucket) => {
                return MergeOutcome::failed(
                    canonical,
                    format!("entry {} is {}, not {}", e.id, bucket, canonical),
                )
            }
            Err(err) => return MergeOutcome::failed(canonical, err.to_string()),
        }
    }

    let target_at = pick_target(&entries, canonical);
    let target = entries.remove(target_at);
    let mut merged = target.bimesters.clone();
    let mut conflicts = Vec::new();
    let mut teacher_id = target.teacher_id.clone().filter(|t| !t.trim().is_empty());
    for source in &entries {
        merge_bimesters(&mut merged, &source.bimesters, &source.id, &mut conflicts);
        if teacher_id.is_none() {
            teacher_id = source.teacher_id.clone().filter(|t| !t.trim().is_empty());
        }
    }

    let bimesters = match serde_json::to_value(&merged) {
        Ok(v) => v,
        Err(e) => return MergeOutcome::failed(canonical, e.to_string()),
    };
    let mut patch = json!({ "subject": canonical, "bimesters": bimesters });
    if let Some(t) = &teacher_id {
        patch["teacherId"] = Value::String(t.clone());
    }

    // The target write and as many deletes as fit land in one batch. Sources
    // past the batch limit are deleted in follow-up chunks.
    let mut batch = store.batch(Kind::Grades);
    let first_deletes = entries.len().min(store.batch_limit().saturating_sub(1));
    let staged = batch.merge(target.id.clone(), patch).and_then(|_| {
        entries[..first_deletes]
            .iter()
            .try_for_each(|s| batch.delete(s.id.clone()))
    });
    if let Err(e) = staged.and_then(|_| store.commit(batch)) {
        tracing::error!(target_id = %target.id, error = %e, "duplicate merge failed");
        return MergeOutcome::failed(canonical, e.to_string());
    }
    let mut deleted: Vec<String> = entries[..first_deletes].iter().map(|e| e.id.clone()).collect();

    let rest: Vec<BatchOp> = entries[first_deletes..]
        .iter()
        .map(|e| BatchOp::Delete { id: e.id.clone() })
        .collect();
    let mut leftover: Vec<String> = Vec::new();
    for o in commit_chunked(store, Kind::Grades, rest) {
        if o.committed {
            deleted.extend(
                entries[first_deletes + o.start..first_deletes + o.end]
                    .iter()
                    .map(|e| e.id.clone()),
            );
        } else {
            leftover.extend(o.unprocessed_ids);
        }
    }
    let error = (!leftover.is_empty()).then(|| {
        format!("target merged but sources were not deleted: {}", leftover.join(", "))
    });

    if !conflicts.is_empty() {
        tracing::warn!(target_id = %target.id, conflicts = conflicts.len(), "merge kept target values over sources");
    }
    let status = if error.is_some() {
        MergeStatus::Failed
    } else {
        MergeStatus::Merged
    };
    MergeOutcome {
        target_id: Some(target.id),
        deleted,
        conflicts,
        error,
        ..MergeOutcome::new(canonical, status)
    }
}

/// Collapses each duplicate group onto one target entry carrying the
/// canonical subject id and deletes the rest. Groups commit independently.
pub fn merge_duplicates(
    store: &dyn DocumentStore,
    session: &SessionContext,
    requests: &[MergeRequest],
) -> Result<MergeReport, ApplyError> {
    require_fix_role(session)?;
    if requests.iter().all(|r| r.entry_ids.is_empty()) {
        return Err(ApplyError::NothingSelected);
    }

    let academic: Vec<AcademicSubject> = fetch_records(store)?;
    let catalog = SubjectCatalog::new(&academic);

    let mut report = MergeReport::default();
    for request in requests {
        let outcome = merge_group(store, session, &catalog, request);
        match outcome.status {
            MergeStatus::Merged => report.merged += 1,
            MergeStatus::Skipped => report.skipped += 1,
            MergeStatus::Failed => report.failed += 1,
        }
        report.groups.push(outcome);
    }
    tracing::info!(
        merged = report.merged,
        skipped = report.skipped,
        failed = report.failed,
        "duplicate groups processed"
    );
    Ok(report)
}

/// One subject rewrite accepted by the operator.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectFix {
    pub kind: String,
    pub doc_id: String,
    pub field: String,
    #[serde(default)]
    pub item_index: Option<usize>,
    pub from: String,
    pub to: String,
}

enum Rewrite {
    Changed,
    AlreadyDone,
    Stale,
}

fn rewrite_subject_field(value: Option<&mut Value>, from: &str, to: &str) -> Rewrite {
    match value {
        Some(v) if v.as_str() == Some(from) => {
            *v = Value::String(to.to_string());
            Rewrite::Changed
        }
        Some(v) if v.as_str() == Some(to) => Rewrite::AlreadyDone,
        _ => Rewrite::Stale,
    }
}

/// Applies one fix to a document body held in memory.
fn rewrite_document(data: &mut Value, fix: &SubjectFix) -> Rewrite {
    match fix.field.as_str() {
        "subject" => rewrite_subject_field(data.get_mut("subject"), &fix.from, &fix.to),
        "items" => {
            let slot = fix
                .item_index
                .and_then(|i| data.get_mut("items").and_then(|items| items.get_mut(i)))
                .and_then(|item| item.get_mut("subject"));
            rewrite_subject_field(slot, &fix.from, &fix.to)
        }
        "subjects" => {
            let Some(list) = data.get_mut("subjects").and_then(Value::as_array_mut) else {
                return Rewrite::Stale;
            };
            let had_from = list.iter().any(|v| v.as_str() == Some(fix.from.as_str()));
            let had_to = list.iter().any(|v| v.as_str() == Some(fix.to.as_str()));
            if !had_from {
                return if had_to { Rewrite::AlreadyDone } else { Rewrite::Stale };
            }
            let mut seen = HashSet::new();
            let rewritten: Vec<Value> = list
                .iter()
                .map(|v| {
                    if v.as_str() == Some(fix.from.as_str()) {
                        Value::String(fix.to.clone())
                    } else {
                        v.clone()
                    }
                })
                .filter(|v| seen.insert(v.to_string()))
                .collect();
            *list = rewritten;
            Rewrite::Changed
        }
        "assignments" => {
            let Some(list) = data.get_mut("assignments").and_then(Value::as_array_mut) else {
                return Rewrite::Stale;
            };
            let mut result = Rewrite::Stale;
            for a in list.iter_mut() {
                match rewrite_subject_field(a.get_mut("subject"), &fix.from, &fix.to) {
                    Rewrite::Changed => result = Rewrite::Changed,
                    Rewrite::AlreadyDone if !matches!(result, Rewrite::Changed) => {
                        result = Rewrite::AlreadyDone
                    }
                    _ => {}
                }
            }
            result
        }
        _ => Rewrite::Stale,
    }
}

/// Rewrites non-canonical subject strings to the chosen canonical ids.
/// Fixes are grouped per document so every array edit of one teacher lands
/// in a single write.
pub fn normalize_subjects(
    store: &dyn DocumentStore,
    session: &SessionContext,
    fixes: &[SubjectFix],
) -> Result<ApplyReport, ApplyError> {
    require_fix_role(session)?;
    if fixes.is_empty() {
        return Err(ApplyError::NothingSelected);
    }

    let academic: Vec<AcademicSubject> = fetch_records(store)?;
    let catalog = SubjectCatalog::new(&academic);

    let mut report = ApplyReport::default();
    let mut grouped: BTreeMap<(Kind, &str), Vec<&SubjectFix>> = BTreeMap::new();
    for fix in fixes {
        let Some(kind) = Kind::parse(&fix.kind) else {
            report.fail(&fix.doc_id, format!("unknown record kind {}", fix.kind));
            continue;
        };
        if !catalog.is_canonical(&fix.to) {
            report.fail(&fix.doc_id, format!("{} is not a canonical subject id", fix.to));
            continue;
        }
        grouped.entry((kind, fix.doc_id.as_str())).or_default().push(fix);
    }

    let mut ops: BTreeMap<Kind, Vec<BatchOp>> = BTreeMap::new();
    for ((kind, doc_id), doc_fixes) in grouped {
        let doc = match store.fetch_one(kind, doc_id) {
            Ok(Some(d)) => d,
            Ok(None) => {
                report.fail(doc_id, format!("{} record no longer exists", kind));
                continue;
            }
            Err(e) => {
                report.fail(doc_id, e.to_string());
                continue;
            }
        };
        let mut data = doc.data;
        let mut touched: BTreeSet<&str> = BTreeSet::new();
        let mut stale = Vec::new();
        for fix in doc_fixes {
            match rewrite_document(&mut data, fix) {
                Rewrite::Changed => {
                    touched.insert(fix.field.as_str());
                }
                Rewrite::AlreadyDone => {}
                Rewrite::Stale => stale.push(fix.from.as_str()),
            }
        }
        if !stale.is_empty() {
            report.fail(doc_id, format!("subject no longer matches: {}", stale.join(", ")));
        }
        if touched.is_empty() {
            if stale.is_empty() {
                report.skipped.push(doc_id.to_string());
            }
            continue;
        }
        let mut patch = Map::new();
        for field in touched {
            if let Some(v) = data.get(field) {
                patch.insert(field.to_string(), v.clone());
            }
        }
        ops.entry(kind).or_default().push(BatchOp::Merge {
            id: doc_id.to_string(),
            data: Value::Object(patch),
        });
    }

    for (kind, kind_ops) in ops {
        report.commit(store, kind, kind_ops);
    }
    tracing::info!(
        succeeded = report.succeeded.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "subject ids normalized"
    );
    Ok(report)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GhostSelection {
    pub grades: Vec<String>,
    pub schedules: Vec<String>,
    pub attendance: Vec<String>,
}

impl GhostSelection {
    pub fn is_empty(&self) -> bool {
        self.grades.is_empty() && self.schedules.is_empty() && self.attendance.is_empty()
    }
}

/// Deletes the selected ghost records after re-checking each is still a
/// ghost. Records that gained data since the scan are left alone.
pub fn delete_ghosts(
    store: &dyn DocumentStore,
    session: &SessionContext,
    selection: &GhostSelection,
    confirmation: &str,
) -> Result<ApplyReport, ApplyError> {
    require_fix_role(session)?;
    if selection.is_empty() {
        return Err(ApplyError::NothingSelected);
    }
    if confirmation.trim() != DELETE_CONFIRMATION {
        return Err(ApplyError::ConfirmationMismatch {
            expected: DELETE_CONFIRMATION,
        });
    }

    let mut report = ApplyReport::default();

    let students: HashSet<String> = fetch_records::<StudentRecord>(store)?
        .into_iter()
        .map(|s| s.id)
        .collect();
    let mut grade_ops = Vec::new();
    for id in &selection.grades {
        match fetch_record::<ReportCardEntry>(store, id) {
            Ok(None) => report.skipped.push(id.clone()),
            Ok(Some(e)) if students.contains(&e.student_id) && e.has_teacher() => {
                report.fail(id.as_str(), "entry is no longer a ghost")
            }
            Ok(Some(e)) => match entry_in_session(store, session, &e) {
                Ok(true) => grade_ops.push(BatchOp::Delete { id: id.clone() }),
                Ok(false) => report.fail(id.as_str(), "entry is outside the session's unit"),
                Err(err) => report.fail(id.as_str(), err.to_string()),
            },
            Err(e) => report.fail(id.as_str(), e.to_string()),
        }
    }
    report.commit(store, Kind::Grades, grade_ops);

    let mut schedule_ops = Vec::new();
    for id in &selection.schedules {
        match fetch_record::<ClassSchedule>(store, id) {
            Ok(None) => report.skipped.push(id.clone()),
            Ok(Some(s)) if s.is_ghost() && session.unit_in_scope(&s.unit) => {
                schedule_ops.push(BatchOp::Delete { id: id.clone() })
            }
            Ok(Some(s)) if s.is_ghost() => report.fail(id.as_str(), "schedule is outside the session's unit"),
            Ok(Some(_)) => report.fail(id.as_str(), "schedule has lessons again"),
            Err(e) => report.fail(id.as_str(), e.to_string()),
        }
    }
    report.commit(store, Kind::ClassSchedules, schedule_ops);

    let mut attendance_ops = Vec::new();
    for id in &selection.attendance {
        match fetch_record::<crate::model::AttendanceRecord>(store, id) {
            Ok(None) => report.skipped.push(id.clone()),
            Ok(Some(r)) if r.is_ghost() && session.unit_in_scope(&r.unit) => {
                attendance_ops.push(BatchOp::Delete { id: id.clone() })
            }
            Ok(Some(r)) if r.is_ghost() => report.fail(id.as_str(), "record is outside the session's unit"),
            Ok(Some(_)) => report.fail(id.as_str(), "record has student lines again"),
            Err(e) => report.fail(id.as_str(), e.to_string()),
        }
    }
    report.commit(store, Kind::Attendance, attendance_ops);

    tracing::info!(
        deleted = report.succeeded.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "ghost records deleted"
    );
    Ok(report)
}
