use rusqlite::Connection;
use serde_json::Value;

use crate::ipc::helpers::{
    engine_config, get_optional_bool, get_optional_str, get_required, parse_session, resolve_year,
    store_for, to_json, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::reconcile::apply::{self, GhostSelection, MergeRequest, SubjectFix};
use crate::reconcile::scan::{self, Discrepancy};
use crate::reconcile::ScanData;

fn scan_absences(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let session = parse_session(params)?;
    let cfg = engine_config(conn)?;
    let year = resolve_year(params, &cfg)?;
    let filter = get_optional_bool(params, "filterUnscheduled")?
        .unwrap_or(cfg.filter_unscheduled_sessions);
    let store = store_for(conn, &cfg);
    let data = ScanData::load(&store, &session)?.with_lesson_minutes(cfg.lesson_minutes);
    to_json(&scan::scan_absences(&data, year, filter))
}

fn scan_integrity(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let session = parse_session(params)?;
    let cfg = engine_config(conn)?;
    let year = resolve_year(params, &cfg)?;
    let store = store_for(conn, &cfg);
    let data = ScanData::load(&store, &session)?;
    to_json(&scan::scan_integrity(&data, year))
}

fn apply_absences(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let session = parse_session(params)?;
    let selected: Vec<Discrepancy> = get_required(params, "discrepancies")?;
    let store = store_for(conn, &engine_config(conn)?);
    to_json(&apply::apply_absence_fixes(&store, &session, &selected)?)
}

fn merge_duplicates(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let session = parse_session(params)?;
    let groups: Vec<MergeRequest> = get_required(params, "groups")?;
    let store = store_for(conn, &engine_config(conn)?);
    to_json(&apply::merge_duplicates(&store, &session, &groups)?)
}

fn normalize_subjects(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let session = parse_session(params)?;
    let fixes: Vec<SubjectFix> = get_required(params, "fixes")?;
    let store = store_for(conn, &engine_config(conn)?);
    to_json(&apply::normalize_subjects(&store, &session, &fixes)?)
}

fn delete_ghosts(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let session = parse_session(params)?;
    let selection: GhostSelection = get_required(params, "selection")?;
    let confirmation = get_optional_str(params, "confirmation").unwrap_or_default();
    let store = store_for(conn, &engine_config(conn)?);
    to_json(&apply::delete_ghosts(&store, &session, &selection, &confirmation)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reconcile.scanAbsences" => Some(with_db(state, req, scan_absences)),
        "reconcile.scanIntegrity" => Some(with_db(state, req, scan_integrity)),
        "reconcile.applyAbsences" => Some(with_db(state, req, apply_absences)),
        "reconcile.mergeDuplicates" => Some(with_db(state, req, merge_duplicates)),
        "reconcile.normalizeSubjects" => Some(with_db(state, req, normalize_subjects)),
        "reconcile.deleteGhosts" => Some(with_db(state, req, delete_ghosts)),
        _ => None,
    }
}
