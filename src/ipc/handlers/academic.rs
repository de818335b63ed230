use chrono::Datelike;
use rusqlite::Connection;
use serde_json::{json, Value};

use crate::aggregate::{self, AbsenceScope, SessionFilter};
use crate::bimester;
use crate::calendar::{self, DayResolution};
use crate::config::EngineConfig;
use crate::frequency::{self, FrequencyInputs};
use crate::ipc::helpers::{
    engine_config, get_optional_bool, get_optional_date, get_optional_i32, get_optional_str,
    get_required_date, get_required_str, parse_session, resolve_year, store_for, to_json, today,
    with_db, ClassParams, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::matrix;
use crate::model::{
    AcademicSettings, AcademicSubject, AttendanceRecord, BimesterNumber, CalendarEvent,
    ClassSchedule, ReportCardEntry, StudentRecord,
};
use crate::store::{fetch_record, fetch_records, DocumentStore};
use crate::taught::{self, Curriculum};

/// Collections the calendar-aware computations read.
struct AcademicData {
    schedules: Vec<ClassSchedule>,
    events: Vec<CalendarEvent>,
    settings: Vec<AcademicSettings>,
    subjects: Vec<AcademicSubject>,
}

impl AcademicData {
    fn load(store: &dyn DocumentStore) -> Result<Self, HandlerErr> {
        Ok(Self {
            schedules: fetch_records(store)?,
            events: fetch_records(store)?,
            settings: fetch_records(store)?,
            subjects: fetch_records(store)?,
        })
    }

    fn curriculum(&self, cfg: &EngineConfig) -> Curriculum<'_> {
        Curriculum {
            academic_subjects: &self.subjects,
            lesson_minutes: cfg.lesson_minutes,
        }
    }
}

fn resolve_bimester(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let date = get_required_date(params, "date")?;
    let unit = get_optional_str(params, "unit").unwrap_or_else(|| "all".to_string());
    let store = store_for(conn, &engine_config(conn)?);
    let all: Vec<AcademicSettings> = fetch_records(&store)?;
    let settings = bimester::effective_settings(&all, date.year(), &unit);
    let resolution = bimester::resolve_bimester(date, settings);
    if resolution.source == bimester::BimesterSource::Fallback {
        tracing::warn!(%date, unit = %unit, "date outside configured bimester windows");
    }
    Ok(json!({
        "bimester": resolution.bimester,
        "source": resolution.source,
        "settingsId": settings.map(|s| s.id.clone()),
    }))
}

fn weekly_hours(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let subject = get_required_str(params, "subject")?;
    let grade_level = get_required_str(params, "gradeLevel")?;
    let store = store_for(conn, &engine_config(conn)?);
    let subjects: Vec<AcademicSubject> = fetch_records(&store)?;
    Ok(json!({
        "subject": subject,
        "gradeLevel": grade_level,
        "weeklyHours": matrix::weekly_hours(&subject, &grade_level, &subjects),
    }))
}

fn taught_classes(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let subject = get_required_str(params, "subject")?;
    let start = get_required_date(params, "startDate")?;
    let end = get_required_date(params, "endDate")?;
    let cfg = engine_config(conn)?;
    let class = ClassParams::from_params(params, &cfg)?;
    let store = store_for(conn, &cfg);
    let data = AcademicData::load(&store)?;
    let taught = taught::taught_classes(
        &subject,
        start,
        end,
        &class.scope(),
        Some(data.schedules.as_slice()),
        &data.events,
        &data.curriculum(&cfg),
    );
    to_json(&taught)
}

fn is_scheduled(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let date = get_required_date(params, "date")?;
    let subject = get_required_str(params, "subject")?;
    let cfg = engine_config(conn)?;
    let class = ClassParams::from_params(params, &cfg)?;
    let store = store_for(conn, &cfg);
    let schedules: Vec<ClassSchedule> = fetch_records(&store)?;
    let events: Vec<CalendarEvent> = fetch_records(&store)?;
    let scope = class.scope();
    let scheduled = calendar::is_session_scheduled(date, &subject, &schedules, &events, &scope);
    let day = match calendar::resolve_day(date, Some(subject.as_str()), &events, &scope) {
        DayResolution::Cancelled => json!({ "cancelled": true }),
        DayResolution::Runs {
            weekday,
            substituted,
        } => json!({ "cancelled": false, "weekday": weekday, "substituted": substituted }),
    };
    Ok(json!({
        "scheduled": scheduled,
        "hasScheduleData": calendar::has_schedule_data(&schedules, &scope),
        "day": day,
    }))
}

fn absences(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let subject = get_required_str(params, "subject")?;
    let cfg = engine_config(conn)?;
    let filter_unscheduled =
        get_optional_bool(params, "filterUnscheduled")?.unwrap_or(cfg.filter_unscheduled_sessions);

    let start = get_optional_date(params, "startDate")?;
    let end = get_optional_date(params, "endDate")?;
    let bimester = match get_optional_i32(params, "bimester")? {
        Some(n) => Some(
            u8::try_from(n)
                .ok()
                .and_then(BimesterNumber::from_number)
                .ok_or_else(|| HandlerErr::bad_params("bimester must be 1..=4"))?,
        ),
        None => None,
    };

    let store = store_for(conn, &cfg);
    let records: Vec<AttendanceRecord> = fetch_records(&store)?;
    let data = AcademicData::load(&store)?;
    let year = resolve_year(params, &cfg)?;
    let scope = match (bimester, start, end) {
        (Some(number), None, None) => AbsenceScope::Bimester {
            year,
            number,
            settings: &data.settings,
        },
        (None, Some(start), Some(end)) => AbsenceScope::Range { start, end },
        _ => {
            return Err(HandlerErr::bad_params(
                "give either bimester (with optional year) or startDate and endDate",
            ))
        }
    };
    let filter = filter_unscheduled.then_some(SessionFilter {
        schedules: &data.schedules,
        events: &data.events,
    });
    let total = aggregate::absence_weight(&student_id, &subject, &scope, &records, filter.as_ref());
    Ok(json!({
        "studentId": student_id,
        "subject": subject,
        "absences": total,
        "filterUnscheduled": filter_unscheduled,
    }))
}

fn frequency_inputs<'a>(
    data: &'a AcademicData,
    attendance: &'a [AttendanceRecord],
    cfg: &EngineConfig,
    params: &Value,
) -> Result<FrequencyInputs<'a>, HandlerErr> {
    Ok(FrequencyInputs {
        attendance,
        schedules: &data.schedules,
        events: &data.events,
        settings: &data.settings,
        curriculum: data.curriculum(cfg),
        filter_unscheduled: get_optional_bool(params, "filterUnscheduled")?
            .unwrap_or(cfg.filter_unscheduled_sessions),
    })
}

fn frequency_student(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let session = parse_session(params)?;
    let student_id = get_required_str(params, "studentId")?;
    let cfg = engine_config(conn)?;
    let year = resolve_year(params, &cfg)?;
    let as_of = get_optional_date(params, "asOf")?.unwrap_or_else(today);

    let store = store_for(conn, &cfg);
    let Some(student) = fetch_record::<StudentRecord>(&store, &student_id)? else {
        return Err(HandlerErr::new("not_found", format!("student {} not found", student_id)));
    };
    if !session.unit_in_scope(&student.unit) {
        return Err(HandlerErr::new("forbidden", "student is outside the session's unit"));
    }
    let data = AcademicData::load(&store)?;
    let attendance: Vec<AttendanceRecord> = fetch_records(&store)?;
    let entries: Vec<ReportCardEntry> = fetch_records(&store)?;
    let inputs = frequency_inputs(&data, &attendance, &cfg, params)?;

    let subjects = match params.get("subjects") {
        Some(Value::Array(list)) => list
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => frequency::subjects_for_student(&student, &entries, year, &inputs),
    };
    let report = frequency::student_frequency(&student, &subjects, year, as_of, &inputs);
    to_json(&report)
}

fn frequency_class(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let session = parse_session(params)?;
    let cfg = engine_config(conn)?;
    let class = ClassParams::from_params(params, &cfg)?;
    if !session.unit_in_scope(&class.unit) {
        return Err(HandlerErr::new("forbidden", "class is outside the session's unit"));
    }
    let year = resolve_year(params, &cfg)?;
    let as_of = get_optional_date(params, "asOf")?.unwrap_or_else(today);

    let store = store_for(conn, &cfg);
    let data = AcademicData::load(&store)?;
    let attendance: Vec<AttendanceRecord> = fetch_records(&store)?;
    let entries: Vec<ReportCardEntry> = fetch_records(&store)?;
    let inputs = frequency_inputs(&data, &attendance, &cfg, params)?;

    let students: Vec<StudentRecord> = fetch_records::<StudentRecord>(&store)?
        .into_iter()
        .filter(|s| {
            s.unit == class.unit
                && s.grade_level == class.grade_level
                && s.school_class == class.school_class
        })
        .collect();
    let rows: Vec<Value> = students
        .iter()
        .map(|s| {
            let subjects = frequency::subjects_for_student(s, &entries, year, &inputs);
            let report = frequency::student_frequency(s, &subjects, year, as_of, &inputs);
            json!({
                "studentId": report.student_id,
                "name": report.name,
                "status": s.status,
                "absences": report.absences,
                "general": report.general,
            })
        })
        .collect();
    tracing::debug!(class = %class.school_class, students = rows.len(), "class frequency computed");
    Ok(json!({
        "year": year,
        "unit": class.unit,
        "gradeLevel": class.grade_level,
        "schoolClass": class.school_class,
        "students": rows,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "academic.resolveBimester" => Some(with_db(state, req, resolve_bimester)),
        "academic.weeklyHours" => Some(with_db(state, req, weekly_hours)),
        "academic.taughtClasses" => Some(with_db(state, req, taught_classes)),
        "calendar.isScheduled" => Some(with_db(state, req, is_scheduled)),
        "attendance.absences" => Some(with_db(state, req, absences)),
        "frequency.student" => Some(with_db(state, req, frequency_student)),
        "frequency.class" => Some(with_db(state, req, frequency_class)),
        _ => None,
    }
}
