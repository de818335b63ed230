//! Authoritative absence totals from raw attendance logs.

use chrono::{Datelike, NaiveDate};

use crate::bimester;
use crate::calendar::{self, ClassScope};
use crate::model::{
    AcademicSettings, AttendanceRecord, AttendanceStatus, BimesterNumber, CalendarEvent,
    ClassSchedule,
};

#[derive(Debug, Clone, Copy)]
pub enum AbsenceScope<'a> {
    /// Records of `year` whose date resolves to this bimester, using the
    /// settings that apply to the record's unit.
    Bimester {
        year: i32,
        number: BimesterNumber,
        settings: &'a [AcademicSettings],
    },
    Range { start: NaiveDate, end: NaiveDate },
}

/// Calendar data used to discard sessions that should not have happened.
#[derive(Debug, Clone, Copy)]
pub struct SessionFilter<'a> {
    pub schedules: &'a [ClassSchedule],
    pub events: &'a [CalendarEvent],
}

fn in_scope(rec: &AttendanceRecord, scope: &AbsenceScope<'_>) -> bool {
    match scope {
        AbsenceScope::Bimester {
            year,
            number,
            settings,
        } => {
            if rec.date.year() != *year {
                return false;
            }
            let s = bimester::effective_settings(settings, *year, &rec.unit);
            bimester::resolve_bimester(rec.date, s).bimester == *number
        }
        AbsenceScope::Range { start, end } => *start <= rec.date && rec.date <= *end,
    }
}

fn session_counts(rec: &AttendanceRecord, filter: Option<&SessionFilter<'_>>) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    let scope = ClassScope {
        unit: &rec.unit,
        grade_level: &rec.grade_level,
        school_class: &rec.school_class,
        shift: rec.shift.as_deref(),
    };
    calendar::is_session_scheduled(rec.date, &rec.subject, filter.schedules, filter.events, &scope)
}

/// Weight of one absence: the per-student override, else the session's
/// lesson count, else one.
pub fn record_weight(rec: &AttendanceRecord, student_id: &str) -> u32 {
    rec.student_absence_count
        .get(student_id)
        .copied()
        .or(rec.lesson_count)
        .unwrap_or(1)
}

pub fn is_absent(rec: &AttendanceRecord, student_id: &str) -> bool {
    rec.student_status.get(student_id) == Some(&AttendanceStatus::Absent)
}

/// Sums the absence weight of `student_id` in `subject` over the records in
/// scope. Subjects must match exactly; fixing mismatched subject strings is
/// the reconciliation scanner's job. Totals saturate at `u32::MAX`.
pub fn absence_weight(
    student_id: &str,
    subject: &str,
    scope: &AbsenceScope<'_>,
    records: &[AttendanceRecord],
    filter: Option<&SessionFilter<'_>>,
) -> u32 {
    records
        .iter()
        .filter(|r| r.subject == subject)
        .filter(|r| is_absent(r, student_id))
        .filter(|r| in_scope(r, scope))
        .filter(|r| session_counts(r, filter))
        .map(|r| record_weight(r, student_id))
        .fold(0u32, u32::saturating_add)
}

/// Highest bimester that has any logged session among `records`.
pub fn highest_logged_bimester(
    records: &[AttendanceRecord],
    settings: &[AcademicSettings],
) -> Option<BimesterNumber> {
    records
        .iter()
        .map(|r| {
            let year = r.date.year();
            let s = bimester::effective_settings(settings, year, &r.unit);
            bimester::resolve_bimester(r.date, s).bimester
        })
        .max()
}
