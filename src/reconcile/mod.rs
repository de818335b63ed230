//! Drift and integrity reconciliation between raw attendance logs and the
//! report-card cache.
//!
//! Scans are read-only and can run in any order. Fixes go through the
//! store's merge-writes and bounded batches, grouped per logical unit
//! (per entry, per duplicate group, per document) before writing. There is
//! no isolation against concurrent edits from elsewhere: a grade saved
//! between the applier's read and its write can be lost. That race is known
//! and accepted.

pub mod apply;
pub mod scan;

use std::collections::HashMap;

use crate::model::{
    AcademicSettings, AcademicSubject, AttendanceRecord, CalendarEvent, ClassSchedule,
    ReportCardEntry, SessionContext, StudentRecord, TeacherRecord,
};
use crate::store::{fetch_records, DocumentStore, StoreError};
use crate::taught::{Curriculum, DEFAULT_LESSON_MINUTES};

/// Snapshot of every collection a scan reads, already narrowed to the
/// session's unit.
#[derive(Debug, Clone, Default)]
pub struct ScanData {
    pub students: Vec<StudentRecord>,
    pub teachers: Vec<TeacherRecord>,
    pub entries: Vec<ReportCardEntry>,
    pub attendance: Vec<AttendanceRecord>,
    pub schedules: Vec<ClassSchedule>,
    pub events: Vec<CalendarEvent>,
    pub settings: Vec<AcademicSettings>,
    pub subjects: Vec<AcademicSubject>,
    pub lesson_minutes: u32,
}

impl ScanData {
    pub fn load(store: &dyn DocumentStore, session: &SessionContext) -> Result<Self, StoreError> {
        let all_students: Vec<StudentRecord> = fetch_records(store)?;
        let unit_of: HashMap<String, String> = all_students
            .iter()
            .map(|s| (s.id.clone(), s.unit.clone()))
            .collect();

        // Entries are scoped by their student's unit, or their own when the
        // student is gone.
        let entries = fetch_records::<ReportCardEntry>(store)?
            .into_iter()
            .filter(|e| {
                let unit = unit_of.get(&e.student_id).or(e.unit.as_ref());
                match unit {
                    Some(u) => session.unit_in_scope(u),
                    None => session.effective_unit() == "all",
                }
            })
            .collect();

        let data = ScanData {
            students: all_students
                .into_iter()
                .filter(|s| session.unit_in_scope(&s.unit))
                .collect(),
            teachers: fetch_records::<TeacherRecord>(store)?
                .into_iter()
                .filter(|t| t.unit.as_deref().map_or(true, |u| session.unit_in_scope(u)))
                .collect(),
            entries,
            attendance: fetch_records::<AttendanceRecord>(store)?
                .into_iter()
                .filter(|r| session.unit_in_scope(&r.unit))
                .collect(),
            schedules: fetch_records::<ClassSchedule>(store)?
                .into_iter()
                .filter(|s| session.unit_in_scope(&s.unit))
                .collect(),
            events: fetch_records(store)?,
            settings: fetch_records(store)?,
            subjects: fetch_records(store)?,
            lesson_minutes: DEFAULT_LESSON_MINUTES,
        };
        tracing::debug!(
            unit = session.effective_unit(),
            students = data.students.len(),
            entries = data.entries.len(),
            attendance = data.attendance.len(),
            "scan data loaded"
        );
        Ok(data)
    }

    pub fn with_lesson_minutes(mut self, minutes: u32) -> Self {
        self.lesson_minutes = minutes;
        self
    }

    pub fn curriculum(&self) -> Curriculum<'_> {
        Curriculum {
            academic_subjects: &self.subjects,
            lesson_minutes: self.lesson_minutes,
        }
    }

    pub fn student(&self, id: &str) -> Option<&StudentRecord> {
        self.students.iter().find(|s| s.id == id)
    }

    pub fn teacher(&self, id: &str) -> Option<&TeacherRecord> {
        self.teachers.iter().find(|t| t.id == id)
    }
}
