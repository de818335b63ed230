use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::ScanData;
use crate::aggregate::{self, AbsenceScope, SessionFilter};
use crate::bimester::{self, BimesterSource};
use crate::model::{BimesterNumber, ReportCardEntry};
use crate::store::Kind;
use crate::subjects::{self, Resolution, ResolveContext, SubjectCatalog};

/// A cached `faltas` value that disagrees with the attendance logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discrepancy {
    pub entry_id: String,
    pub student_id: String,
    pub subject: String,
    pub bimester: BimesterNumber,
    pub cached: u32,
    pub actual: u32,
}

/// An attendance date that fell between configured bimester windows and
/// was placed by the quarter heuristic instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BimesterFallback {
    pub unit: String,
    pub date: NaiveDate,
    pub assumed: BimesterNumber,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsenceScan {
    pub year: i32,
    pub entries_checked: usize,
    pub discrepancies: Vec<Discrepancy>,
    pub bimester_fallbacks: Vec<BimesterFallback>,
}

fn entry_in_year(e: &ReportCardEntry, year: i32) -> bool {
    e.year.map_or(true, |y| y == year)
}

/// Compares every cached absence count of `year` with the authoritative
/// total from the attendance logs.
pub fn scan_absences(data: &ScanData, year: i32, filter_unscheduled: bool) -> AbsenceScan {
    let attendance: Vec<_> = data
        .attendance
        .iter()
        .filter(|r| r.date.year() == year)
        .cloned()
        .collect();
    let filter = filter_unscheduled.then_some(SessionFilter {
        schedules: &data.schedules,
        events: &data.events,
    });

    let mut discrepancies = Vec::new();
    let mut checked = 0;
    for entry in data.entries.iter().filter(|e| entry_in_year(e, year)) {
        if data.student(&entry.student_id).is_none() {
            continue;
        }
        checked += 1;
        for b in BimesterNumber::ALL {
            let actual = aggregate::absence_weight(
                &entry.student_id,
                &entry.subject,
                &AbsenceScope::Bimester {
                    year,
                    number: b,
                    settings: &data.settings,
                },
                &attendance,
                filter.as_ref(),
            );
            let cached = entry.bimesters.get(b).cached_absences();
            if cached != actual {
                discrepancies.push(Discrepancy {
                    entry_id: entry.id.clone(),
                    student_id: entry.student_id.clone(),
                    subject: entry.subject.clone(),
                    bimester: b,
                    cached,
                    actual,
                });
            }
        }
    }

    let mut fallbacks = BTreeSet::new();
    for r in &attendance {
        let settings = bimester::effective_settings(&data.settings, year, &r.unit);
        let res = bimester::resolve_bimester(r.date, settings);
        if res.source == BimesterSource::Fallback {
            fallbacks.insert((r.unit.clone(), r.date, res.bimester));
        }
    }
    if !fallbacks.is_empty() {
        tracing::warn!(
            year,
            dates = fallbacks.len(),
            "attendance dates outside every configured bimester window; quarter heuristic used"
        );
    }

    tracing::info!(year, checked, discrepancies = discrepancies.len(), "absence drift scan finished");
    AbsenceScan {
        year,
        entries_checked: checked,
        discrepancies,
        bimester_fallbacks: fallbacks
            .into_iter()
            .map(|(unit, date, assumed)| BimesterFallback {
                unit,
                date,
                assumed,
            })
            .collect(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GhostReason {
    MissingStudent,
    MissingTeacher,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GhostGrade {
    pub entry_id: String,
    pub student_id: String,
    pub subject: String,
    pub reasons: Vec<GhostReason>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GhostSchedule {
    pub schedule_id: String,
    pub unit: String,
    pub grade_level: String,
    pub school_class: String,
    pub day_of_week: u8,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GhostAttendance {
    pub record_id: String,
    pub date: NaiveDate,
    pub subject: String,
}

/// A subject string that is not a canonical id, with the pipeline's verdict.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectIssue {
    pub kind: &'static str,
    pub doc_id: String,
    /// `subject` on grades and attendance, `items` on schedules, `subjects`
    /// or `assignments` on teachers.
    pub field: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_index: Option<usize>,
    pub value: String,
    pub suggestion: Resolution,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub student_id: String,
    /// Canonical id, or the normalized subject text when unresolved.
    pub canonical: String,
    pub resolved: bool,
    pub entry_ids: Vec<String>,
    pub subjects: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityScan {
    pub ghost_grades: Vec<GhostGrade>,
    pub ghost_schedules: Vec<GhostSchedule>,
    pub ghost_attendance: Vec<GhostAttendance>,
    pub subject_issues: Vec<SubjectIssue>,
    pub duplicates: Vec<DuplicateGroup>,
}

fn entry_context<'a>(data: &'a ScanData, entry: &'a ReportCardEntry) -> ResolveContext<'a> {
    let student = data.student(&entry.student_id);
    ResolveContext {
        teacher: entry.teacher_id.as_deref().and_then(|t| data.teacher(t)),
        grade_level: student
            .map(|s| s.grade_level.as_str())
            .or(entry.grade_level.as_deref()),
        school_class: student
            .map(|s| s.school_class.as_str())
            .or(entry.school_class.as_deref()),
    }
}

pub fn find_ghost_grades(data: &ScanData, year: i32) -> Vec<GhostGrade> {
    data.entries
        .iter()
        .filter(|e| entry_in_year(e, year))
        .filter_map(|e| {
            let mut reasons = Vec::new();
            if data.student(&e.student_id).is_none() {
                reasons.push(GhostReason::MissingStudent);
            }
            if !e.has_teacher() {
                reasons.push(GhostReason::MissingTeacher);
            }
            (!reasons.is_empty()).then(|| GhostGrade {
                entry_id: e.id.clone(),
                student_id: e.student_id.clone(),
                subject: e.subject.clone(),
                reasons,
            })
        })
        .collect()
}

pub fn find_subject_issues(data: &ScanData, year: i32, catalog: &SubjectCatalog) -> Vec<SubjectIssue> {
    let mut issues = Vec::new();
    let mut check = |kind: Kind,
                     doc_id: &str,
                     field: &'static str,
                     item_index: Option<usize>,
                     value: &str,
                     ctx: ResolveContext<'_>| {
        if catalog.is_canonical(value) {
            return;
        }
        issues.push(SubjectIssue {
            kind: kind.as_str(),
            doc_id: doc_id.to_string(),
            field,
            item_index,
            value: value.to_string(),
            suggestion: subjects::resolve_subject(value, catalog, &ctx),
        });
    };

    for e in data.entries.iter().filter(|e| entry_in_year(e, year)) {
        check(Kind::Grades, &e.id, "subject", None, &e.subject, entry_context(data, e));
    }
    for r in data.attendance.iter().filter(|r| r.date.year() == year) {
        let ctx = ResolveContext {
            teacher: r.teacher_id.as_deref().and_then(|t| data.teacher(t)),
            grade_level: Some(&r.grade_level),
            school_class: Some(&r.school_class),
        };
        check(Kind::Attendance, &r.id, "subject", None, &r.subject, ctx);
    }
    for s in &data.schedules {
        for (i, item) in s.items.iter().enumerate() {
            check(
                Kind::ClassSchedules,
                &s.id,
                "items",
                Some(i),
                &item.subject,
                ResolveContext::default(),
            );
        }
    }
    for t in &data.teachers {
        for (i, subject) in t.subjects.iter().enumerate() {
            check(Kind::Teachers, &t.id, "subjects", Some(i), subject, ResolveContext::default());
        }
        for (i, a) in t.assignments.iter().enumerate() {
            check(
                Kind::Teachers,
                &t.id,
                "assignments",
                Some(i),
                &a.subject,
                ResolveContext::default(),
            );
        }
    }
    issues
}

/// Entries of one student whose subjects land in the same canonical bucket.
pub fn find_duplicates(data: &ScanData, year: i32, catalog: &SubjectCatalog) -> Vec<DuplicateGroup> {
    let mut buckets: BTreeMap<(String, String), (bool, Vec<&ReportCardEntry>)> = BTreeMap::new();
    for e in data.entries.iter().filter(|e| entry_in_year(e, year)) {
        let (key, resolved) = subjects::bucket_key(&e.subject, catalog, &entry_context(data, e));
        buckets
            .entry((e.student_id.clone(), key))
            .or_insert_with(|| (resolved, Vec::new()))
            .1
            .push(e);
    }
    buckets
        .into_iter()
        .filter(|(_, (_, entries))| entries.len() > 1)
        .map(|((student_id, canonical), (resolved, entries))| DuplicateGroup {
            student_id,
            canonical,
            resolved,
            entry_ids: entries.iter().map(|e| e.id.clone()).collect(),
            subjects: entries.iter().map(|e| e.subject.clone()).collect(),
        })
        .collect()
}

pub fn scan_integrity(data: &ScanData, year: i32) -> IntegrityScan {
    let catalog = SubjectCatalog::new(&data.subjects);
    let scan = IntegrityScan {
        ghost_grades: find_ghost_grades(data, year),
        ghost_schedules: data
            .schedules
            .iter()
            .filter(|s| s.is_ghost())
            .map(|s| GhostSchedule {
                schedule_id: s.id.clone(),
                unit: s.unit.clone(),
                grade_level: s.grade_level.clone(),
                school_class: s.school_class.clone(),
                day_of_week: s.day_of_week,
            })
            .collect(),
        ghost_attendance: data
            .attendance
            .iter()
            .filter(|r| r.date.year() == year && r.is_ghost())
            .map(|r| GhostAttendance {
                record_id: r.id.clone(),
                date: r.date,
                subject: r.subject.clone(),
            })
            .collect(),
        subject_issues: find_subject_issues(data, year, &catalog),
        duplicates: find_duplicates(data, year, &catalog),
    };
    tracing::info!(
        year,
        ghost_grades = scan.ghost_grades.len(),
        ghost_schedules = scan.ghost_schedules.len(),
        ghost_attendance = scan.ghost_attendance.len(),
        subject_issues = scan.subject_issues.len(),
        duplicates = scan.duplicates.len(),
        "integrity scan finished"
    );
    scan
}
