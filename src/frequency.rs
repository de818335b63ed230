//! Attendance percentages per subject, per bimester and overall.

use chrono::{Datelike, NaiveDate};
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;

use crate::aggregate::{self, AbsenceScope, SessionFilter};
use crate::bimester;
use crate::calendar::ClassScope;
use crate::matrix;
use crate::model::{
    AcademicSettings, AttendanceRecord, BimesterNumber, CalendarEvent, ClassSchedule,
    ReportCardEntry, StudentRecord,
};
use crate::taught::{self, Curriculum, TaughtSource};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Percentage {
    Value(f64),
    /// Nothing was taught or expected; rendered as "-".
    NotApplicable,
}

impl Percentage {
    pub fn value(self) -> Option<f64> {
        match self {
            Percentage::Value(v) => Some(v),
            Percentage::NotApplicable => None,
        }
    }
}

impl Serialize for Percentage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.value() {
            Some(v) => serializer.serialize_f64((v * 10.0).round() / 10.0),
            None => serializer.serialize_str("-"),
        }
    }
}

/// `(denominator - absences) / denominator * 100`, clamped to `[0, 100]`.
pub fn percentage(denominator: f64, absences: f64) -> Percentage {
    if !denominator.is_finite() || denominator <= 0.0 || !absences.is_finite() {
        return Percentage::NotApplicable;
    }
    let pct = (denominator - absences) / denominator * 100.0;
    Percentage::Value(pct.clamp(0.0, 100.0))
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Load {
    pub denominator: f64,
    pub absences: f64,
}

/// Overall frequency: sums every active subject's load and divides once, so
/// low-hour subjects do not dominate the result. Absences logged in a
/// subject with nothing taught still count against the total.
pub fn general_frequency(loads: &[Load]) -> Percentage {
    let total = loads
        .iter()
        .fold(Load::default(), |acc, l| Load {
            denominator: acc.denominator + l.denominator,
            absences: acc.absences + l.absences,
        });
    percentage(total.denominator, total.absences)
}

/// How many bimesters count towards annual figures on `as_of`: the bimester
/// the calendar says we are in, or a later one if the settings mark it as
/// current or attendance was already logged there. A finished year counts
/// all four.
pub fn elapsed_bimesters(
    as_of: NaiveDate,
    year: i32,
    settings: Option<&AcademicSettings>,
    highest_logged: Option<BimesterNumber>,
) -> BimesterNumber {
    let implied = if as_of.year() > year {
        BimesterNumber::Fourth
    } else if as_of.year() < year {
        BimesterNumber::First
    } else {
        let resolved = bimester::resolve_bimester(as_of, settings).bimester;
        settings
            .and_then(|s| s.current_bimester)
            .map_or(resolved, |c| resolved.max(c))
    };
    highest_logged.map_or(implied, |h| implied.max(h))
}

/// Everything a frequency report reads.
#[derive(Debug, Clone, Copy)]
pub struct FrequencyInputs<'a> {
    pub attendance: &'a [AttendanceRecord],
    pub schedules: &'a [ClassSchedule],
    pub events: &'a [CalendarEvent],
    pub settings: &'a [AcademicSettings],
    pub curriculum: Curriculum<'a>,
    pub filter_unscheduled: bool,
}

impl<'a> FrequencyInputs<'a> {
    pub fn session_filter(&self) -> Option<SessionFilter<'a>> {
        self.filter_unscheduled.then_some(SessionFilter {
            schedules: self.schedules,
            events: self.events,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BimesterFrequency {
    pub bimester: BimesterNumber,
    pub taught: f64,
    pub absences: u32,
    pub source: TaughtSource,
    pub percentage: Percentage,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectFrequency {
    pub subject: String,
    pub weekly_hours: u32,
    pub bimesters: Vec<BimesterFrequency>,
    pub taught: f64,
    pub absences: u32,
    pub annual: Percentage,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentFrequency {
    pub student_id: String,
    pub name: String,
    pub year: i32,
    pub elapsed_bimesters: BimesterNumber,
    pub subjects: Vec<SubjectFrequency>,
    pub absences: u32,
    pub general: Percentage,
}

fn student_scope(student: &StudentRecord) -> ClassScope<'_> {
    ClassScope {
        unit: &student.unit,
        grade_level: &student.grade_level,
        school_class: &student.school_class,
        shift: student.shift.as_deref(),
    }
}

/// False only for subjects configured with `active: false`.
pub fn is_active_subject(subject: &str, curriculum: &Curriculum<'_>) -> bool {
    curriculum
        .academic_subjects
        .iter()
        .find(|s| s.id == subject)
        .map_or(true, |s| s.active)
}

/// Subjects a student is followed in: their report-card subjects for the
/// year plus anything on the class timetable. With neither, the built-in
/// matrix subjects taught in the grade. Inactive subjects are left out.
pub fn subjects_for_student(
    student: &StudentRecord,
    entries: &[ReportCardEntry],
    year: i32,
    inputs: &FrequencyInputs<'_>,
) -> Vec<String> {
    let scope = student_scope(student);
    let mut subjects: BTreeSet<String> = entries
        .iter()
        .filter(|e| e.student_id == student.id && e.year.map_or(true, |y| y == year))
        .map(|e| e.subject.clone())
        .collect();
    for sched in crate::calendar::class_schedules(inputs.schedules, &scope) {
        subjects.extend(sched.items.iter().map(|i| i.subject.clone()));
    }
    if subjects.is_empty() {
        subjects.extend(
            matrix::default_subject_ids()
                .filter(|id| {
                    matrix::weekly_hours(id, &student.grade_level, inputs.curriculum.academic_subjects)
                        > 0
                })
                .map(str::to_string),
        );
    }
    subjects
        .into_iter()
        .filter(|s| is_active_subject(s, &inputs.curriculum))
        .collect()
}

/// Per-subject, per-bimester frequency of one student for `year`, as of
/// `as_of`. The running bimester is counted only up to `as_of`.
pub fn student_frequency(
    student: &StudentRecord,
    subjects: &[String],
    year: i32,
    as_of: NaiveDate,
    inputs: &FrequencyInputs<'_>,
) -> StudentFrequency {
    let scope = student_scope(student);
    let settings = bimester::effective_settings(inputs.settings, year, &student.unit);
    let own_records: Vec<AttendanceRecord> = inputs
        .attendance
        .iter()
        .filter(|r| r.date.year() == year && r.student_status.contains_key(&student.id))
        .cloned()
        .collect();
    let elapsed = elapsed_bimesters(
        as_of,
        year,
        settings,
        aggregate::highest_logged_bimester(&own_records, inputs.settings),
    );
    let filter = inputs.session_filter();

    let mut rows = Vec::new();
    let mut loads = Vec::new();
    for subject in subjects {
        let weekly_hours =
            matrix::weekly_hours(subject, &student.grade_level, inputs.curriculum.academic_subjects);
        let mut bimesters = Vec::new();
        let mut load = Load::default();
        let mut absences_total = 0u32;
        for b in elapsed.up_to() {
            let Some((start, mut end)) = bimester::bimester_range(year, b, settings) else {
                continue;
            };
            if b == elapsed && as_of < end && as_of >= start {
                end = as_of;
            }
            let taught = taught::taught_classes(
                subject,
                start,
                end,
                &scope,
                Some(inputs.schedules),
                inputs.events,
                &inputs.curriculum,
            );
            let absences = aggregate::absence_weight(
                &student.id,
                subject,
                &AbsenceScope::Bimester {
                    year,
                    number: b,
                    settings: inputs.settings,
                },
                &own_records,
                filter.as_ref(),
            );
            load.denominator += taught.taught;
            load.absences += absences as f64;
            absences_total = absences_total.saturating_add(absences);
            bimesters.push(BimesterFrequency {
                bimester: b,
                taught: taught.taught,
                absences,
                source: taught.source,
                percentage: percentage(taught.taught, absences as f64),
            });
        }
        // An inactive subject asked for by name still gets its row.
        if is_active_subject(subject, &inputs.curriculum) {
            loads.push(load);
        }
        rows.push(SubjectFrequency {
            subject: subject.clone(),
            weekly_hours,
            bimesters,
            taught: load.denominator,
            absences: absences_total,
            annual: percentage(load.denominator, load.absences),
        });
    }

    StudentFrequency {
        student_id: student.id.clone(),
        name: student.name.clone(),
        year,
        elapsed_bimesters: elapsed,
        absences: rows.iter().map(|r| r.absences).fold(0, u32::saturating_add),
        subjects: rows,
        general: general_frequency(&loads),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    #[test]
    fn zero_denominator_is_not_applicable() {
        assert_eq!(percentage(0.0, 3.0), Percentage::NotApplicable);
        assert_eq!(percentage(0.0, 0.0).value(), None);
    }

    #[test]
    fn absences_past_denominator_clamp_to_zero() {
        assert_eq!(percentage(10.0, 14.0), Percentage::Value(0.0));
        assert_eq!(percentage(40.0, 10.0), Percentage::Value(75.0));
    }

    #[test]
    fn general_frequency_is_not_an_average_of_percentages() {
        let loads = [
            Load {
                denominator: 80.0,
                absences: 8.0,
            },
            Load {
                denominator: 10.0,
                absences: 5.0,
            },
        ];
        let general = general_frequency(&loads).value().expect("value");
        // 77 / 90 rather than (90 + 50) / 2.
        assert!((general - 77.0 / 90.0 * 100.0).abs() < 1e-9);
        assert!((general - 70.0).abs() > 1.0);
    }

    #[test]
    fn absences_without_taught_lessons_still_count_in_general() {
        let loads = [
            Load {
                denominator: 40.0,
                absences: 2.0,
            },
            Load {
                denominator: 0.0,
                absences: 2.0,
            },
        ];
        assert_eq!(general_frequency(&loads), Percentage::Value(90.0));
        assert_eq!(
            general_frequency(&[Load {
                denominator: 0.0,
                absences: 3.0
            }]),
            Percentage::NotApplicable
        );
    }

    fn medio_student() -> StudentRecord {
        StudentRecord {
            id: "st1".into(),
            name: "Bruna".into(),
            unit: "north".into(),
            grade_level: "1ª Série - Ensino Médio".into(),
            school_class: "A".into(),
            shift: None,
            status: None,
        }
    }

    fn biology_absence(date: &str) -> AttendanceRecord {
        let mut student_status = std::collections::BTreeMap::new();
        student_status.insert("st1".to_string(), crate::model::AttendanceStatus::Absent);
        AttendanceRecord {
            id: date.into(),
            date: d(date),
            unit: "north".into(),
            grade_level: "1ª Série - Ensino Médio".into(),
            school_class: "A".into(),
            shift: None,
            subject: "sub_biology".into(),
            teacher_id: None,
            student_status,
            lesson_count: None,
            student_absence_count: std::collections::BTreeMap::new(),
        }
    }

    #[test]
    fn inactive_subjects_stay_out_of_general_frequency() {
        let academic = vec![crate::model::AcademicSubject {
            id: "sub_biology".into(),
            name: "Biologia".into(),
            short_name: None,
            weekly_hours: std::collections::BTreeMap::new(),
            active: false,
        }];
        let attendance = vec![biology_absence("2026-03-02"), biology_absence("2026-03-03")];
        let inputs = FrequencyInputs {
            attendance: &attendance,
            schedules: &[],
            events: &[],
            settings: &[],
            curriculum: Curriculum {
                academic_subjects: &academic,
                lesson_minutes: 50,
            },
            filter_unscheduled: false,
        };
        let student = medio_student();
        let entry = |id: &str, subject: &str| ReportCardEntry {
            id: id.into(),
            student_id: "st1".into(),
            subject: subject.into(),
            year: Some(2026),
            teacher_id: Some("t1".into()),
            unit: None,
            grade_level: None,
            school_class: None,
            bimesters: Default::default(),
        };
        let entries = vec![entry("g1", "sub_math"), entry("g2", "sub_biology")];

        assert_eq!(
            subjects_for_student(&student, &entries, 2026, &inputs),
            vec!["sub_math".to_string()]
        );

        // Asked for by name, biology gets a row but does not weigh on general.
        let subjects = vec!["sub_math".to_string(), "sub_biology".to_string()];
        let report = student_frequency(&student, &subjects, 2026, d("2026-03-31"), &inputs);
        assert_eq!(report.subjects.len(), 2);
        assert_eq!(report.subjects[1].absences, 2);
        assert_eq!(report.general, Percentage::Value(100.0));
    }

    #[test]
    fn elapsed_bimesters_follow_logged_data() {
        assert_eq!(
            elapsed_bimesters(d("2026-02-10"), 2026, None, Some(BimesterNumber::Second)),
            BimesterNumber::Second
        );
        assert_eq!(
            elapsed_bimesters(d("2026-08-10"), 2026, None, Some(BimesterNumber::First)),
            BimesterNumber::Third
        );
        assert_eq!(
            elapsed_bimesters(d("2027-02-10"), 2026, None, None),
            BimesterNumber::Fourth
        );
    }

    #[test]
    fn configured_current_bimester_moves_elapsed_forward() {
        let settings = AcademicSettings {
            id: "2026_all".into(),
            year: 2026,
            unit: "all".into(),
            current_bimester: Some(BimesterNumber::Second),
            bimesters: vec![],
        };
        assert_eq!(
            elapsed_bimesters(d("2026-03-20"), 2026, Some(&settings), None),
            BimesterNumber::Second
        );
        // Never pulls the calendar back.
        assert_eq!(
            elapsed_bimesters(d("2026-08-20"), 2026, Some(&settings), None),
            BimesterNumber::Third
        );
    }

    #[test]
    fn serializes_not_applicable_as_dash() {
        assert_eq!(
            serde_json::to_value(Percentage::NotApplicable).expect("json"),
            serde_json::json!("-")
        );
        assert_eq!(
            serde_json::to_value(Percentage::Value(87.549)).expect("json"),
            serde_json::json!(87.5)
        );
    }

    proptest! {
        #[test]
        fn percentage_stays_in_range(den in 0.0f64..500.0, abs in 0.0f64..1000.0) {
            match percentage(den, abs) {
                Percentage::Value(v) => {
                    prop_assert!(v.is_finite());
                    prop_assert!((0.0..=100.0).contains(&v));
                    if abs > den {
                        prop_assert_eq!(v, 0.0);
                    }
                }
                Percentage::NotApplicable => prop_assert!(den <= 0.0),
            }
        }

        #[test]
        fn general_equals_percentage_of_sums(
            loads in proptest::collection::vec((prop_oneof![Just(0.0f64), 0.5f64..100.0], 0.0f64..50.0), 1..8)
        ) {
            let loads: Vec<Load> = loads
                .into_iter()
                .map(|(denominator, absences)| Load { denominator, absences })
                .collect();
            let den: f64 = loads.iter().map(|l| l.denominator).sum();
            let abs: f64 = loads.iter().map(|l| l.absences).sum();
            prop_assert_eq!(general_frequency(&loads), percentage(den, abs));
        }

        #[test]
        fn percentage_is_deterministic(den in 0.0f64..500.0, abs in 0.0f64..500.0) {
            prop_assert_eq!(percentage(den, abs), percentage(den, abs));
        }
    }
}
