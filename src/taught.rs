use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;

use crate::calendar::{self, ClassScope, DayResolution};
use crate::matrix;
use crate::model::{AcademicSubject, CalendarEvent, ClassSchedule, ScheduleItem};

pub const DEFAULT_LESSON_MINUTES: u32 = 60;

/// Curriculum inputs shared by every denominator computation.
#[derive(Debug, Clone, Copy)]
pub struct Curriculum<'a> {
    pub academic_subjects: &'a [AcademicSubject],
    /// Minutes that make one lesson-equivalent unit.
    pub lesson_minutes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TaughtSource {
    Schedule,
    Matrix,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaughtClasses {
    pub taught: f64,
    pub school_days: u32,
    pub weekly_hours: u32,
    pub source: TaughtSource,
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Lesson-equivalent length of one timetable slot. Slots without a usable
/// time span count as one lesson.
pub fn slot_lessons(item: &ScheduleItem, lesson_minutes: u32) -> f64 {
    let parse = |t: &Option<String>| {
        t.as_deref()
            .and_then(|s| NaiveTime::parse_from_str(s.trim(), "%H:%M").ok())
    };
    match (parse(&item.start_time), parse(&item.end_time)) {
        (Some(start), Some(end)) if end > start && lesson_minutes > 0 => {
            (end - start).num_minutes() as f64 / lesson_minutes as f64
        }
        _ => 1.0,
    }
}

/// Counts lesson-equivalents of `subject` held for a class in
/// `[start, end]`.
///
/// With schedule data for the class, every day is resolved through the
/// calendar and the matching slots of its effective weekday are summed.
/// Without it the curriculum matrix is spread over the school days:
/// `weekly_hours / 5 * school_days`. Empty or inverted ranges yield zero.
pub fn taught_classes(
    subject: &str,
    start: NaiveDate,
    end: NaiveDate,
    scope: &ClassScope<'_>,
    schedules: Option<&[ClassSchedule]>,
    events: &[CalendarEvent],
    curriculum: &Curriculum<'_>,
) -> TaughtClasses {
    let weekly_hours = matrix::weekly_hours(subject, scope.grade_level, curriculum.academic_subjects);
    let school_days = calendar::count_school_days(start, end, events, scope.unit);

    let schedules = schedules.filter(|s| calendar::has_schedule_data(s, scope));
    let Some(schedules) = schedules else {
        let taught = weekly_hours as f64 / 5.0 * school_days as f64;
        return TaughtClasses {
            taught: round2(taught.max(0.0)),
            school_days,
            weekly_hours,
            source: TaughtSource::Matrix,
        };
    };

    let mut taught = 0.0;
    if start <= end {
        for day in start.iter_days().take_while(|d| *d <= end) {
            let weekday = match calendar::resolve_day(day, Some(subject), events, scope) {
                DayResolution::Cancelled => continue,
                DayResolution::Runs { weekday, .. } => weekday,
            };
            taught += calendar::subject_slots(schedules, scope, weekday, subject)
                .into_iter()
                .map(|item| slot_lessons(item, curriculum.lesson_minutes))
                .sum::<f64>();
        }
    }

    TaughtClasses {
        taught: round2(taught.max(0.0)),
        school_days,
        weekly_hours,
        source: TaughtSource::Schedule,
    }
}
