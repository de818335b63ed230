//! Calendar resolution: was a class session actually held on a date?

use chrono::{Datelike, NaiveDate};

use crate::model::{scope_matches, CalendarEvent, ClassSchedule, ScheduleItem};

/// Where a session lookup happens: one class of one unit.
#[derive(Debug, Clone, Copy)]
pub struct ClassScope<'a> {
    pub unit: &'a str,
    pub grade_level: &'a str,
    pub school_class: &'a str,
    pub shift: Option<&'a str>,
}

fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

fn event_targets_class(ev: &CalendarEvent, scope: &ClassScope<'_>) -> bool {
    scope_matches(&ev.units, scope.unit)
        && scope_matches(&ev.grade_levels, scope.grade_level)
        && scope_matches(&ev.school_classes, scope.school_class)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayResolution {
    /// A holiday, vacation or recess covers the day.
    Cancelled,
    /// Classes run on the schedule of this weekday (0 = Sunday).
    Runs { weekday: u8, substituted: bool },
}

/// Resolves how `date` behaves for a class and subject.
///
/// Events are walked in the order given: the first cancelling event wins
/// outright; otherwise the last matching substitution that names a weekday
/// decides the effective weekday.
pub fn resolve_day(
    date: NaiveDate,
    subject: Option<&str>,
    events: &[CalendarEvent],
    scope: &ClassScope<'_>,
) -> DayResolution {
    let mut weekday = day_of_week(date);
    let mut substituted = false;
    for ev in events.iter().filter(|e| e.covers(date)) {
        if !event_targets_class(ev, scope) {
            continue;
        }
        if ev.event_type.cancels_sessions() {
            return DayResolution::Cancelled;
        }
        if ev.event_type.is_substitution() {
            if let Some(subject) = subject {
                if !scope_matches(&ev.subjects, subject) {
                    continue;
                }
            }
            if let Some(dow) = ev.substitute_day_of_week.filter(|d| *d <= 6) {
                weekday = dow;
                substituted = true;
            }
        }
    }
    DayResolution::Runs {
        weekday,
        substituted,
    }
}

fn schedule_matches_class(s: &ClassSchedule, scope: &ClassScope<'_>) -> bool {
    s.unit == scope.unit
        && s.grade_level == scope.grade_level
        && s.school_class == scope.school_class
        && match (scope.shift, s.shift.as_deref()) {
            (Some(want), Some(have)) => want == have,
            _ => true,
        }
}

/// Non-ghost schedules belonging to the class, any weekday.
pub fn class_schedules<'s>(
    schedules: &'s [ClassSchedule],
    scope: &ClassScope<'_>,
) -> Vec<&'s ClassSchedule> {
    schedules
        .iter()
        .filter(|s| !s.is_ghost() && schedule_matches_class(s, scope))
        .collect()
}

pub fn has_schedule_data(schedules: &[ClassSchedule], scope: &ClassScope<'_>) -> bool {
    !class_schedules(schedules, scope).is_empty()
}

/// Slots of `subject` on `weekday` for the class.
pub fn subject_slots<'s>(
    schedules: &'s [ClassSchedule],
    scope: &ClassScope<'_>,
    weekday: u8,
    subject: &str,
) -> Vec<&'s ScheduleItem> {
    class_schedules(schedules, scope)
        .into_iter()
        .filter(|s| s.day_of_week == weekday)
        .flat_map(|s| s.items.iter())
        .filter(|item| item.subject == subject)
        .collect()
}

/// Whether a `subject` session for the class was scheduled on `date`.
///
/// Without any schedule for the class the answer is `true`, so an
/// uninitialised timetable never zeroes attendance out.
pub fn is_session_scheduled(
    date: NaiveDate,
    subject: &str,
    schedules: &[ClassSchedule],
    events: &[CalendarEvent],
    scope: &ClassScope<'_>,
) -> bool {
    let weekday = match resolve_day(date, Some(subject), events, scope) {
        DayResolution::Cancelled => return false,
        DayResolution::Runs { weekday, .. } => weekday,
    };
    if !has_schedule_data(schedules, scope) {
        return true;
    }
    !subject_slots(schedules, scope, weekday, subject).is_empty()
}

/// Whether the unit holds classes at all on `date`: a weekday not
/// cancelled, or a weekend day turned into a school day by an event.
pub fn is_school_day(date: NaiveDate, events: &[CalendarEvent], unit: &str) -> bool {
    let covering: Vec<&CalendarEvent> = events
        .iter()
        .filter(|e| e.covers(date) && scope_matches(&e.units, unit))
        .collect();
    if covering.iter().any(|e| e.event_type.cancels_sessions()) {
        return false;
    }
    let weekday = day_of_week(date);
    if (1..=5).contains(&weekday) {
        return true;
    }
    covering.iter().any(|e| e.event_type.is_substitution())
}

/// Counts school days in `[start, end]`. Inverted ranges count zero.
pub fn count_school_days(
    start: NaiveDate,
    end: NaiveDate,
    events: &[CalendarEvent],
    unit: &str,
) -> u32 {
    if end < start {
        return 0;
    }
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| is_school_day(*d, events, unit))
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventType;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    fn scope() -> ClassScope<'static> {
        ClassScope {
            unit: "north",
            grade_level: "6º Ano - Fundamental II",
            school_class: "A",
            shift: None,
        }
    }

    fn event(kind: EventType, date: &str, substitute: Option<u8>) -> CalendarEvent {
        CalendarEvent {
            id: format!("{:?}-{}", kind, date),
            title: None,
            event_type: kind,
            start_date: d(date),
            end_date: None,
            units: vec!["all".into()],
            grade_levels: vec![],
            school_classes: vec![],
            subjects: vec![],
            substitute_day_of_week: substitute,
        }
    }

    fn schedule(day: u8, subjects: &[&str]) -> ClassSchedule {
        ClassSchedule {
            id: format!("sched-{}", day),
            unit: "north".into(),
            grade_level: "6º Ano - Fundamental II".into(),
            school_class: "A".into(),
            shift: Some("morning".into()),
            day_of_week: day,
            items: subjects
                .iter()
                .map(|s| ScheduleItem {
                    subject: s.to_string(),
                    start_time: Some("07:00".into()),
                    end_time: Some("08:00".into()),
                })
                .collect(),
        }
    }

    #[test]
    fn holiday_beats_substitution_on_the_same_day() {
        // 2026-04-21 is a Tuesday.
        let events = vec![
            event(EventType::SchoolDay, "2026-04-21", Some(1)),
            event(EventType::HolidayNational, "2026-04-21", None),
        ];
        let schedules = vec![schedule(1, &["sub_math"]), schedule(2, &["sub_math"])];
        assert!(!is_session_scheduled(
            d("2026-04-21"),
            "sub_math",
            &schedules,
            &events,
            &scope()
        ));
    }

    #[test]
    fn substitution_swaps_the_effective_weekday() {
        // Saturday 2026-03-14 runs Monday's timetable.
        let events = vec![event(EventType::SchoolDay, "2026-03-14", Some(1))];
        let schedules = vec![schedule(1, &["sub_history"]), schedule(3, &["sub_math"])];
        assert!(is_session_scheduled(
            d("2026-03-14"),
            "sub_history",
            &schedules,
            &events,
            &scope()
        ));
        assert!(!is_session_scheduled(
            d("2026-03-14"),
            "sub_math",
            &schedules,
            &events,
            &scope()
        ));
    }

    #[test]
    fn last_matching_substitution_wins() {
        let events = vec![
            event(EventType::Substitution, "2026-03-14", Some(1)),
            event(EventType::Substitution, "2026-03-14", Some(3)),
        ];
        assert_eq!(
            resolve_day(d("2026-03-14"), None, &events, &scope()),
            DayResolution::Runs {
                weekday: 3,
                substituted: true
            }
        );
    }

    #[test]
    fn missing_schedule_data_assumes_scheduled() {
        assert!(is_session_scheduled(
            d("2026-03-11"),
            "sub_math",
            &[],
            &[],
            &scope()
        ));
        let ghost = vec![schedule(3, &[])];
        assert!(is_session_scheduled(
            d("2026-03-11"),
            "sub_math",
            &ghost,
            &[],
            &scope()
        ));
    }

    #[test]
    fn events_for_other_units_are_ignored() {
        let mut ev = event(EventType::Recess, "2026-03-11", None);
        ev.units = vec!["south".into()];
        assert!(is_session_scheduled(
            d("2026-03-11"),
            "sub_math",
            &[],
            &[ev],
            &scope()
        ));
    }

    #[test]
    fn school_days_skip_weekends_and_holidays() {
        // March 2026: 22 weekdays; one holiday on Thursday the 19th.
        let events = vec![event(EventType::HolidayMunicipal, "2026-03-19", None)];
        assert_eq!(
            count_school_days(d("2026-03-01"), d("2026-03-31"), &events, "north"),
            21
        );
        assert_eq!(
            count_school_days(d("2026-03-31"), d("2026-03-01"), &events, "north"),
            0
        );
    }

    #[test]
    fn saturday_school_day_counts() {
        let events = vec![event(EventType::SchoolDay, "2026-03-14", Some(1))];
        assert_eq!(
            count_school_days(d("2026-03-14"), d("2026-03-15"), &events, "north"),
            1
        );
    }
}
