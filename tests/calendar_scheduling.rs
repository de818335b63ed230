mod test_support;

use serde_json::json;
use test_support::{open_workspace, request_ok, spawn_sidecar, upsert};

const GRADE: &str = "8º Ano - Fundamental II";

fn is_scheduled(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
    id: &str,
    date: &str,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        id,
        "calendar.isScheduled",
        json!({
            "date": date,
            "subject": "sub_math",
            "unit": "north",
            "gradeLevel": GRADE,
            "schoolClass": "B"
        }),
    )
}

#[test]
fn holidays_win_over_school_day_events_and_substitutions_borrow_a_weekday() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_workspace(&mut stdin, &mut reader, "attendanced-calendar");

    let _ = upsert(
        &mut stdin,
        &mut reader,
        "sched",
        "classSchedules",
        json!([{
            "id": "mon",
            "unit": "north",
            "gradeLevel": GRADE,
            "schoolClass": "B",
            "dayOfWeek": 1,
            "items": [
                { "subject": "sub_math", "startTime": "07:00", "endTime": "08:00" },
                { "subject": "sub_history", "startTime": "08:00", "endTime": "09:00" }
            ]
        }]),
    );
    let _ = upsert(
        &mut stdin,
        &mut reader,
        "events",
        "calendarEvents",
        json!([
            { "id": "e1", "type": "school_day", "startDate": "2026-09-07", "substituteDayOfWeek": 1 },
            { "id": "e2", "type": "holiday_national", "title": "Independência", "startDate": "2026-09-07" },
            { "id": "e3", "type": "school_day", "startDate": "2026-09-12", "substituteDayOfWeek": 1, "units": ["north"] }
        ]),
    );

    let holiday = is_scheduled(&mut stdin, &mut reader, "h", "2026-09-07");
    assert_eq!(holiday["scheduled"], json!(false));
    assert_eq!(holiday["day"]["cancelled"], json!(true));
    assert_eq!(holiday["hasScheduleData"], json!(true));

    let saturday = is_scheduled(&mut stdin, &mut reader, "s", "2026-09-12");
    assert_eq!(saturday["scheduled"], json!(true));
    assert_eq!(saturday["day"]["weekday"], json!(1));
    assert_eq!(saturday["day"]["substituted"], json!(true));

    let tuesday = is_scheduled(&mut stdin, &mut reader, "t", "2026-09-08");
    assert_eq!(tuesday["scheduled"], json!(false));
    assert_eq!(tuesday["day"]["cancelled"], json!(false));

    let monday = is_scheduled(&mut stdin, &mut reader, "m", "2026-09-14");
    assert_eq!(monday["scheduled"], json!(true));
    assert_eq!(monday["day"]["substituted"], json!(false));

    // Mondays 14 and 21 run normally, 7 is a holiday and Saturday 12 runs
    // Monday's timetable.
    let taught = request_ok(
        &mut stdin,
        &mut reader,
        "taught",
        "academic.taughtClasses",
        json!({
            "subject": "sub_math",
            "startDate": "2026-09-07",
            "endDate": "2026-09-21",
            "unit": "north",
            "gradeLevel": GRADE,
            "schoolClass": "B"
        }),
    );
    assert_eq!(taught["source"], json!("schedule"));
    assert_eq!(taught["taught"], json!(3.0));
}

#[test]
fn without_a_timetable_sessions_are_assumed_scheduled() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_workspace(&mut stdin, &mut reader, "attendanced-calendar-empty");

    let wednesday = is_scheduled(&mut stdin, &mut reader, "w", "2026-09-09");
    assert_eq!(wednesday["scheduled"], json!(true));
    assert_eq!(wednesday["hasScheduleData"], json!(false));

    let taught = request_ok(
        &mut stdin,
        &mut reader,
        "taught",
        "academic.taughtClasses",
        json!({
            "subject": "sub_math",
            "startDate": "2026-09-07",
            "endDate": "2026-09-11",
            "unit": "north",
            "gradeLevel": GRADE,
            "schoolClass": "B"
        }),
    );
    // Five weekdays at 5 lessons a week.
    assert_eq!(taught["source"], json!("matrix"));
    assert_eq!(taught["schoolDays"], json!(5));
    assert_eq!(taught["taught"], json!(5.0));
}

#[test]
fn bimester_resolution_prefers_configured_windows() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_workspace(&mut stdin, &mut reader, "attendanced-calendar-bimester");

    let _ = upsert(
        &mut stdin,
        &mut reader,
        "settings",
        "academicSettings",
        json!([{
            "id": "2026_north",
            "year": 2026,
            "unit": "north",
            "bimesters": [
                { "number": 1, "startDate": "2026-02-02", "endDate": "2026-04-17" },
                { "number": 2, "startDate": "2026-04-20", "endDate": "2026-07-03" }
            ]
        }]),
    );

    let configured = request_ok(
        &mut stdin,
        &mut reader,
        "c",
        "academic.resolveBimester",
        json!({ "date": "2026-04-10", "unit": "north" }),
    );
    assert_eq!(configured["bimester"], json!(1));
    assert_eq!(configured["settingsId"], json!("2026_north"));

    let other_unit = request_ok(
        &mut stdin,
        &mut reader,
        "o",
        "academic.resolveBimester",
        json!({ "date": "2026-04-10", "unit": "south" }),
    );
    assert_eq!(other_unit["bimester"], json!(2));
    assert_eq!(other_unit["settingsId"], json!(null));

    let hours = request_ok(
        &mut stdin,
        &mut reader,
        "wh",
        "academic.weeklyHours",
        json!({ "subject": "sub_math", "gradeLevel": GRADE }),
    );
    assert_eq!(hours["weeklyHours"], json!(5));
}
