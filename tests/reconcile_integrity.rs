mod test_support;

use serde_json::{json, Value};
use test_support::{admin_session, open_workspace, request_err, request_ok, spawn_sidecar, upsert};

const GRADE: &str = "1ª Série - Ensino Médio";

fn scan(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
    id: &str,
) -> Value {
    request_ok(
        stdin,
        reader,
        id,
        "reconcile.scanIntegrity",
        json!({ "session": admin_session(), "year": 2026 }),
    )
}

#[test]
fn duplicate_subjects_merge_into_the_canonical_entry() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_workspace(&mut stdin, &mut reader, "attendanced-merge");

    let _ = upsert(
        &mut stdin,
        &mut reader,
        "s",
        "students",
        json!([{ "id": "st1", "name": "Bruna", "unit": "north", "gradeLevel": GRADE, "schoolClass": "A" }]),
    );
    let _ = upsert(
        &mut stdin,
        &mut reader,
        "g",
        "grades",
        json!([
            { "id": "legacy", "studentId": "st1", "subject": "Biologia", "year": 2026, "teacherId": "t1",
              "bimesters": { "bimester1": { "nota": 7.0, "faltas": 3 }, "bimester3": { "nota": 9.0 } } },
            { "id": "canon", "studentId": "st1", "subject": "sub_biology", "year": 2026, "teacherId": "t1",
              "bimesters": { "bimester1": { "nota": 8.0, "faltas": 1 } } }
        ]),
    );

    let before = scan(&mut stdin, &mut reader, "scan1");
    let groups = before["duplicates"].as_array().expect("duplicates");
    assert_eq!(groups.len(), 1, "{}", before);
    assert_eq!(groups[0]["canonical"], json!("sub_biology"));
    assert_eq!(groups[0]["resolved"], json!(true));
    assert_eq!(groups[0]["entryIds"], json!(["legacy", "canon"]));

    let merged = request_ok(
        &mut stdin,
        &mut reader,
        "merge",
        "reconcile.mergeDuplicates",
        json!({
            "session": admin_session(),
            "groups": [{ "canonical": "sub_biology", "entryIds": ["legacy", "canon"] }]
        }),
    );
    assert_eq!(merged["merged"], json!(1));
    let outcome = &merged["groups"][0];
    assert_eq!(outcome["status"], json!("merged"));
    assert_eq!(outcome["targetId"], json!("canon"));
    assert_eq!(outcome["deleted"], json!(["legacy"]));
    // Both entries had a grade for bimester 1; the target's is kept.
    let conflicts = outcome["conflicts"].as_array().expect("conflicts");
    assert!(conflicts
        .iter()
        .any(|c| c["sourceId"] == json!("legacy") && c["field"] == json!("nota")));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "records.list",
        json!({ "kind": "grades" }),
    );
    let records = listed["records"].as_array().expect("records");
    assert_eq!(records.len(), 1);
    let kept = &records[0];
    assert_eq!(kept["id"], json!("canon"));
    assert_eq!(kept["subject"], json!("sub_biology"));
    assert_eq!(kept["bimesters"]["bimester1"]["nota"], json!(8.0));
    assert_eq!(kept["bimesters"]["bimester1"]["faltas"], json!(3));
    assert_eq!(kept["bimesters"]["bimester3"]["nota"], json!(9.0));

    let after = scan(&mut stdin, &mut reader, "scan2");
    assert_eq!(after["duplicates"], json!([]));

    // Merging again finds nothing left to merge.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "merge2",
        "reconcile.mergeDuplicates",
        json!({
            "session": admin_session(),
            "groups": [{ "canonical": "sub_biology", "entryIds": ["legacy", "canon"] }]
        }),
    );
    assert_eq!(again["merged"], json!(0));
    assert_eq!(again["skipped"], json!(1));
}

#[test]
fn subject_issues_are_suggested_and_normalized() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_workspace(&mut stdin, &mut reader, "attendanced-subjects");

    let _ = upsert(
        &mut stdin,
        &mut reader,
        "t",
        "teachers",
        json!([{
            "id": "t1",
            "name": "Rita",
            "subjects": ["Matemática", "Projeto X"],
            "assignments": [{ "subject": "Matemática", "gradeLevel": GRADE, "schoolClass": "A" }]
        }]),
    );
    let _ = upsert(
        &mut stdin,
        &mut reader,
        "a",
        "attendance",
        json!([{
            "id": "a1",
            "date": "2026-03-03",
            "unit": "north",
            "gradeLevel": GRADE,
            "schoolClass": "A",
            "subject": "Ed. Física",
            "studentStatus": { "st1": "present" },
            "lessonCount": 1
        }]),
    );

    let before = scan(&mut stdin, &mut reader, "scan1");
    let issues = before["subjectIssues"].as_array().expect("issues").clone();
    assert_eq!(issues.len(), 4, "{}", before);

    let attendance = issues
        .iter()
        .find(|i| i["kind"] == json!("attendance"))
        .expect("attendance issue");
    assert_eq!(attendance["suggestion"]["status"], json!("resolved"));
    assert_eq!(attendance["suggestion"]["id"], json!("sub_physical_education"));
    assert_eq!(attendance["suggestion"]["strategy"], json!("keyword_family"));

    let manual = issues
        .iter()
        .find(|i| i["value"] == json!("Projeto X"))
        .expect("manual issue");
    assert_eq!(manual["suggestion"]["status"], json!("needsManualAction"));

    let fixes: Vec<Value> = issues
        .iter()
        .filter(|i| i["suggestion"]["status"] == json!("resolved"))
        .map(|i| {
            json!({
                "kind": i["kind"],
                "docId": i["docId"],
                "field": i["field"],
                "itemIndex": i.get("itemIndex").cloned().unwrap_or(Value::Null),
                "from": i["value"],
                "to": i["suggestion"]["id"],
            })
        })
        .collect();
    assert_eq!(fixes.len(), 3);

    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "fix",
        "reconcile.normalizeSubjects",
        json!({ "session": admin_session(), "fixes": fixes }),
    );
    assert_eq!(applied["failed"], json!([]));

    let teachers = request_ok(
        &mut stdin,
        &mut reader,
        "lt",
        "records.list",
        json!({ "kind": "teachers" }),
    );
    let teacher = &teachers["records"][0];
    assert_eq!(teacher["subjects"], json!(["sub_math", "Projeto X"]));
    assert_eq!(teacher["assignments"][0]["subject"], json!("sub_math"));
    assert_eq!(teacher["assignments"][0]["gradeLevel"], json!(GRADE));

    let records = request_ok(
        &mut stdin,
        &mut reader,
        "la",
        "records.list",
        json!({ "kind": "attendance" }),
    );
    assert_eq!(records["records"][0]["subject"], json!("sub_physical_education"));

    let after = scan(&mut stdin, &mut reader, "scan2");
    let left = after["subjectIssues"].as_array().expect("issues");
    assert_eq!(left.len(), 1);
    assert_eq!(left[0]["value"], json!("Projeto X"));

    let rejected = request_ok(
        &mut stdin,
        &mut reader,
        "bad",
        "reconcile.normalizeSubjects",
        json!({
            "session": admin_session(),
            "fixes": [{ "kind": "attendance", "docId": "a1", "field": "subject",
                        "from": "sub_physical_education", "to": "Gym" }]
        }),
    );
    assert_eq!(rejected["succeeded"], json!([]));
    assert_eq!(rejected["failed"][0]["id"], json!("a1"));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "none",
        "reconcile.normalizeSubjects",
        json!({ "session": admin_session(), "fixes": [] }),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn ghosts_are_deleted_only_with_the_confirmation_phrase() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_workspace(&mut stdin, &mut reader, "attendanced-ghosts");

    let _ = upsert(
        &mut stdin,
        &mut reader,
        "s",
        "students",
        json!([{ "id": "st1", "name": "Bruna", "unit": "north", "gradeLevel": GRADE, "schoolClass": "A" }]),
    );
    let _ = upsert(
        &mut stdin,
        &mut reader,
        "g",
        "grades",
        json!([
            { "id": "orphan", "studentId": "gone", "subject": "sub_math", "year": 2026, "teacherId": "t1" },
            { "id": "fine", "studentId": "st1", "subject": "sub_math", "year": 2026, "teacherId": "t1" }
        ]),
    );
    let _ = upsert(
        &mut stdin,
        &mut reader,
        "c",
        "classSchedules",
        json!([{ "id": "empty-mon", "unit": "north", "gradeLevel": GRADE, "schoolClass": "A",
                 "dayOfWeek": 1, "items": [] }]),
    );
    let _ = upsert(
        &mut stdin,
        &mut reader,
        "a",
        "attendance",
        json!([{ "id": "blank", "date": "2026-03-03", "unit": "north", "gradeLevel": GRADE,
                 "schoolClass": "A", "subject": "sub_math", "studentStatus": {} }]),
    );

    let found = scan(&mut stdin, &mut reader, "scan");
    assert_eq!(found["ghostGrades"][0]["entryId"], json!("orphan"));
    assert_eq!(found["ghostGrades"][0]["reasons"], json!(["missingStudent"]));
    assert_eq!(found["ghostSchedules"][0]["scheduleId"], json!("empty-mon"));
    assert_eq!(found["ghostAttendance"][0]["recordId"], json!("blank"));

    let selection = json!({
        "grades": ["orphan", "fine"],
        "schedules": ["empty-mon"],
        "attendance": ["blank"]
    });
    let code = request_err(
        &mut stdin,
        &mut reader,
        "lower",
        "reconcile.deleteGhosts",
        json!({ "session": admin_session(), "selection": selection, "confirmation": "delete" }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "teacher",
        "reconcile.deleteGhosts",
        json!({
            "session": { "unit": "north", "role": "teacher" },
            "selection": selection,
            "confirmation": "DELETE"
        }),
    );
    assert_eq!(code, "forbidden");

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "delete",
        "reconcile.deleteGhosts",
        json!({ "session": admin_session(), "selection": selection, "confirmation": "DELETE" }),
    );
    let succeeded = report["succeeded"].as_array().expect("succeeded");
    assert_eq!(succeeded.len(), 3);
    assert!(!succeeded.contains(&json!("fine")));
    assert_eq!(report["failed"][0]["id"], json!("fine"));

    let after = scan(&mut stdin, &mut reader, "rescan");
    assert_eq!(after["ghostGrades"], json!([]));
    assert_eq!(after["ghostSchedules"], json!([]));
    assert_eq!(after["ghostAttendance"], json!([]));
}
