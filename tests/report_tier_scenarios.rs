mod test_support;

use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{request_ok, spawn_sidecar, temp_dir};

fn record_score(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    teacher: &str,
    student_id: &str,
    subject: &str,
    sequence_label: &str,
    value: i64,
) {
    let _ = request_ok(
        stdin,
        reader,
        id,
        "scores.record",
        json!({
            "teacher": teacher,
            "studentId": student_id,
            "subject": subject,
            "sequenceLabel": sequence_label,
            "value": value
        }),
    );
}

fn register_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    teacher: &str,
    name: &str,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        id,
        "students.register",
        json!({ "teacher": teacher, "name": name }),
    );
    created
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string()
}

#[test]
fn report_rows_bucket_into_expected_tiers() {
    let workspace = temp_dir("gradebook-tier-scenarios");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.upsert",
        json!({
            "username": "teacher1",
            "password": "1111",
            "roles": "teacher",
            "school": "Beheshti"
        }),
    );

    let a = register_student(&mut stdin, &mut reader, "3", "teacher1", "Student A");
    let b = register_student(&mut stdin, &mut reader, "4", "teacher1", "Student B");
    let c = register_student(&mut stdin, &mut reader, "5", "teacher1", "Student C");

    // Math: student A averages 10.5 (10 and 11); the rest of the cohort
    // brings the class average to exactly 13 over six records
    // (10+11+15+14+14+14 = 78). Ratio 10.5/13 ~ 0.808 => Acceptable.
    record_score(&mut stdin, &mut reader, "6", "teacher1", &a, "Math", "first exam", 10);
    record_score(&mut stdin, &mut reader, "7", "teacher1", &a, "Math", "second exam", 11);
    record_score(&mut stdin, &mut reader, "8", "teacher1", &b, "Math", "first exam", 15);
    record_score(&mut stdin, &mut reader, "9", "teacher1", &b, "Math", "second exam", 14);
    record_score(&mut stdin, &mut reader, "10", "teacher1", &c, "Math", "first exam", 14);
    record_score(&mut stdin, &mut reader, "11", "teacher1", &c, "Math", "second exam", 14);

    // Painting: a brand-new subject with a single score and no baseline.
    // The class average falls back to the student average => Good.
    record_score(&mut stdin, &mut reader, "12", "teacher1", &a, "Painting", "first exam", 15);

    // Discipline: every recorded value is zero, so the class average is
    // zero and the classifier switches to its neutral baseline of 10.
    // Ratio 0 => NeedsImprovement.
    record_score(&mut stdin, &mut reader, "13", "teacher1", &a, "Discipline", "first exam", 0);
    record_score(&mut stdin, &mut reader, "14", "teacher1", &b, "Discipline", "first exam", 0);

    let model = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "reports.studentReportModel",
        json!({ "studentId": a }),
    );

    let rows = model.get("rows").and_then(|v| v.as_array()).expect("rows");
    assert_eq!(rows.len(), 3);

    // Subjects keep first-appearance order, not alphabetical.
    let subjects: Vec<&str> = rows
        .iter()
        .map(|r| r.get("subject").and_then(|v| v.as_str()).expect("subject"))
        .collect();
    assert_eq!(subjects, vec!["Math", "Painting", "Discipline"]);

    let math = &rows[0];
    assert_eq!(math.get("studentAverage").and_then(|v| v.as_f64()), Some(10.5));
    assert_eq!(math.get("classAverage").and_then(|v| v.as_f64()), Some(13.0));
    assert_eq!(math.get("tier").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(
        math.get("tierLabel").and_then(|v| v.as_str()),
        Some("acceptable")
    );

    let painting = &rows[1];
    assert_eq!(
        painting.get("studentAverage").and_then(|v| v.as_f64()),
        Some(15.0)
    );
    assert_eq!(
        painting.get("classAverage").and_then(|v| v.as_f64()),
        Some(15.0)
    );
    assert_eq!(painting.get("tier").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(
        painting.get("tierLabel").and_then(|v| v.as_str()),
        Some("good")
    );

    let discipline = &rows[2];
    assert_eq!(
        discipline.get("studentAverage").and_then(|v| v.as_f64()),
        Some(0.0)
    );
    assert_eq!(
        discipline.get("classAverage").and_then(|v| v.as_f64()),
        Some(0.0)
    );
    assert_eq!(discipline.get("tier").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        discipline.get("tierLabel").and_then(|v| v.as_str()),
        Some("needs improvement")
    );

    // The histogram is a straight tally of the rows above.
    let histogram = model.get("tierHistogram").expect("tierHistogram");
    assert_eq!(
        histogram.get("needsImprovement").and_then(|v| v.as_i64()),
        Some(1)
    );
    assert_eq!(histogram.get("acceptable").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(histogram.get("good").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(histogram.get("veryGood").and_then(|v| v.as_i64()), Some(0));

    // Header carries the teacher's school for the report card banner.
    let student = model.get("student").expect("student header");
    assert_eq!(
        student.get("school").and_then(|v| v.as_str()),
        Some("Beheshti")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn class_baseline_never_crosses_teachers() {
    let workspace = temp_dir("gradebook-tier-scope");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    for (idx, teacher) in ["teacher1", "teacher2"].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("u{}", idx),
            "users.upsert",
            json!({ "username": teacher, "password": "pw", "roles": "teacher" }),
        );
    }

    let mine = register_student(&mut stdin, &mut reader, "2", "teacher1", "Mine");
    let other = register_student(&mut stdin, &mut reader, "3", "teacher2", "Other");

    // teacher1's cohort has a single 12; teacher2 records straight 20s
    // in the same subject. Those 20s must not move teacher1's baseline.
    record_score(&mut stdin, &mut reader, "4", "teacher1", &mine, "Math", "first exam", 12);
    record_score(&mut stdin, &mut reader, "5", "teacher2", &other, "Math", "first exam", 20);
    record_score(&mut stdin, &mut reader, "6", "teacher2", &other, "Math", "second exam", 20);

    let model = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "reports.studentReportModel",
        json!({ "studentId": mine }),
    );
    let rows = model.get("rows").and_then(|v| v.as_array()).expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("classAverage").and_then(|v| v.as_f64()),
        Some(12.0)
    );
    assert_eq!(rows[0].get("tier").and_then(|v| v.as_i64()), Some(3));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
