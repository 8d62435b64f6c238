mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn score_recording_validates_and_feeds_class_statistics() {
    let workspace = temp_dir("gradebook-scores-ipc");
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
        json!({ "username": "teacher1", "password": "1111", "roles": "teacher" }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.register",
        json!({
            "teacher": "teacher1",
            "name": "Sara",
            "username": "sara01",
            "password": "sara-pw",
            "className": "5A"
        }),
    );
    let student_id = created
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    // Students log in with the credentials set at registration time.
    let student_login = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "auth.login",
        json!({ "username": "sara01", "password": "sara-pw" }),
    );
    assert_eq!(
        student_login.get("kind").and_then(|v| v.as_str()),
        Some("student")
    );
    assert_eq!(
        student_login.get("studentId").and_then(|v| v.as_str()),
        Some(student_id.as_str())
    );

    // Out-of-range and dangling inserts are rejected before any write.
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "5",
            "scores.record",
            json!({
                "teacher": "teacher1",
                "studentId": student_id,
                "subject": "Math",
                "sequenceLabel": "first exam",
                "value": 25
            }),
        ),
        "bad_params"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "6",
            "scores.record",
            json!({
                "teacher": "teacher1",
                "studentId": "no-such-student",
                "subject": "Math",
                "sequenceLabel": "first exam",
                "value": 10
            }),
        ),
        "not_found"
    );

    // Duplicate (subject, sequence label) entries accumulate into the
    // average instead of replacing each other.
    for (idx, value) in [14, 18, 18].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", idx),
            "scores.record",
            json!({
                "teacher": "teacher1",
                "studentId": student_id,
                "subject": "Math",
                "sequenceLabel": "first exam",
                "value": value
            }),
        );
    }

    let stats = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "scores.classStatistics",
        json!({ "teacher": "teacher1" }),
    );
    let rows = stats.get("rows").and_then(|v| v.as_array()).expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("studentName").and_then(|v| v.as_str()),
        Some("Sara")
    );
    assert_eq!(
        rows[0].get("average").and_then(|v| v.as_f64()),
        Some(16.67)
    );
    assert_eq!(rows[0].get("scoreCount").and_then(|v| v.as_i64()), Some(3));

    // Deleting the student takes their scores with it.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.delete",
        json!({ "studentId": student_id }),
    );
    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "scores.list",
        json!({ "studentId": student_id }),
    );
    assert_eq!(
        listing
            .get("scores")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "10",
            "reports.studentReportModel",
            json!({ "studentId": student_id }),
        ),
        "not_found"
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn operations_require_a_selected_workspace() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    for (idx, method) in [
        "auth.login",
        "users.list",
        "students.list",
        "scores.list",
        "reports.studentReportModel",
    ]
    .iter()
    .enumerate()
    {
        assert_eq!(
            request_err(&mut stdin, &mut reader, &format!("w{}", idx), method, json!({})),
            "no_workspace",
            "{} must demand a workspace",
            method
        );
    }

    drop(stdin);
    let _ = child.wait();
}
