use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Local;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const SCORE_MIN: i64 = 0;
const SCORE_MAX: i64 = 20;

fn handle_scores_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let teacher = match req.params.get("teacher").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing teacher", None),
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let subject = match req.params.get("subject").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing subject", None),
    };
    let sequence_label = match req.params.get("sequenceLabel").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing sequenceLabel", None),
    };
    let value = match req.params.get("value").and_then(|v| v.as_i64()) {
        Some(v) if (SCORE_MIN..=SCORE_MAX).contains(&v) => v,
        Some(v) => {
            return err(
                &req.id,
                "bad_params",
                format!("value must be between {} and {}", SCORE_MIN, SCORE_MAX),
                Some(json!({ "value": v })),
            )
        }
        None => return err(&req.id, "bad_params", "missing integer value", None),
    };

    let student_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student_exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    // Duplicates over (student, subject, sequence label) are allowed by
    // design; repeated entries simply accumulate into the average.
    let score_id = Uuid::new_v4().to_string();
    let recorded_at = Local::now().format("%Y/%m/%d").to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO scores(id, teacher, student_id, subject, sequence_label, value, recorded_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &score_id,
            &teacher,
            &student_id,
            &subject,
            &sequence_label,
            value,
            &recorded_at,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "scores" })),
        );
    }

    ok(
        &req.id,
        json!({ "scoreId": score_id, "recordedAt": recorded_at }),
    )
}

fn handle_scores_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let filter = calc::ScoreFilter {
        student_id: req
            .params
            .get("studentId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        teacher: req
            .params
            .get("teacher")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        subject: req
            .params
            .get("subject")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
    };

    match calc::query_scores(conn, &filter) {
        Ok(scores) => ok(&req.id, json!({ "scores": scores })),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

/// Per-(student, subject) averages for one teacher's whole cohort: the
/// class statistics table on the teacher panel.
fn handle_scores_class_statistics(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let teacher = match req.params.get("teacher").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacher", None),
    };

    let rows = match calc::query_scores(
        conn,
        &calc::ScoreFilter {
            teacher: Some(teacher.clone()),
            ..calc::ScoreFilter::default()
        },
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    };

    // Group in first-appearance order, matching the report row ordering.
    let mut keys: Vec<(String, String)> = Vec::new();
    let mut values: Vec<Vec<f64>> = Vec::new();
    for r in &rows {
        let key = (r.student_id.clone(), r.subject.clone());
        match keys.iter().position(|k| *k == key) {
            Some(i) => values[i].push(r.value as f64),
            None => {
                keys.push(key);
                values.push(vec![r.value as f64]);
            }
        }
    }

    let mut stats: Vec<serde_json::Value> = Vec::with_capacity(keys.len());
    for ((student_id, subject), vals) in keys.into_iter().zip(values.into_iter()) {
        let Some(avg) = calc::mean(&vals) else {
            continue;
        };
        let name: Option<String> = match conn
            .query_row("SELECT name FROM students WHERE id = ?", [&student_id], |r| {
                r.get(0)
            })
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        stats.push(json!({
            "studentId": student_id,
            "studentName": name.unwrap_or_default(),
            "subject": subject,
            "average": calc::round_off_2_decimals(avg),
            "scoreCount": vals.len()
        }));
    }

    ok(&req.id, json!({ "teacher": teacher, "rows": stats }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scores.record" => Some(handle_scores_record(state, req)),
        "scores.list" => Some(handle_scores_list(state, req)),
        "scores.classStatistics" => Some(handle_scores_class_statistics(state, req)),
        _ => None,
    }
}
