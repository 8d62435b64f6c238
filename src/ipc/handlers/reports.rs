use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Local;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn calc_err(req: &Request, e: calc::CalcError) -> serde_json::Value {
    err(&req.id, &e.code, e.message, e.details)
}

struct StudentHeader {
    name: String,
    teacher: String,
    class_name: Option<String>,
    school: Option<String>,
}

fn load_student_header(
    conn: &Connection,
    student_id: &str,
) -> Result<Option<StudentHeader>, calc::CalcError> {
    let row: Option<(String, String, Option<String>)> = conn
        .query_row(
            "SELECT name, teacher, class_name FROM students WHERE id = ?",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(|e| calc::CalcError::new("db_query_failed", e.to_string()))?;
    let Some((name, teacher, class_name)) = row else {
        return Ok(None);
    };

    let school: Option<String> = conn
        .query_row(
            "SELECT school FROM users WHERE username = ?",
            [&teacher],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| calc::CalcError::new("db_query_failed", e.to_string()))?
        .flatten();

    Ok(Some(StudentHeader {
        name,
        teacher,
        class_name,
        school,
    }))
}

/// The full report-card model: header, per-subject rows and tier
/// histogram. Rows are assembled once; the table, the pie chart and the
/// PDF renderer in the shell all draw from this single payload.
fn handle_reports_student_report_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let header = match load_student_header(conn, &student_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return calc_err(req, e),
    };

    let ctx = calc::ReportContext {
        conn,
        student_id: &student_id,
        teacher: &header.teacher,
    };
    let rows = match calc::assemble_report(&ctx) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };
    let histogram = calc::tier_histogram(&rows);

    ok(
        &req.id,
        json!({
            "student": {
                "id": student_id,
                "name": header.name,
                "className": header.class_name,
                "teacher": header.teacher,
                "school": header.school,
            },
            "issuedOn": Local::now().format("%Y/%m/%d").to_string(),
            "rows": rows,
            "tierHistogram": histogram,
        }),
    )
}

/// Score progression for one (student, subject) pair in recording order,
/// feeding the line chart on the student panel.
fn handle_reports_progress_series_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let header = match load_student_header(conn, &student_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return calc_err(req, e),
    };

    let scores = match calc::query_scores(
        conn,
        &calc::ScoreFilter {
            student_id: Some(student_id.clone()),
            subject: Some(subject.clone()),
            ..calc::ScoreFilter::default()
        },
    ) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    let points: Vec<serde_json::Value> = scores
        .iter()
        .map(|s| {
            json!({
                "sequenceLabel": s.sequence_label,
                "value": s.value,
                "recordedAt": s.recorded_at,
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "student": { "id": student_id, "name": header.name },
            "subject": subject,
            "points": points,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.studentReportModel" => Some(handle_reports_student_report_model(state, req)),
        "reports.progressSeriesModel" => Some(handle_reports_progress_series_model(state, req)),
        _ => None,
    }
}
