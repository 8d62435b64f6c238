use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{Local, NaiveDate};
use rusqlite::OptionalExtension;
use serde_json::json;

const EXPIRY_FORMAT: &str = "%Y/%m/%d";

/// An unparseable expiry date does not lock the account out; the access
/// check only fires when the stored date is well-formed and in the past.
fn is_expired(expires_on: Option<&str>, today: NaiveDate) -> bool {
    let Some(raw) = expires_on else {
        return false;
    };
    match NaiveDate::parse_from_str(raw.trim(), EXPIRY_FORMAT) {
        Ok(date) => today > date,
        Err(_) => false,
    }
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let username = match req.params.get("username").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing username", None),
    };
    let password = match req.params.get("password").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing password", None),
    };

    // Staff accounts first. Passwords are stored and compared in
    // plaintext; hardening is an explicit non-goal.
    let staff: Option<(String, Option<String>, String, Option<String>)> = match conn
        .query_row(
            "SELECT roles, school, status, expires_on
             FROM users
             WHERE username = ? AND password = ?",
            (&username, &password),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if let Some((roles, school, status, expires_on)) = staff {
        if status != "active" {
            return err(&req.id, "account_blocked", "account is blocked", None);
        }
        let today = Local::now().date_naive();
        if is_expired(expires_on.as_deref(), today) {
            return err(&req.id, "account_expired", "account has expired", None);
        }
        let roles: Vec<String> = roles
            .split(',')
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        return ok(
            &req.id,
            json!({
                "kind": "staff",
                "username": username,
                "roles": roles,
                "school": school.unwrap_or_default(),
            }),
        );
    }

    // Fall back to student credentials.
    let student: Option<(String, String)> = match conn
        .query_row(
            "SELECT id, name FROM students WHERE username = ? AND password = ?",
            (&username, &password),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match student {
        Some((student_id, student_name)) => ok(
            &req.id,
            json!({
                "kind": "student",
                "username": username,
                "studentId": student_id,
                "studentName": student_name,
            }),
        ),
        None => err(
            &req.id,
            "invalid_credentials",
            "username or password is incorrect",
            None,
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        _ => None,
    }
}
