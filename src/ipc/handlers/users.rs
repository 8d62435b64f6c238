use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{OptionalExtension, ToSql};
use serde_json::json;

const KNOWN_ROLES: [&str; 4] = ["teacher", "assistant", "school_admin", "superadmin"];
const MIN_PASSWORD_LEN: usize = 4;

fn parse_roles(raw: &serde_json::Value) -> Result<String, String> {
    let list: Vec<String> = match raw {
        serde_json::Value::String(s) => s
            .split(',')
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect(),
        _ => return Err("roles must be a string or array of strings".to_string()),
    };
    if list.is_empty() {
        return Err("roles must not be empty".to_string());
    }
    for role in &list {
        if !KNOWN_ROLES.contains(&role.as_str()) {
            return Err(format!("unknown role: {}", role));
        }
    }
    Ok(list.join(","))
}

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let school = req
        .params
        .get("school")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let role = req
        .params
        .get("role")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let mut stmt = match conn.prepare(
        "SELECT username, roles, school, status, expires_on
         FROM users
         ORDER BY username",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let username: String = row.get(0)?;
            let roles: String = row.get(1)?;
            let school: Option<String> = row.get(2)?;
            let status: String = row.get(3)?;
            let expires_on: Option<String> = row.get(4)?;
            Ok((username, roles, school, status, expires_on))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let users: Vec<serde_json::Value> = rows
        .into_iter()
        .filter(|(_, roles, user_school, _, _)| {
            let school_ok = school
                .as_deref()
                .map(|want| user_school.as_deref() == Some(want))
                .unwrap_or(true);
            let role_ok = role
                .as_deref()
                .map(|want| roles.split(',').any(|r| r.trim() == want))
                .unwrap_or(true);
            school_ok && role_ok
        })
        .map(|(username, roles, user_school, status, expires_on)| {
            let roles: Vec<&str> = roles.split(',').map(|r| r.trim()).collect();
            json!({
                "username": username,
                "roles": roles,
                "school": user_school,
                "status": status,
                "expiresOn": expires_on
            })
        })
        .collect();

    ok(&req.id, json!({ "users": users }))
}

fn handle_users_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let username = match req.params.get("username").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing username", None),
    };
    let password = match req.params.get("password").and_then(|v| v.as_str()) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => return err(&req.id, "bad_params", "missing password", None),
    };
    let roles = match req.params.get("roles") {
        Some(raw) => match parse_roles(raw) {
            Ok(v) => v,
            Err(msg) => return err(&req.id, "bad_params", msg, None),
        },
        None => return err(&req.id, "bad_params", "missing roles", None),
    };
    let school = req
        .params
        .get("school")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());
    let expires_on = req
        .params
        .get("expiresOn")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());

    if let Err(e) = conn.execute(
        "INSERT OR REPLACE INTO users(username, password, roles, school, status, expires_on)
         VALUES(?, ?, ?, ?, 'active', ?)",
        (&username, &password, &roles, &school, &expires_on),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    ok(&req.id, json!({ "username": username }))
}

fn handle_users_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let username = match req.params.get("username").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing username", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch object", None);
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM users WHERE username = ?", [&username], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "user not found", None);
    }

    let mut assignments: Vec<(&str, Option<String>)> = Vec::new();
    if let Some(v) = patch.get("password") {
        let Some(s) = v.as_str().filter(|s| !s.is_empty()) else {
            return err(&req.id, "bad_params", "password must be a non-empty string", None);
        };
        assignments.push(("password", Some(s.to_string())));
    }
    if let Some(v) = patch.get("roles") {
        match parse_roles(v) {
            Ok(roles) => assignments.push(("roles", Some(roles))),
            Err(msg) => return err(&req.id, "bad_params", msg, None),
        }
    }
    if let Some(v) = patch.get("school") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "school must be a string", None);
        };
        assignments.push(("school", Some(s.trim().to_string())));
    }
    if let Some(v) = patch.get("status") {
        match v.as_str() {
            Some(s) if s == "active" || s == "blocked" => {
                assignments.push(("status", Some(s.to_string())))
            }
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    "status must be one of: active, blocked",
                    None,
                )
            }
        }
    }
    // A null expiry clears the date: the account stops expiring.
    if let Some(v) = patch.get("expiresOn") {
        if v.is_null() {
            assignments.push(("expires_on", None));
        } else {
            let Some(s) = v.as_str() else {
                return err(&req.id, "bad_params", "expiresOn must be a string or null", None);
            };
            assignments.push(("expires_on", Some(s.trim().to_string())));
        }
    }

    if assignments.is_empty() {
        return err(&req.id, "bad_params", "patch has no recognized fields", None);
    }

    let set_clause = assignments
        .iter()
        .map(|(col, _)| format!("{} = ?", col))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("UPDATE users SET {} WHERE username = ?", set_clause);
    let mut binds: Vec<&dyn ToSql> = assignments
        .iter()
        .map(|(_, v)| v as &dyn ToSql)
        .collect();
    binds.push(&username);

    if let Err(e) = conn.execute(&sql, rusqlite::params_from_iter(binds)) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    ok(&req.id, json!({ "username": username, "updated": assignments.len() }))
}

fn handle_users_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let username = match req.params.get("username").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing username", None),
    };

    let deleted = match conn.execute("DELETE FROM users WHERE username = ?", [&username]) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "users" })),
            )
        }
    };
    if deleted == 0 {
        return err(&req.id, "not_found", "user not found", None);
    }

    ok(&req.id, json!({ "username": username }))
}

fn handle_users_change_password(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let username = match req.params.get("username").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing username", None),
    };
    let current = match req.params.get("currentPassword").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing currentPassword", None),
    };
    let new_password = match req.params.get("newPassword").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing newPassword", None),
    };
    if new_password.chars().count() < MIN_PASSWORD_LEN {
        return err(
            &req.id,
            "bad_params",
            format!("new password must be at least {} characters", MIN_PASSWORD_LEN),
            None,
        );
    }

    let matched: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM users WHERE username = ? AND password = ?",
            (&username, &current),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if matched.is_none() {
        return err(
            &req.id,
            "invalid_credentials",
            "current password is incorrect",
            None,
        );
    }

    if let Err(e) = conn.execute(
        "UPDATE users SET password = ? WHERE username = ?",
        (&new_password, &username),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    ok(&req.id, json!({ "username": username }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.list" => Some(handle_users_list(state, req)),
        "users.upsert" => Some(handle_users_upsert(state, req)),
        "users.update" => Some(handle_users_update(state, req)),
        "users.delete" => Some(handle_users_delete(state, req)),
        "users.changePassword" => Some(handle_users_change_password(state, req)),
        _ => None,
    }
}
