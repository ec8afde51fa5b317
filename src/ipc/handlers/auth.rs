use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{now_utc, require_session, require_str};
use crate::ipc::types::{AppState, Request, Session};
use rusqlite::OptionalExtension;
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

fn hash_password(password: &str, salt: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", salt, password).as_bytes());
    format!("{}${:x}", salt, digest)
}

fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt, _)) = stored.split_once('$') else {
        return false;
    };
    hash_password(password, salt) == stored
}

fn handle_admins_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let username = match require_str(req, "username") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let password = match require_str(req, "password") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let admin_count: i64 = match conn.query_row("SELECT COUNT(*) FROM admins", [], |r| r.get(0)) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // First admin bootstraps an empty workspace; after that the caller
    // must already be logged in.
    if admin_count > 0 {
        if let Err(e) = require_session(state, req) {
            return e.response(&req.id);
        }
    }

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM admins WHERE username = ?", [&username], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_some() {
        return err(
            &req.id,
            "bad_params",
            "admin with this username already exists",
            None,
        );
    }

    let admin_id = Uuid::new_v4().to_string();
    let salt = Uuid::new_v4().to_string();
    let password_hash = hash_password(&password, &salt);

    if let Err(e) = conn.execute(
        "INSERT INTO admins(id, username, password_hash, created_at) VALUES(?, ?, ?, ?)",
        (&admin_id, &username, &password_hash, now_utc()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "admins" })),
        );
    }

    ok(&req.id, json!({ "adminId": admin_id, "username": username }))
}

fn handle_auth_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let username = match require_str(req, "username") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let password = match require_str(req, "password") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let row: Option<(String, String)> = {
        let Some(conn) = state.db.as_ref() else {
            return err(&req.id, "no_workspace", "select a workspace first", None);
        };
        match conn
            .query_row(
                "SELECT id, password_hash FROM admins WHERE username = ?",
                [&username],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    let Some((admin_id, password_hash)) = row else {
        return err(&req.id, "unauthorized", "invalid username or password", None);
    };
    if !verify_password(&password, &password_hash) {
        return err(&req.id, "unauthorized", "invalid username or password", None);
    }

    let token = Uuid::new_v4().to_string();
    state.sessions.insert(
        token.clone(),
        Session {
            admin_id,
            username: username.clone(),
        },
    );

    ok(
        &req.id,
        json!({ "sessionToken": token, "username": username }),
    )
}

/// Token introspection for the shell: resuming a window re-checks its
/// stored token here instead of replaying a login.
fn handle_auth_session(state: &mut AppState, req: &Request) -> serde_json::Value {
    let token = match require_str(req, "sessionToken") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match state.sessions.get(&token) {
        Some(s) => ok(
            &req.id,
            json!({ "adminId": s.admin_id, "username": s.username }),
        ),
        None => err(&req.id, "unauthorized", "invalid or expired session", None),
    }
}

fn handle_auth_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let token = match require_str(req, "sessionToken") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let removed = state.sessions.remove(&token).is_some();
    ok(&req.id, json!({ "loggedOut": removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "admins.create" => Some(handle_admins_create(state, req)),
        "auth.login" => Some(handle_auth_login(state, req)),
        "auth.session" => Some(handle_auth_session(state, req)),
        "auth.logout" => Some(handle_auth_logout(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_roundtrip_verifies() {
        let stored = hash_password("s3cret", "salt-a");
        assert!(verify_password("s3cret", &stored));
        assert!(!verify_password("wrong", &stored));
    }

    #[test]
    fn same_password_different_salts_differ() {
        let a = hash_password("pw", "salt-a");
        let b = hash_password("pw", "salt-b");
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_stored_hash_rejected() {
        assert!(!verify_password("pw", "no-separator"));
    }
}
