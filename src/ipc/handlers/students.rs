use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{now_utc, optional_str, require_session, require_str};
use crate::ipc::types::{AppState, Request};
use crate::roll::{self, RollError};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn is_unique_violation(e: &rusqlite::Error, needle: &str) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(f, Some(msg)) => {
            f.code == rusqlite::ErrorCode::ConstraintViolation && msg.contains(needle)
        }
        _ => false,
    }
}

fn highest_index_number(conn: &Connection, grade: i64) -> Result<Option<String>, rusqlite::Error> {
    // Fixed-width zero padding makes lexicographic order numeric order.
    conn.query_row(
        "SELECT index_number FROM students WHERE grade = ? ORDER BY index_number DESC LIMIT 1",
        [grade],
        |r| r.get(0),
    )
    .optional()
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_session(state, req) {
        return e.response(&req.id);
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match require_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let class_id = match require_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let grade: Option<i64> = match conn
        .query_row("SELECT grade FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(grade) = grade else {
        return err(&req.id, "not_found", "class not found", None);
    };

    // Allocate and insert in one transaction; a lost race on the UNIQUE
    // index number is retried once with a fresh read.
    let student_id = Uuid::new_v4().to_string();
    let mut index_number = String::new();
    for attempt in 0..2 {
        let tx = match conn.unchecked_transaction() {
            Ok(t) => t,
            Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
        };

        let highest = match highest_index_number(&tx, grade) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        index_number = match roll::next_index_number(grade, highest.as_deref()) {
            Ok(v) => v,
            Err(RollError::UnsupportedGrade(_)) => {
                return err(
                    &req.id,
                    "bad_params",
                    RollError::UnsupportedGrade(grade).message(),
                    Some(json!({ "grade": grade })),
                )
            }
            Err(e) => return err(&req.id, "index_alloc_failed", e.message(), None),
        };

        match tx.execute(
            "INSERT INTO students(id, class_id, name, index_number, grade, created_at)
             VALUES(?, ?, ?, ?, ?, ?)",
            (&student_id, &class_id, &name, &index_number, grade, now_utc()),
        ) {
            Ok(_) => {}
            Err(e) if attempt == 0 && is_unique_violation(&e, "index_number") => {
                let _ = tx.rollback();
                continue;
            }
            Err(e) => {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "students" })),
                );
            }
        }

        if let Err(e) = tx.commit() {
            return err(&req.id, "db_commit_failed", e.to_string(), None);
        }
        break;
    }

    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "name": name,
            "indexNumber": index_number,
            "classId": class_id,
            "grade": grade
        }),
    )
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };

    let class_filter = optional_str(req, "classId");

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.name, s.index_number, s.grade, s.class_id, c.name, s.created_at
         FROM students s
         JOIN classes c ON c.id = s.class_id
         WHERE (?1 IS NULL OR s.class_id = ?1)
         ORDER BY s.index_number",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([class_filter], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let index_number: String = row.get(2)?;
            let grade: i64 = row.get(3)?;
            let class_id: String = row.get(4)?;
            let class_name: String = row.get(5)?;
            let created_at: String = row.get(6)?;
            Ok(json!({
                "id": id,
                "name": name,
                "indexNumber": index_number,
                "grade": grade,
                "classId": class_id,
                "className": class_name,
                "createdAt": created_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Looks a student up by row id first, then by index number. Students only
/// know their index number; admin screens pass ids.
pub(crate) fn find_student(
    conn: &Connection,
    key: &str,
) -> Result<Option<serde_json::Value>, rusqlite::Error> {
    conn.query_row(
        "SELECT s.id, s.name, s.index_number, s.grade, s.class_id, c.name, c.grade, s.created_at
         FROM students s
         JOIN classes c ON c.id = s.class_id
         WHERE s.id = ?1 OR s.index_number = ?1",
        [key],
        |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let index_number: String = row.get(2)?;
            let grade: i64 = row.get(3)?;
            let class_id: String = row.get(4)?;
            let class_name: String = row.get(5)?;
            let class_grade: i64 = row.get(6)?;
            let created_at: String = row.get(7)?;
            Ok(json!({
                "id": id,
                "name": name,
                "indexNumber": index_number,
                "grade": grade,
                "classId": class_id,
                "className": class_name,
                "classGrade": class_grade,
                "createdAt": created_at
            }))
        },
    )
    .optional()
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let key = match require_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match find_student(conn, &key) {
        Ok(Some(student)) => ok(&req.id, json!({ "student": student })),
        Ok(None) => err(&req.id, "not_found", "student not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_session(state, req) {
        return e.response(&req.id);
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match require_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let name = match require_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match conn.execute(
        "UPDATE students SET name = ? WHERE id = ?",
        (&name, &student_id),
    ) {
        Ok(0) => err(&req.id, "not_found", "student not found", None),
        Ok(_) => ok(&req.id, json!({ "studentId": student_id, "name": name })),
        Err(e) => err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        ),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_session(state, req) {
        return e.response(&req.id);
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match require_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute("DELETE FROM results WHERE student_id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "results" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
