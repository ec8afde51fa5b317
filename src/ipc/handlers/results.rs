use crate::ipc::error::{err, ok};
use crate::ipc::handlers::students::find_student;
use crate::ipc::helpers::{now_utc, optional_f64, optional_str, require_session, require_str};
use crate::ipc::types::{AppState, Request};
use crate::rank::{self, ScoreRow};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_results_record(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let paper_id = match require_str(req, "paperId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let class_id = match require_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let paper: Option<i64> = match conn
        .query_row(
            "SELECT is_main_paper FROM papers WHERE id = ?",
            [&paper_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(is_main_paper) = paper else {
        return err(&req.id, "not_found", "paper not found", None);
    };

    let grade: Option<i64> = match conn
        .query_row(
            "SELECT grade FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(grade) = grade else {
        return err(&req.id, "not_found", "student not found", None);
    };

    let marks = optional_f64(req, "marks");
    let part1 = optional_f64(req, "part1Marks");
    let part2 = optional_f64(req, "part2Marks");

    for (key, v) in [("marks", marks), ("part1Marks", part1), ("part2Marks", part2)] {
        if let Some(v) = v {
            if v < 0.0 {
                return err(
                    &req.id,
                    "bad_params",
                    "negative marks are not allowed",
                    Some(json!({ "param": key, "value": v })),
                );
            }
        }
    }

    // Main papers carry exactly the two part marks; plain papers exactly
    // the single mark. Totals are always derived, never supplied.
    let (marks, part1, part2, total) = if is_main_paper != 0 {
        let (Some(p1), Some(p2)) = (part1, part2) else {
            return err(
                &req.id,
                "bad_params",
                "part1Marks and part2Marks are required for a main paper",
                None,
            );
        };
        (None, Some(p1), Some(p2), p1 + p2)
    } else {
        let Some(m) = marks else {
            return err(&req.id, "bad_params", "marks are required", None);
        };
        (Some(m), None, None, m)
    };

    let result_id = Uuid::new_v4().to_string();
    let now = now_utc();
    if let Err(e) = conn.execute(
        "INSERT INTO results(id, student_id, paper_id, class_id, grade,
                             marks, part1_marks, part2_marks, total_marks,
                             created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
         ON CONFLICT(student_id, paper_id) DO UPDATE SET
           marks = excluded.marks,
           part1_marks = excluded.part1_marks,
           part2_marks = excluded.part2_marks,
           total_marks = excluded.total_marks,
           updated_at = excluded.created_at",
        params![
            result_id, student_id, paper_id, class_id, grade, marks, part1, part2, total, now
        ],
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "results" })),
        );
    }

    // On conflict the existing row keeps its id; read it back.
    let stored_id: String = match conn.query_row(
        "SELECT id FROM results WHERE student_id = ? AND paper_id = ?",
        [&student_id, &paper_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut result = json!({
        "resultId": stored_id,
        "studentId": student_id,
        "paperId": paper_id,
        "classId": class_id,
        "grade": grade,
        "totalMarks": total
    });
    let obj = result.as_object_mut().expect("result should be object");
    if let Some(m) = marks {
        obj.insert("marks".into(), json!(m));
    }
    if let Some(p) = part1 {
        obj.insert("part1Marks".into(), json!(p));
    }
    if let Some(p) = part2 {
        obj.insert("part2Marks".into(), json!(p));
    }

    ok(&req.id, result)
}

fn result_row_json(row: &rusqlite::Row<'_>) -> Result<serde_json::Value, rusqlite::Error> {
    let id: String = row.get(0)?;
    let student_id: String = row.get(1)?;
    let student_name: String = row.get(2)?;
    let index_number: String = row.get(3)?;
    let paper_id: String = row.get(4)?;
    let paper_name: String = row.get(5)?;
    let is_main_paper: i64 = row.get(6)?;
    let marks: Option<f64> = row.get(7)?;
    let part1: Option<f64> = row.get(8)?;
    let part2: Option<f64> = row.get(9)?;
    let total: f64 = row.get(10)?;
    let created_at: String = row.get(11)?;
    let updated_at: Option<String> = row.get(12)?;

    let mut v = json!({
        "id": id,
        "studentId": student_id,
        "studentName": student_name,
        "indexNumber": index_number,
        "paperId": paper_id,
        "paperName": paper_name,
        "isMainPaper": is_main_paper != 0,
        "totalMarks": total,
        "createdAt": created_at
    });
    let obj = v.as_object_mut().expect("row json should be object");
    if let Some(m) = marks {
        obj.insert("marks".into(), json!(m));
    }
    if let Some(p) = part1 {
        obj.insert("part1Marks".into(), json!(p));
    }
    if let Some(p) = part2 {
        obj.insert("part2Marks".into(), json!(p));
    }
    if let Some(u) = updated_at {
        obj.insert("updatedAt".into(), json!(u));
    }
    Ok(v)
}

const RESULT_ROW_COLUMNS: &str = "r.id, r.student_id, s.name, s.index_number,
         r.paper_id, p.name, p.is_main_paper,
         r.marks, r.part1_marks, r.part2_marks, r.total_marks,
         r.created_at, r.updated_at";

fn handle_results_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "results": [] }));
    };

    let student_filter = optional_str(req, "studentId");
    let paper_filter = optional_str(req, "paperId");
    let class_filter = optional_str(req, "classId");

    let sql = format!(
        "SELECT {}
         FROM results r
         JOIN students s ON s.id = r.student_id
         JOIN papers p ON p.id = r.paper_id
         WHERE (?1 IS NULL OR r.student_id = ?1)
           AND (?2 IS NULL OR r.paper_id = ?2)
           AND (?3 IS NULL OR r.class_id = ?3)
         ORDER BY r.total_marks DESC",
        RESULT_ROW_COLUMNS
    );

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map(
            params![student_filter, paper_filter, class_filter],
            result_row_json,
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(results) => ok(&req.id, json!({ "results": results })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn most_recent_paper(
    conn: &Connection,
    class_id: &str,
) -> Result<Option<serde_json::Value>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, name, is_main_paper, created_at FROM papers
         WHERE class_id = ?
         ORDER BY created_at DESC, rowid DESC
         LIMIT 1",
        [class_id],
        |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let is_main_paper: i64 = row.get(2)?;
            let created_at: String = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "isMainPaper": is_main_paper != 0,
                "createdAt": created_at
            }))
        },
    )
    .optional()
}

fn handle_results_top(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // A student's own lookup goes through their index number; admin screens
    // query by class directly.
    let mut student = None;
    let class_id = match optional_str(req, "indexNumber") {
        Some(index_number) => {
            let found = match find_student(conn, &index_number) {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            let Some(found) = found else {
                return err(&req.id, "not_found", "student not found", None);
            };
            let class_id = found
                .get("classId")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            student = Some(found);
            class_id
        }
        None => match require_str(req, "classId") {
            Ok(v) => v,
            Err(_) => {
                return err(
                    &req.id,
                    "bad_params",
                    "missing indexNumber or classId",
                    None,
                )
            }
        },
    };

    let paper_type_filter = match optional_str(req, "paperType").as_deref() {
        None => None,
        Some("main") => Some(1i64),
        Some("normal") => Some(0i64),
        Some(other) => {
            return err(
                &req.id,
                "bad_params",
                "paperType must be main or normal",
                Some(json!({ "paperType": other })),
            )
        }
    };
    let paper_filter = optional_str(req, "paperId");

    let total_students: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM students WHERE class_id = ?",
        [&class_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let recent_paper = match most_recent_paper(conn, &class_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(recent_paper) = recent_paper else {
        return err(&req.id, "not_found", "no papers found for this class", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT r.student_id, s.name, s.index_number, r.total_marks,
                r.marks, r.part1_marks, r.part2_marks
         FROM results r
         JOIN students s ON s.id = r.student_id
         JOIN papers p ON p.id = r.paper_id
         WHERE r.class_id = ?1
           AND (?2 IS NULL OR r.paper_id = ?2)
           AND (?3 IS NULL OR p.is_main_paper = ?3)
         ORDER BY r.total_marks DESC, r.rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map(params![class_id, paper_filter, paper_type_filter], |row| {
            Ok(ScoreRow {
                student_id: row.get(0)?,
                student_name: row.get(1)?,
                index_number: row.get(2)?,
                total_marks: row.get(3)?,
                marks: row.get(4)?,
                part1_marks: row.get(5)?,
                part2_marks: row.get(6)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let entries = rank::compute_leaderboard(&rows, total_students as usize);
    let limit = rank::leaderboard_limit(total_students as usize);

    let mut result = json!({
        "paper": recent_paper,
        "entries": entries,
        "limit": limit,
        "totalStudents": total_students
    });
    if let Some(s) = student {
        result
            .as_object_mut()
            .expect("result should be object")
            .insert("student".into(), s);
    }

    ok(&req.id, result)
}

fn handle_results_recent(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let index_number = match require_str(req, "indexNumber") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let student = match find_student(conn, &index_number) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let student_id = student
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let class_id = student
        .get("classId")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let recent_paper = match most_recent_paper(conn, &class_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "no papers found for this class", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let paper_id = recent_paper
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let sql = format!(
        "SELECT {}
         FROM results r
         JOIN students s ON s.id = r.student_id
         JOIN papers p ON p.id = r.paper_id
         WHERE r.student_id = ? AND r.paper_id = ?",
        RESULT_ROW_COLUMNS
    );
    let row = match conn
        .query_row(&sql, [&student_id, &paper_id], result_row_json)
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match row {
        Some(result) => ok(
            &req.id,
            json!({ "student": student, "paper": recent_paper, "result": result }),
        ),
        None => err(&req.id, "not_found", "no result found for recent paper", None),
    }
}

fn handle_results_past(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let index_number = match require_str(req, "indexNumber") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let student = match find_student(conn, &index_number) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let student_id = student
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let sql = format!(
        "SELECT {}
         FROM results r
         JOIN students s ON s.id = r.student_id
         JOIN papers p ON p.id = r.paper_id
         WHERE r.student_id = ?
         ORDER BY r.created_at DESC, r.rowid DESC",
        RESULT_ROW_COLUMNS
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&student_id], result_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(results) => ok(&req.id, json!({ "student": student, "results": results })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.record" => Some(handle_results_record(state, req)),
        "results.list" => Some(handle_results_list(state, req)),
        "results.top" => Some(handle_results_top(state, req)),
        "results.recent" => Some(handle_results_recent(state, req)),
        "results.past" => Some(handle_results_past(state, req)),
        _ => None,
    }
}
