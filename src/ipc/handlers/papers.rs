use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{now_utc, optional_str, require_session, require_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

/// Composite papers (part 1 + part 2 marks) exist for grade 5 only.
pub const MAIN_PAPER_GRADE: i64 = 5;

fn handle_papers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let is_main_paper = req
        .params
        .get("isMainPaper")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

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

    if is_main_paper && grade != MAIN_PAPER_GRADE {
        return err(
            &req.id,
            "bad_params",
            "main paper is only available for grade 5",
            Some(json!({ "grade": grade })),
        );
    }

    let paper_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO papers(id, class_id, name, grade, is_main_paper, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &paper_id,
            &class_id,
            &name,
            grade,
            is_main_paper as i64,
            now_utc(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "papers" })),
        );
    }

    ok(
        &req.id,
        json!({
            "paperId": paper_id,
            "name": name,
            "classId": class_id,
            "grade": grade,
            "isMainPaper": is_main_paper
        }),
    )
}

fn handle_papers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "papers": [] }));
    };

    let class_filter = optional_str(req, "classId");

    let mut stmt = match conn.prepare(
        "SELECT p.id, p.name, p.class_id, c.name, p.grade, p.is_main_paper, p.created_at
         FROM papers p
         JOIN classes c ON c.id = p.class_id
         WHERE (?1 IS NULL OR p.class_id = ?1)
         ORDER BY p.created_at DESC, p.rowid DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([class_filter], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let class_id: String = row.get(2)?;
            let class_name: String = row.get(3)?;
            let grade: i64 = row.get(4)?;
            let is_main_paper: i64 = row.get(5)?;
            let created_at: String = row.get(6)?;
            Ok(json!({
                "id": id,
                "name": name,
                "classId": class_id,
                "className": class_name,
                "grade": grade,
                "isMainPaper": is_main_paper != 0,
                "createdAt": created_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(papers) => ok(&req.id, json!({ "papers": papers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "papers.create" => Some(handle_papers_create(state, req)),
        "papers.list" => Some(handle_papers_list(state, req)),
        _ => None,
    }
}
