use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_resultsd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn resultsd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

struct Board {
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    token: String,
    next_id: u64,
}

impl Board {
    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = format!("r{}", self.next_id);
        request_ok(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    fn create_class(&mut self, name: &str, grade: i64) -> String {
        let token = self.token.clone();
        self.call(
            "classes.create",
            json!({ "name": name, "grade": grade, "sessionToken": token.as_str() }),
        )
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string()
    }

    fn enroll(&mut self, class_id: &str, name: &str) -> (String, String) {
        let token = self.token.clone();
        let created = self.call(
            "students.create",
            json!({ "classId": class_id, "name": name, "sessionToken": token.as_str() }),
        );
        (
            created
                .get("studentId")
                .and_then(|v| v.as_str())
                .expect("studentId")
                .to_string(),
            created
                .get("indexNumber")
                .and_then(|v| v.as_str())
                .expect("indexNumber")
                .to_string(),
        )
    }

    fn create_paper(&mut self, class_id: &str, name: &str, is_main: bool) -> String {
        let token = self.token.clone();
        self.call(
            "papers.create",
            json!({
                "classId": class_id,
                "name": name,
                "isMainPaper": is_main,
                "sessionToken": token.as_str()
            }),
        )
        .get("paperId")
        .and_then(|v| v.as_str())
        .expect("paperId")
        .to_string()
    }

    fn record(&mut self, student_id: &str, paper_id: &str, class_id: &str, marks: f64) {
        let token = self.token.clone();
        let _ = self.call(
            "results.record",
            json!({
                "studentId": student_id,
                "paperId": paper_id,
                "classId": class_id,
                "marks": marks,
                "sessionToken": token.as_str()
            }),
        );
    }
}

fn setup(prefix: &str) -> (Child, Board, PathBuf) {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "adm",
        "admins.create",
        json!({ "username": "admin", "password": "admin-pass" }),
    );
    let login = request_ok(
        &mut stdin,
        &mut reader,
        "login",
        "auth.login",
        json!({ "username": "admin", "password": "admin-pass" }),
    );
    let token = login
        .get("sessionToken")
        .and_then(|v| v.as_str())
        .expect("sessionToken")
        .to_string();
    (
        child,
        Board {
            stdin,
            reader,
            token,
            next_id: 0,
        },
        workspace,
    )
}

fn ranks(top: &serde_json::Value) -> Vec<(u64, f64)> {
    top.get("entries")
        .and_then(|v| v.as_array())
        .expect("entries")
        .iter()
        .map(|e| {
            (
                e.get("rank").and_then(|v| v.as_u64()).expect("rank"),
                e.get("totalMarks")
                    .and_then(|v| v.as_f64())
                    .expect("totalMarks"),
            )
        })
        .collect()
}

#[test]
fn tied_totals_share_rank_and_next_rank_skips() {
    let (mut child, mut b, workspace) = setup("resultsd-rank-ties");

    let class_id = b.create_class("3A", 3);
    let mut students = Vec::new();
    for i in 0..12 {
        students.push(b.enroll(&class_id, &format!("Student {}", i)));
    }
    let paper_id = b.create_paper(&class_id, "Term 1", false);

    b.record(&students[0].0, &paper_id, &class_id, 90.0);
    b.record(&students[1].0, &paper_id, &class_id, 90.0);
    b.record(&students[2].0, &paper_id, &class_id, 80.0);

    let top = b.call("results.top", json!({ "classId": class_id.as_str() }));
    assert_eq!(ranks(&top), vec![(1, 90.0), (1, 90.0), (3, 80.0)]);

    drop(b.stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn limit_is_five_below_ten_students_and_ten_after() {
    let (mut child, mut b, workspace) = setup("resultsd-rank-limit");

    let class_id = b.create_class("4A", 4);
    let mut students = Vec::new();
    for i in 0..9 {
        students.push(b.enroll(&class_id, &format!("Student {}", i)));
    }
    let paper_id = b.create_paper(&class_id, "Term 1", false);
    for (i, (student_id, _)) in students.iter().enumerate() {
        b.record(student_id, &paper_id, &class_id, 50.0 + i as f64);
    }

    let top = b.call("results.top", json!({ "classId": class_id.as_str() }));
    assert_eq!(top.get("limit").and_then(|v| v.as_u64()), Some(5));
    assert_eq!(top.get("totalStudents").and_then(|v| v.as_u64()), Some(9));
    assert_eq!(
        top.get("entries").and_then(|v| v.as_array()).unwrap().len(),
        5
    );

    // Tenth student flips the limit even before any marks are recorded.
    let (tenth_id, _) = b.enroll(&class_id, "Student 9");
    b.record(&tenth_id, &paper_id, &class_id, 99.0);

    let top = b.call("results.top", json!({ "classId": class_id.as_str() }));
    assert_eq!(top.get("limit").and_then(|v| v.as_u64()), Some(10));
    assert_eq!(top.get("totalStudents").and_then(|v| v.as_u64()), Some(10));
    assert_eq!(
        top.get("entries").and_then(|v| v.as_array()).unwrap().len(),
        10
    );

    drop(b.stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn student_keeps_only_best_total_across_papers() {
    let (mut child, mut b, workspace) = setup("resultsd-rank-best");

    let class_id = b.create_class("3B", 3);
    let (alice, _) = b.enroll(&class_id, "Alice");
    let (bob, _) = b.enroll(&class_id, "Bob");
    let p1 = b.create_paper(&class_id, "Term 1", false);
    let p2 = b.create_paper(&class_id, "Term 2", false);

    b.record(&alice, &p1, &class_id, 40.0);
    b.record(&alice, &p2, &class_id, 85.0);
    b.record(&bob, &p1, &class_id, 70.0);

    let top = b.call("results.top", json!({ "classId": class_id.as_str() }));
    assert_eq!(ranks(&top), vec![(1, 85.0), (2, 70.0)]);

    drop(b.stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn repeated_queries_return_identical_boards() {
    let (mut child, mut b, workspace) = setup("resultsd-rank-idem");

    let class_id = b.create_class("5A", 5);
    let mut students = Vec::new();
    for i in 0..4 {
        students.push(b.enroll(&class_id, &format!("Student {}", i)));
    }
    let paper_id = b.create_paper(&class_id, "Term 1", false);
    for (i, (student_id, _)) in students.iter().enumerate() {
        b.record(student_id, &paper_id, &class_id, 60.0 + (i % 2) as f64);
    }

    let first = b.call("results.top", json!({ "classId": class_id.as_str() }));
    let second = b.call("results.top", json!({ "classId": class_id.as_str() }));
    assert_eq!(first.get("entries"), second.get("entries"));
    assert_eq!(first.get("limit"), second.get("limit"));

    drop(b.stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn grade_five_splits_main_and_normal_categories() {
    let (mut child, mut b, workspace) = setup("resultsd-rank-cats");

    let class_id = b.create_class("5C", 5);
    let (alice, _) = b.enroll(&class_id, "Alice");
    let (bob, _) = b.enroll(&class_id, "Bob");
    let main_paper = b.create_paper(&class_id, "Scholarship", true);
    let normal_paper = b.create_paper(&class_id, "Monthly", false);

    let token = b.token.clone();
    let _ = b.call(
        "results.record",
        json!({
            "studentId": alice.as_str(),
            "paperId": main_paper.as_str(),
            "classId": class_id.as_str(),
            "part1Marks": 48,
            "part2Marks": 44,
            "sessionToken": token.as_str()
        }),
    );
    b.record(&bob, &normal_paper, &class_id, 63.0);

    let main_top = b.call(
        "results.top",
        json!({ "classId": class_id.as_str(), "paperType": "main" }),
    );
    assert_eq!(ranks(&main_top), vec![(1, 92.0)]);
    let entry = &main_top.get("entries").unwrap().as_array().unwrap()[0];
    assert_eq!(entry.get("part1Marks").and_then(|v| v.as_f64()), Some(48.0));
    assert_eq!(entry.get("part2Marks").and_then(|v| v.as_f64()), Some(44.0));

    let normal_top = b.call(
        "results.top",
        json!({ "classId": class_id.as_str(), "paperType": "normal" }),
    );
    assert_eq!(ranks(&normal_top), vec![(1, 63.0)]);

    drop(b.stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn main_category_filter_matches_nothing_outside_grade_five() {
    let (mut child, mut b, workspace) = setup("resultsd-rank-nomain");

    let class_id = b.create_class("3D", 3);
    let (alice, _) = b.enroll(&class_id, "Alice");
    let paper_id = b.create_paper(&class_id, "Term 1", false);
    b.record(&alice, &paper_id, &class_id, 77.0);

    let top = b.call(
        "results.top",
        json!({ "classId": class_id.as_str(), "paperType": "main" }),
    );
    assert!(top
        .get("entries")
        .and_then(|v| v.as_array())
        .unwrap()
        .is_empty());

    drop(b.stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn student_lookup_by_index_number_includes_student_record() {
    let (mut child, mut b, workspace) = setup("resultsd-rank-lookup");

    let class_id = b.create_class("4B", 4);
    let (alice, alice_index) = b.enroll(&class_id, "Alice");
    let paper_id = b.create_paper(&class_id, "Term 1", false);
    b.record(&alice, &paper_id, &class_id, 81.0);

    let top = b.call("results.top", json!({ "indexNumber": alice_index.as_str() }));
    assert_eq!(
        top.get("student")
            .and_then(|s| s.get("indexNumber"))
            .and_then(|v| v.as_str()),
        Some(alice_index.as_str())
    );
    assert_eq!(
        top.get("paper")
            .and_then(|p| p.get("id"))
            .and_then(|v| v.as_str()),
        Some(paper_id.as_str())
    );
    assert_eq!(ranks(&top), vec![(1, 81.0)]);

    drop(b.stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
