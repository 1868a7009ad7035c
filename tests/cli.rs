//! Command-line surface of the snipbox binary.

use serde_json::Value;
use std::io::Write;
use std::process::{Command, Output, Stdio};

fn snipbox(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_snipbox"))
        .args(args)
        .env_remove("SNIPBOX_WORKER")
        .output()
        .unwrap()
}

fn snipbox_with_stdin(args: &[&str], input: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_snipbox"))
        .args(args)
        .env_remove("SNIPBOX_WORKER")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(input.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

fn json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({e}): {}\nstderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

#[test]
fn exec_inline_code() {
    let output = snipbox(&["exec", "--deadline", "5", "print('hello')"]);
    assert!(output.status.success());
    let outcome = json(&output);
    assert_eq!(outcome["succeeded"], true);
    assert_eq!(outcome["captured_output"], "hello\n");
    assert_eq!(outcome["kind"], "OK");
    assert!(outcome["diagnostic"].is_null());
}

#[test]
fn exec_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "total = sum([1, 2, 3])").unwrap();
    writeln!(file, "print(f'total={{total}}')").unwrap();
    let path = file.path().to_str().unwrap().to_string();
    let output = snipbox(&["exec", "--file", &path]);
    assert!(output.status.success());
    assert_eq!(json(&output)["captured_output"], "total=6\n");
}

#[test]
fn exec_from_stdin() {
    let output = snipbox_with_stdin(&["exec"], "for i in range(3):\n    print(i)\n");
    assert!(output.status.success());
    assert_eq!(json(&output)["captured_output"], "0\n1\n2\n");
}

#[test]
fn exec_blocked_exits_nonzero() {
    let output = snipbox(&["exec", "import os"]);
    assert_eq!(output.status.code(), Some(1));
    let outcome = json(&output);
    assert_eq!(outcome["kind"], "BLOCKED");
    assert_eq!(outcome["succeeded"], false);
}

#[test]
fn exec_timeout() {
    let output = snipbox(&["exec", "--deadline", "0.5", "while True: pass"]);
    assert_eq!(output.status.code(), Some(1));
    let outcome = json(&output);
    assert_eq!(outcome["kind"], "TLE");
    assert_eq!(outcome["diagnostic"], "Timeout");
}

#[test]
fn exec_rejects_bad_deadline() {
    let output = snipbox(&["exec", "--deadline", "0", "print(1)"]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(json(&output)["diagnostic"], "invalid deadline: 0");
}

#[test]
fn extract_reports_language_and_code() {
    let output = snipbox(&["extract", "text\n```python\nprint(1)\n```\n"]);
    assert!(output.status.success());
    let snippet = json(&output);
    assert_eq!(snippet["language"], "python");
    assert_eq!(snippet["code"], "print(1)");
    assert_eq!(snippet["fenced"], true);
}

#[test]
fn compare_exit_code_tracks_match() {
    let output = snipbox(&["compare", "--expected", "0,1,1,2", "0 1 1 2"]);
    assert!(output.status.success());
    assert_eq!(json(&output)["matched"], true);

    let output = snipbox(&["compare", "--expected", "-1,2,3", "-1 2"]);
    assert_eq!(output.status.code(), Some(1));
    let result = json(&output);
    assert_eq!(result["reason"], "Mismatch");
    assert_eq!(result["observed"], serde_json::json!([-1, 2]));
}

#[test]
fn evaluate_fenced_answer() {
    let answer = "```python\na, b = 0, 1\nfor _ in range(10):\n    print(a, end=' ')\n    a, b = b, a + b\n```";
    let output = snipbox(&["evaluate", "--expected", "0,1,1,2,3,5,8,13,21,34", answer]);
    assert!(output.status.success());
    let report = json(&output);
    assert_eq!(report["ok"], true);
    assert_eq!(report["reason"], "");
    assert_eq!(report["stdout"], "0 1 1 2 3 5 8 13 21 34 ");
}

#[test]
fn evaluate_rejects_foreign_language() {
    let output = snipbox(&["evaluate", "--expected", "1", "```js\nconsole.log(1)\n```"]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(
        json(&output)["reason"],
        "Non-Python code block detected: js"
    );
}

#[test]
fn audit_log_records_the_run_without_the_snippet() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let path_arg = path.to_str().unwrap().to_string();
    let output = snipbox(&["--audit-log", &path_arg, "exec", "secret_value = 7"]);
    assert!(output.status.success());

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(!text.contains("secret_value"));
    let events: Vec<Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let kinds: Vec<&str> = events
        .iter()
        .filter_map(|e| e["event_type"].as_str())
        .collect();
    assert_eq!(kinds.first(), Some(&"ExecutionStart"));
    assert!(kinds.contains(&"WorkerSpawned"));
    assert_eq!(kinds.last(), Some(&"ExecutionEnd"));
    assert_eq!(events.last().unwrap()["outcome"], "OK");
}

#[test]
fn metrics_file_counts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snipbox.prom");
    let path_arg = path.to_str().unwrap().to_string();
    let output = snipbox(&["--metrics-file", &path_arg, "exec", "import os"]);
    assert_eq!(output.status.code(), Some(1));

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("# TYPE snipbox_executions_total counter"));
    assert!(text.contains("snipbox_executions_total 1\n"));
    assert!(text.contains("snipbox_executions_by_outcome{outcome=\"BLOCKED\"} 1\n"));
    assert!(text.contains("snipbox_workers_spawned_total 0\n"));
}

#[test]
fn unknown_internal_role_fails() {
    let output = snipbox(&["--internal-role", "proxy"]);
    assert!(!output.status.success());
}
