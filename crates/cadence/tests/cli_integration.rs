//! CLI integration tests for the Cadence command-line interface.
//!
//! Each test runs the binary against a throwaway config directory and
//! database, so nothing touches the user's real state.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A sandboxed cadence invocation.
struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn db(&self) -> PathBuf {
        self.path().join("cadence.db")
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("cadence").unwrap();
        cmd.current_dir(self.path())
            .env("CADENCE_CONFIG_DIR", self.path().join("config"))
            .env_remove("CADENCE_CONFIG")
            .arg("--db")
            .arg(self.db());
        cmd
    }

    fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn json(&self, args: &[&str]) -> serde_json::Value {
        let output = self.cmd().arg("--json").args(args).output().unwrap();
        assert!(
            output.status.success(),
            "cadence {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).unwrap()
    }

    fn add_codex(&self, name: &str, body: &str) {
        let file = self.script(&format!("{name}.sh"), body);
        self.cmd()
            .args(["codex", "add", name, "--file"])
            .arg(file)
            .assert()
            .success();
    }
}

fn cadence() -> Command {
    Command::cargo_bin("cadence").unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_displays() {
    cadence()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Cadence"))
        .stdout(predicate::str::contains("task scheduler"));
}

#[test]
fn test_version_displays() {
    cadence()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("cadence"));
}

#[test]
fn test_help_lists_subcommands() {
    cadence()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("codex"))
        .stdout(predicate::str::contains("tasks"))
        .stdout(predicate::str::contains("schedules"));
}

#[test]
fn test_unknown_subcommand_rejected() {
    cadence().arg("frobnicate").assert().failure();
}

#[test]
fn test_tasks_create_requires_step() {
    cadence()
        .args(["tasks", "create", "nightly"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--step"));
}

#[test]
fn test_bad_step_syntax_rejected() {
    cadence()
        .args(["tasks", "create", "nightly", "--step", "build:later"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("build:later"));
}

// ─────────────────────────────────────────────────────────────────────────────
// End-to-end Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_codex_add_and_list() {
    let sb = Sandbox::new();
    sb.add_codex("hello", "echo hello");

    let codices = sb.json(&["codex", "list"]);
    let list = codices.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["name"], "hello");
    assert_eq!(list[0]["payload"], "echo hello");
}

#[test]
fn test_duplicate_codex_rejected() {
    let sb = Sandbox::new();
    sb.add_codex("hello", "echo hello");
    let file = sb.script("again.sh", "echo again");
    sb.cmd()
        .args(["codex", "add", "hello", "--file"])
        .arg(file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("ValidationError"));
}

#[test]
fn test_run_task_to_completion() {
    let sb = Sandbox::new();
    sb.add_codex("first", "echo one");
    sb.add_codex("second", "echo two");

    let created = sb.json(&[
        "tasks", "create", "pair", "--step", "first", "--step", "second",
    ]);
    let task_id = created["task_id"].as_str().unwrap().to_string();
    assert!(created.get("schedule_id").is_none());

    let run = sb.json(&["tasks", "run", &task_id]);
    assert_eq!(run["outcome"], "started");
    assert_eq!(run["status"], "completed");

    let status = sb.json(&["tasks", "status", &task_id]);
    assert_eq!(status["status"], "completed");
    assert_eq!(status["step_to_execute"], 2);
    assert_eq!(status["total_steps"], 2);

    let logs = sb.json(&["tasks", "logs", &task_id]);
    let logs = logs.as_array().unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0]["status"], "completed");
    assert!(logs[0]["result"].as_str().unwrap().contains("two"));
}

#[test]
fn test_failing_step_marks_task_failed() {
    let sb = Sandbox::new();
    sb.add_codex("broken", "echo nope >&2; exit 3");

    let created = sb.json(&["tasks", "create", "doomed", "--step", "broken"]);
    let task_id = created["task_id"].as_str().unwrap().to_string();

    let run = sb.json(&["tasks", "run", &task_id]);
    assert_eq!(run["status"], "failed");
    assert_eq!(run["step_to_execute"], 0);

    let logs = sb.json(&["tasks", "logs", &task_id, "--limit", "1"]);
    assert_eq!(logs[0]["status"], "failed");
    assert!(logs[0]["result"].as_str().unwrap().contains("nope"));
}

#[test]
fn test_async_step_with_wait() {
    let sb = Sandbox::new();
    sb.add_codex("slow", "sleep 0.2; echo done");

    let created = sb.json(&["tasks", "create", "bg", "--step", "slow:async"]);
    let task_id = created["task_id"].as_str().unwrap().to_string();

    let run = sb.json(&["tasks", "run", &task_id, "--wait", "--wait-timeout", "30"]);
    assert_eq!(run["status"], "completed");
    assert_eq!(run["step_to_execute"], 1);
}

#[test]
fn test_scheduled_task_listing_and_toggle() {
    let sb = Sandbox::new();
    sb.add_codex("tick", "true");

    let created = sb.json(&[
        "tasks", "create", "hourly", "--step", "tick", "--every", "3600", "--after", "600",
    ]);
    let schedule_id = created["schedule_id"].as_str().unwrap().to_string();

    let page = sb.json(&["tasks", "list", "--scheduled"]);
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["interval"], "every 1 hours");
    assert_eq!(page["items"][0]["disabled"], false);

    sb.cmd()
        .args(["schedules", "toggle", &schedule_id, "--disabled", "true"])
        .assert()
        .success()
        .stdout(predicate::str::contains("disabled"));

    let schedule = sb.json(&["schedules", "show", &schedule_id]);
    assert_eq!(schedule["disabled"], true);

    // Not due yet, and disabled anyway.
    let report = sb.json(&["serve", "--once"]);
    assert_eq!(report["dispatched"], 0);
}

#[test]
fn test_serve_once_dispatches_due_schedule() {
    let sb = Sandbox::new();
    sb.add_codex("tick", "true");
    let created = sb.json(&["tasks", "create", "now", "--step", "tick", "--every", "0"]);
    let task_id = created["task_id"].as_str().unwrap().to_string();

    let report = sb.json(&["serve", "--once"]);
    assert_eq!(report["dispatched"], 1);
    assert_eq!(report["recovered"], 0);

    let again = sb.json(&["serve", "--once"]);
    assert_eq!(again["dispatched"], 0);

    let status = sb.json(&["tasks", "status", &task_id]);
    assert_eq!(status["status"], "completed");
}

#[test]
fn test_stop_and_delete() {
    let sb = Sandbox::new();
    sb.add_codex("tick", "true");
    let created = sb.json(&["tasks", "create", "t", "--step", "tick"]);
    let task_id = created["task_id"].as_str().unwrap().to_string();

    sb.cmd().args(["tasks", "stop", &task_id]).assert().success();
    let status = sb.json(&["tasks", "status", &task_id]);
    assert_eq!(status["status"], "cancelled");

    sb.cmd()
        .args(["tasks", "run", &task_id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cancelled"));

    sb.cmd().args(["tasks", "delete", &task_id]).assert().success();
    sb.cmd()
        .args(["tasks", "status", &task_id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("NotFoundError"));
}

#[test]
fn test_zero_page_size_rejected() {
    let sb = Sandbox::new();
    sb.cmd()
        .args(["tasks", "list", "--page-size", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("page_size"));
}
