//! Binary-level tests for the non-interactive commands

mod common;

use assert_cmd::Command;
use predicates::prelude::*;

fn lampstand() -> Command {
    let mut cmd = Command::cargo_bin("lampstand").unwrap();
    cmd.env_remove("LAMPSTAND_DB")
        .env_remove("LAMPSTAND_STORAGE_BACKEND")
        .env_remove("LAMPSTAND_MESSAGE_LIMIT")
        .env_remove("LAMPSTAND_USER")
        .env("NO_COLOR", "1");
    cmd
}

#[test]
fn test_help_lists_commands() {
    lampstand()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("chat"))
        .stdout(predicate::str::contains("history"))
        .stdout(predicate::str::contains("quota"));
}

#[test]
fn test_quota_in_memory_shows_full_allowance() {
    lampstand()
        .args(["--memory", "quota"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0/10 messages used, 10 left"));
}

#[test]
fn test_quota_respects_config_file() {
    let (_dir, path) = common::temp_config_file("quota:\n  message_limit: 3\n");
    lampstand()
        .args(["--memory", "--config"])
        .arg(&path)
        .arg("quota")
        .assert()
        .success()
        .stdout(predicate::str::contains("0/3 messages used"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_dir, path) = common::temp_config_file("quota:\n  window_days: 0\n");
    lampstand()
        .args(["--memory", "--config"])
        .arg(&path)
        .arg("quota")
        .assert()
        .failure()
        .stderr(predicate::str::contains("window_days"));
}

#[test]
fn test_history_list_empty_database() {
    let dir = tempfile::tempdir().unwrap();
    lampstand()
        .arg("--db")
        .arg(dir.path().join("lampstand.db"))
        .args(["history", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No conversation history found."));
}

#[test]
fn test_history_rename_unknown_session_fails() {
    let dir = tempfile::tempdir().unwrap();
    lampstand()
        .arg("--db")
        .arg(dir.path().join("lampstand.db"))
        .args(["history", "rename", "missing000", "Novo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Session not found"));
}
