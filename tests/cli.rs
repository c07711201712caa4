//! Integration tests for CLI commands

#![allow(deprecated)]

use assert_cmd::{assert::OutputAssertExt, cargo::CommandCargoExt};
use predicates::prelude::*;
use std::process::Command;
use tempfile::TempDir;

fn empty_config(tmp: &TempDir) -> std::path::PathBuf {
    let path = tmp.path().join("config.toml");
    std::fs::write(&path, "").unwrap();
    path
}

#[test]
fn test_help_lists_commands() {
    let mut cmd = Command::cargo_bin("supportchat").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Support chat client"))
        .stdout(predicate::str::contains("chat"))
        .stdout(predicate::str::contains("history"))
        .stdout(predicate::str::contains("upload"));
}

#[test]
fn test_upload_command_help() {
    let mut cmd = Command::cargo_bin("supportchat").unwrap();
    cmd.arg("upload").arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Upload files to the support team"));
}

#[test]
fn test_upload_requires_files() {
    let mut cmd = Command::cargo_bin("supportchat").unwrap();
    cmd.arg("upload");

    cmd.assert().failure();
}

#[test]
fn test_chat_without_user_fails() {
    let tmp = TempDir::new().unwrap();
    let config = empty_config(&tmp);

    let mut cmd = Command::cargo_bin("supportchat").unwrap();
    cmd.arg("chat")
        .arg("hello")
        .arg("--config")
        .arg(&config)
        .env_remove("RUST_LOG");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("No user id configured"));
}

#[test]
fn test_history_without_user_fails() {
    let tmp = TempDir::new().unwrap();
    let config = empty_config(&tmp);

    let mut cmd = Command::cargo_bin("supportchat").unwrap();
    cmd.arg("history").arg("--config").arg(&config);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("No user id configured"));
}

#[test]
fn test_unreachable_server_reports_error() {
    let tmp = TempDir::new().unwrap();
    let config = empty_config(&tmp);

    // Port 9 (discard) is essentially never served locally
    let mut cmd = Command::cargo_bin("supportchat").unwrap();
    cmd.arg("history")
        .arg("--config")
        .arg(&config)
        .arg("--user")
        .arg("user-1")
        .arg("--base-url")
        .arg("http://127.0.0.1:9/api");

    cmd.assert().failure();
}
