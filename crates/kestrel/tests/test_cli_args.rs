//! Argument parsing for the kestrel CLI

mod common;

use common::kestrel;
use predicates::prelude::*;

#[test]
fn test_help_flag() {
    kestrel()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("personal AI agent"))
        .stdout(predicate::str::contains("--version"));
}

#[test]
fn test_version_flag() {
    kestrel()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_no_args_shows_usage() {
    kestrel()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_help_lists_commands() {
    let output = kestrel().arg("--help").output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["init", "chat", "gateway", "status", "cron", "sessions"] {
        assert!(stdout.contains(command), "help is missing {}", command);
    }
}

#[test]
fn test_chat_help() {
    kestrel()
        .args(["chat", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Chat with the agent"))
        .stdout(predicate::str::contains("-m, --message"))
        .stdout(predicate::str::contains("-s, --session"))
        .stdout(predicate::str::contains("[default: default]"));
}

#[test]
fn test_gateway_help() {
    kestrel()
        .args(["gateway", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("-v, --verbose"));
}

#[test]
fn test_cron_add_help() {
    kestrel()
        .args(["cron", "add", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("-n, --name"))
        .stdout(predicate::str::contains("-m, --message"))
        .stdout(predicate::str::contains("-e, --every"))
        .stdout(predicate::str::contains("-c, --cron"))
        .stdout(predicate::str::contains("--at"))
        .stdout(predicate::str::contains("--delete-after-run"));
}

#[test]
fn test_cron_add_requires_a_schedule() {
    kestrel()
        .args(["cron", "add", "-n", "job", "-m", "hello"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}

#[test]
fn test_cron_add_rejects_two_schedules() {
    kestrel()
        .args(["cron", "add", "-n", "job", "-m", "hi", "-e", "60", "-c", "0 * * * *"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_cron_add_channel_requires_chat() {
    kestrel()
        .args(["cron", "add", "-n", "job", "-m", "hi", "-e", "60", "--channel", "telegram"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--to"));
}

#[test]
fn test_cron_add_missing_name() {
    kestrel()
        .args(["cron", "add", "-m", "hi", "-e", "60"])
        .assert()
        .failure();
}

#[test]
fn test_cron_remove_requires_id() {
    kestrel().args(["cron", "remove"]).assert().failure();
}

#[test]
fn test_sessions_clear_requires_id() {
    kestrel().args(["sessions", "clear"]).assert().failure();
}

#[test]
fn test_invalid_command() {
    kestrel()
        .arg("deploy")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_invalid_subcommand() {
    kestrel().args(["cron", "pause"]).assert().failure();
}

#[test]
fn test_invalid_flag() {
    kestrel()
        .args(["init", "--force"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}
