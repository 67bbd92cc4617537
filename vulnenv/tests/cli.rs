//! CLI tests for the `vulnenv` binary.
//!
//! Spawns the binary in a temp directory and checks exit codes and the JSON
//! it prints.

use std::fs;
use std::process::Command;

use serde_json::Value;
use vulnenv::exit_codes;
use vulnenv::io::config::{CONFIG_FILE, EnvConfig, PolicyConfig, write_config};
use vulnenv::test_support::{OVERFLOW_FUNCTION, UAF_FUNCTION};

fn vulnenv() -> Command {
    Command::new(env!("CARGO_BIN_EXE_vulnenv"))
}

#[test]
fn analyze_prints_facts_and_verdicts() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("uaf.c"), UAF_FUNCTION).expect("write source");

    let output = vulnenv()
        .current_dir(temp.path())
        .args(["analyze", "uaf.c"])
        .output()
        .expect("vulnenv analyze");
    assert_eq!(output.status.code(), Some(exit_codes::OK));

    let report: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(report["facts"]["freed_variables"][0]["variable"], "p");
    assert_eq!(report["facts"]["pattern_results"]["use_after_free"], "true");
    assert_eq!(report["patterns"][2]["pattern"], "use_after_free");
    // `*it` in the signature is the first unguarded dereference token.
    assert_eq!(report["facts"]["suspected_line"], 1);
}

#[test]
fn analyze_missing_file_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let status = vulnenv()
        .current_dir(temp.path())
        .args(["analyze", "nope.c"])
        .status()
        .expect("vulnenv analyze");
    assert_eq!(status.code(), Some(exit_codes::INVALID));
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let temp = tempfile::tempdir().expect("tempdir");
    let first = vulnenv()
        .current_dir(temp.path())
        .arg("init")
        .status()
        .expect("init");
    assert_eq!(first.code(), Some(exit_codes::OK));
    assert!(temp.path().join(CONFIG_FILE).exists());

    let second = vulnenv()
        .current_dir(temp.path())
        .arg("init")
        .status()
        .expect("init again");
    assert_eq!(second.code(), Some(exit_codes::INVALID));

    let forced = vulnenv()
        .current_dir(temp.path())
        .args(["init", "--force"])
        .status()
        .expect("init --force");
    assert_eq!(forced.code(), Some(exit_codes::OK));
}

#[cfg(unix)]
#[test]
fn play_runs_policy_command_and_writes_trajectory() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("greet.c"), OVERFLOW_FUNCTION).expect("write source");
    let config = EnvConfig {
        policy: PolicyConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "cat > /dev/null; echo 'positive_alarm(3)'".to_string(),
            ],
            timeout_secs: 10,
            output_limit_bytes: 4096,
        },
        ..EnvConfig::default()
    };
    write_config(&temp.path().join(CONFIG_FILE), &config).expect("write config");

    let output = vulnenv()
        .current_dir(temp.path())
        .args(["play", "greet.c", "--label", "1", "--out", "runs"])
        .output()
        .expect("vulnenv play");
    assert_eq!(
        output.status.code(),
        Some(exit_codes::OK),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let summary: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(summary["reward"], 1);
    assert_eq!(summary["steps"], 1);
    assert_eq!(summary["termination"]["kind"], "positive_alarm");

    let trajectory: Value = serde_json::from_str(
        &fs::read_to_string(temp.path().join("runs").join("episode_greet.json"))
            .expect("trajectory file"),
    )
    .expect("trajectory json");
    assert_eq!(trajectory["steps"][0]["action"], "positive_alarm(3)");
}
