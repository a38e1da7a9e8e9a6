//! CLI tests for the `kubeshim` binary.
//!
//! A shell script stands in for the cluster tool (configured through the
//! config file) and the tests check output and exit codes.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use kubeshim::exit_codes;
use kubeshim::io::config::{KubeshimConfig, write_config};

fn fake_tool(dir: &Path, script: &str) -> PathBuf {
    let tool = dir.join("fake-kubectl");
    fs::write(&tool, format!("#!/bin/sh\n{script}\n")).expect("write tool");
    let mut perms = fs::metadata(&tool).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&tool, perms).expect("chmod");

    let config = dir.join("kubeshim.toml");
    let cfg = KubeshimConfig {
        binary: tool.display().to_string(),
        ..KubeshimConfig::default()
    };
    write_config(&config, &cfg).expect("write config");
    config
}

fn kubeshim(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_kubeshim"))
        .env("KUBESHIM_CONFIG", config)
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("run kubeshim")
}

#[test]
fn names_prints_tool_output() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = fake_tool(temp.path(), "printf 'pod/a\\npod/b\\n'");
    let out = kubeshim(&config, &["names", "pods"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert_eq!(String::from_utf8_lossy(&out.stdout), "pod/a\npod/b\n");
}

#[test]
fn count_uses_reported_lines() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = fake_tool(temp.path(), "echo pod/a");
    let out = kubeshim(&config, &["count", "pod/a", "pod/gone"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "1");
}

#[test]
fn not_found_maps_to_its_exit_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = fake_tool(
        temp.path(),
        "echo 'Error from server (NotFound): configmaps \"cfg\" not found' >&2; exit 1",
    );
    let out = kubeshim(&config, &["set", "cm/cfg", "data.mode", "on"]);
    assert_eq!(out.status.code(), Some(exit_codes::NOT_FOUND));
}

#[test]
fn missing_tool_is_a_generic_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = temp.path().join("kubeshim.toml");
    let cfg = KubeshimConfig {
        binary: temp.path().join("no-such-tool").display().to_string(),
        ..KubeshimConfig::default()
    };
    write_config(&config, &cfg).expect("write config");
    let out = kubeshim(&config, &["names", "pods"]);
    assert_eq!(out.status.code(), Some(exit_codes::ERROR));
    assert!(String::from_utf8_lossy(&out.stderr).contains("failed to launch"));
}

#[test]
fn static_get_reports_missing_objects() {
    let temp = tempfile::tempdir().expect("tempdir");
    // `--ignore-not-found` with nothing found prints nothing.
    let config = fake_tool(temp.path(), "exit 0");
    let out = kubeshim(&config, &["get", "pod/gone"]);
    assert_eq!(out.status.code(), Some(exit_codes::NOT_FOUND));
}
