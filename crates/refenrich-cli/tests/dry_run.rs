#![allow(clippy::expect_used, clippy::unwrap_used)]

use assert_cmd::Command;
use predicates::str::contains;
use tempfile::tempdir;

fn refenrich_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("refenrich"))
}

#[test]
fn dry_run_renders_queries_without_external_calls() {
    let dir = tempdir().unwrap();
    let store_path = dir.path().join("refs.txt");
    std::fs::write(&store_path, "[1] Skinner, B. F. (1953). Science and Human Behavior. Macmillan.\n").unwrap();

    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        format!(
            "input_file = {:?}\noutput_file = {:?}\n",
            store_path, store_path
        ),
    )
    .unwrap();

    refenrich_cmd()
        .arg(&config_path)
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(contains("[1]"));

    // dry-run never touches the store.
    let after = std::fs::read_to_string(&store_path).unwrap();
    assert!(after.contains("Skinner"));
    assert!(!after.contains("PRIMARY_URL"));
}

#[test]
fn missing_config_path_is_a_usage_error() {
    refenrich_cmd().assert().failure();
}
