use assert_cmd::Command;
use predicates::prelude::*;

fn bubble(home: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("bubble").unwrap();
    cmd.env("BUBBLE_HOME", home);
    cmd
}

#[test]
fn help_lists_the_surface() {
    let home = tempfile::tempdir().unwrap();
    bubble(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("open"))
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("destroy"))
        .stdout(predicate::str::contains("doctor"))
        .stdout(predicate::str::contains("relay"))
        .stdout(predicate::str::contains("cloud"));
}

#[test]
fn version_prints() {
    let home = tempfile::tempdir().unwrap();
    bubble(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("bubble"));
}

#[test]
fn editor_shows_default_and_sets_choice() {
    let home = tempfile::tempdir().unwrap();

    bubble(home.path())
        .arg("editor")
        .assert()
        .success()
        .stdout(predicate::str::contains("vscode"));

    bubble(home.path())
        .args(["editor", "neovim"])
        .assert()
        .success()
        .stdout(predicate::str::contains("neovim"));

    // Persisted in config.toml.
    bubble(home.path())
        .arg("editor")
        .assert()
        .success()
        .stdout(predicate::str::contains("neovim"));
}

#[test]
fn editor_rejects_unknown_choice() {
    let home = tempfile::tempdir().unwrap();
    bubble(home.path())
        .args(["editor", "butterfly"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("unknown editor"));
}

#[test]
fn remote_set_default_validates_the_spec() {
    let home = tempfile::tempdir().unwrap();
    bubble(home.path())
        .args(["remote", "set-default", "host;evil"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid hostname"));

    bubble(home.path())
        .args(["remote", "set-default", "dev@build-box:2222"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dev@build-box:2222"));
}

#[test]
fn relay_status_reports_disabled_by_default() {
    let home = tempfile::tempdir().unwrap();
    bubble(home.path())
        .args(["relay", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("disabled"));
}

#[test]
fn cloud_status_without_state() {
    let home = tempfile::tempdir().unwrap();
    bubble(home.path())
        .args(["cloud", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No cloud server provisioned"));
}

#[test]
fn first_run_writes_default_config() {
    let home = tempfile::tempdir().unwrap();
    bubble(home.path()).arg("editor").assert().success();

    let config = std::fs::read_to_string(home.path().join("config.toml")).unwrap();
    assert!(config.contains("editor"));
    assert!(config.contains("[network]"));
    assert!(config.contains("github.com"));
}
