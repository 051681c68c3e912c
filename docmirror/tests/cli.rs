use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::{read_to_string, write};
use tempfile::tempdir;

const SECRET_VARS: [&str; 3] = [
    "CONFLUENCE_API_EMAIL",
    "CONFLUENCE_API_TOKEN",
    "CONFLUENCE_ACCESS_TOKEN",
];

fn docmirror() -> Command {
    let mut cmd = Command::cargo_bin("docmirror").expect("Binary exists");
    for var in SECRET_VARS {
        cmd.env_remove(var);
    }
    cmd
}

fn write_bearer_config(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("config.yaml");
    write(
        &path,
        "remote:\n  base_url: https://acme.atlassian.net/wiki\n  auth_type: bearer\n  access_token: test-token\n",
    )
    .expect("Writing temp config failed");
    path
}

#[test]
fn help_lists_subcommands() {
    docmirror()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("config")
                .and(predicate::str::contains("download"))
                .and(predicate::str::contains("sync")),
        );
}

#[test]
fn config_creates_file_and_hides_token() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("config.yaml");

    docmirror()
        .args(["config", "--config"])
        .arg(&path)
        .args([
            "--base-url",
            "https://acme.atlassian.net/wiki",
            "--auth-type",
            "bearer",
            "--access-token",
            "very-secret",
        ])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("https://acme.atlassian.net/wiki")
                .and(predicate::str::contains("very-secret").not()),
        );

    let written = read_to_string(&path).expect("config written");
    assert!(written.contains("auth_type: bearer"));
    assert!(written.contains("image_dir: static"));
}

#[test]
fn config_rejects_unknown_auth_type() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.yaml");

    docmirror()
        .args(["config", "--config"])
        .arg(&path)
        .args(["--base-url", "https://acme.atlassian.net/wiki", "--auth-type", "oauth"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid auth_type"));
    assert!(!path.exists());
}

#[test]
fn sync_without_url_or_session_fails() {
    let dir = tempdir().unwrap();
    let config = write_bearer_config(dir.path());
    let out = dir.path().join("mirror");

    docmirror()
        .arg("sync")
        .arg("--config")
        .arg(&config)
        .arg("-o")
        .arg(&out)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no URL given"));
}

#[test]
fn sync_rejects_page_urls() {
    let dir = tempdir().unwrap();
    let config = write_bearer_config(dir.path());

    docmirror()
        .args(["sync", "https://acme.atlassian.net/wiki/spaces/ENG/pages/123/Notes"])
        .arg("--config")
        .arg(&config)
        .arg("-o")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("page URL"));
}

#[test]
fn download_requires_matching_mode_flag() {
    let dir = tempdir().unwrap();
    let config = write_bearer_config(dir.path());

    docmirror()
        .args(["download", "https://acme.atlassian.net/wiki/spaces/ENG"])
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--wiki"));
}

#[test]
fn missing_config_file_is_reported() {
    let dir = tempdir().unwrap();

    docmirror()
        .args(["download", "https://acme.atlassian.net/wiki/spaces/ENG/pages/1"])
        .arg("--config")
        .arg(dir.path().join("absent.yaml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}
