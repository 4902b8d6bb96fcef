#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! へ移行

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

/// CLIヘルプが正しく表示されることを確認
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("berth").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("up"))
        .stdout(predicate::str::contains("down"))
        .stdout(predicate::str::contains("--project-name"));
}

/// バージョン表示が正しく動作することを確認
#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("berth").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("berth"));
}

/// buildコマンドのヘルプが正しく表示されることを確認
#[test]
fn test_build_help() {
    let mut cmd = Command::cargo_bin("berth").unwrap();
    cmd.arg("build")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[SERVICES]"))
        .stdout(predicate::str::contains("--build-arg"))
        .stdout(predicate::str::contains("--ssh"))
        .stdout(predicate::str::contains("--no-cache"))
        .stdout(predicate::str::contains("--parallel"));
}

/// upコマンドのヘルプが正しく表示されることを確認
#[test]
fn test_up_help() {
    let mut cmd = Command::cargo_bin("berth").unwrap();
    cmd.arg("up")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--detach"))
        .stdout(predicate::str::contains("--build"))
        .stdout(predicate::str::contains("--no-build"));
}

/// downコマンドの --rmi は local / all のみ受け付ける
#[test]
fn test_down_rmi_values() {
    let mut cmd = Command::cargo_bin("berth").unwrap();
    cmd.arg("down")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--rmi"));

    let mut cmd = Command::cargo_bin("berth").unwrap();
    cmd.arg("down")
        .arg("--rmi")
        .arg("everything")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

/// --build と --no-build は同時に指定できない
#[test]
fn test_up_build_conflicts() {
    let mut cmd = Command::cargo_bin("berth").unwrap();
    cmd.args(["up", "--build", "--no-build"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

/// compose ファイルが無い場合はエラー終了する
#[test]
fn test_missing_compose_file() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("berth").unwrap();
    cmd.current_dir(temp_dir.path())
        .env_remove("BERTH_FILE")
        .arg("build")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("compose ファイルが見つかりません"));
}

/// 壊れた compose ファイルはDockerに接続する前にエラーになる
#[test]
fn test_invalid_compose_file() {
    let temp_dir = tempfile::tempdir().unwrap();
    fs::write(temp_dir.path().join("compose.yaml"), "services: [").unwrap();

    let mut cmd = Command::cargo_bin("berth").unwrap();
    cmd.arg("--project-directory")
        .arg(temp_dir.path())
        .env_remove("BERTH_FILE")
        .arg("build")
        .assert()
        .code(1);
}
