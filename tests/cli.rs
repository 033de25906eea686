use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn gemmirror() -> Command {
    let mut cmd = Command::cargo_bin("gemmirror").unwrap();
    cmd.env("NO_COLOR", "1").env("CLICOLOR", "0");
    cmd
}

#[test]
fn init_writes_template_once() {
    let temp = tempdir().unwrap();

    gemmirror()
        .args(["init", "--path"])
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Created gemmirror.toml"));

    let written = std::fs::read_to_string(temp.path().join("gemmirror.toml")).unwrap();
    assert!(written.contains("[source]"));

    gemmirror()
        .args(["init", "--path"])
        .arg(temp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn missing_config_is_reported() {
    let temp = tempdir().unwrap();

    gemmirror()
        .arg("index")
        .arg("--config")
        .arg(temp.path().join("gemmirror.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed:").and(predicate::str::contains("gemmirror init")));
}

#[test]
fn index_then_update_on_an_empty_mirror() {
    let temp = tempdir().unwrap();
    let config = temp.path().join("gemmirror.toml");
    gemmirror().args(["init", "--path"]).arg(temp.path()).assert().success();

    gemmirror()
        .arg("index")
        .arg("-c")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Indexed 0 gems"));

    gemmirror()
        .args(["index", "--update", "-c"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("no changes"));

    gemmirror()
        .arg("list")
        .arg("-c")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("The index is empty."));

    assert!(temp.path().join("public").is_dir());
}

#[test]
fn update_without_full_build_fails() {
    let temp = tempdir().unwrap();
    let config = temp.path().join("gemmirror.toml");
    gemmirror().args(["init", "--path"]).arg(temp.path()).assert().success();

    gemmirror()
        .args(["index", "--update", "-c"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("full index build first"));
}

#[test]
fn deps_json_on_an_empty_mirror() {
    let temp = tempdir().unwrap();
    let config = temp.path().join("gemmirror.toml");
    gemmirror().args(["init", "--path"]).arg(temp.path()).assert().success();

    gemmirror()
        .args(["deps", "rack", "--json", "-c"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}
