// vim: tw=80
use std::{fs, path::PathBuf, process::Command};

use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::{fixture, rstest};
use tempfile::{Builder, TempDir};

fn mkzonefs() -> Command {
    Command::cargo_bin("mkzonefs").unwrap()
}

type Harness = (PathBuf, TempDir);

/// A regular file standing in for a device
#[fixture]
fn harness() -> Harness {
    let tempdir = Builder::new()
        .prefix(concat!(module_path!(), "."))
        .tempdir()
        .unwrap();
    let filename = tempdir.path().join("img");
    let file = fs::File::create(&filename).unwrap();
    file.set_len(1 << 24).unwrap();
    (filename, tempdir)
}

#[test]
fn help() {
    mkzonefs()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--features"))
        .stdout(predicate::str::contains("--label"));
}

#[test]
fn version() {
    mkzonefs()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("mkzonefs "));
}

#[test]
fn no_device() {
    mkzonefs()
        .assert()
        .failure()
        .code(2);
}

#[test]
fn enoent() {
    mkzonefs()
        .arg("/dev/this_device_does_not_exist")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("/dev/this_device_does_not_exist"));
}

#[rstest]
fn not_a_block_device(harness: Harness) {
    let (filename, _tempdir) = harness;
    mkzonefs()
        .arg(&filename)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("is not a block device"));
}

/// Nothing is written to a device that can't be formatted
#[rstest]
fn untouched(harness: Harness) {
    let (filename, _tempdir) = harness;
    mkzonefs()
        .arg("-f")
        .arg(&filename)
        .assert()
        .failure();
    let contents = fs::read(&filename).unwrap();
    assert!(contents.iter().all(|b| *b == 0));
}

#[rstest]
#[case("compression=on")]
#[case("uid=nobody")]
#[case("perm=999")]
#[case("aggr_cnv,gid=")]
fn invalid_feature(harness: Harness, #[case] features: &str) {
    let (filename, _tempdir) = harness;
    mkzonefs()
        .args(["-o", features])
        .arg(&filename)
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Invalid feature"));
}

#[rstest]
fn label_too_long(harness: Harness) {
    let (filename, _tempdir) = harness;
    mkzonefs()
        .args(["-L", &"x".repeat(65)])
        .arg(&filename)
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Label too long"));
}

/// A 64-byte label is fine; the device is what gets rejected
#[rstest]
fn label_max(harness: Harness) {
    let (filename, _tempdir) = harness;
    mkzonefs()
        .args(["-L", &"x".repeat(64)])
        .arg(&filename)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("is not a block device"));
}
