//! End-to-end tests of the `segflow` binary.

#![allow(deprecated)] // cargo_bin deprecation

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

fn segflow() -> Command {
    let mut cmd = Command::cargo_bin("segflow").unwrap();
    cmd.env("SEGFLOW_MOCK_STEP_MS", "0")
        .env_remove("NNUNET_REMOTE_API")
        .env_remove("USE_NNUNET_SIM")
        .env_remove("USE_REMOTE_TEST_ENDPOINTS")
        .env_remove("RUST_LOG");
    cmd
}

fn write_images(dir: &Path, names: &[&str]) {
    fs::create_dir_all(dir).unwrap();
    for name in names {
        fs::write(dir.join(name), b"img").unwrap();
    }
}

#[test]
fn presets_lists_labels() {
    segflow()
        .arg("presets")
        .assert()
        .success()
        .stdout(predicate::str::contains("IO Split (101)\t101"))
        .stdout(predicate::str::contains("Pre Seg (007)\t007"));
}

#[test]
fn mock_predict_writes_one_artifact_for_a_staged_case() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("in");
    let output = root.path().join("out");
    write_images(&input, &["case_0000.nii.gz", "case_0001.nii.gz"]);

    segflow()
        .arg("mock-predict")
        .arg("-i")
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .args(["-d", "101", "-c", "3d_fullres", "-f", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("100%"))
        .stdout(predicate::str::contains("Done"));

    assert_eq!(
        fs::read(output.join("prediction.nii.gz")).unwrap(),
        b"FAKE_NIFTI_DATA"
    );
}

#[test]
fn simulated_run_places_one_result_per_case() {
    let root = tempfile::tempdir().unwrap();
    let images = root.path().join("images");
    write_images(&images, &["A_0000.nii.gz", "A_0001.nii.gz", "B.nii"]);

    let output = segflow()
        .arg("run")
        .arg(&images)
        .arg("--simulate")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let task: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(task["status"], "SUCCESS");

    let seg = root.path().join("seg");
    assert_eq!(fs::read(seg.join("A.nii.gz")).unwrap(), b"FAKE_NIFTI_DATA");
    assert_eq!(fs::read(seg.join("B.nii.gz")).unwrap(), b"FAKE_NIFTI_DATA");
    assert_eq!(fs::read_dir(&seg).unwrap().count(), 2);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[100%] done"));
}

#[test]
fn simulated_run_honours_output_dir() {
    let root = tempfile::tempdir().unwrap();
    let images = root.path().join("images");
    let out = root.path().join("custom");
    write_images(&images, &["knee.nii.gz"]);

    segflow()
        .arg("run")
        .arg(&images)
        .arg("-o")
        .arg(&out)
        .arg("--simulate")
        .assert()
        .success();

    assert!(out.join("knee.nii.gz").is_file());
    assert!(!root.path().join("seg").exists());
}

#[test]
fn empty_input_fails_the_task() {
    let root = tempfile::tempdir().unwrap();
    let images = root.path().join("images");
    fs::create_dir(&images).unwrap();

    segflow()
        .arg("run")
        .arg(&images)
        .arg("--simulate")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("FAILED"))
        .stderr(predicate::str::contains("No processable images"));
}

#[test]
fn missing_executable_fails_the_task() {
    let root = tempfile::tempdir().unwrap();
    let images = root.path().join("images");
    write_images(&images, &["A.nii.gz"]);

    segflow()
        .arg("run")
        .arg(&images)
        .arg("--predict-exe")
        .arg(root.path().join("nope"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn missing_input_directory_is_an_error() {
    segflow()
        .args(["run", "/nonexistent/segflow/images", "--simulate"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("is not a directory"));
}

#[test]
fn unknown_preset_is_an_error() {
    let root = tempfile::tempdir().unwrap();

    segflow()
        .arg("run")
        .arg(root.path())
        .args(["--preset", "Knee (999)"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Unknown preset"));
}

#[test]
fn output_dir_equal_to_input_keeps_the_images() {
    let root = tempfile::tempdir().unwrap();
    let images = root.path().join("images");
    write_images(&images, &["A_0000.nii.gz", "B.nii"]);

    segflow()
        .arg("run")
        .arg(&images)
        .arg("-o")
        .arg(&images)
        .arg("--simulate")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("FAILED"))
        .stderr(predicate::str::contains("is the input directory"));

    assert_eq!(fs::read(images.join("A_0000.nii.gz")).unwrap(), b"img");
    assert_eq!(fs::read(images.join("B.nii")).unwrap(), b"img");
}
