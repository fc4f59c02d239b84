use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use image::{Rgb, RgbImage};
use predicates::prelude::*;
use tempfile::TempDir;

fn invex() -> Command {
    Command::cargo_bin("invex").unwrap()
}

fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("config.json");
    fs::write(
        &path,
        r#"{
            "detection": { "classes": ["invoice_number", "date", "total_amount"] },
            "workers": { "count": 2, "max_retries": 0 },
            "recognition": { "languages": ["ru", "en"] }
        }"#,
    )
    .unwrap();
    path
}

fn write_invoice(dir: &Path, name: &str, shade: u8, detections: &str) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(200, 100, Rgb([shade, shade, shade])).save(&path).unwrap();
    let mut sidecar = path.as_os_str().to_owned();
    sidecar.push(".detections.json");
    fs::write(PathBuf::from(sidecar), detections).unwrap();
    path
}

const COMPLETE: &str = r#"[
    {"class": "invoice_number", "region": {"x": 0, "y": 0, "width": 60, "height": 20}, "confidence": 0.95, "text": "СФ-00123"},
    {"class": "date", "region": {"x": 0, "y": 30, "width": 60, "height": 20}, "confidence": 0.91, "text": "15.01.2024"},
    {"class": "total_amount", "region": {"x": 0, "y": 60, "width": 60, "height": 20}, "confidence": 0.9, "text": "1 234,50 руб."}
]"#;

const LOW_CONFIDENCE: &str = r#"[
    {"class": "date", "region": {"x": 0, "y": 30, "width": 60, "height": 20}, "confidence": 0.3, "text": "15.01.2024"}
]"#;

#[test]
fn test_process_writes_records_and_summary() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    write_invoice(dir.path(), "good.png", 200, COMPLETE);
    write_invoice(dir.path(), "weak.png", 60, LOW_CONFIDENCE);
    let out = dir.path().join("out");
    let summary = dir.path().join("summary.csv");

    invex()
        .arg("--config")
        .arg(&config)
        .arg("process")
        .arg(format!("{}/*.png", dir.path().display()))
        .arg("--output-dir")
        .arg(&out)
        .arg("--summary")
        .arg(&summary)
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 2 files"))
        .stdout(predicate::str::contains("Processed 2 files"));

    let record: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join("good.png.record.json")).unwrap()).unwrap();
    assert_eq!(record["status"], "complete");
    assert_eq!(record["fields"]["date"]["value"], "2024-01-15");
    assert_eq!(record["fields"]["total_amount"]["value"], "1234.50");

    let weak: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join("weak.png.record.json")).unwrap()).unwrap();
    assert_eq!(weak["status"], "failed");

    let csv = fs::read_to_string(&summary).unwrap();
    assert!(csv.starts_with("filename,task_id,outcome"));
    assert!(csv.lines().any(|l| l.starts_with("good.png,") && l.contains(",succeeded,complete,")));
    assert!(csv.lines().any(|l| l.starts_with("weak.png,") && l.contains(",failed,failed,")));
}

#[test]
fn test_process_missing_annotations_fails_task() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    let path = dir.path().join("bare.png");
    RgbImage::new(20, 20).save(&path).unwrap();

    invex()
        .arg("-c")
        .arg(&config)
        .arg("process")
        .arg(path.to_str().unwrap())
        .assert()
        .success()
        .stdout(predicate::str::contains("Failed files:"))
        .stdout(predicate::str::contains("source not found"));
}

#[test]
fn test_process_no_matching_files() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    invex()
        .arg("-c")
        .arg(&config)
        .arg("process")
        .arg(format!("{}/*.png", dir.path().display()))
        .assert()
        .failure()
        .stderr(predicate::str::contains("No matching files"));
}

#[test]
fn test_config_init_get_set() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("nested").join("config.json");

    invex()
        .arg("-c")
        .arg(&config)
        .args(["config", "init"])
        .assert()
        .success();
    assert!(config.exists());

    invex()
        .arg("-c")
        .arg(&config)
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    invex()
        .arg("-c")
        .arg(&config)
        .args(["config", "set", "detection.confidence_threshold", "0.75"])
        .assert()
        .success();

    invex()
        .arg("-c")
        .arg(&config)
        .args(["config", "get", "detection.confidence_threshold"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0.75"));

    invex()
        .arg("-c")
        .arg(&config)
        .args(["config", "set", "workers.count", "0"])
        .assert()
        .failure();

    invex()
        .arg("-c")
        .arg(&config)
        .args(["config", "set", "detection.classes", r#"["date", "barcode"]"#])
        .assert()
        .failure();
}

#[test]
fn test_config_set_unknown_key_rejected() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.json");

    invex()
        .arg("-c")
        .arg(&config)
        .args(["config", "set", "workers.typo", "3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration key not found"));
    assert!(!config.exists());

    invex()
        .arg("-c")
        .arg(&config)
        .args(["config", "set", "workers.starvation_guard", "4"])
        .assert()
        .success();

    invex()
        .arg("-c")
        .arg(&config)
        .args(["config", "get", "workers.starvation_guard"])
        .assert()
        .success()
        .stdout(predicate::str::contains("4"));
}

#[test]
fn test_config_path() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.json");

    invex()
        .arg("-c")
        .arg(&config)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not created"));
}
