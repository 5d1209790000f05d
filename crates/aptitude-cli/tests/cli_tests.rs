//! CLI integration tests using assert_cmd.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn aptitude() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("aptitude").unwrap()
}

/// A command running inside `dir`, isolated from the caller's config.
fn aptitude_in(dir: &Path) -> Command {
    let mut cmd = aptitude();
    cmd.current_dir(dir)
        .env("HOME", dir)
        .env_remove("APTITUDE_DATA_URL")
        .env_remove("APTITUDE_API_KEY");
    cmd
}

/// A temp directory with `aptitude init` already run in it.
fn initialized() -> TempDir {
    let dir = TempDir::new().unwrap();
    aptitude_in(dir.path()).arg("init").assert().success();
    dir
}

fn stdout_json(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).unwrap()
}

#[test]
fn init_creates_files() {
    let dir = TempDir::new().unwrap();

    aptitude_in(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created aptitude.toml"))
        .stdout(predicate::str::contains("Created data/fixture.json"));

    assert!(dir.path().join("aptitude.toml").exists());
    assert!(dir.path().join("data/fixture.json").exists());
}

#[test]
fn init_skips_existing() {
    let dir = initialized();

    aptitude_in(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}

#[test]
fn catalog_lists_aptitudes_and_bands() {
    aptitude()
        .arg("catalog")
        .assert()
        .success()
        .stdout(predicate::str::contains("Concentration"))
        .stdout(predicate::str::contains("CON"))
        .stdout(predicate::str::contains("Very High"));
}

const LEGACY_RESULTS: &str = r#"[
  {"paciente_id": "p1", "aptitud": "v", "pd": 30, "pc": 90, "aciertos": 30, "errores": 2, "omisiones": 0, "tiempo_segundos": 600},
  {"paciente_id": "p1", "aptitud": "X", "pd": 10, "pc": 50},
  {"paciente_id": "p1", "aptitud": "N", "pd": -1, "pc": 120}
]"#;

#[test]
fn score_legacy_results_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("results.json");
    std::fs::write(&path, LEGACY_RESULTS).unwrap();

    aptitude()
        .arg("score")
        .arg("--input")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Verbal (V)"))
        .stdout(predicate::str::contains("3 processed: 1 valid, 2 invalid"));
}

#[test]
fn score_json_output() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("results.json");
    std::fs::write(&path, LEGACY_RESULTS).unwrap();

    let json = stdout_json(
        aptitude()
            .arg("score")
            .arg("--input")
            .arg(&path)
            .arg("--format")
            .arg("json"),
    );
    assert_eq!(json["valid_count"], 1);
    assert_eq!(json["invalid_count"], 2);
}

#[test]
fn score_nonexistent_file() {
    aptitude()
        .arg("score")
        .arg("--input")
        .arg("no_such_results.json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn summarize_subject() {
    let dir = initialized();

    aptitude_in(dir.path())
        .args(["summarize", "--subject", "s-001"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Lucia Fernandez"))
        .stdout(predicate::str::contains("Fluid intelligence"));

    let json = stdout_json(aptitude_in(dir.path()).args([
        "summarize",
        "--subject",
        "s-001",
        "--format",
        "json",
    ]));
    assert_eq!(json["result_count"], 6);
    assert_eq!(json["avg_percentile"], 68);
}

#[test]
fn summarize_unknown_subject() {
    let dir = initialized();

    aptitude_in(dir.path())
        .args(["summarize", "--subject", "nobody"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("subject not found"));
}

#[test]
fn audit_healthy_subject() {
    let dir = initialized();

    let json = stdout_json(aptitude_in(dir.path()).args([
        "audit",
        "--subject",
        "s-001",
        "--format",
        "json",
    ]));
    assert_eq!(json["is_valid"], true);
    assert_eq!(json["stages"]["identity"]["valid"], true);
}

#[test]
fn audit_reports_missing_interpretation() {
    let dir = initialized();

    aptitude_in(dir.path())
        .args(["audit", "--subject", "s-002"])
        .assert()
        .success()
        .stdout(predicate::str::contains("INVALID"))
        .stdout(predicate::str::contains("missing interpretation for aptitude M"));
}

#[test]
fn audit_fail_on_invalid_sets_exit_code() {
    let dir = initialized();

    aptitude_in(dir.path())
        .args(["audit", "--subject", "s-004", "--fail-on-invalid"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("administration"));
}

#[test]
fn audit_resolves_external_id_by_lookup() {
    let dir = initialized();

    let json = stdout_json(aptitude_in(dir.path()).args([
        "audit",
        "--subject",
        "s-004",
        "--format",
        "json",
    ]));
    assert_eq!(json["stages"]["identity"]["valid"], true);
    assert_eq!(
        json["stages"]["identity"]["data"]["external_id"],
        "tdiaz.2024"
    );
}

#[test]
fn batch_writes_reports_to_directory() {
    let dir = initialized();
    let out = dir.path().join("reports");

    aptitude_in(dir.path())
        .args(["batch", "--all", "--delay-ms", "0", "--output"])
        .arg(&out)
        .assert()
        .success()
        .stderr(predicate::str::contains("3/4 succeeded, 1 failed"))
        .stderr(predicate::str::contains("s-004"));

    let files: Vec<_> = std::fs::read_dir(&out)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(files.len(), 6);
    assert!(files.iter().any(|f| f.starts_with("s-001-") && f.ends_with(".html")));
}

#[test]
fn batch_selected_subjects_to_store() {
    let dir = initialized();

    aptitude_in(dir.path())
        .args(["batch", "--subjects", "s-001,s-003", "--delay-ms", "0"])
        .assert()
        .success()
        .stderr(predicate::str::contains("2/2 succeeded"));
}

#[test]
fn batch_requires_selection() {
    let dir = initialized();

    aptitude_in(dir.path()).arg("batch").assert().failure();
}

#[test]
fn compare_by_institution() {
    let dir = initialized();
    let html = dir.path().join("comparison.html");

    let json = stdout_json(
        aptitude_in(dir.path())
            .args([
                "compare",
                "--subjects",
                "s-001,s-002,s-003,s-004",
                "--by",
                "institution",
                "--format",
                "json",
                "--html",
            ])
            .arg(&html),
    );
    assert_eq!(json["groups"].as_array().unwrap().len(), 2);
    assert_eq!(json["excluded_subjects"], serde_json::json!(["s-004"]));
    let flagged: Vec<&str> = json["significant_differences"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|d| d["aptitude_code"].as_str())
        .collect();
    assert!(flagged.contains(&"V"));
    assert!(html.exists());
}

#[test]
fn compare_rejects_unknown_grouping() {
    aptitude()
        .args(["compare", "--subjects", "a,b", "--by", "shoe-size"])
        .assert()
        .failure();
}

#[test]
fn help_output() {
    aptitude()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Aptitude test battery scoring pipeline"));
}

#[test]
fn version_output() {
    aptitude()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("aptitude"));
}
