//! End-to-end CLI tests exercising every subcommand against a tiny,
//! hand-written C# fixture.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;

fn write_fixture(dir: &std::path::Path) -> std::path::PathBuf {
    let calc_path = dir.join("Calc.cs");
    fs::write(
        &calc_path,
        r#"
        namespace Acme.Math {
            public class Calculator {
                public int Add(int a, int b) {
                    return a + b;
                }
            }

            public class CalculatorTests {
                [Test]
                public void AddsTwoNumbers() {
                    var calc = new Calculator();
                    calc.Add(1, 2);
                }
            }
        }
        "#,
    )
    .unwrap();

    let config_path = dir.join("testimpact.toml");
    fs::write(
        &config_path,
        format!(
            r#"
            [solution]
            [[solution.projects]]
            path = "Acme.csproj"
            source_files = ["{}"]
            "#,
            calc_path.display()
        ),
    )
    .unwrap();

    config_path
}

#[test]
fn build_index_then_plan_selects_the_affected_test() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_fixture(dir.path());
    let cache_dir = dir.path().join(".testimpact");

    let build = Command::cargo_bin("testimpact")
        .unwrap()
        .arg("--cache-dir")
        .arg(&cache_dir)
        .arg("build-index")
        .arg("--solution")
        .arg(&config_path)
        .output()
        .unwrap();
    assert!(build.status.success(), "build-index failed: {}", String::from_utf8_lossy(&build.stderr));

    let handle_path = String::from_utf8(build.stdout).unwrap().trim().to_string();
    assert!(std::path::Path::new(&handle_path).exists());

    let diff_path = dir.path().join("change.diff");
    fs::write(
        &diff_path,
        format!(
            "diff --git a/{0} b/{0}\n@@ -4,1 +4,1 @@\n public class Calculator {{\n",
            "Calc.cs"
        ),
    )
    .unwrap();

    Command::cargo_bin("testimpact")
        .unwrap()
        .arg("plan")
        .arg("--handle")
        .arg(&handle_path)
        .arg("--level")
        .arg("full")
        .assert()
        .success()
        .stdout(predicate::str::contains("test(s) selected"));
}

#[test]
fn tests_for_reports_no_tests_for_an_unknown_method() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_fixture(dir.path());
    let cache_dir = dir.path().join(".testimpact");

    let build = Command::cargo_bin("testimpact")
        .unwrap()
        .arg("--cache-dir")
        .arg(&cache_dir)
        .arg("build-index")
        .arg("--solution")
        .arg(&config_path)
        .output()
        .unwrap();
    assert!(build.status.success());
    let handle_path = String::from_utf8(build.stdout).unwrap().trim().to_string();

    Command::cargo_bin("testimpact")
        .unwrap()
        .arg("tests-for")
        .arg("--handle")
        .arg(&handle_path)
        .arg("Nonexistent.Method()")
        .assert()
        .success()
        .stdout(predicate::str::contains("no tests reach"));
}

#[test]
fn build_index_with_missing_config_fails_with_invalid_input_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("testimpact")
        .unwrap()
        .arg("--cache-dir")
        .arg(dir.path().join(".testimpact"))
        .arg("build-index")
        .arg("--solution")
        .arg(dir.path().join("missing.toml"))
        .assert()
        .failure();
}

#[test]
fn record_results_round_trips_through_history() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_fixture(dir.path());
    let cache_dir = dir.path().join(".testimpact");

    let build = Command::cargo_bin("testimpact")
        .unwrap()
        .arg("--cache-dir")
        .arg(&cache_dir)
        .arg("build-index")
        .arg("--solution")
        .arg(&config_path)
        .output()
        .unwrap();
    assert!(build.status.success());
    let handle_path = String::from_utf8(build.stdout).unwrap().trim().to_string();

    let results_path = dir.path().join("results.txt");
    fs::write(&results_path, "Acme.Math.CalculatorTests.AddsTwoNumbers() | 1 | 12 | 2024-01-01T00:00:00Z\n").unwrap();

    Command::cargo_bin("testimpact")
        .unwrap()
        .arg("record-results")
        .arg("--handle")
        .arg(&handle_path)
        .arg("--results")
        .arg(&results_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("recorded 1 result"));

    let history_path = cache_dir.join("history.ndjson");
    assert!(history_path.exists());
    let content = fs::read_to_string(history_path).unwrap();
    assert!(content.contains("AddsTwoNumbers"));
}
