//! Integration tests for the stacksampler demo binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn test_writes_report_file() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("example.stacks");

    let mut cmd = Command::cargo_bin("stacksampler").unwrap();
    cmd.args(["-n", "20000000", "-i", "1000", "-o"]).arg(&output);
    cmd.assert().success();

    assert!(output.exists(), "report file was not created");
    let report = std::fs::read_to_string(&output).unwrap();
    for line in report.lines() {
        let (stack, count) = line.rsplit_once(' ').expect("line has a count");
        assert!(!stack.is_empty());
        assert!(count.parse::<u64>().unwrap() >= 1, "bad line: {}", line);
    }
}

#[test]
fn test_report_lines_sorted_by_count() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("sorted.stacks");

    let mut cmd = Command::cargo_bin("stacksampler").unwrap();
    cmd.args(["-n", "20000000", "-i", "500", "-o"]).arg(&output);
    cmd.assert().success();

    let report = std::fs::read_to_string(&output).unwrap();
    let counts: Vec<u64> = report
        .lines()
        .map(|line| line.rsplit_once(' ').unwrap().1.parse().unwrap())
        .collect();
    assert!(counts.windows(2).all(|pair| pair[0] >= pair[1]));
}

#[test]
fn test_report_covers_both_workload_functions() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("workload.stacks");

    let mut cmd = Command::cargo_bin("stacksampler").unwrap();
    cmd.args(["-n", "50000000", "-i", "1000", "-o"]).arg(&output);
    cmd.assert().success();

    let report = std::fs::read_to_string(&output).unwrap();
    let count_for = |function: &str| -> u64 {
        report
            .lines()
            .filter(|line| {
                let stack = line.rsplit_once(' ').unwrap().0;
                let suffix = format!(":{}", function);
                stack.split(';').any(|frame| frame.ends_with(&suffix))
            })
            .map(|line| line.rsplit_once(' ').unwrap().1.parse::<u64>().unwrap())
            .sum()
    };

    assert!(count_for("some_function") > 0, "some_function missing:\n{}", report);
    assert!(count_for("another_function") > 0, "another_function missing:\n{}", report);

    let counts: Vec<u64> = report
        .lines()
        .map(|line| line.rsplit_once(' ').unwrap().1.parse().unwrap())
        .collect();
    assert!(counts.windows(2).all(|pair| pair[0] >= pair[1]));
}

#[test]
fn test_summary_goes_to_stderr() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("summary.stacks");

    let mut cmd = Command::cargo_bin("stacksampler").unwrap();
    cmd.args(["-n", "1000", "--summary", "-o"]).arg(&output);
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Stacksampler Summary"))
        .stderr(predicate::str::contains("Samples recorded:"))
        .stderr(predicate::str::contains("Timer firings:"));
}

#[test]
fn test_zero_interval_fails() {
    let mut cmd = Command::cargo_bin("stacksampler").unwrap();
    cmd.args(["-n", "10", "--interval-us", "0"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Invalid sampler configuration"));
}

#[test]
fn test_unwritable_output_fails() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("missing").join("out.stacks");

    let mut cmd = Command::cargo_bin("stacksampler").unwrap();
    cmd.args(["-n", "10", "-o"]).arg(&output);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to write report"));
}

#[test]
fn test_missing_config_file_fails() {
    let mut cmd = Command::cargo_bin("stacksampler").unwrap();
    cmd.args(["-n", "10", "--config", "/nonexistent/stacksampler.toml"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("cannot read"));
}
