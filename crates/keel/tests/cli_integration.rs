use std::process::Command;

#[test]
fn test_keel_version() {
    let output = Command::new("cargo")
        .args(["run", "--bin", "keel", "--", "--version"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("0.1.0"));
}

#[test]
fn test_keel_help() {
    let output = Command::new("cargo")
        .args(["run", "--bin", "keel", "--", "--help"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("run-batch"));
    assert!(stdout.contains("hooks"));
}

#[test]
#[ignore] // Requires full build
fn test_keel_run_batch() {
    let dir = tempfile::tempdir().unwrap();
    let plan = dir.path().join("plan.json");
    std::fs::write(
        &plan,
        r#"{"calls": [{"id": "w", "tool": "write_file", "input": {"path": "a.txt", "content": "x"}}]}"#,
    )
    .unwrap();

    let output = Command::new("cargo")
        .args(["run", "--bin", "keel", "--", "run-batch", "--file"])
        .arg(&plan)
        .arg("--workspace")
        .arg(dir.path())
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("1 calls: 1 succeeded, 0 failed"));
}
