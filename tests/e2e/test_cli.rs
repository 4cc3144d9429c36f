//! End-to-end tests for the CLI binary.

#[allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

#[allow(deprecated)]
fn cmd() -> Command {
    Command::cargo_bin("gasprobe").unwrap()
}

const DOC: &str = r#"{"contracts": [
  {"name": "Vault",
   "storage": [{"name": "fee", "type": {"elementary": "uint256"}}],
   "functions": [
     {"name": "dead", "statements": [
       {"declare": {"name": "x", "type": {"elementary": "uint256"}, "value": {"val": 1}}},
       {"if": {"condition": {"binary": [">", {"atom": "x"}, {"val": 2}]},
               "then": [{"return": null}]}}
     ]},
     {"name": "collect",
      "parameters": [{"name": "n", "type": {"elementary": "uint256"}}],
      "statements": [
       {"declare": {"name": "total", "type": {"elementary": "uint256"}, "value": {"val": 0}}},
       {"for": {"init": {"declare": {"name": "i", "type": {"elementary": "uint256"}, "value": {"val": 0}}},
                "condition": {"binary": ["<", {"atom": "i"}, {"atom": "n"}]},
                "step": {"unary": ["++", {"atom": "i"}]},
                "body": [{"expr": {"assign": ["+=", {"atom": "total"}, {"atom": "fee"}]}}]}}
     ]}
   ]},
  {"name": "Other", "functions": [{"name": "dead", "statements": [{"return": null}]}]}
]}"#;

fn doc_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(DOC.as_bytes()).unwrap();
    file
}

#[test]
fn test_cli_help() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("gas-pattern detector"))
        .stdout(predicate::str::contains("--max-paths"));
}

#[test]
fn test_cli_version() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("gasprobe"));
}

#[test]
fn test_cli_file_input() {
    let file = doc_file();
    cmd()
        .arg(file.path())
        .arg("--no-color")
        .assert()
        .success()
        .stdout(predicate::str::contains("Vault.dead"))
        .stdout(predicate::str::contains("P1 REDUNDANT_CODE"))
        .stdout(predicate::str::contains("P4 EXPENSIVE_OPERATION_IN_LOOP"))
        .stdout(predicate::str::contains("in 3 function(s)"));
}

#[test]
fn test_cli_stdin_input() {
    cmd()
        .write_stdin(DOC)
        .assert()
        .success()
        .stdout(predicate::str::contains("Vault.collect"))
        // piped output is never coloured
        .stdout(predicate::str::contains("\x1b[").not());
}

#[test]
fn test_cli_json_output() {
    let output = cmd()
        .args(["-o", "json", "-c", "Vault", "-n", "collect"])
        .write_stdin(DOC)
        .output()
        .unwrap();
    assert!(output.status.success());
    let v: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let functions = v["functions"].as_array().unwrap();
    assert_eq!(functions.len(), 1);
    assert_eq!(functions[0]["function"], "collect");
    assert_eq!(
        functions[0]["findings"][0]["kind"],
        "EXPENSIVE_OPERATION_IN_LOOP"
    );
}

#[test]
fn test_cli_function_filter_across_contracts() {
    let file = doc_file();
    cmd()
        .arg(file.path())
        .args(["--function", "dead", "--no-color"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Vault.dead"))
        .stdout(predicate::str::contains("Other.dead"))
        .stdout(predicate::str::contains("Vault.collect").not());
}

#[test]
fn test_cli_unknown_contract() {
    cmd()
        .args(["-c", "Missing"])
        .write_stdin(DOC)
        .assert()
        .failure()
        .stderr(predicate::str::contains("contract `Missing` not found"));
}

#[test]
fn test_cli_unknown_format() {
    cmd()
        .args(["-o", "xml"])
        .write_stdin(DOC)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown output format"));
}

#[test]
fn test_cli_empty_stdin() {
    cmd()
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("empty input"));
}

#[test]
fn test_cli_missing_file() {
    cmd()
        .arg("/nonexistent/ir.json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));
}

#[test]
fn test_cli_path_budget_reported_as_problem() {
    cmd()
        .args(["--max-paths", "1", "-n", "collect", "--no-color"])
        .write_stdin(DOC)
        .assert()
        .success()
        .stdout(predicate::str::contains("# Problems"))
        .stdout(predicate::str::contains("path limit exceeded"));
}
