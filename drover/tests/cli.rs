//! CLI tests for the `drover` binary.
//!
//! Spawns the binary inside a scratch workspace whose rules call `true` and
//! `false`, and checks exit codes and printed status lines.
#![cfg(unix)]

use std::fs;
use std::process::{Command, Output};

use drover::exit_codes;
use drover::test_support::Workspace;

fn workspace() -> Workspace {
    let workspace = Workspace::new().expect("workspace");
    workspace.write_simple_rule("ok", "true").expect("ok rule");
    workspace.write_simple_rule("broken", "false").expect("broken rule");
    workspace
}

fn drover(workspace: &Workspace, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_drover"))
        .current_dir(workspace.path())
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("run drover")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn successful_directives_exit_zero() {
    let workspace = workspace();
    workspace.write("doc.tex", "% arara: ok\n% arara: ok\n").expect("doc");

    let output = drover(&workspace, &["doc.tex"]);

    assert_eq!(output.status.code(), Some(exit_codes::SUCCESS));
    let printed = stdout(&output);
    assert_eq!(printed.matches("SUCCESS").count(), 2, "{printed}");
    assert!(printed.contains("(ok) "), "{printed}");
}

#[test]
fn extension_is_optional_on_the_command_line() {
    let workspace = workspace();
    workspace.write("doc.tex", "% arara: ok\n").expect("doc");

    let output = drover(&workspace, &["doc"]);

    assert_eq!(output.status.code(), Some(exit_codes::SUCCESS));
}

#[test]
fn failing_command_exits_with_external_call_failed() {
    let workspace = workspace();
    workspace
        .write("doc.tex", "% arara: broken\n% arara: ok\n")
        .expect("doc");

    let output = drover(&workspace, &["doc.tex"]);

    assert_eq!(output.status.code(), Some(exit_codes::EXTERNAL_CALL_FAILED));
    let printed = stdout(&output);
    assert!(printed.contains("FAILURE"), "{printed}");
    assert!(!printed.contains("(ok)"), "{printed}");
}

#[test]
fn halt_on_errors_can_be_disabled_from_the_command_line() {
    let workspace = workspace();
    workspace
        .write("doc.tex", "% arara: broken\n% arara: ok\n")
        .expect("doc");

    let output = drover(&workspace, &["--halt-on-errors", "off", "doc.tex"]);

    assert_eq!(output.status.code(), Some(exit_codes::EXTERNAL_CALL_FAILED));
    assert!(stdout(&output).contains("(ok)"));
}

#[test]
fn halt_directive_sets_the_exit_code() {
    let workspace = workspace();
    workspace
        .write("doc.tex", "% arara: halt: { status: 4 }\n% arara: broken\n")
        .expect("doc");

    let output = drover(&workspace, &["doc.tex"]);

    assert_eq!(output.status.code(), Some(4));
    assert!(stdout(&output).contains("HALTED"));
}

#[test]
fn dry_run_prints_commands_and_runs_nothing() {
    let workspace = workspace();
    workspace.write("doc.tex", "% arara: broken\n").expect("doc");

    let output = drover(&workspace, &["-n", "doc.tex"]);

    assert_eq!(output.status.code(), Some(exit_codes::SUCCESS));
    assert!(stdout(&output).contains("    false doc.tex"));
}

#[test]
fn configuration_file_is_read_from_the_working_directory() {
    let workspace = workspace();
    workspace
        .write(".drover.toml", "halt_on_errors = false\nmax_loops = 2\n")
        .expect("config");
    workspace
        .write("doc.tex", "% arara: broken\n% arara: ok until missing('doc.tex')\n")
        .expect("doc");

    let output = drover(&workspace, &["doc.tex"]);

    let printed = stdout(&output);
    assert!(printed.contains("loop bound of 2 iterations exceeded"), "{printed}");
    assert_eq!(output.status.code(), Some(exit_codes::CAUGHT_EXCEPTION));
}

#[test]
fn report_flag_writes_json() {
    let workspace = workspace();
    workspace.write("doc.tex", "% arara: ok\n").expect("doc");

    let output = drover(&workspace, &["--report", "report.json", "doc.tex"]);

    assert_eq!(output.status.code(), Some(exit_codes::SUCCESS));
    let raw = fs::read_to_string(workspace.path().join("report.json")).expect("report");
    let report: serde_json::Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(report["records"][0]["identifier"], "ok");
    assert_eq!(report["records"][0]["exit_code"], 0);
}

#[test]
fn unknown_file_is_a_caught_exception() {
    let workspace = workspace();

    let output = drover(&workspace, &["absent.tex"]);

    assert_eq!(output.status.code(), Some(exit_codes::CAUGHT_EXCEPTION));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("absent"), "{stderr}");
}

#[test]
fn safe_run_refuses_shell_rules() {
    let workspace = workspace();
    workspace.write_simple_rule("shell", "sh").expect("shell rule");
    workspace.write("doc.tex", "% arara: shell\n").expect("doc");

    let output = drover(&workspace, &["--safe-run", "doc.tex"]);

    assert_eq!(output.status.code(), Some(exit_codes::CAUGHT_EXCEPTION));
    assert!(stdout(&output).contains("not allowed in safe-run mode"));
}
