//! The `prepkit` binary: subcommands, exit codes and the error boundary.

use std::process::Output;

use super::fixtures::TestProject;

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Test: Default command
/// Given a project and a toolchain
/// When prepkit runs without a subcommand
/// Then the built-in shaders compile and the command lines are printed
#[test]
fn test_default_command_compiles_shaders() {
    let project = TestProject::new();

    let output = project.prepkit().output().unwrap();

    assert!(output.status.success(), "stdout: {}", stdout(&output));
    let out = stdout(&output);
    assert!(out.contains("Working dir: "));
    assert!(out.contains(
        "Gui/BlitToSwapchain.vert -o Compiled/Gui/BlitToSwapchain.vert.inc -V -x"
    ));
    assert!(out.contains("Execute: "));
    assert!(out.contains("Shader tasks: 2 succeeded, 0 failed"));
    assert!(project.exists("Compiled/Gui/BlitToSwapchain.vert.inc"));
    assert!(project.exists("Compiled/Gui/BlitToSwapchain.frag.inc"));
}

/// Test: Missing toolchain variable
/// Given VULKAN_SDK is unset
/// When prepkit runs
/// Then it exits nonzero with a configuration message and compiles nothing
#[test]
fn test_missing_toolchain_variable_exits_nonzero() {
    let project = TestProject::new();

    let output = project
        .prepkit()
        .env_remove("VULKAN_SDK")
        .arg("shaders")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(255));
    let out = stdout(&output);
    assert!(out.contains("Configuration error"));
    assert!(out.contains("VULKAN_SDK"));
    assert!(!out.contains("Execute: "));
    assert!(project.calls().is_empty());
    assert!(!project.exists("Compiled"));
}

/// Test: Failure policy from the command line
/// Given a manifest task whose source is missing
/// When prepkit runs with and without --strict
/// Then the permissive run exits 0 and the strict run exits nonzero
#[test]
fn test_strict_flag_promotes_task_failure() {
    let project = TestProject::new();
    project.write(
        "prepkit.toml",
        r#"
[[tasks]]
source = "Missing/none.vert"
output = "out/none.inc"

[[tasks]]
source = "Gui/BlitToSwapchain.vert"
output = "out/vert.inc"
"#,
    );

    let permissive = project.prepkit().output().unwrap();
    assert!(permissive.status.success());
    assert!(stdout(&permissive).contains("1 succeeded, 1 failed"));
    assert_eq!(project.calls().len(), 2);

    let strict = project.prepkit().arg("--strict").output().unwrap();
    assert_eq!(strict.status.code(), Some(255));
    assert!(stdout(&strict).contains("Command failed (exit code 2)"));
    // The strict run stopped after its first task
    assert_eq!(project.calls().len(), 3);
}

/// Test: Explicit root
/// Given prepkit is started outside the project
/// When --root points at the project
/// Then tasks resolve against the project root
#[test]
fn test_root_option() {
    let project = TestProject::new();

    let output = project
        .prepkit()
        .current_dir(project.temp_dir.path())
        .args(["--root", "project", "shaders"])
        .output()
        .unwrap();

    assert!(output.status.success(), "stdout: {}", stdout(&output));
    assert!(project.exists("Compiled/Gui/BlitToSwapchain.frag.inc"));
}

/// Test: Missing root directory
/// Given --root names a directory that does not exist
/// When prepkit runs
/// Then it exits nonzero with a directory error
#[test]
fn test_missing_root_exits_nonzero() {
    let project = TestProject::new();

    let output = project
        .prepkit()
        .args(["--root", "does-not-exist"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(255));
    assert!(stdout(&output).contains("Cannot change directory"));
    assert!(project.calls().is_empty());
}

/// Test: Listing tasks as JSON
#[test]
fn test_list_json() {
    let project = TestProject::new();

    let output = project.prepkit().args(["list", "--json"]).output().unwrap();

    assert!(output.status.success());
    let entries: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["source"], "Gui/BlitToSwapchain.vert");
    let command = entries[1]["command"].as_str().unwrap();
    assert!(command.starts_with(&project.sdk.join("Bin/glslang").display().to_string()));
    assert!(command.ends_with(
        "Gui/BlitToSwapchain.frag -o Compiled/Gui/BlitToSwapchain.frag.inc -V -x"
    ));
    // Listing never runs the tool
    assert!(project.calls().is_empty());
}

/// Test: Shader run report as JSON
#[test]
fn test_shaders_json_report() {
    let project = TestProject::new();

    let output = project
        .prepkit()
        .args(["shaders", "--json"])
        .output()
        .unwrap();

    assert!(output.status.success());
    // Progress lines precede the JSON document
    let out = stdout(&output);
    let json_start = out.find("{\n").unwrap();
    let report: serde_json::Value = serde_json::from_str(&out[json_start..]).unwrap();
    let results = report["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["outcome"]["state"], "exited");
    assert_eq!(results[0]["outcome"]["code"], 0);
}

/// Test: Clean
/// Given compiled outputs
/// When prepkit clean runs
/// Then the output files and their emptied directories are removed and sources are kept
#[test]
fn test_clean_removes_outputs() {
    let project = TestProject::new();
    assert!(project.prepkit().output().unwrap().status.success());
    assert!(project.exists("Compiled/Gui"));

    let output = project.prepkit().env_remove("VULKAN_SDK").arg("clean").output().unwrap();

    assert!(output.status.success());
    assert!(stdout(&output).contains("Removed 2 output files"));
    assert!(!project.exists("Compiled"));
    assert!(project.exists("Gui/BlitToSwapchain.vert"));
}

/// Test: Clean with an output outside the root
/// Given a manifest task writing above the project root
/// When prepkit clean runs
/// Then it exits nonzero and nothing is removed
#[test]
fn test_clean_refuses_outputs_outside_root() {
    let project = TestProject::new();
    let sibling = project.temp_dir.path().join("sibling");
    std::fs::create_dir(&sibling).unwrap();
    std::fs::write(sibling.join("a.inc"), "").unwrap();
    project.write(
        "prepkit.toml",
        r#"
[[tasks]]
source = "Gui/BlitToSwapchain.vert"
output = "../sibling/a.inc"
"#,
    );

    let output = project.prepkit().arg("clean").output().unwrap();

    assert_eq!(output.status.code(), Some(255));
    assert!(stdout(&output).contains("is outside"));
    assert!(sibling.join("a.inc").is_file());
}

/// Test: Zero timeout
/// Given --timeout 0
/// When prepkit parses its arguments
/// Then the value is rejected before anything runs
#[test]
fn test_zero_timeout_is_rejected() {
    let project = TestProject::new();

    let output = project.prepkit().args(["--timeout", "0"]).output().unwrap();

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("--timeout"));
    assert!(project.calls().is_empty());
}

/// Test: Setup steps from the manifest
#[test]
fn test_setup_command() {
    let project = TestProject::new();
    project.write("imported/sdlpp/configure.sh", "touch configured\n");
    project.write(
        "prepkit.toml",
        r#"
[[steps]]
dir = "imported/sdlpp"
program = "sh"
args = ["configure.sh"]

[[steps]]
program = "sh"
args = ["-c", "mkdir -p build && touch build/generated"]
"#,
    );

    let output = project.prepkit().arg("setup").output().unwrap();

    assert!(output.status.success(), "stdout: {}", stdout(&output));
    assert!(project.exists("imported/sdlpp/configured"));
    assert!(project.exists("build/generated"));
    assert!(stdout(&output).contains("Setup steps: 2 succeeded, 0 failed"));
}

/// Test: Malformed manifest
#[test]
fn test_malformed_manifest_exits_nonzero() {
    let project = TestProject::new();
    project.write("prepkit.toml", "failure_policy = [\n");

    let output = project.prepkit().output().unwrap();

    assert_eq!(output.status.code(), Some(255));
    assert!(stdout(&output).contains("TOML parse error"));
    assert!(project.calls().is_empty());
}

/// Test: Trace logging
/// Given PREPKIT_DEBUG=trace and --verbose
/// When prepkit runs
/// Then directory stack records reach stderr
#[test]
fn test_trace_level_from_environment() {
    let project = TestProject::new();

    let output = project
        .prepkit()
        .env("PREPKIT_DEBUG", "trace")
        .arg("--verbose")
        .output()
        .unwrap();

    assert!(output.status.success());
    let err = String::from_utf8_lossy(&output.stderr);
    assert!(err.contains("[TRACE] enter: depth=1"), "stderr: {}", err);
    assert!(err.contains("[TRACE] restore: depth=0"));
}
