//! Integration tests for the asmdiff CLI
//!
//! Tests end-to-end command behavior using the CLI binary.
//! Module fixtures are generated with the metadata builder into temp directories.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use asmdiff_core::metadata::builder::{MetadataBuilder, SigType};
use tempfile::TempDir;

// ============================================================================
// Test Utilities
// ============================================================================

/// Get the path to the asmdiff binary (built by cargo)
fn asmdiff_binary() -> Command {
    Command::new(env!("CARGO_BIN_EXE_asmdiff"))
}

/// Run asmdiff with the given args in the specified directory
fn run_asmdiff(dir: &Path, args: &[&str]) -> Output {
    asmdiff_binary()
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("Failed to execute asmdiff command")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn write_module(dir: &Path, file: &str, builder: &MetadataBuilder) -> PathBuf {
    fs::create_dir_all(dir).expect("Failed to create module directory");
    let path = dir.join(file);
    fs::write(&path, builder.build()).expect("Failed to write module");
    path
}

/// `Shop.Order` with an `Id` of the given type, plus optional extras.
fn shop(id: SigType, with_note: bool, with_customer: bool) -> MetadataBuilder {
    let mut builder = MetadataBuilder::new("Shop");
    let order = builder.add_type("Shop", "Order");
    builder.property(order, "Id", id);
    if with_note {
        builder.property(order, "Note", SigType::String);
    }
    if with_customer {
        let customer = builder.add_type("Shop", "Customer");
        builder.property(customer, "Vip", SigType::Bool);
    }
    builder
}

/// v1/ and v2/ folders: `Id` changes type, `Note` is removed, `Customer` is new.
fn setup_versions(dir: &Path) -> (PathBuf, PathBuf) {
    let v1 = dir.join("v1");
    let v2 = dir.join("v2");
    write_module(&v1, "Shop.dll", &shop(SigType::I4, true, false));
    write_module(&v2, "Shop.dll", &shop(SigType::I8, false, true));
    (v1, v2)
}

fn run_json(dir: &Path, args: &[&str]) -> serde_json::Value {
    let output = run_asmdiff(dir, args);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    serde_json::from_str(&stdout(&output)).expect("stdout is JSON")
}

// ============================================================================
// diff
// ============================================================================

#[test]
fn test_diff_default_flags() {
    let dir = TempDir::new().unwrap();
    setup_versions(dir.path());

    let json = run_json(dir.path(), &["--format", "json", "diff", "-s", "v1", "-t", "v2"]);
    let results = json["results"].as_array().unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["class_name"], "Shop.Order");
    let items = results[0]["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["kind"], "Change");
    assert_eq!(items[0]["before"], "System.Int32 Id");
    assert_eq!(items[0]["after"], "System.Int64 Id");
    assert_eq!(items[1]["kind"], "Deletion");
    assert_eq!(items[1]["before"], "System.String Note");
    assert_eq!(items[1]["after"], "Removed");
    assert_eq!(json["metadata"]["flags"], "cd");
}

#[test]
fn test_diff_with_additions() {
    let dir = TempDir::new().unwrap();
    setup_versions(dir.path());

    let json = run_json(
        dir.path(),
        &["--format", "json", "diff", "-s", "v1", "-t", "v2", "--flags", "a"],
    );
    let results = json["results"].as_array().unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["class_name"], "Shop.Customer");
    assert_eq!(results[0]["items"][0]["before"], "None");
    assert_eq!(results[0]["items"][0]["after"], "System.Boolean Vip");
}

#[test]
fn test_diff_same_module_is_empty() {
    let dir = TempDir::new().unwrap();
    write_module(dir.path(), "Shop.dll", &shop(SigType::I4, true, true));

    let json = run_json(
        dir.path(),
        &["--format", "json", "diff", "-s", "Shop.dll", "-t", "Shop.dll", "--flags", "acd"],
    );
    assert!(json["results"].as_array().unwrap().is_empty());
    assert_eq!(json["summary_text"], "No changes");
}

#[test]
fn test_diff_corrupt_target_module() {
    let dir = TempDir::new().unwrap();
    let (_, v2) = setup_versions(dir.path());
    fs::write(v2.join("Broken.dll"), b"definitely not a module").unwrap();

    let json = run_json(dir.path(), &["--format", "json", "diff", "-s", "v1", "-t", "v2"]);

    let failed = json["target_outcome"]["failed"].as_array().unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0]["path"].as_str().unwrap().ends_with("Broken.dll"));
    assert_eq!(json["target_outcome"]["succeeded"].as_array().unwrap().len(), 1);

    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["items"][0]["after"], "System.Int64 Id");
}

#[test]
fn test_diff_table_output() {
    let dir = TempDir::new().unwrap();
    setup_versions(dir.path());

    let output = run_asmdiff(
        dir.path(),
        &["diff", "-s", "v1", "-t", "v2", "--title", "Release 2"],
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let out = stdout(&output);
    assert!(out.contains("Release 2"));
    assert!(out.contains("Shop.Order"));
    assert!(out.contains("System.Int64 Id"));
    assert!(out.contains("Removed"));
}

#[test]
fn test_diff_writes_report() {
    let dir = TempDir::new().unwrap();
    setup_versions(dir.path());

    let output = run_asmdiff(
        dir.path(),
        &["-q", "diff", "-s", "v1", "-t", "v2", "--report-dir", "reports"],
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let reports: Vec<PathBuf> = fs::read_dir(dir.path().join("reports"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(reports.len(), 1);

    let name = reports[0].file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("AssemblyScanReport-"));
    assert!(name.ends_with(".json"));

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&reports[0]).unwrap()).unwrap();
    assert_eq!(json["title"], "asmdiff report");
    assert_eq!(json["results"][0]["class_name"], "Shop.Order");
}

#[test]
fn test_diff_filter_by_interface() {
    let dir = TempDir::new().unwrap();
    for (folder, id) in [("v1", SigType::I4), ("v2", SigType::I8)] {
        let mut builder = MetadataBuilder::new("Billing");
        let entity = builder.add_interface("Billing", "IEntity");
        let invoice = builder.add_type("Billing", "Invoice");
        builder.implements(invoice, entity);
        builder.property(invoice, "Id", id.clone());
        let color = builder.add_type("Billing", "Color");
        builder.property(color, "Id", id);
        write_module(&dir.path().join(folder), "Billing.dll", &builder);
    }

    let json = run_json(
        dir.path(),
        &["--format", "json", "diff", "-s", "v1", "-t", "v2", "-f", "IEntity"],
    );
    let names: Vec<&str> = json["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["class_name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Billing.Invoice"]);
    assert_eq!(json["metadata"]["filter"], "IEntity");
}

#[test]
fn test_config_file_sets_flags() {
    let dir = TempDir::new().unwrap();
    setup_versions(dir.path());
    fs::write(
        dir.path().join(".asmdiffrc.toml"),
        "[analysis]\nflags = \"a\"\n\n[output]\nformat = \"json\"\n",
    )
    .unwrap();

    let json = run_json(dir.path(), &["diff", "-s", "v1", "-t", "v2"]);
    assert_eq!(json["metadata"]["flags"], "a");
    assert_eq!(json["results"][0]["class_name"], "Shop.Customer");
}

// ============================================================================
// errors
// ============================================================================

#[test]
fn test_missing_source_fails() {
    let dir = TempDir::new().unwrap();
    setup_versions(dir.path());

    let output = run_asmdiff(dir.path(), &["diff", "-s", "missing", "-t", "v2"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("source"));
}

#[test]
fn test_invalid_pattern_fails() {
    let dir = TempDir::new().unwrap();
    setup_versions(dir.path());

    let output = run_asmdiff(dir.path(), &["diff", "-s", "v1", "-t", "v2", "-p", "(unclosed"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("not a valid regular expression"));
}

#[test]
fn test_invalid_flags_fail() {
    let dir = TempDir::new().unwrap();
    setup_versions(dir.path());

    let output = run_asmdiff(dir.path(), &["diff", "-s", "v1", "-t", "v2", "--flags", "xyz"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("invalid flags"));
}

// ============================================================================
// snapshot
// ============================================================================

#[test]
fn test_snapshot_json() {
    let dir = TempDir::new().unwrap();
    setup_versions(dir.path());

    let json = run_json(dir.path(), &["--format", "json", "snapshot", "v2"]);
    let types = json["types"].as_array().unwrap();
    let names: Vec<&str> = types.iter().map(|t| t["full_name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["Shop.Customer", "Shop.Order"]);
    assert_eq!(types[1]["properties"][0]["type_name"], "System.Int64");
    assert_eq!(json["outcome"]["succeeded"].as_array().unwrap().len(), 1);
}

#[test]
fn test_no_command_prints_help() {
    let dir = TempDir::new().unwrap();
    let output = run_asmdiff(dir.path(), &[]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Usage"));
}
