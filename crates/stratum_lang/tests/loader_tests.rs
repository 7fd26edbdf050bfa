//! Integration tests for package loading and imports.

use std::fs;
use std::path::Path;

use serde_json::json;
use stratum_lang::load::{instances, Config};
use stratum_lang::{Context, ValidateOptions};
use tempfile::tempdir;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn args(selectors: &[&str]) -> Vec<String> {
    selectors.iter().map(|s| s.to_string()).collect()
}

fn module_fixture(root: &Path) {
    write(root, "cue.mod/module.cue", "module: \"example.com/fixture\"\n");
    write(
        root,
        "schema/schema.cue",
        "package schema\n\n#Port: int & >0 & <65536\n",
    );
    write(
        root,
        "app/app.cue",
        "package app\n\nimport \"example.com/fixture/schema\"\n\nport: schema.#Port & 8080\n",
    );
    write(root, "multi/a.cue", "package one\na: 1\n");
    write(root, "multi/b.cue", "package two\nb: 2\n");
    write(root, "empty/README.md", "nothing here\n");
}

#[test]
fn test_load_relative_directory() {
    let dir = tempdir().unwrap();
    module_fixture(dir.path());

    let loaded = instances(&args(&["./app"]), &Config::new(dir.path()));
    assert_eq!(loaded.len(), 1);
    let instance = &loaded[0];
    assert!(instance.err.is_none(), "{:?}", instance.err);
    assert_eq!(instance.package, "app");
    assert_eq!(instance.import_path, "example.com/fixture/app");
    assert_eq!(instance.module.as_deref(), Some("example.com/fixture"));
    assert!(instance.imports.contains_key("example.com/fixture/schema"));
}

#[test]
fn test_build_with_module_import() {
    let dir = tempdir().unwrap();
    module_fixture(dir.path());

    let loaded = instances(&args(&["./app"]), &Config::new(dir.path()));
    let value = Context::new().build_instance(&loaded[0]).unwrap();
    assert!(value.validate(ValidateOptions::concrete()).is_ok());
    assert_eq!(value.to_json().unwrap(), json!({"port": 8080}));
}

#[test]
fn test_load_by_import_path() {
    let dir = tempdir().unwrap();
    module_fixture(dir.path());

    let loaded = instances(
        &args(&["example.com/fixture/multi:two"]),
        &Config::new(dir.path().join("app")),
    );
    let instance = &loaded[0];
    assert!(instance.err.is_none(), "{:?}", instance.err);
    assert_eq!(instance.package, "two");
    assert_eq!(instance.import_path, "example.com/fixture/multi:two");
}

#[test]
fn test_multiple_packages_require_qualifier() {
    let dir = tempdir().unwrap();
    module_fixture(dir.path());

    let loaded = instances(&args(&["./multi"]), &Config::new(dir.path()));
    let err = loaded[0].err.as_ref().unwrap();
    assert_eq!(
        err.to_string(),
        "found packages \"one\" and \"two\" in ./multi"
    );

    let loaded = instances(&args(&["./multi:one"]), &Config::new(dir.path()));
    assert!(loaded[0].err.is_none());
    assert_eq!(loaded[0].import_path, "example.com/fixture/multi:one");
}

#[test]
fn test_empty_directory() {
    let dir = tempdir().unwrap();
    module_fixture(dir.path());

    let loaded = instances(&[], &Config::new(dir.path().join("empty")));
    let err = loaded[0].err.as_ref().unwrap();
    assert_eq!(err.to_string(), "no CUE files in .");
}

#[test]
fn test_missing_directory() {
    let dir = tempdir().unwrap();
    let loaded = instances(&args(&["."]), &Config::new(dir.path().join("nonexistent")));
    let err = loaded[0].err.as_ref().unwrap();
    assert_eq!(err.to_string(), "cannot find package \".\"");
}

#[test]
fn test_unknown_import() {
    let dir = tempdir().unwrap();
    write(dir.path(), "cue.mod/module.cue", "module: \"example.com/other\"\n");
    write(
        dir.path(),
        "pkg/pkg.cue",
        "package pkg\n\nimport \"example.com/missing/thing\"\n\na: thing.b\n",
    );

    let loaded = instances(&args(&["./pkg"]), &Config::new(dir.path()));
    let err = loaded[0].err.as_ref().unwrap();
    assert!(err
        .to_string()
        .starts_with("cannot find package \"example.com/missing/thing\""));
}

#[test]
fn test_parse_error_is_reported_on_instance() {
    let dir = tempdir().unwrap();
    write(dir.path(), "bad/bad.cue", "package bad\n\na: {\n");

    let loaded = instances(&args(&["./bad"]), &Config::new(dir.path()));
    assert!(loaded[0].err.is_some());
    assert!(Context::new().build_instance(&loaded[0]).is_err());
}

#[test]
fn test_instance_outside_module_has_no_import_path() {
    let dir = tempdir().unwrap();
    write(dir.path(), "plain/plain.cue", "package plain\nx: 1\n");

    let loaded = instances(&args(&["./plain"]), &Config::new(dir.path()));
    assert!(loaded[0].err.is_none());
    assert!(loaded[0].import_path.is_empty());
    assert!(loaded[0].module.is_none());
}
