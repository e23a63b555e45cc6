// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::fs;

fn write_config(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("job.toml");
    fs::write(&path, body).unwrap();
    path
}

fn touch(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, b"").unwrap();
    path
}

#[test]
fn loads_a_minimal_config() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "b.tree");
    touch(dir.path(), "a.tree");
    let path = write_config(
        dir.path(),
        &format!(
            r#"
[options]
blocksize = 237
output_dir = "{out}"

[[dataset]]
name = "testdataset"
treename = "events"
file_pattern = "{out}/*.tree"

[[module]]
type = "offset"
offset = 23
"#,
            out = dir.path().display()
        ),
    );

    let config = JobConfig::load(&path).unwrap();
    assert_eq!(config.options.blocksize, 237);
    assert_eq!(config.options.mergemode, MergeMode::Workers);
    assert!(!config.options.keep_unmerged);
    assert_eq!(config.datasets.len(), 1);

    let ds = &config.datasets[0];
    assert_eq!(ds.name, "testdataset");
    // Glob results come back sorted: ordering feeds the fingerprint.
    let names: Vec<_> = ds
        .files
        .iter()
        .map(|f| f.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, ["a.tree", "b.tree"]);
    assert_ne!(ds.fingerprint, 0);

    assert_eq!(config.modules.len(), 1);
    assert!(matches!(config.modules[0], ModuleSpec::Offset { offset: 23 }));
}

#[test]
fn explicit_file_lists_keep_their_order() {
    let dir = tempfile::tempdir().unwrap();
    let b = touch(dir.path(), "b.tree");
    let a = touch(dir.path(), "a.tree");
    let path = write_config(
        dir.path(),
        &format!(
            r#"
[options]
output_dir = "{out}"

[[dataset]]
name = "d"
treename = "events"
files = ["{b}", "{a}"]
"#,
            out = dir.path().display(),
            b = b.display(),
            a = a.display()
        ),
    );

    let config = JobConfig::load(&path).unwrap();
    assert_eq!(config.datasets[0].files, vec![b, a]);
    assert_eq!(config.options.blocksize, 10_000, "default blocksize");
}

#[test]
fn rejects_a_config_without_datasets() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        &format!("[options]\noutput_dir = \"{}\"\n", dir.path().display()),
    );
    assert!(matches!(
        JobConfig::load(&path),
        Err(JobError::Config(msg)) if msg.contains("no dataset")
    ));
}

#[test]
fn rejects_a_missing_output_dir() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "a.tree");
    let path = write_config(
        dir.path(),
        &format!(
            r#"
[options]
output_dir = "{out}/definitely-not-here"

[[dataset]]
name = "d"
treename = "events"
file_pattern = "{out}/*.tree"
"#,
            out = dir.path().display()
        ),
    );
    assert!(matches!(
        JobConfig::load(&path),
        Err(JobError::Config(msg)) if msg.contains("output_dir")
    ));
}

#[test]
fn rejects_an_empty_file_list() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        &format!(
            r#"
[options]
output_dir = "{out}"

[[dataset]]
name = "d"
treename = "events"
file_pattern = "{out}/*.nope"
"#,
            out = dir.path().display()
        ),
    );
    assert!(matches!(
        JobConfig::load(&path),
        Err(JobError::Config(msg)) if msg.contains("no input files")
    ));
}

#[test]
fn rejects_unknown_module_types() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "a.tree");
    let path = write_config(
        dir.path(),
        &format!(
            r#"
[options]
output_dir = "{out}"

[[dataset]]
name = "d"
treename = "events"
file_pattern = "{out}/*.tree"

[[module]]
type = "frobnicate"
"#,
            out = dir.path().display()
        ),
    );
    assert!(matches!(JobConfig::load(&path), Err(JobError::Toml(_))));
}

#[test]
fn output_paths_follow_the_naming_scheme() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "a.tree");
    let path = write_config(
        dir.path(),
        &format!(
            r#"
[options]
output_dir = "{out}"

[[dataset]]
name = "testdataset"
treename = "events"
file_pattern = "{out}/*.tree"
"#,
            out = dir.path().display()
        ),
    );
    let config = JobConfig::load(&path).unwrap();
    assert_eq!(
        config.unmerged_path(0, 3).file_name().unwrap(),
        "unmerged-testdataset-3.root"
    );
    assert_eq!(
        config.merged_path(0).file_name().unwrap(),
        "testdataset.root"
    );
}
