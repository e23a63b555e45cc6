// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::tree;
use std::fs;
use std::path::PathBuf;

fn pipeline_with_one_file(records: &[i64], offset: i64) -> (tempfile::TempDir, RecordPipeline) {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.tree");
    tree::write_records(&input, "events", records).unwrap();

    let config_path = dir.path().join("job.toml");
    fs::write(
        &config_path,
        format!(
            r#"
[options]
blocksize = 100
output_dir = "{out}"

[[dataset]]
name = "testdataset"
treename = "events"
files = ["{input}"]

[[module]]
type = "offset"
offset = {offset}
"#,
            out = dir.path().display(),
            input = input.display()
        ),
    )
    .unwrap();
    let config = JobConfig::load(&config_path).unwrap();
    (dir, RecordPipeline::new(config))
}

#[test]
fn processes_a_range_through_the_module_chain() {
    let (dir, mut pipeline) = pipeline_with_one_file(&[10, 20, 30, 40], 23);
    let out = dir.path().join("out.root");

    pipeline.start_dataset(0, &out).unwrap();
    pipeline.start_file(0).unwrap();
    assert_eq!(pipeline.file_size().unwrap(), 4);

    pipeline.process(1, 3).unwrap();
    pipeline.close_dataset().unwrap();

    let mut reader = tree::TreeReader::open(&out).unwrap();
    assert_eq!(reader.read_all().unwrap(), vec![43, 53]);
}

#[test]
fn restarting_the_same_dataset_is_a_no_op() {
    let (dir, mut pipeline) = pipeline_with_one_file(&[1, 2], 0);
    let out = dir.path().join("out.root");

    pipeline.start_dataset(0, &out).unwrap();
    pipeline.start_file(0).unwrap();
    pipeline.process(0, 1).unwrap();
    // Same dataset, same path: the writer (and its records) survive.
    pipeline.start_dataset(0, &out).unwrap();
    pipeline.process(1, 2).unwrap();
    pipeline.close_dataset().unwrap();

    let mut reader = tree::TreeReader::open(&out).unwrap();
    assert_eq!(reader.read_all().unwrap(), vec![1, 2]);
}

#[test]
fn process_truncates_past_the_file_end() {
    let (dir, mut pipeline) = pipeline_with_one_file(&[5, 6, 7], 0);
    let out = dir.path().join("out.root");

    pipeline.start_dataset(0, &out).unwrap();
    pipeline.start_file(0).unwrap();
    let stats = pipeline.process(0, 100).unwrap();
    assert_eq!(stats.nbytes_read, 3 * 8);
    pipeline.close_dataset().unwrap();

    let mut reader = tree::TreeReader::open(&out).unwrap();
    assert_eq!(reader.count(), 3);
}

#[test]
fn fingerprint_comes_from_the_dataset() {
    let (dir, mut pipeline) = pipeline_with_one_file(&[1], 0);
    let out = dir.path().join("out.root");
    assert!(pipeline.dataset_fingerprint().is_err(), "no dataset yet");
    pipeline.start_dataset(0, &out).unwrap();
    assert_ne!(pipeline.dataset_fingerprint().unwrap(), 0);
    pipeline.close_dataset().unwrap();
}

#[test]
fn mismatched_input_tree_name_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.tree");
    tree::write_records(&input, "somethingelse", &[1]).unwrap();

    let config_path = dir.path().join("job.toml");
    fs::write(
        &config_path,
        format!(
            r#"
[options]
output_dir = "{out}"

[[dataset]]
name = "d"
treename = "events"
files = ["{input}"]
"#,
            out = dir.path().display(),
            input = input.display()
        ),
    )
    .unwrap();
    let config = JobConfig::load(&config_path).unwrap();
    let mut pipeline = RecordPipeline::new(config);
    let out: PathBuf = dir.path().join("out.root");
    pipeline.start_dataset(0, &out).unwrap();
    assert!(matches!(pipeline.start_file(0), Err(JobError::Tree(_))));
}
