// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job configuration.
//!
//! TOML with an `[options]` table, one or more `[[dataset]]` entries
//! and the module chain of the analysis pipeline:
//!
//! ```toml
//! [options]
//! blocksize = 237
//! output_dir = "/data/out"
//! mergemode = "workers"
//!
//! [[dataset]]
//! name = "testdataset"
//! treename = "events"
//! file_pattern = "/data/in/test*.tree"
//!
//! [[module]]
//! type = "offset"
//! offset = 23
//! ```
//!
//! The core reads `options` and the ordered per-dataset file list (for
//! range bookkeeping and the input fingerprint); the module chain is
//! consumed by the analysis pipeline.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::fingerprint::files_fingerprint;
use crate::JobError;

fn default_blocksize() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Options {
    #[serde(default = "default_blocksize")]
    pub blocksize: u64,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub mergemode: MergeMode,
    #[serde(default)]
    pub keep_unmerged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// The master reads all per-worker files and merges them itself.
    Master,
    /// Workers merge pairwise until one file survives.
    #[default]
    Workers,
    /// Leave the per-worker files unmerged.
    Nomerge,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatasetSpec {
    name: String,
    treename: String,
    #[serde(default)]
    file_pattern: Option<String>,
    #[serde(default)]
    files: Option<Vec<PathBuf>>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

/// One module of the analysis pipeline. Unknown types are a
/// configuration error.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ModuleSpec {
    /// Add a constant to every input record.
    Offset { offset: i64 },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    options: Options,
    #[serde(default)]
    dataset: Vec<DatasetSpec>,
    #[serde(default)]
    module: Vec<ModuleSpec>,
}

/// A dataset with its file list resolved and fingerprinted.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    pub treename: String,
    pub files: Vec<PathBuf>,
    pub fingerprint: u64,
    pub tags: BTreeMap<String, String>,
}

/// Fully resolved configuration, identical on master and workers.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Absolute path of the config file, as sent to workers.
    pub path: PathBuf,
    pub options: Options,
    pub datasets: Vec<Dataset>,
    pub modules: Vec<ModuleSpec>,
}

impl JobConfig {
    pub fn load(path: &Path) -> Result<Self, JobError> {
        let path = path
            .canonicalize()
            .map_err(|e| JobError::Config(format!("config file '{}': {e}", path.display())))?;
        let text = std::fs::read_to_string(&path)?;
        let raw: RawConfig = toml::from_str(&text)?;

        if raw.dataset.is_empty() {
            return Err(JobError::Config("no dataset to process".to_string()));
        }
        if !raw.options.output_dir.is_dir() {
            return Err(JobError::Config(format!(
                "options.output_dir '{}' does not exist or is not a directory",
                raw.options.output_dir.display()
            )));
        }
        if raw.options.blocksize == 0 {
            return Err(JobError::Config("options.blocksize must be positive".to_string()));
        }

        let mut datasets = Vec::with_capacity(raw.dataset.len());
        for spec in raw.dataset {
            let files = resolve_files(&spec)?;
            let fingerprint = files_fingerprint(&files);
            datasets.push(Dataset {
                name: spec.name,
                treename: spec.treename,
                files,
                fingerprint,
                tags: spec.tags,
            });
        }

        Ok(Self {
            path,
            options: raw.options,
            datasets,
            modules: raw.module,
        })
    }

    /// Per-worker intermediate output of a dataset.
    pub fn unmerged_path(&self, dataset_index: usize, worker: u32) -> PathBuf {
        self.options.output_dir.join(format!(
            "unmerged-{}-{}.root",
            self.datasets[dataset_index].name, worker
        ))
    }

    /// Final merged artifact of a dataset.
    pub fn merged_path(&self, dataset_index: usize) -> PathBuf {
        self.options
            .output_dir
            .join(format!("{}.root", self.datasets[dataset_index].name))
    }
}

fn resolve_files(spec: &DatasetSpec) -> Result<Vec<PathBuf>, JobError> {
    let files = match (&spec.file_pattern, &spec.files) {
        (Some(_), Some(_)) => {
            return Err(JobError::Config(format!(
                "dataset '{}': file_pattern and files are mutually exclusive",
                spec.name
            )));
        }
        (None, None) => {
            return Err(JobError::Config(format!(
                "dataset '{}': one of file_pattern or files is required",
                spec.name
            )));
        }
        (Some(pattern), None) => {
            let mut files = Vec::new();
            for entry in glob::glob(pattern)? {
                match entry {
                    Ok(path) => files.push(path),
                    Err(e) => {
                        return Err(JobError::Config(format!(
                            "dataset '{}': reading '{pattern}': {e}",
                            spec.name
                        )));
                    }
                }
            }
            files.sort();
            files
        }
        (None, Some(files)) => files.clone(),
    };
    if files.is_empty() {
        return Err(JobError::Config(format!(
            "dataset '{}': no input files",
            spec.name
        )));
    }
    Ok(files)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
