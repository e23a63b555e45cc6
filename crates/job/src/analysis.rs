// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The analysis seam and the record pipeline behind it.
//!
//! The runtime only ever talks to a [`Controller`]: start a dataset
//! with an output path, start an input file, process an event range,
//! close, merge two outputs. The [`RecordPipeline`] is the concrete
//! controller shipped here: it streams i64 records from input trees
//! through the configured module chain into the per-worker output
//! tree.

use std::path::{Path, PathBuf};

use crate::config::{JobConfig, ModuleSpec};
use crate::tree::{TreeReader, TreeWriter};
use crate::JobError;

/// Statistics of one processed event range.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessStats {
    pub nbytes_read: u64,
}

/// What the worker runtime needs from an analysis implementation.
pub trait Controller: 'static {
    /// Prepare the dataset with the given output file. Re-starting the
    /// same dataset with the same output path is a no-op.
    fn start_dataset(&mut self, dataset_index: usize, out_path: &Path) -> Result<(), JobError>;

    /// Flush and close the current output file. A no-op when no
    /// dataset is active.
    fn close_dataset(&mut self) -> Result<(), JobError>;

    /// Fingerprint of the current dataset's input files, as this side
    /// read them from its config.
    fn dataset_fingerprint(&self) -> Result<u64, JobError>;

    /// Open input file `file_index` of the current dataset. Re-opening
    /// the current file is a no-op.
    fn start_file(&mut self, file_index: usize) -> Result<(), JobError>;

    /// Number of events in the file last opened with `start_file`.
    fn file_size(&self) -> Result<u64, JobError>;

    /// Run over `[first, last)` of the current file; `last` may exceed
    /// the file size and is truncated.
    fn process(&mut self, first: u64, last: u64) -> Result<ProcessStats, JobError>;

    /// Append `src`'s output records into `dest`.
    fn merge_output(&self, dest: &Path, src: &Path) -> Result<(), JobError>;
}

struct FileRun {
    file_index: usize,
    records: Vec<i64>,
}

struct DatasetRun {
    dataset_index: usize,
    out_path: PathBuf,
    writer: TreeWriter,
    file: Option<FileRun>,
}

/// Record-tree analysis: apply the module chain to every event.
pub struct RecordPipeline {
    config: JobConfig,
    current: Option<DatasetRun>,
}

impl RecordPipeline {
    pub fn new(config: JobConfig) -> Self {
        Self {
            config,
            current: None,
        }
    }

    fn run(&self) -> Result<&DatasetRun, JobError> {
        self.current.as_ref().ok_or(JobError::NoDataset)
    }
}

impl Controller for RecordPipeline {
    fn start_dataset(&mut self, dataset_index: usize, out_path: &Path) -> Result<(), JobError> {
        if let Some(run) = &self.current {
            if run.dataset_index == dataset_index && run.out_path == out_path {
                return Ok(());
            }
        }
        self.close_dataset()?;
        let dataset = self
            .config
            .datasets
            .get(dataset_index)
            .ok_or(JobError::NoDataset)?;
        tracing::debug!(
            dataset = %dataset.name,
            out = %out_path.display(),
            "starting dataset"
        );
        let writer = TreeWriter::create(out_path, &dataset.treename)?;
        self.current = Some(DatasetRun {
            dataset_index,
            out_path: out_path.to_path_buf(),
            writer,
            file: None,
        });
        Ok(())
    }

    fn close_dataset(&mut self) -> Result<(), JobError> {
        if let Some(run) = self.current.take() {
            tracing::debug!(out = %run.out_path.display(), records = run.writer.count(), "closing output");
            run.writer.finish()?;
        }
        Ok(())
    }

    fn dataset_fingerprint(&self) -> Result<u64, JobError> {
        let run = self.run()?;
        Ok(self.config.datasets[run.dataset_index].fingerprint)
    }

    fn start_file(&mut self, file_index: usize) -> Result<(), JobError> {
        let run = self.current.as_mut().ok_or(JobError::NoDataset)?;
        if run.file.as_ref().is_some_and(|f| f.file_index == file_index) {
            return Ok(());
        }
        let dataset = &self.config.datasets[run.dataset_index];
        let path = dataset
            .files
            .get(file_index)
            .ok_or_else(|| JobError::Config(format!("no file {file_index} in dataset")))?;
        let mut reader = TreeReader::open(path)?;
        if reader.treename() != dataset.treename {
            return Err(JobError::Tree(format!(
                "{}: tree '{}' does not match dataset tree '{}'",
                path.display(),
                reader.treename(),
                dataset.treename
            )));
        }
        let records = reader.read_all()?;
        run.file = Some(FileRun {
            file_index,
            records,
        });
        Ok(())
    }

    fn file_size(&self) -> Result<u64, JobError> {
        let run = self.run()?;
        let file = run.file.as_ref().ok_or(JobError::NoFile)?;
        Ok(file.records.len() as u64)
    }

    fn process(&mut self, first: u64, last: u64) -> Result<ProcessStats, JobError> {
        let run = self.current.as_mut().ok_or(JobError::NoDataset)?;
        let file = run.file.as_ref().ok_or(JobError::NoFile)?;
        let last = last.min(file.records.len() as u64);
        let mut stats = ProcessStats::default();
        if first >= last {
            return Ok(stats);
        }
        let slice = &file.records[first as usize..last as usize];
        let mut out = Vec::with_capacity(slice.len());
        for record in slice {
            let mut value = *record;
            for module in &self.config.modules {
                match module {
                    ModuleSpec::Offset { offset } => value = value.wrapping_add(*offset),
                }
            }
            out.push(value);
        }
        for value in out {
            run.writer.append(value)?;
        }
        stats.nbytes_read = (last - first) * 8;
        Ok(stats)
    }

    fn merge_output(&self, dest: &Path, src: &Path) -> Result<(), JobError> {
        crate::tree::merge_into(dest, src)
    }
}

#[cfg(test)]
#[path = "analysis_tests.rs"]
mod tests;
