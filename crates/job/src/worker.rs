// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The worker: answers the master's requests by driving a
//! [`Controller`].
//!
//! `Configure` loads the same config file the master read and builds
//! the controller; `Process` runs one event range and reports the
//! file's true size; `Close` finalises the per-worker output; `Merge`
//! folds another worker's file into this worker's designated survivor.
//! Every `Process` carries the master's input fingerprint, which must
//! match this side's; a mismatch means the two processes read
//! different configs, and the worker refuses to continue.

use std::path::Path;
use std::rc::Rc;

use fw_swarm::{SwarmError, WorkerHandler, WorkerManager};
use fw_wire::Channel;

use crate::analysis::{Controller, RecordPipeline};
use crate::config::JobConfig;
use crate::messages::Message;
use crate::stategraph::job_graph;
use crate::JobError;

/// Builds the analysis controller when `Configure` arrives.
pub type ControllerFactory = fn(JobConfig) -> Result<Box<dyn Controller>, JobError>;

fn record_pipeline_factory(config: JobConfig) -> Result<Box<dyn Controller>, JobError> {
    Ok(Box::new(RecordPipeline::new(config)))
}

pub struct WorkerRuntime {
    factory: ControllerFactory,
    config: Option<JobConfig>,
    controller: Option<Box<dyn Controller>>,
    worker_index: u32,
}

impl WorkerRuntime {
    fn new(factory: ControllerFactory) -> Self {
        Self {
            factory,
            config: None,
            controller: None,
            worker_index: 0,
        }
    }

    fn configure(&mut self, config_path: &str, worker_index: u32) -> Result<(), JobError> {
        tracing::info!(worker_index, config = config_path, "configuring worker");
        let config = JobConfig::load(Path::new(config_path))?;
        self.controller = Some((self.factory)(config.clone())?);
        self.config = Some(config);
        self.worker_index = worker_index;
        Ok(())
    }

    fn process(
        &mut self,
        dataset_index: usize,
        file_index: usize,
        files_fingerprint: u64,
        first: u64,
        last: u64,
    ) -> Result<Message, JobError> {
        let config = self.config.as_ref().ok_or(JobError::NotConfigured)?;
        let controller = self.controller.as_mut().ok_or(JobError::NotConfigured)?;
        if dataset_index >= config.datasets.len() {
            return Err(JobError::Config(format!(
                "no dataset {dataset_index} in '{}'",
                config.path.display()
            )));
        }
        let out_path = config.unmerged_path(dataset_index, self.worker_index);
        controller.start_dataset(dataset_index, &out_path)?;
        let local = controller.dataset_fingerprint()?;
        if local != files_fingerprint {
            let dataset = &config.datasets[dataset_index];
            let master_hex = format!("{files_fingerprint:#018x}");
            let worker_hex = format!("{local:#018x}");
            tracing::error!(
                master = %master_hex,
                worker = %worker_hex,
                "input fingerprints do not agree; listing this side's files"
            );
            for file in &dataset.files {
                tracing::error!(file = %file.display());
            }
            return Err(JobError::FingerprintMismatch {
                master: files_fingerprint,
                worker: local,
            });
        }
        controller.start_file(file_index)?;
        let stats = controller.process(first, last)?;
        Ok(Message::ProcessResponse {
            file_nevents: controller.file_size()?,
            nbytes_read: stats.nbytes_read,
            real_seconds: 0.0,
            cpu_seconds: 0.0,
        })
    }

    fn close(&mut self) -> Result<(), JobError> {
        let controller = self.controller.as_mut().ok_or(JobError::NotConfigured)?;
        tracing::info!("closing output file of current dataset");
        controller.close_dataset()
    }

    fn merge(
        &mut self,
        dataset_index: usize,
        worker_a: u32,
        worker_b: u32,
    ) -> Result<(), JobError> {
        let config = self.config.as_ref().ok_or(JobError::NotConfigured)?;
        let controller = self.controller.as_ref().ok_or(JobError::NotConfigured)?;
        tracing::info!(worker_a, worker_b, "merging worker outputs");
        let dest = config.unmerged_path(dataset_index, worker_a);
        let src = config.unmerged_path(dataset_index, worker_b);
        controller.merge_output(&dest, &src)?;
        if !config.options.keep_unmerged {
            if let Err(e) = std::fs::remove_file(&src) {
                tracing::warn!(file = %src.display(), error = %e, "could not remove merged file");
            }
        }
        Ok(())
    }

    fn answer(&mut self, msg: Message) -> Result<Option<Message>, JobError> {
        match msg {
            Message::Configure {
                config_path,
                worker_index,
            } => {
                self.configure(&config_path, worker_index)?;
                Ok(None)
            }
            Message::Process {
                dataset_index,
                file_index,
                files_fingerprint,
                first,
                last,
            } => Ok(Some(self.process(
                dataset_index as usize,
                file_index as usize,
                files_fingerprint,
                first,
                last,
            )?)),
            Message::Close { .. } => {
                self.close()?;
                Ok(None)
            }
            Message::Merge {
                dataset_index,
                worker_a,
                worker_b,
            } => {
                self.merge(dataset_index as usize, worker_a, worker_b)?;
                Ok(Some(Message::Merge {
                    dataset_index,
                    worker_a,
                    worker_b,
                }))
            }
            Message::Stop => {
                tracing::info!("stop");
                Ok(None)
            }
            other => Err(JobError::Config(format!(
                "request '{}' makes no sense on a worker",
                fw_wire::Payload::kind(&other)
            ))),
        }
    }
}

impl WorkerHandler for WorkerRuntime {
    type Message = Message;

    fn handle(&mut self, msg: Message) -> Result<Option<Message>, SwarmError> {
        Ok(self.answer(msg)?)
    }
}

/// One worker process: the manager plus its runtime.
pub struct Worker {
    manager: WorkerManager<WorkerRuntime>,
}

impl Worker {
    pub fn new() -> Result<Self, JobError> {
        Self::with_factory(record_pipeline_factory)
    }

    pub fn with_factory(factory: ControllerFactory) -> Result<Self, JobError> {
        let graph = Rc::new(job_graph()?);
        let manager = WorkerManager::new(graph, WorkerRuntime::new(factory))?;
        Ok(Self { manager })
    }

    /// Adopt the channel to the master and start serving.
    pub fn setup(&self, channel: Channel<Message>) -> Result<(), JobError> {
        Ok(self.manager.start(channel)?)
    }

    pub fn stopped_successfully(&self) -> bool {
        self.manager.stopped_successfully()
    }
}
