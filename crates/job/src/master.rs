// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The master: per-dataset lifecycle and the swarm driver behind it.
//!
//! For each dataset the coordinator hands out event ranges, collects
//! per-range statistics, has every worker close its output, merges the
//! per-worker files (on the workers, pairwise, or on the master,
//! depending on `mergemode`), renames the surviving file into the final
//! artifact and moves on to the next dataset. Once all datasets are
//! done it drives every worker to `stop` and hangs up.
//!
//! Failure policy: a worker lost while processing only costs time (its
//! ranges go back into the pool); a worker lost while closing an open
//! output or while merging takes the dataset down.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use fw_swarm::{
    Kind, RestrictionSetId, StateGraph, StateId, SwarmCtx, SwarmDriver, SwarmError, SwarmManager,
    SwarmObserver, WorkerId,
};
use fw_wire::Channel;

use crate::config::{JobConfig, MergeMode};
use crate::messages::{kind, Message};
use crate::ranges::{EventRange, EventRangeManager, RangeError};
use crate::stategraph::{job_graph, RS_NOMERGE, RS_NOPROCESS};
use crate::{tree, JobError};

/// Master-level notifications, on top of the swarm's.
pub trait MasterObserver: SwarmObserver {
    fn on_dataset_start(&mut self, _name: &str, _nfiles: usize) {}
    fn on_stop_complete(&mut self) {}
}

pub(crate) struct Coordinator {
    config: JobConfig,
    s_process: StateId,
    s_close: StateId,
    s_merge: StateId,
    s_stop: StateId,
    pub(crate) r_noprocess: RestrictionSetId,
    pub(crate) r_nomerge: RestrictionSetId,
    /// Current dataset, `None` before start and after the last one.
    dataset: Option<usize>,
    erm: Option<EventRangeManager>,
    /// Ranges each live worker has been handed in this dataset; used to
    /// re-queue the work of a failed worker.
    worker_ranges: BTreeMap<WorkerId, Vec<EventRange>>,
    /// Only workers that processed something; true once their output
    /// file is closed.
    closed: BTreeMap<WorkerId, bool>,
    /// Closed workers whose file still awaits merging.
    needs_merging: BTreeMap<WorkerId, bool>,
    nbytes_read: u64,
    pub(crate) stopping: bool,
    failed: bool,
    completed: bool,
    pub(crate) observers: Vec<Rc<RefCell<dyn MasterObserver>>>,
}

impl Coordinator {
    fn new(config: JobConfig, graph: &StateGraph) -> Result<Self, JobError> {
        Ok(Self {
            config,
            s_process: graph.state("process")?,
            s_close: graph.state("close")?,
            s_merge: graph.state("merge")?,
            s_stop: graph.state("stop")?,
            r_noprocess: graph.restriction_set(RS_NOPROCESS)?,
            r_nomerge: graph.restriction_set(RS_NOMERGE)?,
            dataset: None,
            erm: None,
            worker_ranges: BTreeMap::new(),
            closed: BTreeMap::new(),
            needs_merging: BTreeMap::new(),
            nbytes_read: 0,
            stopping: false,
            failed: false,
            completed: false,
            observers: Vec::new(),
        })
    }

    pub(crate) fn stop_state(&self) -> StateId {
        self.s_stop
    }

    /// Tear down per-dataset state and start dataset `index`; past the
    /// last dataset, mark the job complete and drive everyone to stop.
    pub(crate) fn init_dataset(
        &mut self,
        ctx: &mut SwarmCtx<'_, Message>,
        index: usize,
    ) -> Result<(), JobError> {
        self.worker_ranges.clear();
        self.closed.clear();
        self.needs_merging.clear();
        self.nbytes_read = 0;
        if index >= self.config.datasets.len() {
            self.erm = None;
            self.dataset = None;
            self.completed = true;
            ctx.activate_restriction_set(self.r_noprocess);
            self.stopping = true;
            ctx.set_target_state(self.s_stop);
            tracing::info!("all datasets processed; stopping workers");
        } else {
            self.dataset = Some(index);
            let dataset = &self.config.datasets[index];
            tracing::info!(
                dataset = %dataset.name,
                nfiles = dataset.files.len(),
                "start processing dataset"
            );
            self.erm = Some(EventRangeManager::new(
                dataset.files.len(),
                self.config.options.blocksize,
            )?);
            for observer in self.observers.clone() {
                observer
                    .borrow_mut()
                    .on_dataset_start(&dataset.name, dataset.files.len());
            }
            ctx.deactivate_restriction_set(self.r_noprocess);
            ctx.set_target_state(self.s_process);
        }
        Ok(())
    }

    fn generate_configure(&self, worker: WorkerId) -> Message {
        Message::Configure {
            config_path: self.config.path.to_string_lossy().into_owned(),
            worker_index: worker.id(),
        }
    }

    fn generate_process(
        &mut self,
        ctx: &mut SwarmCtx<'_, Message>,
        worker: WorkerId,
    ) -> Result<Option<Message>, JobError> {
        let Some(dataset) = self.dataset else {
            return Ok(None);
        };
        let Some(erm) = self.erm.as_mut() else {
            return Ok(None);
        };
        // First-touch heuristic: keep a worker on its last file so it
        // re-reads as little as possible.
        let preferred = self
            .worker_ranges
            .get(&worker)
            .and_then(|ranges| ranges.last())
            .map(|er| er.file_index);
        let range = match erm.consume(preferred, None) {
            Ok(range) => range,
            Err(RangeError::NothingAvailable) => {
                ctx.activate_restriction_set(self.r_noprocess);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if !erm.available() {
            ctx.activate_restriction_set(self.r_noprocess);
        }
        self.worker_ranges.entry(worker).or_default().push(range);
        self.closed.insert(worker, false);
        tracing::debug!(
            %worker,
            file = range.file_index,
            first = range.first,
            last = range.last,
            "handing out range"
        );
        Ok(Some(Message::Process {
            dataset_index: dataset as u32,
            file_index: range.file_index as u32,
            files_fingerprint: self.config.datasets[dataset].fingerprint,
            first: range.first,
            last: range.last,
        }))
    }

    fn generate_close(&self) -> Result<Option<Message>, JobError> {
        let dataset = self.dataset.ok_or(JobError::NoDataset)?;
        Ok(Some(Message::Close {
            dataset_index: dataset as u32,
            files_fingerprint: self.config.datasets[dataset].fingerprint,
        }))
    }

    /// Pick two unmerged workers; one will fold the other's file into
    /// its own.
    fn generate_merge(
        &mut self,
        ctx: &mut SwarmCtx<'_, Message>,
        worker: WorkerId,
    ) -> Result<Option<Message>, JobError> {
        let dataset = self.dataset.ok_or(JobError::NoDataset)?;
        let pair: Vec<WorkerId> = self
            .needs_merging
            .iter()
            .filter(|(_, unmerged)| **unmerged)
            .map(|(w, _)| *w)
            .take(2)
            .collect();
        if pair.len() < 2 {
            ctx.activate_restriction_set(self.r_nomerge);
            return Ok(None);
        }
        self.needs_merging.insert(pair[0], false);
        self.needs_merging.insert(pair[1], false);
        if self.n_unmerged() < 2 {
            ctx.activate_restriction_set(self.r_nomerge);
        }
        tracing::debug!(
            %worker,
            survivor = %pair[0],
            merged = %pair[1],
            "handing out merge"
        );
        Ok(Some(Message::Merge {
            dataset_index: dataset as u32,
            worker_a: pair[0].id(),
            worker_b: pair[1].id(),
        }))
    }

    fn process_complete(
        &mut self,
        ctx: &mut SwarmCtx<'_, Message>,
        worker: WorkerId,
        response: Option<Message>,
    ) -> Result<(), JobError> {
        if self.stopping {
            return Ok(());
        }
        let Some(Message::ProcessResponse {
            file_nevents,
            nbytes_read,
            ..
        }) = response
        else {
            return Err(JobError::Config("process response missing".to_string()));
        };
        self.nbytes_read += nbytes_read;
        let last_range = self
            .worker_ranges
            .get(&worker)
            .and_then(|ranges| ranges.last().copied())
            .ok_or_else(|| JobError::Config(format!("no range on record for worker {worker}")))?;
        let erm = self.erm.as_mut().ok_or(JobError::NoDataset)?;
        erm.set_file_size(last_range.file_index, file_nevents)?;
        if erm.available() {
            ctx.deactivate_restriction_set(self.r_noprocess);
        } else if ctx.all_idle() {
            // Waiting for every worker to go idle before closing keeps
            // recovery simple: a failure here re-queues work while all
            // outputs are still open.
            let dataset = self.dataset.ok_or(JobError::NoDataset)?;
            tracing::info!(
                dataset = %self.config.datasets[dataset].name,
                "processing complete; closing all output files"
            );
            ctx.set_target_state(self.s_close);
        }
        Ok(())
    }

    fn close_complete(
        &mut self,
        ctx: &mut SwarmCtx<'_, Message>,
        worker: WorkerId,
    ) -> Result<(), JobError> {
        if self.stopping {
            return Ok(());
        }
        self.closed.insert(worker, true);
        self.needs_merging.insert(worker, true);
        if !self.closed.values().all(|closed| *closed) {
            return Ok(());
        }
        let dataset = self.dataset.ok_or(JobError::NoDataset)?;
        tracing::info!(
            dataset = %self.config.datasets[dataset].name,
            outputs = self.needs_merging.len(),
            "closing complete; merging output files"
        );
        if self.n_unmerged() == 1 {
            return self.finalize_dataset(ctx, worker);
        }
        match self.config.options.mergemode {
            MergeMode::Master => {
                let unmerged: Vec<WorkerId> = self.needs_merging.keys().copied().collect();
                let dest = self.config.unmerged_path(dataset, unmerged[0].id());
                for other in &unmerged[1..] {
                    let src = self.config.unmerged_path(dataset, other.id());
                    tree::merge_into(&dest, &src)?;
                    if !self.config.options.keep_unmerged {
                        if let Err(e) = std::fs::remove_file(&src) {
                            tracing::warn!(file = %src.display(), error = %e, "could not remove merged file");
                        }
                    }
                }
                self.finalize_dataset(ctx, unmerged[0])
            }
            MergeMode::Workers => {
                ctx.deactivate_restriction_set(self.r_nomerge);
                ctx.set_target_state(self.s_merge);
                Ok(())
            }
            MergeMode::Nomerge => {
                tracing::info!("mergemode=nomerge: leaving per-worker outputs in place");
                self.init_dataset(ctx, dataset + 1)
            }
        }
    }

    fn merge_complete(
        &mut self,
        ctx: &mut SwarmCtx<'_, Message>,
        response: Option<Message>,
    ) -> Result<(), JobError> {
        if self.stopping {
            return Ok(());
        }
        let Some(Message::Merge { worker_a, .. }) = response else {
            return Err(JobError::Config("merge response missing".to_string()));
        };
        // The survivor's file now also holds the merged-away worker's
        // records and needs merging again.
        let survivor = WorkerId(worker_a);
        self.needs_merging.insert(survivor, true);
        if self.n_unmerged() >= 2 {
            ctx.deactivate_restriction_set(self.r_nomerge);
            return Ok(());
        }
        // One file left: merging is done once every peer sitting in
        // close or merge is idle. Peers in other states (say a late
        // joiner still configuring) do not count.
        let merging_done = ctx.workers().iter().all(|w| match ctx.worker_state(*w) {
            Some((state, busy)) if state == self.s_close || state == self.s_merge => !busy,
            _ => true,
        });
        if merging_done {
            let dataset = self.dataset.ok_or(JobError::NoDataset)?;
            tracing::info!(
                dataset = %self.config.datasets[dataset].name,
                "merge complete; moving on"
            );
            self.finalize_dataset(ctx, survivor)?;
        }
        Ok(())
    }

    fn stop_complete(
        &mut self,
        ctx: &mut SwarmCtx<'_, Message>,
        worker: WorkerId,
    ) -> Result<(), JobError> {
        tracing::debug!(%worker, "stop complete");
        if !self.stopping {
            return Ok(());
        }
        if ctx.all_idle() {
            for observer in self.observers.clone() {
                observer.borrow_mut().on_stop_complete();
            }
            // Hang up; both sides' reactors drain to their ground state.
            ctx.abort();
        }
        Ok(())
    }

    /// Rename the survivor's file into the final per-dataset artifact
    /// and move on to the next dataset.
    fn finalize_dataset(
        &mut self,
        ctx: &mut SwarmCtx<'_, Message>,
        survivor: WorkerId,
    ) -> Result<(), JobError> {
        let dataset = self.dataset.ok_or(JobError::NoDataset)?;
        let unmerged = self.config.unmerged_path(dataset, survivor.id());
        let merged = self.config.merged_path(dataset);
        std::fs::rename(&unmerged, &merged).map_err(|e| {
            JobError::Config(format!(
                "renaming '{}' to '{}': {e}",
                unmerged.display(),
                merged.display()
            ))
        })?;
        tracing::info!(artifact = %merged.display(), "dataset complete");
        self.init_dataset(ctx, dataset + 1)
    }

    fn n_unmerged(&self) -> usize {
        self.needs_merging
            .values()
            .filter(|unmerged| **unmerged)
            .count()
    }
}

impl SwarmDriver for Coordinator {
    type Message = Message;

    fn generate(
        &mut self,
        ctx: &mut SwarmCtx<'_, Message>,
        worker: WorkerId,
        _from: StateId,
        request: Kind,
    ) -> Result<Option<Message>, SwarmError> {
        let msg = match request {
            kind::CONFIGURE => Some(self.generate_configure(worker)),
            kind::PROCESS => self.generate_process(ctx, worker)?,
            kind::CLOSE => self.generate_close()?,
            kind::MERGE => self.generate_merge(ctx, worker)?,
            kind::STOP => Some(Message::Stop),
            other => {
                return Err(SwarmError::Handler(format!(
                    "no generator for request kind '{other}'"
                )))
            }
        };
        Ok(msg)
    }

    fn on_response(
        &mut self,
        ctx: &mut SwarmCtx<'_, Message>,
        worker: WorkerId,
        entered: StateId,
        response: Option<Message>,
    ) -> Result<(), SwarmError> {
        if entered == self.s_process {
            self.process_complete(ctx, worker, response)?;
        } else if entered == self.s_close {
            self.close_complete(ctx, worker)?;
        } else if entered == self.s_merge {
            self.merge_complete(ctx, response)?;
        } else if entered == self.s_stop {
            self.stop_complete(ctx, worker)?;
        }
        Ok(())
    }

    fn worker_failed(
        &mut self,
        ctx: &mut SwarmCtx<'_, Message>,
        worker: WorkerId,
        last_state: StateId,
    ) {
        if last_state == self.s_merge {
            tracing::error!(%worker, "worker failed while merging; this is not recoverable");
            self.failed = true;
            ctx.abort();
        } else if last_state == self.s_close {
            if self.closed.get(&worker).copied().unwrap_or(false) {
                // Output already on disk and still mergeable.
                tracing::warn!(%worker, "worker failed while idling in close state; ignoring");
            } else {
                tracing::error!(%worker, "worker failed while closing; this is not recoverable");
                self.failed = true;
                ctx.abort();
            }
        } else if last_state == self.s_process {
            let ranges = self.worker_ranges.remove(&worker).unwrap_or_default();
            if let Some(erm) = self.erm.as_mut() {
                let before = erm.nevents_left();
                for range in &ranges {
                    if let Err(e) = erm.add(*range) {
                        tracing::error!(%worker, error = %e, "could not re-queue range of failed worker");
                        self.failed = true;
                        ctx.abort();
                        return;
                    }
                }
                tracing::info!(
                    %worker,
                    events = erm.nevents_left() - before,
                    "re-queued events of failed worker"
                );
            }
            self.closed.remove(&worker);
            // There is work again.
            ctx.deactivate_restriction_set(self.r_noprocess);
        }
        // start, configure, stop: nothing is lost.
    }
}

/// Handle on the master. Cheap to clone; all clones share the same
/// coordinator and swarm.
#[derive(Clone)]
pub struct Master {
    swarm: Rc<SwarmManager<Coordinator>>,
}

impl Master {
    pub fn new(config: JobConfig) -> Result<Self, JobError> {
        let graph = Rc::new(job_graph()?);
        let coordinator = Coordinator::new(config, &graph)?;
        let swarm = SwarmManager::new(graph, coordinator)?;
        Ok(Self {
            swarm: Rc::new(swarm),
        })
    }

    /// Start handing out work. Call once, before or after the first
    /// workers connect.
    pub fn start(&self) -> Result<(), JobError> {
        self.swarm.drive(|coordinator, ctx| {
            // No unmerged outputs exist yet.
            ctx.activate_restriction_set(coordinator.r_nomerge);
            coordinator.init_dataset(ctx, 0)
        })?
    }

    /// Adopt a connected worker channel.
    pub fn add_worker(&self, channel: Channel<Message>) -> Result<WorkerId, JobError> {
        Ok(self.swarm.add_worker(channel)?)
    }

    /// Register an observer for both master- and swarm-level events.
    pub fn add_observer<T: MasterObserver + 'static>(&self, observer: Rc<RefCell<T>>) {
        let for_driver = Rc::clone(&observer);
        self.swarm
            .with_driver(move |coordinator| coordinator.observers.push(for_driver));
        self.swarm.add_observer(observer);
    }

    /// Send every worker a `Stop` as soon as its state allows, letting
    /// it close its (unmerged) output cleanly.
    pub fn stop(&self) -> Result<(), JobError> {
        Ok(self.swarm.drive(|coordinator, ctx| {
            coordinator.stopping = true;
            ctx.set_target_state(coordinator.stop_state());
        })?)
    }

    /// Stop immediately without further message traffic.
    pub fn abort(&self) {
        tracing::warn!("aborting master");
        self.swarm.with_driver(|coordinator| coordinator.failed = true);
        self.swarm.close_all();
    }

    pub fn failed(&self) -> bool {
        self.swarm.with_driver(|c| c.failed)
    }

    pub fn completed(&self) -> bool {
        self.swarm.with_driver(|c| c.completed)
    }

    pub fn stopped(&self) -> bool {
        self.swarm.with_driver(|c| c.stopping)
    }

    pub fn nevents_left(&self) -> u64 {
        self.swarm
            .with_driver(|c| c.erm.as_ref().map(EventRangeManager::nevents_left))
            .unwrap_or(0)
    }

    pub fn nevents_total(&self) -> i64 {
        self.swarm
            .with_driver(|c| c.erm.as_ref().map(EventRangeManager::nevents_total))
            .unwrap_or(0)
    }

    pub fn nfiles_done(&self) -> usize {
        self.swarm
            .with_driver(|c| c.erm.as_ref().map(EventRangeManager::nfiles_done))
            .unwrap_or(0)
    }

    pub fn nfiles_total(&self) -> usize {
        self.swarm
            .with_driver(|c| c.erm.as_ref().map(EventRangeManager::nfiles_total))
            .unwrap_or(0)
    }

    /// Bytes read by all workers in the current dataset, as reported in
    /// their process responses.
    pub fn nbytes_read(&self) -> u64 {
        self.swarm.with_driver(|c| c.nbytes_read)
    }

    pub fn graph(&self) -> Rc<StateGraph> {
        self.swarm.graph()
    }
}

/// Logs dataset progress and keeps per-state worker counts.
pub struct ProgressReporter {
    graph: Rc<StateGraph>,
    nworkers: BTreeMap<StateId, usize>,
}

impl ProgressReporter {
    pub fn new(graph: Rc<StateGraph>) -> Self {
        Self {
            graph,
            nworkers: BTreeMap::new(),
        }
    }

    fn counts(&self) -> String {
        let mut out = String::new();
        for (state, n) in &self.nworkers {
            if *n == 0 {
                continue;
            }
            if !out.is_empty() {
                out.push_str(", ");
            }
            out.push_str(&format!("{} {}", n, self.graph.name(*state)));
        }
        out
    }
}

impl SwarmObserver for ProgressReporter {
    fn on_state_transition(&mut self, worker: WorkerId, from: Option<StateId>, to: StateId) {
        if let Some(from) = from {
            if let Some(n) = self.nworkers.get_mut(&from) {
                *n = n.saturating_sub(1);
            }
        }
        *self.nworkers.entry(to).or_insert(0) += 1;
        tracing::debug!(
            %worker,
            to = self.graph.name(to),
            workers = %self.counts(),
            "worker state changed"
        );
    }
}

impl MasterObserver for ProgressReporter {
    fn on_dataset_start(&mut self, name: &str, nfiles: usize) {
        tracing::info!(dataset = name, nfiles, "dataset started");
    }

    fn on_stop_complete(&mut self) {
        tracing::info!("all workers stopped");
    }
}

#[cfg(test)]
#[path = "master_tests.rs"]
mod tests;
