//! Staging Hub
//!
//! Shared in-process state connecting writer and reader endpoints.
//!
//! ## Concurrency:
//! - All state sits behind one `parking_lot::Mutex`
//! - One `Condvar` is notified on every publish, release and close; waiters
//!   re-check their condition after each wakeup
//! - Payloads are `Bytes`, so fetches hand out slices without copying

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::{DistributionMode, HubConfig};
use crate::error::{Result, StageError};

use super::local::{ReaderEndpoint, WriterEndpoint};
use super::{StepAvailability, Timeout};

/// One writer's contribution to a step
#[derive(Debug, Clone)]
struct Contribution {
    metadata: Bytes,
    payload: Bytes,
}

#[derive(Debug)]
struct StepSlot {
    /// Indexed by writer rank
    contributions: Vec<Option<Contribution>>,

    /// OnDemand: the reader that claimed this step
    claimed_by: Option<usize>,

    /// Indexed by reader rank
    released: Vec<bool>,
}

impl StepSlot {
    fn new(writer_count: usize, reader_count: usize) -> Self {
        Self {
            contributions: vec![None; writer_count],
            claimed_by: None,
            released: vec![false; reader_count],
        }
    }

    fn is_complete(&self) -> bool {
        self.contributions.iter().all(Option::is_some)
    }
}

#[derive(Debug)]
struct HubState {
    /// Steps still held, complete or not
    steps: BTreeMap<u64, StepSlot>,

    /// Steps `0..published` are complete
    published: u64,

    /// Next step each writer will publish
    writer_next: Vec<u64>,
    writer_closed: Vec<bool>,

    reader_connected: Vec<bool>,
    reader_closed: Vec<bool>,

    /// OnDemand: complete steps nobody has claimed, oldest first
    unclaimed: VecDeque<u64>,
}

impl HubState {
    fn end_of_stream(&self) -> bool {
        self.writer_closed.iter().all(|&c| c)
    }

    fn all_readers_closed(&self) -> bool {
        self.reader_closed.iter().all(|&c| c)
    }

    /// Complete steps not yet reclaimed
    fn backlog(&self) -> usize {
        self.steps.range(..self.published).count()
    }
}

/// In-process transport substrate shared by all writers and readers of one stream
#[derive(Debug)]
pub struct StagingHub {
    config: HubConfig,
    state: Mutex<HubState>,
    changed: Condvar,
}

impl StagingHub {
    /// Create a hub for a fixed set of writer and reader ranks
    pub fn new(config: HubConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let state = HubState {
            steps: BTreeMap::new(),
            published: 0,
            writer_next: vec![0; config.writer_count],
            writer_closed: vec![false; config.writer_count],
            reader_connected: vec![false; config.reader_count],
            reader_closed: vec![false; config.reader_count],
            unclaimed: VecDeque::new(),
        };
        tracing::debug!(
            "Staging hub created: {} writers, {} readers, mode {}",
            config.writer_count,
            config.reader_count,
            config.distribution_mode
        );
        Ok(Arc::new(Self {
            config,
            state: Mutex::new(state),
            changed: Condvar::new(),
        }))
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Endpoint for writer `rank`
    pub fn writer(self: &Arc<Self>, rank: usize) -> Result<WriterEndpoint> {
        if rank >= self.config.writer_count {
            return Err(StageError::Transport(format!(
                "Writer rank {} out of range (writer_count {})",
                rank, self.config.writer_count
            )));
        }
        Ok(WriterEndpoint::new(Arc::clone(self), rank))
    }

    /// Endpoint for reader `rank`; each rank connects once
    pub fn reader(self: &Arc<Self>, rank: usize) -> Result<ReaderEndpoint> {
        if rank >= self.config.reader_count {
            return Err(StageError::Transport(format!(
                "Reader rank {} out of range (reader_count {})",
                rank, self.config.reader_count
            )));
        }
        let mut state = self.state.lock();
        if state.reader_connected[rank] {
            return Err(StageError::Transport(format!(
                "Reader rank {} is already connected",
                rank
            )));
        }
        state.reader_connected[rank] = true;
        Ok(ReaderEndpoint::new(Arc::clone(self), rank))
    }

    /// Number of complete steps still held by the hub
    pub fn backlog(&self) -> usize {
        self.state.lock().backlog()
    }

    /// Number of fully published steps so far
    pub fn published_steps(&self) -> u64 {
        self.state.lock().published
    }

    // =========================================================================
    // Writer side
    // =========================================================================

    pub(crate) fn publish(
        &self,
        writer_rank: usize,
        step: u64,
        metadata: Bytes,
        payload: Bytes,
    ) -> Result<()> {
        let mut state = self.state.lock();

        if state.writer_closed[writer_rank] {
            return Err(StageError::Transport(format!(
                "Writer {} publishing after close",
                writer_rank
            )));
        }
        if state.writer_next[writer_rank] != step {
            return Err(StageError::Transport(format!(
                "Writer {} published step {} but its next step is {}",
                writer_rank, step, state.writer_next[writer_rank]
            )));
        }

        // Backpressure: hold the writer while the backlog is full and
        // someone is still around to drain it.
        if let Some(limit) = self.config.queue_limit {
            while state.backlog() >= limit && !state.all_readers_closed() {
                tracing::trace!("Writer {} blocked: backlog {} >= {}", writer_rank, state.backlog(), limit);
                self.changed.wait(&mut state);
            }
        }

        let (writers, readers) = (self.config.writer_count, self.config.reader_count);
        let slot = state
            .steps
            .entry(step)
            .or_insert_with(|| StepSlot::new(writers, readers));
        slot.contributions[writer_rank] = Some(Contribution { metadata, payload });
        state.writer_next[writer_rank] = step + 1;

        self.advance_published(&mut state);
        self.changed.notify_all();
        Ok(())
    }

    pub(crate) fn close_writer(&self, writer_rank: usize) {
        let mut state = self.state.lock();
        if !state.writer_closed[writer_rank] {
            state.writer_closed[writer_rank] = true;
            tracing::debug!("Writer {} closed", writer_rank);
            self.changed.notify_all();
        }
    }

    /// Move the published watermark past every newly completed step
    fn advance_published(&self, state: &mut HubState) {
        loop {
            let next = state.published;
            let complete = state.steps.get(&next).map_or(false, StepSlot::is_complete);
            if !complete {
                break;
            }
            state.published += 1;
            if self.config.distribution_mode == DistributionMode::OnDemand {
                state.unclaimed.push_back(next);
            }
            tracing::trace!("Step {} fully published", next);
        }
    }

    // =========================================================================
    // Reader side
    // =========================================================================

    /// Sleep until notified or the deadline passes; true if the deadline passed
    fn wait(&self, state: &mut MutexGuard<'_, HubState>, deadline: Option<Instant>) -> bool {
        match deadline {
            None => {
                self.changed.wait(state);
                false
            }
            Some(deadline) => {
                if Instant::now() >= deadline {
                    return true;
                }
                self.changed.wait_until(state, deadline).timed_out()
            }
        }
    }

    pub(crate) fn wait_for_step(&self, step: u64, timeout: Timeout) -> Result<StepAvailability> {
        let deadline = timeout.deadline();
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = Self::step_outcome(&state, step)? {
                return Ok(outcome);
            }
            if self.wait(&mut state, deadline) {
                return Ok(Self::step_outcome(&state, step)?.unwrap_or(StepAvailability::NotReady));
            }
        }
    }

    fn step_outcome(state: &HubState, step: u64) -> Result<Option<StepAvailability>> {
        if step < state.published {
            if !state.steps.contains_key(&step) {
                return Err(StageError::Transport(format!(
                    "Step {} was already released by its consumers",
                    step
                )));
            }
            return Ok(Some(StepAvailability::Ready(step)));
        }
        if state.end_of_stream() {
            return Ok(Some(StepAvailability::EndOfStream));
        }
        Ok(None)
    }

    pub(crate) fn claim_next_step(&self, reader_rank: usize, timeout: Timeout) -> Result<StepAvailability> {
        let deadline = timeout.deadline();
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = Self::claim_outcome(&mut state, reader_rank) {
                return Ok(outcome);
            }
            if self.wait(&mut state, deadline) {
                return Ok(Self::claim_outcome(&mut state, reader_rank).unwrap_or(StepAvailability::NotReady));
            }
        }
    }

    fn claim_outcome(state: &mut HubState, reader_rank: usize) -> Option<StepAvailability> {
        if let Some(step) = state.unclaimed.pop_front() {
            if let Some(slot) = state.steps.get_mut(&step) {
                slot.claimed_by = Some(reader_rank);
            }
            tracing::trace!("Reader {} claimed step {}", reader_rank, step);
            return Some(StepAvailability::Ready(step));
        }
        if state.end_of_stream() {
            return Some(StepAvailability::EndOfStream);
        }
        None
    }

    pub(crate) fn step_metadata(&self, step: u64) -> Result<Vec<Bytes>> {
        let state = self.state.lock();
        let slot = Self::complete_slot(&state, step)?;
        Ok(slot
            .contributions
            .iter()
            .flatten()
            .map(|c| c.metadata.clone())
            .collect())
    }

    pub(crate) fn fetch(&self, writer_rank: usize, step: u64, offset: u64, len: u64) -> Result<Bytes> {
        let state = self.state.lock();
        let slot = Self::complete_slot(&state, step)?;
        let contribution = slot
            .contributions
            .get(writer_rank)
            .and_then(Option::as_ref)
            .ok_or_else(|| {
                StageError::Transport(format!("No writer {} contribution for step {}", writer_rank, step))
            })?;

        let end = offset
            .checked_add(len)
            .filter(|&end| end <= contribution.payload.len() as u64)
            .ok_or_else(|| {
                StageError::Transport(format!(
                    "Fetch of {}..+{} exceeds writer {} payload of {} bytes at step {}",
                    offset,
                    len,
                    writer_rank,
                    contribution.payload.len(),
                    step
                ))
            })?;
        Ok(contribution.payload.slice(offset as usize..end as usize))
    }

    fn complete_slot(state: &HubState, step: u64) -> Result<&StepSlot> {
        if step >= state.published {
            return Err(StageError::Transport(format!("Step {} is not published", step)));
        }
        state
            .steps
            .get(&step)
            .ok_or_else(|| StageError::Transport(format!("Step {} was already released", step)))
    }

    pub(crate) fn release_step(&self, reader_rank: usize, step: u64) -> Result<()> {
        let mut state = self.state.lock();
        let slot = state
            .steps
            .get_mut(&step)
            .ok_or_else(|| StageError::Transport(format!("Release of unknown step {}", step)))?;
        slot.released[reader_rank] = true;
        self.collect(&mut state);
        self.changed.notify_all();
        Ok(())
    }

    pub(crate) fn close_reader(&self, reader_rank: usize) {
        let mut state = self.state.lock();
        if state.reader_closed[reader_rank] {
            return;
        }
        state.reader_closed[reader_rank] = true;
        tracing::debug!("Reader {} closed", reader_rank);
        self.collect(&mut state);
        self.changed.notify_all();
    }

    /// Drop every complete step whose consumers are all done with it
    fn collect(&self, state: &mut HubState) {
        let mode = self.config.distribution_mode;
        let readers = self.config.reader_count as u64;
        let closed = state.reader_closed.clone();
        let done = |r: usize, slot: &StepSlot| slot.released[r] || closed[r];

        let published = state.published;
        state.steps.retain(|&step, slot| {
            if step >= published {
                return true;
            }
            let collectible = match mode {
                DistributionMode::Default => (0..closed.len()).all(|r| done(r, slot)),
                DistributionMode::RoundRobin => done((step % readers) as usize, slot),
                DistributionMode::OnDemand => slot.claimed_by.map_or(false, |r| done(r, slot)),
            };
            !collectible
        });
    }
}
