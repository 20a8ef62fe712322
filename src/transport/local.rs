//! In-process endpoints
//!
//! Thin per-rank handles onto a shared `StagingHub`. Dropping an endpoint
//! closes it so a failed rank cannot stall the others.

use std::sync::Arc;

use bytes::Bytes;

use crate::config::DistributionMode;
use crate::error::Result;

use super::{StagingHub, StepAvailability, Timeout, Transport};

/// Reader rank handle; implements `Transport`
#[derive(Debug)]
pub struct ReaderEndpoint {
    hub: Arc<StagingHub>,
    rank: usize,
}

impl ReaderEndpoint {
    pub(crate) fn new(hub: Arc<StagingHub>, rank: usize) -> Self {
        Self { hub, rank }
    }
}

impl Transport for ReaderEndpoint {
    fn reader_rank(&self) -> usize {
        self.rank
    }

    fn reader_count(&self) -> usize {
        self.hub.config().reader_count
    }

    fn writer_count(&self) -> usize {
        self.hub.config().writer_count
    }

    fn distribution_mode(&self) -> DistributionMode {
        self.hub.config().distribution_mode
    }

    fn wait_for_step(&self, step: u64, timeout: Timeout) -> Result<StepAvailability> {
        self.hub.wait_for_step(step, timeout)
    }

    fn claim_next_step(&self, timeout: Timeout) -> Result<StepAvailability> {
        self.hub.claim_next_step(self.rank, timeout)
    }

    fn step_metadata(&self, step: u64) -> Result<Vec<Bytes>> {
        self.hub.step_metadata(step)
    }

    fn fetch(&self, writer_rank: usize, step: u64, offset: u64, len: u64) -> Result<Bytes> {
        self.hub.fetch(writer_rank, step, offset, len)
    }

    fn release_step(&self, step: u64) -> Result<()> {
        self.hub.release_step(self.rank, step)
    }

    fn close(&self) -> Result<()> {
        self.hub.close_reader(self.rank);
        Ok(())
    }
}

impl Drop for ReaderEndpoint {
    fn drop(&mut self) {
        self.hub.close_reader(self.rank);
    }
}

/// Writer rank handle
#[derive(Debug)]
pub struct WriterEndpoint {
    hub: Arc<StagingHub>,
    rank: usize,
}

impl WriterEndpoint {
    pub(crate) fn new(hub: Arc<StagingHub>, rank: usize) -> Self {
        Self { hub, rank }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn writer_count(&self) -> usize {
        self.hub.config().writer_count
    }

    /// Publish this writer's share of `step`
    ///
    /// Blocks while the hub's backlog is at its queue limit.
    pub fn publish(&self, step: u64, metadata: Vec<u8>, payload: Vec<u8>) -> Result<()> {
        self.hub
            .publish(self.rank, step, Bytes::from(metadata), Bytes::from(payload))
    }

    /// No more steps from this writer
    pub fn close(&self) {
        self.hub.close_writer(self.rank);
    }
}

impl Drop for WriterEndpoint {
    fn drop(&mut self) {
        self.hub.close_writer(self.rank);
    }
}
