//! Transport Module
//!
//! The contract the engine needs from the communication substrate, plus an
//! in-process implementation used by tests, benches and the demo binary.
//!
//! ## Contract
//! - rank identity and group sizes
//! - a pollable/blocking "is step N published" query
//! - an on-demand step claim (first come, first served across readers)
//! - point-to-point fetch of a byte range of a writer's step payload
//! - step release so the producer side can reclaim memory

mod hub;
mod local;

use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::config::DistributionMode;
use crate::error::Result;

pub use hub::StagingHub;
pub use local::{ReaderEndpoint, WriterEndpoint};

/// How long a blocking transport call may wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Check once and return
    Poll,

    /// Wait at most this long
    After(Duration),

    /// Wait until the condition resolves
    Forever,
}

impl Timeout {
    /// Zero polls, negative waits forever, positive waits that many seconds
    ///
    /// Positive values too large for a `Duration` (including infinity) wait forever.
    pub fn from_secs_f32(secs: f32) -> Self {
        if secs.is_nan() || secs == 0.0 {
            Timeout::Poll
        } else if secs < 0.0 {
            Timeout::Forever
        } else {
            Duration::try_from_secs_f32(secs).map_or(Timeout::Forever, Timeout::After)
        }
    }

    /// Absolute deadline, None when the wait is unbounded
    pub fn deadline(&self) -> Option<Instant> {
        match self {
            Timeout::Poll => Some(Instant::now()),
            Timeout::After(d) => Instant::now().checked_add(*d),
            Timeout::Forever => None,
        }
    }
}

/// Outcome of a step availability query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAvailability {
    /// Global step now readable
    Ready(u64),

    /// Timed out, try again later
    NotReady,

    /// Writers are gone and nothing is left for this reader
    EndOfStream,
}

/// Reader-side view of the communication substrate
pub trait Transport: Send {
    fn reader_rank(&self) -> usize;

    fn reader_count(&self) -> usize;

    fn writer_count(&self) -> usize;

    /// Distribution mode the producer side was configured with
    fn distribution_mode(&self) -> DistributionMode;

    /// Wait until global `step` is fully published
    fn wait_for_step(&self, step: u64, timeout: Timeout) -> Result<StepAvailability>;

    /// Claim the oldest published step nobody has claimed yet
    fn claim_next_step(&self, timeout: Timeout) -> Result<StepAvailability>;

    /// Metadata frames of a published step, one per writer in rank order
    fn step_metadata(&self, step: u64) -> Result<Vec<Bytes>>;

    /// Byte range of a writer's payload for a step
    fn fetch(&self, writer_rank: usize, step: u64, offset: u64, len: u64) -> Result<Bytes>;

    /// This reader is done with `step`
    fn release_step(&self, step: u64) -> Result<()>;

    /// This reader will make no further calls
    fn close(&self) -> Result<()>;
}
