//! Step Distribution Policy Module
//!
//! Decides which produced (global) step a reader rank receives next.
//!
//! ## Modes
//! - `Default`: every reader walks `0, 1, 2, ...`
//! - `RoundRobin`: reader r walks `r, r + R, r + 2R, ...`
//! - `OnDemand`: each BeginStep claims the oldest unclaimed published step
//!
//! In every mode, steps that were published before the writers closed are
//! delivered before `EndOfStream` is reported.

mod lockstep;
mod on_demand;
mod round_robin;

use crate::config::DistributionMode;
use crate::error::Result;
use crate::transport::{StepAvailability, Timeout, Transport};

pub use lockstep::LockstepPolicy;
pub use on_demand::OnDemandPolicy;
pub use round_robin::RoundRobinPolicy;

/// Assigns global steps to one reader rank
pub trait DistributionPolicy: Send {
    fn mode(&self) -> DistributionMode;

    /// Find (or wait for) the next step for this reader
    ///
    /// Must not advance internal state unless a step is returned.
    fn next_step(&mut self, transport: &dyn Transport, timeout: Timeout) -> Result<StepAvailability>;

    /// The reader consumed `step`
    fn release(&mut self, transport: &dyn Transport, step: u64) -> Result<()> {
        transport.release_step(step)
    }
}

/// Build the policy for a mode
pub fn for_mode(mode: DistributionMode, reader_rank: usize, reader_count: usize) -> Box<dyn DistributionPolicy> {
    match mode {
        DistributionMode::Default => Box::new(LockstepPolicy::new()),
        DistributionMode::RoundRobin => Box::new(RoundRobinPolicy::new(reader_rank, reader_count)),
        DistributionMode::OnDemand => Box::new(OnDemandPolicy::new()),
    }
}
