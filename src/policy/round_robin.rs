//! Round-robin distribution

use crate::config::DistributionMode;
use crate::error::Result;
use crate::transport::{StepAvailability, Timeout, Transport};

use super::DistributionPolicy;

/// Step k belongs to reader `k mod reader_count`
#[derive(Debug)]
pub struct RoundRobinPolicy {
    next: u64,
    stride: u64,
}

impl RoundRobinPolicy {
    pub fn new(reader_rank: usize, reader_count: usize) -> Self {
        Self {
            next: reader_rank as u64,
            stride: reader_count.max(1) as u64,
        }
    }
}

impl DistributionPolicy for RoundRobinPolicy {
    fn mode(&self) -> DistributionMode {
        DistributionMode::RoundRobin
    }

    fn next_step(&mut self, transport: &dyn Transport, timeout: Timeout) -> Result<StepAvailability> {
        // Only ever waits on a step this reader owns.
        let outcome = transport.wait_for_step(self.next, timeout)?;
        if let StepAvailability::Ready(step) = outcome {
            self.next = step + self.stride;
        }
        Ok(outcome)
    }
}
